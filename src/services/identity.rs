//! Device identity service
//!
//! Derives the player id once from hardware facts and caches it in the
//! config store, so later calls never touch the hardware again.

use crate::{
    config::RegistrationConfig,
    hardware::CpuInfoReader,
    probe::{InterfaceInfo, NetworkProbe},
    services::config_store::{ConfigPatch, ConfigStore},
};
use anyhow::{Context, Result};
use log::{debug, error, info};
use reqwest::Url;
use sha2::{Digest, Sha256};

/// Interfaces whose MAC address identifies the board, highest priority first
///
/// Fixed rather than configurable: changing it would change the derived id.
/// Also the default wired interface list of `ProbeConfig`.
pub const MAC_INTERFACE_PRIORITY: [&str; 4] = ["eth0", "en0", "Ethernet", "ens33"];

/// MAC used when no interface reports one
pub const FALLBACK_MAC: &str = "00:00:00:00:00:00";

const ID_LENGTH: usize = 16;

/// Service resolving the stable device id
pub struct IdentityService;

impl IdentityService {
    /// Return the cached device id or derive and cache it
    ///
    /// Preference order: board serial, hash of the MAC address of the
    /// preferred interface, hash of [`FALLBACK_MAC`]. Never fails.
    pub fn resolve<C, P>(store: &ConfigStore, cpu_info: &C, probe: &P) -> String
    where
        C: CpuInfoReader,
        P: NetworkProbe,
    {
        let cached = store.get().device_id;
        if !cached.is_empty() {
            debug!("using cached device id {cached}");
            return cached;
        }

        let device_id = match Self::board_serial(cpu_info) {
            Some(serial) => {
                info!("deriving device id from board serial");
                Self::id_from_serial(&serial)
            }
            None => {
                let mac = Self::mac_address(probe);
                info!("deriving device id from MAC {mac}");
                Self::id_from_mac(&mac)
            }
        };

        store.update(ConfigPatch::device_id(device_id.clone()));
        device_id
    }

    /// Registration link for `device_id`, the payload of the landing page QR code
    pub fn registration_url(config: &RegistrationConfig, device_id: &str) -> Result<Url> {
        let mut url = Url::parse(&config.url)
            .context(format!("failed to parse registration url {:?}", config.url))?;

        url.query_pairs_mut().append_pair("player_id", device_id);

        Ok(url)
    }

    /// Format the first 16 characters of a board serial as `xxxx-xxxx-xxxx-xxxx`
    ///
    /// Shorter serials are left padded with zeros.
    pub fn id_from_serial(serial: &str) -> String {
        let serial: Vec<char> = serial.trim().chars().collect();
        let padding = ID_LENGTH.saturating_sub(serial.len());

        let chars: String = std::iter::repeat_n('0', padding)
            .chain(serial.into_iter().take(ID_LENGTH - padding))
            .collect();

        Self::group(&chars)
    }

    /// Hash a MAC address and format the first 16 hex digits as `xxxx-xxxx-xxxx-xxxx`
    pub fn id_from_mac(mac: &str) -> String {
        let digest = format!("{:x}", Sha256::digest(mac.as_bytes()));
        Self::group(&digest[..ID_LENGTH])
    }

    fn board_serial<C: CpuInfoReader>(cpu_info: &C) -> Option<String> {
        match cpu_info.cpu_info() {
            Ok(info) => info.and_then(|info| info.serial().map(String::from)),
            Err(e) => {
                error!("failed to read cpu info: {e:#}");
                None
            }
        }
    }

    fn mac_address<P: NetworkProbe>(probe: &P) -> String {
        let interfaces = probe.interfaces().unwrap_or_else(|e| {
            error!("failed to read interfaces: {e:#}");
            Vec::new()
        });

        Self::preferred_mac(&interfaces).unwrap_or_else(|| FALLBACK_MAC.to_string())
    }

    /// MAC of the highest priority interface, else of the first physical one
    pub fn preferred_mac(interfaces: &[InterfaceInfo]) -> Option<String> {
        MAC_INTERFACE_PRIORITY
            .iter()
            .find_map(|name| {
                interfaces
                    .iter()
                    .find(|iface| iface.name == *name)
                    .and_then(InterfaceInfo::hardware_address)
            })
            .or_else(|| {
                interfaces
                    .iter()
                    .filter(|iface| !iface.is_loopback())
                    .find_map(InterfaceInfo::hardware_address)
            })
            .map(String::from)
    }

    fn group(chars: &str) -> String {
        chars
            .chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|chunk| chunk.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("-")
    }
}

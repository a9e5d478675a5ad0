use crate::services::identity::MAC_INTERFACE_PRIORITY;
use anyhow::{Context, Result};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// UI server configuration
    pub ui: UiConfig,

    /// File locations of persisted state and OS facts
    pub paths: PathConfig,

    /// Network health probe configuration
    pub probe: ProbeConfig,

    /// WiFi provisioning configuration
    pub wifi: WifiConfig,

    /// Registration server configuration
    pub registration: RegistrationConfig,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub config_file: PathBuf,
    pub cpuinfo_file: PathBuf,
    pub wpa_supplicant_file: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub dns_host: String,
    pub ping_host: String,
    pub ping_timeout: Duration,
    pub server_url: String,
    pub http_timeout: Duration,
    /// Interfaces considered wired, highest priority first
    ///
    /// Defaults to [`MAC_INTERFACE_PRIORITY`]. Overriding it leaves the MAC
    /// used for the device id unchanged, so the id stays stable.
    pub ethernet_interfaces: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct WifiConfig {
    pub interface: String,
    pub reconfigure_timeout: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct RegistrationConfig {
    pub url: String,
}

impl AppConfig {
    /// Load and validate all configuration from environment variables
    ///
    /// Every value has a default suitable for a Raspberry Pi style player,
    /// so an empty environment yields a working configuration. Values that are
    /// present but cannot be parsed are reported as errors.
    pub fn load() -> Result<Self> {
        let ui = UiConfig::load()?;
        let paths = PathConfig::load()?;
        let probe = ProbeConfig::load()?;
        let wifi = WifiConfig::load()?;
        let registration = RegistrationConfig::load()?;

        Ok(Self {
            ui,
            paths,
            probe,
            wifi,
            registration,
        })
    }
}

impl UiConfig {
    fn load() -> Result<Self> {
        let port = parse_var("UI_PORT", 5000)?;

        Ok(Self { port })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let config_file = env::var("CONFIG_FILE")
            .unwrap_or_else(|_| "/data/config.json".to_string())
            .into();

        let cpuinfo_file = env::var("CPUINFO_PATH")
            .unwrap_or_else(|_| "/proc/cpuinfo".to_string())
            .into();

        let wpa_supplicant_file = env::var("WPA_SUPPLICANT_CONF")
            .unwrap_or_else(|_| "/etc/wpa_supplicant/wpa_supplicant.conf".to_string())
            .into();

        Ok(Self {
            config_file,
            cpuinfo_file,
            wpa_supplicant_file,
        })
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            dns_host: "google.com".to_string(),
            ping_host: "8.8.8.8".to_string(),
            ping_timeout: Duration::from_secs(1),
            server_url: "https://acusign.pro".to_string(),
            http_timeout: Duration::from_secs(3),
            ethernet_interfaces: MAC_INTERFACE_PRIORITY.map(String::from).to_vec(),
        }
    }
}

impl ProbeConfig {
    fn load() -> Result<Self> {
        let defaults = Self::default();

        let dns_host = env::var("PROBE_DNS_HOST").unwrap_or(defaults.dns_host);
        let ping_host = env::var("PROBE_PING_HOST").unwrap_or(defaults.ping_host);
        let server_url = env::var("SERVER_URL").unwrap_or(defaults.server_url);
        let ping_timeout = Duration::from_secs(parse_var("PROBE_PING_TIMEOUT_SECS", 1)?);
        let http_timeout = Duration::from_secs(parse_var("PROBE_HTTP_TIMEOUT_SECS", 3)?);

        let ethernet_interfaces = match env::var("ETHERNET_INTERFACES") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => defaults.ethernet_interfaces,
        };

        Ok(Self {
            dns_host,
            ping_host,
            ping_timeout,
            server_url,
            http_timeout,
            ethernet_interfaces,
        })
    }
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            reconfigure_timeout: Duration::from_secs(10),
            poll_attempts: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WifiConfig {
    fn load() -> Result<Self> {
        let interface = env::var("WIFI_INTERFACE").unwrap_or_else(|_| "wlan0".to_string());
        let reconfigure_timeout =
            Duration::from_secs(parse_var("WIFI_RECONFIGURE_TIMEOUT_SECS", 10)?);
        let poll_attempts = parse_var("WIFI_POLL_ATTEMPTS", 10)?;
        let poll_interval = Duration::from_millis(parse_var("WIFI_POLL_INTERVAL_MS", 1000)?);

        Ok(Self {
            interface,
            reconfigure_timeout,
            poll_attempts,
            poll_interval,
        })
    }
}

impl RegistrationConfig {
    fn load() -> Result<Self> {
        let url = env::var("REGISTRATION_URL").unwrap_or_else(|_| "https://acusign.pro".to_string());

        Ok(Self { url })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .context(format!("failed to parse {name}: invalid format")),
        Err(_) => Ok(default),
    }
}

//! Network probe seam: interface table, DNS, ICMP, routing table and HTTP
//! reachability, each yielding plain facts rather than errors where possible.

use crate::{
    command::{CommandRunner, ShellCommand, SystemCommandRunner},
    http_client::http_client,
};
use anyhow::{Context, Result};
use log::{debug, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use reqwest::Client;
use std::{net::Ipv4Addr, path::PathBuf, time::Duration};
use trait_variant::make;

/// Routing flag marking a gateway route in `/proc/net/route`
const RTF_GATEWAY: u32 = 0x2;

/// One network interface with its bound IPv4 addresses and link-layer address
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub ipv4: Vec<Ipv4Addr>,
    pub mac: Option<String>,
}

impl InterfaceInfo {
    pub fn is_loopback(&self) -> bool {
        self.name == "lo" || (!self.ipv4.is_empty() && self.ipv4.iter().all(Ipv4Addr::is_loopback))
    }

    /// Link-layer address, unless missing or all zero
    pub fn hardware_address(&self) -> Option<&str> {
        self.mac
            .as_deref()
            .filter(|mac| mac.chars().any(|c| c.is_ascii_hexdigit() && c != '0'))
    }
}

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait NetworkProbe {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;
    async fn resolves(&self, host: &str) -> bool;
    async fn ping(&self, host: &str, timeout: Duration) -> bool;
    fn default_gateway(&self) -> Option<Ipv4Addr>;
    async fn http_status(&self, url: &str, timeout: Duration) -> Result<u16>;
}

/// [`NetworkProbe`] reading the live system state
#[derive(Clone)]
pub struct SystemNetworkProbe {
    client: Client,
    runner: SystemCommandRunner,
    route_table: PathBuf,
}

impl SystemNetworkProbe {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            runner: SystemCommandRunner,
            route_table: PathBuf::from("/proc/net/route"),
        })
    }

    fn ping_command(host: &str, timeout: Duration) -> ShellCommand {
        if cfg!(windows) {
            let millis = timeout.as_millis().max(1).to_string();
            ShellCommand::new("ping", ["-n", "1", "-w", millis.as_str(), host])
        } else {
            let secs = timeout.as_secs().max(1).to_string();
            ShellCommand::new("ping", ["-c", "1", "-W", secs.as_str(), host])
        }
    }
}

impl NetworkProbe for SystemNetworkProbe {
    fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let mut interfaces: Vec<InterfaceInfo> = Vec::new();

        for iface in NetworkInterface::show().context("failed to enumerate network interfaces")? {
            let index = match interfaces.iter().position(|known| known.name == iface.name) {
                Some(index) => index,
                None => {
                    interfaces.push(InterfaceInfo {
                        name: iface.name.clone(),
                        ..Default::default()
                    });
                    interfaces.len() - 1
                }
            };
            let entry = &mut interfaces[index];

            for addr in &iface.addr {
                if let Addr::V4(v4) = addr {
                    if !entry.ipv4.contains(&v4.ip) {
                        entry.ipv4.push(v4.ip);
                    }
                }
            }

            if entry.mac.is_none() {
                entry.mac = iface.mac_addr.filter(|mac| !mac.is_empty());
            }
        }

        debug!("interfaces: {interfaces:?}");
        Ok(interfaces)
    }

    async fn resolves(&self, host: &str) -> bool {
        match tokio::net::lookup_host((host, 80)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                debug!("failed to resolve {host}: {e}");
                false
            }
        }
    }

    async fn ping(&self, host: &str, timeout: Duration) -> bool {
        let command = Self::ping_command(host, timeout);

        // the tool enforces `timeout` itself, the extra second covers process start up
        match self.runner.run(&command, timeout + Duration::from_secs(1)).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("ping {host} failed: {e:#}");
                false
            }
        }
    }

    fn default_gateway(&self) -> Option<Ipv4Addr> {
        match std::fs::read_to_string(&self.route_table) {
            Ok(content) => parse_default_gateway(&content),
            Err(e) => {
                warn!("failed to read route table {:?}: {e}", self.route_table);
                None
            }
        }
    }

    async fn http_status(&self, url: &str, timeout: Duration) -> Result<u16> {
        let res = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .context(format!("failed to send GET request to {url}"))?;

        Ok(res.status().as_u16())
    }
}

/// Extract the default IPv4 gateway from a Linux `/proc/net/route` table
///
/// Addresses in the table are hex encoded in host byte order, which is
/// little endian on every platform the player ships on.
pub fn parse_default_gateway(route_table: &str) -> Option<Ipv4Addr> {
    route_table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [_iface, destination, gateway, flags, ..] = fields.as_slice() else {
            return None;
        };

        let flags = u32::from_str_radix(flags, 16).ok()?;
        if *destination != "00000000" || flags & RTF_GATEWAY == 0 {
            return None;
        }

        let gateway = u32::from_str_radix(gateway, 16).ok()?;
        Some(Ipv4Addr::from(gateway.to_le_bytes()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
wlan0\t0000A8C0\t00000000\t0001\t0\t0\t303\t00FFFFFF\t0\t0\t0
eth0\t00000000\t0101A8C0\t0003\t0\t0\t202\t00000000\t0\t0\t0
";

    #[test]
    fn parses_default_gateway_from_route_table() {
        assert_eq!(
            parse_default_gateway(ROUTE_TABLE),
            Some(Ipv4Addr::new(192, 168, 1, 1))
        );
    }

    #[test]
    fn no_default_route_yields_none() {
        let table = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
wlan0\t0000A8C0\t00000000\t0001\t0\t0\t303\t00FFFFFF\t0\t0\t0
";
        assert_eq!(parse_default_gateway(table), None);
        assert_eq!(parse_default_gateway(""), None);
    }

    #[test]
    fn loopback_detection() {
        let lo = InterfaceInfo {
            name: "lo".to_string(),
            ipv4: vec![Ipv4Addr::LOCALHOST],
            mac: Some("00:00:00:00:00:00".to_string()),
        };
        let eth0 = InterfaceInfo {
            name: "eth0".to_string(),
            ipv4: vec![Ipv4Addr::new(10, 0, 0, 2)],
            mac: Some("b8:27:eb:12:34:56".to_string()),
        };

        assert!(lo.is_loopback());
        assert!(!eth0.is_loopback());
    }

    #[test]
    fn all_zero_mac_is_not_a_hardware_address() {
        let iface = InterfaceInfo {
            name: "dummy0".to_string(),
            ipv4: vec![],
            mac: Some("00:00:00:00:00:00".to_string()),
        };
        assert_eq!(iface.hardware_address(), None);

        let iface = InterfaceInfo {
            mac: Some("b8:27:eb:12:34:56".to_string()),
            ..iface
        };
        assert_eq!(iface.hardware_address(), Some("b8:27:eb:12:34:56"));
    }

    #[test]
    fn ping_command_sends_a_single_echo() {
        let command = SystemNetworkProbe::ping_command("8.8.8.8", Duration::from_secs(1));

        assert_eq!(command.program, "ping");
        assert!(command.args.iter().any(|arg| arg == "1"));
        assert_eq!(command.args.last().map(String::as_str), Some("8.8.8.8"));
    }
}

use crate::{
    config::ProbeConfig,
    probe::{InterfaceInfo, NetworkProbe},
    services::config_store::{ConfigPatch, ConfigStore, ConnectionSnapshot, ServerStatus},
};
use log::{debug, error, warn};
use serde::Serialize;
use std::net::Ipv4Addr;

/// Local addresses plus the connection snapshot, as shown on the landing page
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NetworkReport {
    pub local_ips: Vec<Ipv4Addr>,
    pub connection: ConnectionSnapshot,
}

/// Service aggregating network health facts
pub struct NetworkStatusService;

impl NetworkStatusService {
    /// Probe the network and record the resulting snapshot in `store`
    ///
    /// The independent probes run concurrently. None of them fails, a failed
    /// check shows up as its status value instead.
    pub async fn snapshot<P: NetworkProbe>(
        store: &ConfigStore,
        probe: &P,
        config: &ProbeConfig,
    ) -> NetworkReport {
        let interfaces = Self::interfaces(probe);

        let (dns, ping, server) = tokio::join!(
            probe.resolves(&config.dns_host),
            probe.ping(&config.ping_host, config.ping_timeout),
            Self::server_status(probe, config),
        );

        let connection = ConnectionSnapshot {
            ethernet: Self::ethernet_up(&interfaces, &config.ethernet_interfaces).into(),
            dns: dns.into(),
            ping: ping.into(),
            dhcp: probe
                .default_gateway()
                .map(|gateway| gateway.to_string())
                .unwrap_or_else(|| ConnectionSnapshot::UNKNOWN_GATEWAY.to_string()),
            server,
        };

        debug!("connection snapshot: {connection:?}");

        store.update(ConfigPatch::connection(connection.clone()));

        NetworkReport {
            local_ips: Self::local_ips(&interfaces),
            connection,
        }
    }

    /// Non-loopback IPv4 addresses of all interfaces
    pub fn local_ips(interfaces: &[InterfaceInfo]) -> Vec<Ipv4Addr> {
        interfaces
            .iter()
            .filter(|iface| !iface.is_loopback())
            .flat_map(|iface| iface.ipv4.iter().copied())
            .filter(|ip| !ip.is_loopback())
            .collect()
    }

    /// Whether any of the named wired interfaces has an IPv4 address bound
    pub fn ethernet_up(interfaces: &[InterfaceInfo], ethernet_interfaces: &[String]) -> bool {
        interfaces
            .iter()
            .filter(|iface| ethernet_interfaces.contains(&iface.name))
            .any(|iface| !iface.ipv4.is_empty())
    }

    /// Whether the device holds any routable IPv4 address
    pub fn is_connected<P: NetworkProbe>(probe: &P) -> bool {
        match probe.interfaces() {
            Ok(interfaces) => !Self::local_ips(&interfaces).is_empty(),
            Err(e) => {
                error!("failed to check connectivity: {e:#}");
                false
            }
        }
    }

    fn interfaces<P: NetworkProbe>(probe: &P) -> Vec<InterfaceInfo> {
        probe.interfaces().unwrap_or_else(|e| {
            warn!("failed to enumerate interfaces: {e:#}");
            Vec::new()
        })
    }

    async fn server_status<P: NetworkProbe>(probe: &P, config: &ProbeConfig) -> ServerStatus {
        match probe.http_status(&config.server_url, config.http_timeout).await {
            Ok(code) => ServerStatus::from_http_status(code),
            Err(e) => {
                debug!("server {} not reachable: {e:#}", config.server_url);
                ServerStatus::NotConnected
            }
        }
    }
}

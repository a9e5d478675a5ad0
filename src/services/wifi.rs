//! WiFi provisioning
//!
//! Appends a network block to `wpa_supplicant.conf` and asks the supplicant
//! to reload it. The file is copied to `<file>.bak` first and restored from
//! there when the append or the reload fails.

use crate::{
    command::{CommandRunner, CommandTimeout, ShellCommand},
    config::WifiConfig,
    probe::NetworkProbe,
    services::{
        config_store::{ConfigPatch, ConfigStore},
        network::NetworkStatusService,
    },
};
use log::{debug, error, info, warn};
use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::sleep;

// ============================================================================
// Constants
// ============================================================================

pub const APPLIED_MESSAGE: &str = "WiFi settings updated. Reconfiguring WiFi...";

/// Networks reported on macOS, where scanning is not supported
pub const SAMPLE_NETWORKS: [&str; 3] = ["Home WiFi", "Guest Network", "Office WiFi"];

const SCAN_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WifiApplyError {
    #[error("SSID must not be empty")]
    EmptySsid,
    #[error("password must not contain line breaks")]
    PasswordLineBreak,
    #[error("WiFi configuration file not found.")]
    ConfigFileMissing(PathBuf),
    #[error("failed to back up {path:?}")]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to reconfigure WiFi: {0}")]
    Reconfigure(String),
    #[error("WiFi reconfigure did not finish within {}s", .0.as_secs())]
    ReconfigureTimeout(Duration),
}

impl WifiApplyError {
    /// Whether the request itself was invalid, as opposed to the device failing
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::EmptySsid | Self::PasswordLineBreak)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Service for WiFi provisioning operations
pub struct WifiService;

impl WifiService {
    /// Apply WiFi credentials to the supplicant configuration
    ///
    /// The credentials are recorded in `store` before the OS configuration is
    /// touched, so they survive a failed apply. Success means the change was
    /// submitted; use [`WifiService::wait_for_connection`] to see whether the
    /// device actually joined.
    pub async fn apply<R: CommandRunner>(
        store: &ConfigStore,
        runner: &R,
        config: &WifiConfig,
        wpa_supplicant_file: &Path,
        ssid: &str,
        password: &str,
    ) -> Result<&'static str, WifiApplyError> {
        Self::validate(ssid, password)?;

        store.update(ConfigPatch::wifi(ssid, password));

        let backup_file = Self::backup_path(wpa_supplicant_file);

        match Self::copy_if_exists(wpa_supplicant_file, &backup_file) {
            Ok(true) => debug!("backed up {wpa_supplicant_file:?} to {backup_file:?}"),
            Ok(false) => {
                error!("WiFi configuration file {wpa_supplicant_file:?} not found");
                return Err(WifiApplyError::ConfigFileMissing(
                    wpa_supplicant_file.to_path_buf(),
                ));
            }
            Err(source) => {
                return Err(WifiApplyError::Backup {
                    path: wpa_supplicant_file.to_path_buf(),
                    source,
                });
            }
        }

        let result = match Self::append_network_block(wpa_supplicant_file, ssid, password) {
            Ok(()) => Self::reconfigure(runner, config).await,
            Err(source) => Err(WifiApplyError::Write {
                path: wpa_supplicant_file.to_path_buf(),
                source,
            }),
        };

        if let Err(e) = &result {
            error!("applying WiFi settings failed: {e}");
            Self::rollback(&backup_file, wpa_supplicant_file);
        } else {
            info!("WiFi settings for {ssid:?} submitted");
        }

        result.map(|_| APPLIED_MESSAGE)
    }

    /// Poll until the device holds a routable address
    ///
    /// Checks up to `attempts` times, sleeping `interval` between checks, and
    /// stops at the first success.
    pub async fn wait_for_connection<P: NetworkProbe>(
        probe: &P,
        attempts: u32,
        interval: Duration,
    ) -> bool {
        for attempt in 1..=attempts {
            if NetworkStatusService::is_connected(probe) {
                info!("connected after {attempt} check(s)");
                return true;
            }

            if attempt < attempts {
                sleep(interval).await;
            }
        }

        warn!("not connected after {attempts} check(s)");
        false
    }

    /// SSIDs visible to the WiFi interface, de-duplicated in first-seen order
    ///
    /// A failed scan yields an empty list.
    pub async fn available_networks<R: CommandRunner>(
        runner: &R,
        config: &WifiConfig,
    ) -> Vec<String> {
        let command = if cfg!(target_os = "linux") {
            ShellCommand::new("sudo", ["iwlist", config.interface.as_str(), "scan"])
        } else if cfg!(target_os = "windows") {
            ShellCommand::new("netsh", ["wlan", "show", "networks", "mode=bssid"])
        } else if cfg!(target_os = "macos") {
            info!("returning sample networks on macOS");
            return SAMPLE_NETWORKS.map(String::from).to_vec();
        } else {
            warn!("WiFi scanning is not supported on this platform");
            return Vec::new();
        };

        match runner.run(&command, SCAN_TIMEOUT).await {
            Ok(output) if output.success() && cfg!(target_os = "windows") => {
                parse_netsh(&output.stdout)
            }
            Ok(output) if output.success() => parse_iwlist(&output.stdout),
            Ok(output) => {
                error!(
                    "WiFi scan failed with {:?}: {}",
                    output.exit_code,
                    output.stderr.trim()
                );
                Vec::new()
            }
            Err(e) => {
                error!("WiFi scan failed: {e:#}");
                Vec::new()
            }
        }
    }

    fn validate(ssid: &str, password: &str) -> Result<(), WifiApplyError> {
        if ssid.is_empty() {
            return Err(WifiApplyError::EmptySsid);
        }

        if password.contains(['\n', '\r']) {
            return Err(WifiApplyError::PasswordLineBreak);
        }

        Ok(())
    }

    /// Network block in `wpa_supplicant.conf` syntax
    ///
    /// SSIDs with quotes or control characters are written hex encoded, open
    /// networks get `key_mgmt=NONE` instead of a `psk`.
    pub fn network_block(ssid: &str, password: &str) -> String {
        let ssid = if ssid.contains(|c: char| c == '"' || c.is_control()) {
            ssid.bytes().map(|b| format!("{b:02x}")).collect::<String>()
        } else {
            format!("\"{ssid}\"")
        };

        let key = if password.is_empty() {
            "key_mgmt=NONE".to_string()
        } else {
            format!("psk=\"{password}\"")
        };

        format!("\nnetwork={{\n    ssid={ssid}\n    {key}\n}}\n")
    }

    fn backup_path(config_file: &Path) -> PathBuf {
        let mut backup = config_file.as_os_str().to_owned();
        backup.push(".bak");
        PathBuf::from(backup)
    }

    fn append_network_block(config_file: &Path, ssid: &str, password: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(config_file)?;
        file.write_all(Self::network_block(ssid, password).as_bytes())?;
        file.sync_all()
    }

    async fn reconfigure<R: CommandRunner>(
        runner: &R,
        config: &WifiConfig,
    ) -> Result<(), WifiApplyError> {
        let command = ShellCommand::new(
            "wpa_cli",
            ["-i", config.interface.as_str(), "reconfigure"],
        );

        match runner.run(&command, config.reconfigure_timeout).await {
            Ok(output) if output.success() && output.stdout.trim() != "FAIL" => Ok(()),
            Ok(output) if output.success() => Err(WifiApplyError::Reconfigure(format!(
                "{command} replied FAIL"
            ))),
            Ok(output) => {
                let reason = match output.stderr.trim() {
                    "" => format!("{command} exited with {:?}", output.exit_code),
                    stderr => stderr.to_string(),
                };
                Err(WifiApplyError::Reconfigure(reason))
            }
            Err(e) if e.downcast_ref::<CommandTimeout>().is_some() => Err(
                WifiApplyError::ReconfigureTimeout(config.reconfigure_timeout),
            ),
            Err(e) => Err(WifiApplyError::Reconfigure(format!("{e:#}"))),
        }
    }

    fn rollback(backup_file: &Path, config_file: &Path) {
        match Self::rename_if_exists(backup_file, config_file) {
            Ok(true) => info!("restored {config_file:?} from {backup_file:?}"),
            Ok(false) => warn!("no backup {backup_file:?} to restore"),
            Err(e) => error!("failed to restore {config_file:?}: {e}"),
        }
    }

    fn copy_if_exists(src: &Path, dest: &Path) -> io::Result<bool> {
        match fs::copy(src, dest) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn rename_if_exists(src: &Path, dest: &Path) -> io::Result<bool> {
        match fs::rename(src, dest) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Scan output parsers
// ============================================================================

/// Parse `iwlist <iface> scan` output (`ESSID:"name"` lines)
pub fn parse_iwlist(output: &str) -> Vec<String> {
    collect_unique(output.lines().filter_map(|line| {
        line.trim()
            .strip_prefix("ESSID:")
            .map(|essid| essid.trim().trim_matches('"'))
    }))
}

/// Parse `netsh wlan show networks mode=bssid` output (`SSID 1 : name` lines)
pub fn parse_netsh(output: &str) -> Vec<String> {
    collect_unique(output.lines().filter_map(|line| {
        let line = line.trim();
        if !line.starts_with("SSID ") {
            return None;
        }
        line.split_once(':').map(|(_, ssid)| ssid.trim())
    }))
}

fn collect_unique<'a>(ssids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut networks: Vec<String> = Vec::new();

    for ssid in ssids.filter(|ssid| !ssid.is_empty()) {
        if !networks.iter().any(|known| known == ssid) {
            networks.push(ssid.to_string());
        }
    }

    networks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{CommandOutput, MockCommandRunner},
        probe::{InterfaceInfo, MockNetworkProbe},
    };
    use std::{
        net::Ipv4Addr,
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
    };
    use tempfile::TempDir;

    const ORIGINAL_CONF: &str = "ctrl_interface=DIR=/var/run/wpa_supplicant GROUP=netdev\nupdate_config=1\ncountry=CH\n";

    struct Fixture {
        _dir: TempDir,
        store: ConfigStore,
        conf: PathBuf,
    }

    impl Fixture {
        fn new(with_conf: bool) -> Self {
            let dir = TempDir::new().unwrap();
            let store = ConfigStore::load(dir.path().join("config.json"));
            let conf = dir.path().join("wpa_supplicant.conf");
            if with_conf {
                fs::write(&conf, ORIGINAL_CONF).unwrap();
            }
            Self {
                _dir: dir,
                store,
                conf,
            }
        }

        fn backup(&self) -> PathBuf {
            WifiService::backup_path(&self.conf)
        }
    }

    fn runner_returning(exit_code: i32, stderr: &'static str) -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(move |_, _| {
            Box::pin(async move {
                Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                    exit_code: Some(exit_code),
                })
            })
        });
        runner
    }

    mod apply {
        use super::*;

        #[tokio::test]
        async fn appends_block_and_reconfigures() {
            let fixture = Fixture::new(true);
            let mut runner = MockCommandRunner::new();
            runner
                .expect_run()
                .withf(|command, _| command.to_string() == "wpa_cli -i wlan0 reconfigure")
                .times(1)
                .returning(|_, _| {
                    Box::pin(async {
                        Ok(CommandOutput {
                            stdout: "OK\n".to_string(),
                            exit_code: Some(0),
                            ..Default::default()
                        })
                    })
                });

            let message = WifiService::apply(
                &fixture.store,
                &runner,
                &WifiConfig::default(),
                &fixture.conf,
                "HomeNet",
                "secret123",
            )
            .await
            .unwrap();

            assert_eq!(message, APPLIED_MESSAGE);
            let conf = fs::read_to_string(&fixture.conf).unwrap();
            assert!(conf.starts_with(ORIGINAL_CONF));
            assert!(conf.ends_with(
                "\nnetwork={\n    ssid=\"HomeNet\"\n    psk=\"secret123\"\n}\n"
            ));
            assert_eq!(fs::read_to_string(fixture.backup()).unwrap(), ORIGINAL_CONF);

            let wifi = fixture.store.get().wifi.unwrap();
            assert_eq!(wifi.ssid, "HomeNet");
            assert_eq!(wifi.password, "secret123");
        }

        #[tokio::test]
        async fn missing_config_file_writes_no_backup() {
            let fixture = Fixture::new(false);
            let mut runner = MockCommandRunner::new();
            runner.expect_run().never();

            let err = WifiService::apply(
                &fixture.store,
                &runner,
                &WifiConfig::default(),
                &fixture.conf,
                "HomeNet",
                "secret123",
            )
            .await
            .unwrap_err();

            assert!(matches!(err, WifiApplyError::ConfigFileMissing(_)));
            assert_eq!(err.to_string(), "WiFi configuration file not found.");
            assert!(!fixture.backup().exists());
            assert!(!fixture.conf.exists());
            assert_eq!(fixture.store.get().wifi.unwrap().ssid, "HomeNet");
        }

        #[tokio::test]
        async fn failed_reconfigure_restores_original_file() {
            let fixture = Fixture::new(true);
            let runner = runner_returning(255, "Failed to connect to non-global ctrl_ifname");

            let err = WifiService::apply(
                &fixture.store,
                &runner,
                &WifiConfig::default(),
                &fixture.conf,
                "HomeNet",
                "secret123",
            )
            .await
            .unwrap_err();

            assert!(matches!(err, WifiApplyError::Reconfigure(_)), "{err}");
            assert_eq!(fs::read_to_string(&fixture.conf).unwrap(), ORIGINAL_CONF);
            assert!(!fixture.backup().exists());
            assert_eq!(fixture.store.get().wifi.unwrap().ssid, "HomeNet");
        }

        #[tokio::test]
        async fn fail_reply_with_zero_exit_rolls_back() {
            let fixture = Fixture::new(true);
            let mut runner = MockCommandRunner::new();
            runner.expect_run().returning(|_, _| {
                Box::pin(async {
                    Ok(CommandOutput {
                        stdout: "FAIL\n".to_string(),
                        exit_code: Some(0),
                        ..Default::default()
                    })
                })
            });

            let err = WifiService::apply(
                &fixture.store,
                &runner,
                &WifiConfig::default(),
                &fixture.conf,
                "HomeNet",
                "secret123",
            )
            .await
            .unwrap_err();

            assert!(matches!(err, WifiApplyError::Reconfigure(_)), "{err}");
            assert_eq!(fs::read_to_string(&fixture.conf).unwrap(), ORIGINAL_CONF);
            assert!(!fixture.backup().exists());
        }

        #[tokio::test]
        async fn reconfigure_timeout_rolls_back() {
            let fixture = Fixture::new(true);
            let mut runner = MockCommandRunner::new();
            runner.expect_run().returning(|command, timeout| {
                let command = command.to_string();
                Box::pin(async move { Err(anyhow::Error::new(CommandTimeout { command, timeout })) })
            });

            let err = WifiService::apply(
                &fixture.store,
                &runner,
                &WifiConfig::default(),
                &fixture.conf,
                "HomeNet",
                "secret123",
            )
            .await
            .unwrap_err();

            assert!(matches!(err, WifiApplyError::ReconfigureTimeout(_)), "{err}");
            assert_eq!(fs::read_to_string(&fixture.conf).unwrap(), ORIGINAL_CONF);
        }

        #[tokio::test]
        async fn empty_ssid_is_rejected_before_anything_happens() {
            let fixture = Fixture::new(true);
            let mut runner = MockCommandRunner::new();
            runner.expect_run().never();

            let err = WifiService::apply(
                &fixture.store,
                &runner,
                &WifiConfig::default(),
                &fixture.conf,
                "",
                "secret123",
            )
            .await
            .unwrap_err();

            assert!(matches!(err, WifiApplyError::EmptySsid));
            assert!(err.is_invalid_input());
            assert_eq!(fixture.store.get().wifi.unwrap().ssid, "");
            assert!(!fixture.backup().exists());
        }

        #[tokio::test]
        async fn password_line_break_is_rejected() {
            let fixture = Fixture::new(true);
            let runner = MockCommandRunner::new();

            let err = WifiService::apply(
                &fixture.store,
                &runner,
                &WifiConfig::default(),
                &fixture.conf,
                "HomeNet",
                "secret\nnetwork={",
            )
            .await
            .unwrap_err();

            assert!(matches!(err, WifiApplyError::PasswordLineBreak));
            assert_eq!(fs::read_to_string(&fixture.conf).unwrap(), ORIGINAL_CONF);
        }

        #[test]
        fn unquotable_ssid_is_hex_encoded() {
            assert_eq!(
                WifiService::network_block("Home\"Net", "secret123"),
                "\nnetwork={\n    ssid=486f6d65224e6574\n    psk=\"secret123\"\n}\n"
            );
        }

        #[test]
        fn open_network_has_no_psk() {
            assert_eq!(
                WifiService::network_block("Cafe", ""),
                "\nnetwork={\n    ssid=\"Cafe\"\n    key_mgmt=NONE\n}\n"
            );
        }
    }

    mod wait_for_connection {
        use super::*;

        fn probe_connecting_on(check: u32, counter: Arc<AtomicU32>) -> MockNetworkProbe {
            let mut probe = MockNetworkProbe::new();
            probe.expect_interfaces().returning(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let ipv4 = if n >= check {
                    vec![Ipv4Addr::new(192, 168, 4, 2)]
                } else {
                    vec![]
                };
                Ok(vec![InterfaceInfo {
                    name: "wlan0".to_string(),
                    ipv4,
                    mac: None,
                }])
            });
            probe
        }

        #[tokio::test]
        async fn succeeds_on_fourth_check() {
            let counter = Arc::new(AtomicU32::new(0));
            let probe = probe_connecting_on(4, counter.clone());

            assert!(WifiService::wait_for_connection(&probe, 10, Duration::from_millis(1)).await);
            assert_eq!(counter.load(Ordering::SeqCst), 4);
        }

        #[tokio::test]
        async fn gives_up_after_all_attempts() {
            let counter = Arc::new(AtomicU32::new(0));
            let probe = probe_connecting_on(u32::MAX, counter.clone());

            assert!(!WifiService::wait_for_connection(&probe, 3, Duration::from_millis(1)).await);
            assert_eq!(counter.load(Ordering::SeqCst), 3);
        }
    }

    mod scan {
        use super::*;

        #[test]
        fn iwlist_essids_are_unique_in_order() {
            let output = r#"wlan0     Scan completed :
          Cell 01 - Address: 11:22:33:44:55:66
                    ESSID:"HomeNet"
          Cell 02 - Address: 11:22:33:44:55:67
                    ESSID:""
          Cell 03 - Address: 11:22:33:44:55:68
                    ESSID:"Office"
          Cell 04 - Address: 11:22:33:44:55:69
                    ESSID:"HomeNet"
"#;

            assert_eq!(parse_iwlist(output), vec!["HomeNet", "Office"]);
        }

        #[test]
        fn netsh_ignores_bssid_lines() {
            let output = "\
Interface name : Wi-Fi
There are 2 networks currently visible.

SSID 1 : HomeNet
    Network type            : Infrastructure
    BSSID 1                 : 11:22:33:44:55:66
SSID 2 : Guest
    BSSID 1                 : 11:22:33:44:55:67
SSID 3 : HomeNet
";

            assert_eq!(parse_netsh(output), vec!["HomeNet", "Guest"]);
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn failed_scan_yields_no_networks() {
            let runner = runner_returning(1, "Interface doesn't support scanning");

            assert!(
                WifiService::available_networks(&runner, &WifiConfig::default())
                    .await
                    .is_empty()
            );
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn scan_uses_configured_interface() {
            let mut runner = MockCommandRunner::new();
            runner
                .expect_run()
                .withf(|command, _| command.to_string() == "sudo iwlist wlan1 scan")
                .returning(|_, _| {
                    Box::pin(async {
                        Ok(CommandOutput {
                            stdout: "ESSID:\"Lab\"\n".to_string(),
                            exit_code: Some(0),
                            ..Default::default()
                        })
                    })
                });
            let config = WifiConfig {
                interface: "wlan1".to_string(),
                ..Default::default()
            };

            assert_eq!(
                WifiService::available_networks(&runner, &config).await,
                vec!["Lab"]
            );
        }
    }
}

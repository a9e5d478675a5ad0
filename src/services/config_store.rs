//! Durable configuration record of the player
//!
//! A single JSON file holds the device id, the last requested WiFi
//! credentials and the last observed connection snapshot. The file is the
//! only source of truth; [`ConfigStore`] caches it in memory and writes it
//! back whenever a mutation actually changes something.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use log::{error, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    fmt,
    fs::File,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Mutex, MutexGuard, PoisonError},
};

// ============================================================================
// Record
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EthernetStatus {
    #[serde(rename = "UP")]
    Up,
    #[default]
    #[serde(rename = "DOWN")]
    Down,
}

impl From<bool> for EthernetStatus {
    fn from(up: bool) -> Self {
        if up { Self::Up } else { Self::Down }
    }
}

impl fmt::Display for EthernetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    #[serde(rename = "OK")]
    Ok,
    #[default]
    #[serde(rename = "FAIL")]
    Fail,
}

impl From<bool> for ProbeStatus {
    fn from(ok: bool) -> Self {
        if ok { Self::Ok } else { Self::Fail }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// Reachability of the registration server, stored as `Connected`,
/// `HTTP <code>` or `Not Connected`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ServerStatus {
    Connected,
    Http(u16),
    #[default]
    NotConnected,
}

impl ServerStatus {
    pub fn from_http_status(code: u16) -> Self {
        if code == 200 {
            Self::Connected
        } else {
            Self::Http(code)
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::Http(code) => write!(f, "HTTP {code}"),
            Self::NotConnected => write!(f, "Not Connected"),
        }
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Connected" => Ok(Self::Connected),
            "Not Connected" => Ok(Self::NotConnected),
            other => other
                .strip_prefix("HTTP ")
                .and_then(|code| code.trim().parse::<u16>().ok())
                .map(Self::Http)
                .ok_or_else(|| format!("invalid server status: {other:?}")),
        }
    }
}

impl TryFrom<String> for ServerStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServerStatus> for String {
    fn from(status: ServerStatus) -> Self {
        status.to_string()
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Point-in-time bundle of network health facts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSnapshot {
    pub ethernet: EthernetStatus,
    pub dns: ProbeStatus,
    pub ping: ProbeStatus,
    /// Default gateway address or `Unknown`
    pub dhcp: String,
    pub server: ServerStatus,
}

impl ConnectionSnapshot {
    pub const UNKNOWN_GATEWAY: &'static str = "Unknown";
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            ethernet: EthernetStatus::Down,
            dns: ProbeStatus::Fail,
            ping: ProbeStatus::Fail,
            dhcp: Self::UNKNOWN_GATEWAY.to_string(),
            server: ServerStatus::NotConnected,
        }
    }
}

/// The persisted configuration record
///
/// `wifi` and `connection` are optional so that a record recovered from a
/// corrupt file stays blank until something is written into it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    #[serde(default, alias = "player_id")]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi: Option<WifiCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionSnapshot>,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Local>>,
}

/// Accept RFC 3339 timestamps as well as offset-less ones in local time
///
/// A timestamp in neither form is dropped, the rest of the record is kept.
fn deserialize_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Local>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(text) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&text) {
        return Ok(Some(timestamp.with_timezone(&Local)));
    }

    match text.parse::<NaiveDateTime>() {
        Ok(naive) => Ok(naive.and_local_timezone(Local).earliest()),
        Err(e) => {
            warn!("ignoring unreadable updated_at {text:?}: {e}");
            Ok(None)
        }
    }
}

impl ConfigRecord {
    /// Record written on first start: no id, no credentials, everything down
    pub fn initial() -> Self {
        Self {
            device_id: String::new(),
            wifi: Some(WifiCredentials::default()),
            connection: Some(ConnectionSnapshot::default()),
            updated_at: None,
        }
    }

    pub fn is_blank(&self) -> bool {
        self == &Self::default()
    }

    /// Apply every field of `patch` that differs from the current value
    ///
    /// Returns whether anything changed. A non-empty device id is never
    /// replaced. `updated_at` is left to the caller.
    pub fn apply(&mut self, patch: ConfigPatch) -> bool {
        let mut changed = false;

        if let Some(device_id) = patch.device_id {
            if self.device_id.is_empty() {
                changed |= set_field(&mut self.device_id, Some(device_id));
            } else if self.device_id != device_id {
                warn!(
                    "ignoring device id {device_id:?}: already set to {:?}",
                    self.device_id
                );
            }
        }

        if !patch.wifi.is_empty() {
            changed |= self.wifi.is_none();
            let wifi = self.wifi.get_or_insert_with(WifiCredentials::default);
            changed |= set_field(&mut wifi.ssid, patch.wifi.ssid);
            changed |= set_field(&mut wifi.password, patch.wifi.password);
        }

        if !patch.connection.is_empty() {
            changed |= self.connection.is_none();
            let connection = self
                .connection
                .get_or_insert_with(ConnectionSnapshot::default);
            let ConnectionPatch {
                ethernet,
                dns,
                ping,
                dhcp,
                server,
            } = patch.connection;
            changed |= set_field(&mut connection.ethernet, ethernet);
            changed |= set_field(&mut connection.dns, dns);
            changed |= set_field(&mut connection.ping, ping);
            changed |= set_field(&mut connection.dhcp, dhcp);
            changed |= set_field(&mut connection.server, server);
        }

        changed
    }
}

fn set_field<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) if *slot != value => {
            *slot = value;
            true
        }
        _ => false,
    }
}

// ============================================================================
// Patches
// ============================================================================

/// Partial update of a [`ConfigRecord`]
///
/// `None` leaves a field untouched, `Some` sets it, `Some(String::new())`
/// explicitly clears a text field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub device_id: Option<String>,
    pub wifi: WifiPatch,
    pub connection: ConnectionPatch,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct WifiPatch {
    pub ssid: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for WifiPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiPatch")
            .field("ssid", &self.ssid)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionPatch {
    pub ethernet: Option<EthernetStatus>,
    pub dns: Option<ProbeStatus>,
    pub ping: Option<ProbeStatus>,
    pub dhcp: Option<String>,
    pub server: Option<ServerStatus>,
}

impl ConfigPatch {
    pub fn device_id(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    pub fn wifi(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            wifi: WifiPatch {
                ssid: Some(ssid.into()),
                password: Some(password.into()),
            },
            ..Default::default()
        }
    }

    pub fn connection(connection: impl Into<ConnectionPatch>) -> Self {
        Self {
            connection: connection.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.device_id.is_none() && self.wifi.is_empty() && self.connection.is_empty()
    }
}

impl WifiPatch {
    pub fn is_empty(&self) -> bool {
        self.ssid.is_none() && self.password.is_none()
    }
}

impl ConnectionPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl From<ConnectionSnapshot> for ConnectionPatch {
    fn from(snapshot: ConnectionSnapshot) -> Self {
        Self {
            ethernet: Some(snapshot.ethernet),
            dns: Some(snapshot.dns),
            ping: Some(snapshot.ping),
            dhcp: Some(snapshot.dhcp),
            server: Some(snapshot.server),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// File backed store of the [`ConfigRecord`]
///
/// Constructed once at start up and shared by reference. Every
/// load-modify-persist sequence runs under one lock.
pub struct ConfigStore {
    path: PathBuf,
    record: Mutex<ConfigRecord>,
}

impl ConfigStore {
    /// Load the record from `path`
    ///
    /// A missing file is created with [`ConfigRecord::initial`]. A file that
    /// cannot be read or parsed is left untouched and the store starts blank.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let record = match Self::read(&path) {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("config file {path:?} not found, creating a new one");
                let record = ConfigRecord::initial();
                Self::persist(&path, &record);
                record
            }
            Err(e) => {
                error!("failed to load config, continuing with empty config: {e:#}");
                ConfigRecord::default()
            }
        };

        Self {
            path,
            record: Mutex::new(record),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory record
    pub fn get(&self) -> ConfigRecord {
        self.lock().clone()
    }

    /// Apply a partial update and persist it if anything changed
    ///
    /// `updated_at` is stamped only together with an actual change, so a
    /// repeated identical update neither stamps nor writes.
    pub fn update(&self, patch: ConfigPatch) -> bool {
        if patch.is_empty() {
            warn!("no new data provided for update");
            return false;
        }

        info!("updating config with: {patch:?}");

        let mut record = self.lock();

        if !record.apply(patch) {
            info!("no changes detected in config data");
            return false;
        }

        record.updated_at = Some(Local::now());
        Self::persist(&self.path, &record);
        true
    }

    /// Stamp `updated_at` and persist unconditionally
    pub fn touch(&self) {
        let mut record = self.lock();
        record.updated_at = Some(Local::now());
        Self::persist(&self.path, &record);
    }

    /// Replace the record and persist it
    ///
    /// A stored non-empty device id survives a record carrying another one.
    pub fn save(&self, mut new_record: ConfigRecord) {
        let mut record = self.lock();

        if !record.device_id.is_empty() && new_record.device_id != record.device_id {
            warn!(
                "ignoring device id {:?}: already set to {:?}",
                new_record.device_id, record.device_id
            );
            new_record.device_id = record.device_id.clone();
        }

        *record = new_record;
        Self::persist(&self.path, &record);
    }

    fn lock(&self) -> MutexGuard<'_, ConfigRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(path: &Path) -> Result<Option<ConfigRecord>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("failed to read config file {path:?}")),
        };

        serde_json::from_str(&content)
            .map(Some)
            .context(format!("failed to decode JSON from {path:?}"))
    }

    /// Write `record` to `path`, logging instead of propagating failures
    fn persist(path: &Path, record: &ConfigRecord) {
        if record.is_blank() {
            info!("not saving config, the config data is empty");
            return;
        }

        match Self::write(path, record) {
            Ok(()) => info!("config saved to {path:?}"),
            Err(e) => error!("failed to save config to {path:?}: {e:#}"),
        }
    }

    fn write(path: &Path, record: &ConfigRecord) -> Result<()> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }

        let json = serde_json::to_string_pretty(record).context("failed to serialize config")?;
        let temp_file_path = path.with_extension("tmp");

        let mut file =
            File::create(&temp_file_path).context("failed to create temp config file")?;
        file.write_all(json.as_bytes())
            .context("failed to write config file")?;
        file.sync_all().context("failed to sync config file")?;

        std::fs::rename(&temp_file_path, path).context("failed to replace config file")
    }
}

//! Processor descriptor facts (`/proc/cpuinfo`).

use anyhow::{Context, Result};
use log::warn;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{collections::BTreeMap, io::ErrorKind, path::PathBuf};

/// Parsed processor descriptor
///
/// Keys before the first `processor` line (and between blocks on ARM boards,
/// where `Serial` is listed after the per-core blocks) are board wide.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuInfo {
    pub processors: Vec<BTreeMap<String, String>>,
    pub revision: Option<String>,
    pub serial: Option<String>,
    pub model: Option<String>,
}

impl CpuInfo {
    pub fn parse(content: &str) -> Self {
        let mut info = CpuInfo::default();
        let mut current: Option<BTreeMap<String, String>> = None;

        for line in content.lines().map(str::trim) {
            if line.is_empty() {
                if let Some(block) = current.take().filter(|block| !block.is_empty()) {
                    info.processors.push(block);
                }
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            if key.eq_ignore_ascii_case("processor") {
                if let Some(block) = current.take() {
                    info.processors.push(block);
                }
                current = Some(BTreeMap::new());
            }

            match current.as_mut() {
                Some(block) => {
                    block.insert(key.to_string(), value.to_string());
                }
                None => match key {
                    "Revision" => info.revision = Some(value.to_string()),
                    "Serial" => info.serial = Some(value.to_string()),
                    "Model" => info.model = Some(value.to_string()),
                    _ => {}
                },
            }
        }

        if let Some(block) = current.filter(|block| !block.is_empty()) {
            info.processors.push(block);
        }

        info
    }

    /// Board serial, if reported and not blank
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref().filter(|serial| !serial.is_empty())
    }
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait CpuInfoReader {
    /// Read the processor descriptor; `None` when the platform has none
    fn cpu_info(&self) -> Result<Option<CpuInfo>>;
}

/// Reads the processor descriptor from a file such as `/proc/cpuinfo`
#[derive(Clone, Debug)]
pub struct ProcCpuInfo {
    path: PathBuf,
}

impl ProcCpuInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CpuInfoReader for ProcCpuInfo {
    fn cpu_info(&self) -> Result<Option<CpuInfo>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(CpuInfo::parse(&content))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("cpu info file {:?} does not exist", self.path);
                Ok(None)
            }
            Err(e) => Err(e).context(format!("failed to read cpu info {:?}", self.path)),
        }
    }
}

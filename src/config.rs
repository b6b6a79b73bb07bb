use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upper bound applied to any requested probe concurrency.
pub const MAX_CONCURRENT_PROBES: usize = 5_000;

/// Scanner settings passed explicitly to the controller and the front ends.
///
/// Every field has a default, so a config file only needs the keys it overrides:
///
/// ```json
/// { "timeout_ms": 250, "concurrency": 500 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Per-port connect timeout used inside the scan loop.
    pub timeout_ms: u64,
    /// Max probes in flight at once.
    pub concurrency: usize,
    /// Timeout of the advisory reachability check.
    pub reachability_timeout_ms: u64,
    /// Port the reachability check connects to.
    pub reachability_port: u16,
    /// Target used when none is given and no local address can be detected.
    pub default_host: String,
    pub default_start_port: u16,
    pub default_end_port: u16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 100,
            concurrency: 100,
            reachability_timeout_ms: 1_000,
            reachability_port: 80,
            default_host: "127.0.0.1".into(),
            default_start_port: 1,
            default_end_port: 1024,
        }
    }
}

impl ScanConfig {
    /// Load a config from a JSON file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("invalid config file: {}", path.as_ref().display()))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn per_port_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }
}

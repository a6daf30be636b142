use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// What the host does with an instance after one of its hooks fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Log the fault and keep delivering hooks.
    #[default]
    Continue,
    /// Log the fault and stop delivering updates to that instance.
    Suspend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "HostConfig::default_max_dispatch_depth")]
    pub max_dispatch_depth: usize,
    #[serde(default = "HostConfig::default_max_operations")]
    pub max_operations: u64,
    #[serde(default)]
    pub fault_policy: FaultPolicy,
    #[serde(default)]
    pub deterministic_seed: Option<u64>,
    #[serde(default)]
    pub key_bindings: Option<PathBuf>,
}

impl HostConfig {
    const fn default_max_dispatch_depth() -> usize {
        8
    }

    const fn default_max_operations() -> u64 {
        1_000_000
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read host config {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse host config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(error = ?err, "host_config_fallback_to_defaults");
                Self::default()
            }
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_dispatch_depth: Self::default_max_dispatch_depth(),
            max_operations: Self::default_max_operations(),
            fault_policy: FaultPolicy::default(),
            deterministic_seed: None,
            key_bindings: None,
        }
    }
}

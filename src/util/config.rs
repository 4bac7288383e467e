//! Bridge configuration
//!
//! Tunables for the dispatch workers and the parallel pool. Every field has
//! a default, so `BridgeConfig::default()` is a working configuration and a
//! config file only needs the fields it overrides.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Runtime tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Threads draining the asynchronous dispatch queue
    pub async_workers: usize,
    /// Upper bound on workers a single `parallel_map` may spawn
    pub max_pool_workers: usize,
    /// Deadline applied to calls that do not set one; `None` means calls
    /// may run unbounded
    pub default_deadline_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            async_workers: 4,
            max_pool_workers: 8,
            default_deadline_ms: None,
        }
    }
}

impl BridgeConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("cannot parse config file {}", path.display()))
    }
}

//! Adapter configuration, read from JSON or from the environment.
//!
//! * `OPSHIM_KERNEL_CACHE`: kernel cache capacity per adapter (default 8).
//! * `OPSHIM_VERIFY_DISPATCH`: re-dispatch on cache hits and fail when the dispatcher
//!   now picks a different kernel (default off).

use std::env;
use std::sync::OnceLock;

use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_KERNEL_CACHE_CAPACITY: usize = 8;

static GLOBAL_CONFIG: OnceLock<BridgeConfig> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Distinct stack signatures each adapter remembers a kernel for.
    pub kernel_cache_capacity: usize,
    pub verify_cached_kernels: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            kernel_cache_capacity: DEFAULT_KERNEL_CACHE_CAPACITY,
            verify_cached_kernels: false,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.kernel_cache_capacity > 0,
            "kernel cache capacity must be greater than zero"
        );
        Ok(())
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads overrides from the environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = BridgeConfig::default();
        if let Some(value) = lookup("OPSHIM_KERNEL_CACHE").filter(|v| !v.trim().is_empty()) {
            config.kernel_cache_capacity = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid OPSHIM_KERNEL_CACHE value: {}", value))?;
        }
        if let Some(value) = lookup("OPSHIM_VERIFY_DISPATCH").filter(|v| !v.trim().is_empty()) {
            config.verify_cached_kernels = parse_bool(&value);
        }
        config.validate()?;
        Ok(config)
    }

    /// Environment configuration memoized for the process; falls back to defaults
    /// (with a warning) when the environment holds invalid values.
    pub fn global() -> BridgeConfig {
        *GLOBAL_CONFIG.get_or_init(|| match BridgeConfig::from_env() {
            Ok(config) => config,
            Err(err) => {
                log::warn!("ignoring opshim environment configuration: {err:#}");
                BridgeConfig::default()
            }
        })
    }
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

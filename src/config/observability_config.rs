//! Observability configuration parsing from environment variables.

use anyhow::Result;

use super::{parse_bool, parse_u64};

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    /// Seconds between pushed metrics snapshots.
    pub interval_secs: u64,
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: parse_bool("OBSERVABILITY_ENABLED", true),
            interval_secs: parse_u64("OBSERVABILITY_INTERVAL", 60)?,
        })
    }
}

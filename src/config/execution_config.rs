//! Execution engine configuration parsing from environment variables.

use anyhow::Result;

use super::{parse_f64, parse_u32, parse_u64};

#[derive(Debug, Clone)]
pub struct ExecutionEnvConfig {
    /// Placement call budget. A broker submit exceeding this fails with
    /// EXECUTION_TIMEOUT and the order stays SUBMITTED for reconciliation.
    pub timeout_millis: u64,
    pub max_retries: u32,
    pub retry_delay_millis: u64,
    pub status_poll_interval_millis: u64,
    pub max_status_polls: u32,
    pub status_check_timeout_millis: u64,
    pub cancel_timeout_millis: u64,
    /// Fill-rate percentage at or above which a partial fill is accepted
    /// as success instead of surfacing PARTIAL_FILL.
    pub partial_fill_accept_pct: f64,
}

impl ExecutionEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            timeout_millis: parse_u64("EXECUTION_TIMEOUT_MILLIS", 30_000)?,
            max_retries: parse_u32("EXECUTION_MAX_RETRIES", 3)?,
            retry_delay_millis: parse_u64("EXECUTION_RETRY_DELAY_MILLIS", 1_000)?,
            status_poll_interval_millis: parse_u64("EXECUTION_STATUS_POLL_INTERVAL_MILLIS", 5_000)?,
            max_status_polls: parse_u32("EXECUTION_MAX_STATUS_POLLS", 12)?,
            status_check_timeout_millis: parse_u64("EXECUTION_STATUS_CHECK_TIMEOUT_MILLIS", 15_000)?,
            cancel_timeout_millis: parse_u64("EXECUTION_CANCEL_TIMEOUT_MILLIS", 15_000)?,
            partial_fill_accept_pct: parse_f64("PARTIAL_FILL_ACCEPT_PCT", 50.0)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_defaults() {
        let config = ExecutionEnvConfig::from_env().expect("Should parse with defaults");
        assert_eq!(config.timeout_millis, 30_000);
        assert_eq!(config.max_status_polls, 12);
        assert_eq!(config.status_poll_interval_millis, 5_000);
        assert_eq!(config.partial_fill_accept_pct, 50.0);
    }
}

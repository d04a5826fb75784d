//! Configuration module for tradegate.
//!
//! Structured configuration loading from environment variables, organised
//! by domain: execution, risk, circuit breakers, outbound services, and
//! observability.

mod breaker_config;
mod execution_config;
mod observability_config;
mod risk_env_config;
mod services_config;

pub use breaker_config::{BreakerEnvConfig, BreakerSettings};
pub use execution_config::ExecutionEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use risk_env_config::RiskEnvConfig;
pub use services_config::{BrokerSpec, ServicesEnvConfig};

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Application execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// All adapters talk to their real HTTP services.
    Live,
    /// In-process mock adapters; used by tests and local development.
    Mock,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "mock" => Ok(Mode::Mock),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'live' or 'mock'", s),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub database_url: String,
    pub execution: ExecutionEnvConfig,
    pub risk: RiskEnvConfig,
    pub breakers: BreakerEnvConfig,
    pub services: ServicesEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode = env::var("MODE")
            .unwrap_or_else(|_| "mock".to_string())
            .parse::<Mode>()
            .context("Failed to parse MODE")?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/tradegate.db".to_string());

        Ok(Self {
            mode,
            database_url,
            execution: ExecutionEnvConfig::from_env()?,
            risk: RiskEnvConfig::from_env()?,
            breakers: BreakerEnvConfig::from_env()?,
            services: ServicesEnvConfig::from_env()?,
            observability: ObservabilityEnvConfig::from_env()?,
        })
    }
}

pub(crate) fn parse_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<f64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_u32(key: &str, default: u32) -> Result<u32> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u32>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<usize>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<bool>()
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env().expect("Should parse with defaults");
        assert_eq!(config.mode, Mode::Mock);
        assert_eq!(config.execution.timeout_millis, 30_000);
        assert_eq!(config.risk.max_daily_trades, 100);
    }
}

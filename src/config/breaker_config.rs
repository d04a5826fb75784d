//! Circuit breaker tunables, one set per protected domain.

use anyhow::Result;
use std::time::Duration;

use super::{parse_f64, parse_u64, parse_usize};

/// Tunables for one circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Failure percentage within the window that opens the breaker.
    pub failure_rate_pct: f64,
    /// Slow-call percentage within the window that opens the breaker.
    pub slow_rate_pct: f64,
    /// Calls slower than this count as slow.
    pub slow_call_threshold: Duration,
    /// Count-based sliding window size.
    pub sliding_window: usize,
    /// No transition is evaluated before this many calls were observed.
    pub minimum_calls: usize,
    /// How long the breaker stays OPEN before probing.
    pub open_duration: Duration,
    /// Number of trial calls allowed in HALF_OPEN; all must succeed to close.
    pub half_open_trials: usize,
}

impl BreakerSettings {
    fn from_env(prefix: &str, defaults: BreakerSettings) -> Result<Self> {
        let key = |suffix: &str| format!("BREAKER_{}_{}", prefix, suffix);
        Ok(Self {
            failure_rate_pct: parse_f64(&key("FAILURE_RATE_PCT"), defaults.failure_rate_pct)?,
            slow_rate_pct: parse_f64(&key("SLOW_RATE_PCT"), defaults.slow_rate_pct)?,
            slow_call_threshold: Duration::from_millis(parse_u64(
                &key("SLOW_CALL_THRESHOLD_MILLIS"),
                defaults.slow_call_threshold.as_millis() as u64,
            )?),
            sliding_window: parse_usize(&key("SLIDING_WINDOW"), defaults.sliding_window)?,
            minimum_calls: parse_usize(&key("MINIMUM_CALLS"), defaults.minimum_calls)?,
            open_duration: Duration::from_secs(parse_u64(
                &key("OPEN_DURATION_SECS"),
                defaults.open_duration.as_secs(),
            )?),
            half_open_trials: parse_usize(&key("HALF_OPEN_TRIALS"), defaults.half_open_trials)?,
        })
    }

    pub fn order_defaults() -> Self {
        Self {
            failure_rate_pct: 50.0,
            slow_rate_pct: 80.0,
            slow_call_threshold: Duration::from_secs(5),
            sliding_window: 10,
            minimum_calls: 5,
            open_duration: Duration::from_secs(30),
            half_open_trials: 5,
        }
    }

    pub fn risk_defaults() -> Self {
        Self {
            failure_rate_pct: 70.0,
            slow_rate_pct: 90.0,
            slow_call_threshold: Duration::from_secs(10),
            sliding_window: 15,
            minimum_calls: 8,
            open_duration: Duration::from_secs(45),
            half_open_trials: 3,
        }
    }

    pub fn broker_defaults() -> Self {
        Self {
            failure_rate_pct: 60.0,
            slow_rate_pct: 85.0,
            slow_call_threshold: Duration::from_secs(8),
            sliding_window: 20,
            minimum_calls: 10,
            open_duration: Duration::from_secs(120),
            half_open_trials: 2,
        }
    }

    pub fn portfolio_defaults() -> Self {
        Self {
            failure_rate_pct: 65.0,
            slow_rate_pct: 80.0,
            slow_call_threshold: Duration::from_secs(7),
            sliding_window: 12,
            minimum_calls: 6,
            open_duration: Duration::from_secs(60),
            half_open_trials: 4,
        }
    }
}

/// Per-domain breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerEnvConfig {
    pub order: BreakerSettings,
    pub risk: BreakerSettings,
    pub broker: BreakerSettings,
    pub portfolio: BreakerSettings,
}

impl BreakerEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            order: BreakerSettings::from_env("ORDER", BreakerSettings::order_defaults())?,
            risk: BreakerSettings::from_env("RISK", BreakerSettings::risk_defaults())?,
            broker: BreakerSettings::from_env("BROKER", BreakerSettings::broker_defaults())?,
            portfolio: BreakerSettings::from_env("PORTFOLIO", BreakerSettings::portfolio_defaults())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_defaults_match_policy() {
        let broker = BreakerSettings::broker_defaults();
        assert_eq!(broker.failure_rate_pct, 60.0);
        assert_eq!(broker.sliding_window, 20);
        assert_eq!(broker.open_duration, Duration::from_secs(120));
        assert_eq!(broker.half_open_trials, 2);

        let portfolio = BreakerSettings::portfolio_defaults();
        assert_eq!(portfolio.minimum_calls, 6);
        assert_eq!(portfolio.slow_call_threshold, Duration::from_secs(7));
    }
}

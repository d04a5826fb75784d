//! The four domain breakers, one per outbound concern.

use std::sync::Arc;

use crate::config::BreakerEnvConfig;

use super::circuit_breaker::{CircuitBreaker, CircuitState};

/// One breaker per protected domain: local order processing, risk
/// evaluation, broker calls, portfolio calls. Built once at bootstrap and
/// shared by every adapter.
#[derive(Clone)]
pub struct BreakerFabric {
    pub order: Arc<CircuitBreaker>,
    pub risk: Arc<CircuitBreaker>,
    pub broker: Arc<CircuitBreaker>,
    pub portfolio: Arc<CircuitBreaker>,
}

impl BreakerFabric {
    pub fn new(config: &BreakerEnvConfig) -> Self {
        Self {
            order: Arc::new(CircuitBreaker::new("order", config.order.clone())),
            risk: Arc::new(CircuitBreaker::new("risk", config.risk.clone())),
            broker: Arc::new(CircuitBreaker::new("broker", config.broker.clone())),
            portfolio: Arc::new(CircuitBreaker::new("portfolio", config.portfolio.clone())),
        }
    }

    /// Snapshot of all breaker states, for the metrics task.
    pub async fn states(&self) -> Vec<(&'static str, CircuitState)> {
        vec![
            ("order", self.order.state().await),
            ("risk", self.risk.state().await),
            ("broker", self.broker.state().await),
            ("portfolio", self.portfolio.state().await),
        ]
    }
}

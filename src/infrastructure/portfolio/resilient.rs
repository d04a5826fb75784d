//! Breaker-protected decorator around any portfolio service.
//!
//! Read paths (impact, position risk) serve a conservative cached record
//! while the portfolio breaker is open, keeping the placement path alive
//! through portfolio-service outages. Position updates are never dropped:
//! with the breaker open they are queued locally, in creation order, and
//! replayed by the lifecycle scheduler once the breaker re-closes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::ServiceError;
use crate::domain::ports::{PortfolioImpact, PortfolioService, PositionRisk, PositionUpdate};
use crate::domain::trading::order::OrderSide;
use crate::infrastructure::core::circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitState,
};

pub struct ResilientPortfolioService {
    inner: Arc<dyn PortfolioService>,
    breaker: Arc<CircuitBreaker>,
    queued: Mutex<VecDeque<PositionUpdate>>,
}

impl ResilientPortfolioService {
    pub fn new(inner: Arc<dyn PortfolioService>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            inner,
            breaker,
            queued: Mutex::new(VecDeque::new()),
        }
    }

    fn enqueue(&self, update: PositionUpdate) {
        warn!(
            "ResilientPortfolioService: Queueing position update for trade {} (portfolio breaker open)",
            update.trade_id
        );
        self.queued.lock().unwrap().push_back(update);
    }
}

#[async_trait]
impl PortfolioService for ResilientPortfolioService {
    async fn calculate_impact(
        &self,
        user_id: i64,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        order_value: Decimal,
        correlation_id: Uuid,
    ) -> Result<PortfolioImpact, ServiceError> {
        let work =
            self.inner
                .calculate_impact(user_id, symbol, side, quantity, order_value, correlation_id);
        self.breaker
            .call_with_fallback(work, conservative_impact)
            .await
            .map_err(flatten)
    }

    async fn get_position_risk(
        &self,
        user_id: i64,
        symbol: &str,
        correlation_id: Uuid,
    ) -> Result<PositionRisk, ServiceError> {
        let work = self.inner.get_position_risk(user_id, symbol, correlation_id);
        self.breaker
            .call_with_fallback(work, || conservative_position_risk(symbol))
            .await
            .map_err(flatten)
    }

    async fn update_position(&self, update: &PositionUpdate) -> Result<(), ServiceError> {
        match self.breaker.call(self.inner.update_position(update)).await {
            Ok(()) => Ok(()),
            // Open breaker: accept the update and queue it for replay.
            Err(CircuitBreakerError::Open { .. }) => {
                self.enqueue(update.clone());
                Ok(())
            }
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }

    fn queued_updates(&self) -> usize {
        self.queued.lock().unwrap().len()
    }

    /// Replay stops at the first failure so creation order is preserved;
    /// remaining entries stay queued for the next drain pass.
    async fn drain_queued_updates(&self) -> usize {
        if self.breaker.state().await != CircuitState::Closed {
            return 0;
        }

        let mut applied = 0;
        loop {
            let next = self.queued.lock().unwrap().pop_front();
            let Some(update) = next else { break };

            match self.inner.update_position(&update).await {
                Ok(()) => {
                    applied += 1;
                    info!(
                        "ResilientPortfolioService: Replayed queued position update for trade {}",
                        update.trade_id
                    );
                }
                Err(e) => {
                    warn!(
                        "ResilientPortfolioService: Replay failed for trade {} ({}); re-queueing",
                        update.trade_id, e
                    );
                    self.queued.lock().unwrap().push_front(update);
                    break;
                }
            }
        }
        applied
    }
}

fn flatten(e: CircuitBreakerError<ServiceError>) -> ServiceError {
    match e {
        CircuitBreakerError::Inner(inner) => inner,
        open => ServiceError::Connection {
            reason: open.to_string(),
        },
    }
}

/// Conservative record served while the portfolio service is unreachable:
/// the trade is permitted, margin flagged acceptable, and `from_fallback`
/// tells the risk engine to attach elevated-risk warnings.
fn conservative_impact() -> PortfolioImpact {
    PortfolioImpact {
        available_buying_power: Decimal::MAX,
        total_portfolio_value: Decimal::ZERO,
        projected_concentration_pct: 0.0,
        projected_margin_usage: 0.0,
        margin_impact_acceptable: true,
        from_fallback: true,
    }
}

fn conservative_position_risk(symbol: &str) -> PositionRisk {
    PositionRisk {
        symbol: symbol.to_string(),
        current_quantity: 0,
        max_position_size: i64::MAX,
        from_fallback: true,
    }
}

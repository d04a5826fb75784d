//! Broker execution engine.
//!
//! Drives an accepted order to a terminal broker status safely:
//!
//! 1. Idempotency gate: the process-wide order-id map is claimed BEFORE
//!    the broker call; a pre-existing claim fails with
//!    IDEMPOTENCY_VIOLATION and never reaches the broker.
//! 2. Connection acquisition with token refresh on expiry.
//! 3. Placement under the broker breaker with the placement deadline.
//! 4. Status polling for PENDING responses, bounded by `max_status_polls`.
//! 5. Partial-fill policy: fill rates at or above the configured
//!    threshold are accepted as success, below it PARTIAL_FILL surfaces
//!    so the caller can work the remainder.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ExecutionEnvConfig;
use crate::domain::errors::{ExecutionError, ServiceError};
use crate::domain::ports::{
    BrokerAuthService, BrokerConnection, BrokerModifyRequest, BrokerOrderRequest,
    BrokerOrderResponse, BrokerOrderStatus,
};
use crate::domain::trading::order::{Order, OrderModification};
use crate::infrastructure::core::circuit_breaker::{
    BreakerClassify, CircuitBreaker, CircuitBreakerError,
};
use crate::infrastructure::observability::Metrics;

use super::routing::{BrokerRouter, Routing};

// ===== Idempotency map =====

/// Process-wide `order-id -> broker-order-id` map.
///
/// Writers insert-if-absent; an entry is never overwritten during an
/// order's lifetime. The durable `orders.order_id` unique constraint is
/// the cross-process backstop.
#[derive(Default)]
pub struct IdempotencyMap {
    inner: Mutex<HashMap<String, Option<String>>>,
}

impl IdempotencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an order id. Returns false when a claim already exists, in
    /// which case the caller MUST NOT submit to the broker.
    pub fn claim(&self, order_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(order_id) {
            return false;
        }
        inner.insert(order_id.to_string(), None);
        true
    }

    /// Attach the broker-assigned id once the broker acknowledged.
    pub fn record_broker_id(&self, order_id: &str, broker_order_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.get_mut(order_id) {
            entry.get_or_insert_with(|| broker_order_id.to_string());
        }
    }

    pub fn broker_id(&self, order_id: &str) -> Option<String> {
        self.inner.lock().unwrap().get(order_id).cloned().flatten()
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(order_id)
    }

    /// Release a claim, but only when no broker order id was ever
    /// recorded: once the broker knows the order, the claim must survive
    /// so a duplicate placement cannot slip through.
    pub fn release_if_unsubmitted(&self, order_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(order_id) {
            Some(None) => {
                inner.remove(order_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

// ===== Results =====

/// Outcome of one execution attempt that did not fail.
///
/// `status` is the broker's view: FILLED, PARTIAL_FILL (at or above the
/// accept threshold) or PENDING when polling was exhausted and the
/// lifecycle reconciler takes over.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub order_id: String,
    pub broker_order_id: String,
    pub broker_name: String,
    pub status: BrokerOrderStatus,
    pub filled_quantity: i64,
    pub average_price: Option<Decimal>,
    pub broker_fill_id: Option<String>,
}

// ===== Engine =====

pub struct ExecutionEngine {
    auth: Arc<dyn BrokerAuthService>,
    router: Arc<dyn BrokerRouter>,
    broker_breaker: Arc<CircuitBreaker>,
    idempotency: Arc<IdempotencyMap>,
    config: ExecutionEnvConfig,
    metrics: Metrics,
}

impl ExecutionEngine {
    pub fn new(
        auth: Arc<dyn BrokerAuthService>,
        router: Arc<dyn BrokerRouter>,
        broker_breaker: Arc<CircuitBreaker>,
        idempotency: Arc<IdempotencyMap>,
        config: ExecutionEnvConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            auth,
            router,
            broker_breaker,
            idempotency,
            config,
            metrics,
        }
    }

    pub fn idempotency(&self) -> &IdempotencyMap {
        &self.idempotency
    }

    /// Execute an order against its routed broker.
    pub async fn execute(
        &self,
        order: &Order,
        routing: &Routing,
        correlation_id: Uuid,
    ) -> Result<ExecutionResult, ExecutionError> {
        let broker_name = routing.broker_name().to_string();
        let started = Instant::now();

        // 1. Idempotency gate, before anything reaches the broker.
        if !self.idempotency.claim(&order.order_id) {
            self.metrics
                .observe_execution(&broker_name, "idempotency_violation", started.elapsed().as_secs_f64());
            return Err(ExecutionError::IdempotencyViolation {
                order_id: order.order_id.clone(),
            });
        }

        // 2. Usable connection (refresh on expiry).
        let connection = self
            .acquire_connection(order.user_id, &broker_name, correlation_id)
            .await?;

        // 3. Placement under the broker breaker and the placement
        //    deadline. Retryable transport failures are retried up to
        //    `max_retries` times: the payload carries the client order id,
        //    so the broker side deduplicates a submit it already received.
        let request = BrokerOrderRequest::from_order(order);
        let placement_budget = Duration::from_millis(self.config.timeout_millis);
        let mut attempt = 0u32;
        let response = loop {
            let outcome = self
                .broker_call(placement_budget, async {
                    routing
                        .broker
                        .submit_order(&connection, &request, correlation_id)
                        .await
                })
                .await;

            match outcome {
                Ok(response) => break response,
                Err(e) if e.retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "ExecutionEngine: submit attempt {} for {} failed ({}); retrying",
                        attempt, order.order_id, e
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_millis))
                        .await;
                }
                Err(e) => {
                    self.metrics.observe_execution(
                        &broker_name,
                        outcome_label(&e),
                        started.elapsed().as_secs_f64(),
                    );
                    return Err(e);
                }
            }
        };

        self.idempotency
            .record_broker_id(&order.order_id, &response.broker_order_id);

        // 4/5/6. Classify, polling through PENDING states.
        let result = self
            .drive_to_outcome(order, routing, &connection, response, correlation_id, &broker_name)
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(r) => {
                self.metrics
                    .observe_execution(&broker_name, &r.status.to_string().to_lowercase(), elapsed)
            }
            Err(e) => self
                .metrics
                .observe_execution(&broker_name, outcome_label(e), elapsed),
        }
        result
    }

    /// Cancel a working order at its broker.
    pub async fn cancel(
        &self,
        order: &Order,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ExecutionError> {
        let broker_order_id = order
            .broker_order_id
            .clone()
            .or_else(|| self.idempotency.broker_id(&order.order_id))
            .ok_or_else(|| ExecutionError::SystemError {
                reason: format!("order {} has no broker order id", order.order_id),
            })?;

        let (adapter, connection) = self.resolve(order, correlation_id).await?;
        let cancel_budget = Duration::from_millis(self.config.cancel_timeout_millis);

        let response = self
            .broker_call(cancel_budget, async {
                adapter
                    .cancel_order(&connection, &broker_order_id, correlation_id)
                    .await
            })
            .await?;

        info!(
            "ExecutionEngine: Cancel of {} confirmed as {} by {}",
            order.order_id, response.status, order.broker_name.as_deref().unwrap_or("?")
        );
        Ok(response)
    }

    /// Forward a modification to the broker working the order.
    pub async fn modify(
        &self,
        order: &Order,
        modification: &OrderModification,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ExecutionError> {
        let broker_order_id = order
            .broker_order_id
            .clone()
            .ok_or_else(|| ExecutionError::SystemError {
                reason: format!("order {} has no broker order id", order.order_id),
            })?;

        let (adapter, connection) = self.resolve(order, correlation_id).await?;
        let request = BrokerModifyRequest {
            broker_order_id,
            quantity: modification.quantity,
            limit_price: modification.limit_price,
            stop_price: modification.stop_price,
        };

        let budget = Duration::from_millis(self.config.timeout_millis);
        self.broker_call(budget, async {
            adapter
                .modify_order(&connection, &request, correlation_id)
                .await
        })
        .await
    }

    /// One status probe for the reconciler.
    pub async fn fetch_status(
        &self,
        order: &Order,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ExecutionError> {
        let broker_order_id = order
            .broker_order_id
            .clone()
            .ok_or_else(|| ExecutionError::SystemError {
                reason: format!("order {} has no broker order id", order.order_id),
            })?;

        let (adapter, connection) = self.resolve(order, correlation_id).await?;
        let budget = Duration::from_millis(self.config.status_check_timeout_millis);
        self.broker_call(budget, async {
            adapter
                .get_status(&connection, &broker_order_id, correlation_id)
                .await
        })
        .await
    }

    /// Release the idempotency claim for an order that never reached the
    /// broker. Returns false when a broker order id exists (the claim
    /// must then survive for the order's lifetime).
    pub fn release_unsubmitted(&self, order_id: &str) -> bool {
        self.idempotency.release_if_unsubmitted(order_id)
    }

    // ===== Internals =====

    async fn resolve(
        &self,
        order: &Order,
        correlation_id: Uuid,
    ) -> Result<(Arc<dyn crate::domain::ports::BrokerAdapter>, BrokerConnection), ExecutionError>
    {
        let broker_name = order
            .broker_name
            .clone()
            .ok_or_else(|| ExecutionError::SystemError {
                reason: format!("order {} has no broker routing", order.order_id),
            })?;
        let adapter = self
            .router
            .by_name(&broker_name)
            .ok_or_else(|| ExecutionError::SystemError {
                reason: format!("no adapter configured for broker {}", broker_name),
            })?;
        let connection = self
            .acquire_connection(order.user_id, &broker_name, correlation_id)
            .await?;
        Ok((adapter, connection))
    }

    async fn acquire_connection(
        &self,
        user_id: i64,
        broker: &str,
        correlation_id: Uuid,
    ) -> Result<BrokerConnection, ExecutionError> {
        let now = chrono::Utc::now();
        let connection = self
            .auth
            .get_connection(user_id, broker, correlation_id)
            .await
            .map_err(ServiceError::into_execution_error)?;

        if connection.is_usable(now) {
            return Ok(connection);
        }

        // Expired or stale token: refresh before use. A failed refresh is
        // non-retryable here, the user must re-authenticate.
        let refreshed = self
            .auth
            .refresh_token(&connection, correlation_id)
            .await
            .map_err(|e| ExecutionError::BrokerApiError {
                status: None,
                message: format!("token refresh failed, re-authentication required: {}", e),
            })?;

        if !refreshed.is_usable(chrono::Utc::now()) {
            return Err(ExecutionError::BrokerApiError {
                status: None,
                message: format!("connection for user {} on {} is not usable", user_id, broker),
            });
        }
        Ok(refreshed)
    }

    /// Run one broker call under the breaker with a deadline.
    async fn broker_call<F>(
        &self,
        budget: Duration,
        work: F,
    ) -> Result<BrokerOrderResponse, ExecutionError>
    where
        F: std::future::Future<Output = Result<BrokerOrderResponse, ServiceError>>,
    {
        let deadline_work = async {
            match timeout(budget, work).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout {
                    elapsed_ms: budget.as_millis() as u64,
                }),
            }
        };

        match self.broker_breaker.call(deadline_work).await {
            Ok(response) => Ok(response),
            Err(CircuitBreakerError::Inner(e)) => Err(e.into_execution_error()),
            Err(open @ CircuitBreakerError::Open { .. }) => Err(ExecutionError::BrokerApiError {
                status: None,
                message: open.to_string(),
            }),
        }
    }

    async fn drive_to_outcome(
        &self,
        order: &Order,
        routing: &Routing,
        connection: &BrokerConnection,
        initial: BrokerOrderResponse,
        correlation_id: Uuid,
        broker_name: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut latest = initial;
        let mut polls = 0u32;

        loop {
            match latest.status {
                BrokerOrderStatus::Filled => {
                    return Ok(self.result_from(order, broker_name, &latest));
                }
                BrokerOrderStatus::Rejected => {
                    return Err(ExecutionError::OrderRejected {
                        reason: latest
                            .reason
                            .unwrap_or_else(|| "no reason given by broker".to_string()),
                    });
                }
                BrokerOrderStatus::Cancelled
                | BrokerOrderStatus::Expired
                | BrokerOrderStatus::Failed => {
                    return Err(ExecutionError::SystemError {
                        reason: format!(
                            "broker reported {} during placement: {}",
                            latest.status,
                            latest.reason.as_deref().unwrap_or("no reason")
                        ),
                    });
                }
                BrokerOrderStatus::PartialFill if polls >= self.config.max_status_polls => {
                    return self.partial_fill_outcome(order, broker_name, &latest);
                }
                BrokerOrderStatus::Pending if polls >= self.config.max_status_polls => {
                    // Poll budget exhausted: hand over to reconciliation.
                    info!(
                        "ExecutionEngine: {} still {} after {} polls; reconciliation takes over",
                        order.order_id, latest.status, polls
                    );
                    return Ok(self.result_from(order, broker_name, &latest));
                }
                BrokerOrderStatus::Pending | BrokerOrderStatus::PartialFill => {
                    // A broker-terminal partial (no further fills coming)
                    // resolves through the fill-rate policy immediately.
                    if latest.status == BrokerOrderStatus::PartialFill && polls == 0 {
                        return self.partial_fill_outcome(order, broker_name, &latest);
                    }

                    polls += 1;
                    tokio::time::sleep(Duration::from_millis(
                        self.config.status_poll_interval_millis,
                    ))
                    .await;

                    let budget = Duration::from_millis(self.config.status_check_timeout_millis);
                    let broker_order_id = latest.broker_order_id.clone();
                    match self
                        .broker_call(budget, async {
                            routing
                                .broker
                                .get_status(connection, &broker_order_id, correlation_id)
                                .await
                        })
                        .await
                    {
                        Ok(response) => latest = response,
                        Err(e) => {
                            // A failed probe is not a failed order; keep
                            // the last known state and keep polling.
                            warn!(
                                "ExecutionEngine: status poll {} for {} failed: {}",
                                polls, order.order_id, e
                            );
                        }
                    }
                }
            }
        }
    }

    /// Fill-rate policy for partial executions.
    fn partial_fill_outcome(
        &self,
        order: &Order,
        broker_name: &str,
        response: &BrokerOrderResponse,
    ) -> Result<ExecutionResult, ExecutionError> {
        let fill_rate = response.filled_quantity as f64 / order.quantity as f64 * 100.0;
        if fill_rate >= self.config.partial_fill_accept_pct {
            info!(
                "ExecutionEngine: Accepting partial fill for {} ({:.1}% >= {:.1}%)",
                order.order_id, fill_rate, self.config.partial_fill_accept_pct
            );
            Ok(self.result_from(order, broker_name, response))
        } else {
            Err(ExecutionError::PartialFill {
                filled: response.filled_quantity,
                requested: order.quantity,
                broker_order_id: response.broker_order_id.clone(),
                average_price: response.average_price,
            })
        }
    }

    fn result_from(
        &self,
        order: &Order,
        broker_name: &str,
        response: &BrokerOrderResponse,
    ) -> ExecutionResult {
        ExecutionResult {
            order_id: order.order_id.clone(),
            broker_order_id: response.broker_order_id.clone(),
            broker_name: broker_name.to_string(),
            status: response.status,
            filled_quantity: response.filled_quantity,
            average_price: response.average_price,
            broker_fill_id: response.broker_fill_id.clone(),
        }
    }
}

/// Classification for the order-processing breaker: dependency-shaped
/// failures count, business outcomes (rejections, partial fills,
/// idempotency refusals) do not.
impl BreakerClassify for ExecutionError {
    fn trips_breaker(&self) -> bool {
        match self {
            ExecutionError::BrokerApiError { status, .. } => {
                status.map(|s| s >= 500).unwrap_or(true)
            }
            ExecutionError::Timeout { .. } | ExecutionError::SystemError { .. } => true,
            _ => false,
        }
    }
}

fn outcome_label(e: &ExecutionError) -> &'static str {
    match e {
        ExecutionError::BrokerApiError { .. } => "broker_error",
        ExecutionError::OrderRejected { .. } => "rejected",
        ExecutionError::Timeout { .. } => "timeout",
        ExecutionError::PartialFill { .. } => "partial_fill",
        ExecutionError::InsufficientLiquidity { .. } => "no_liquidity",
        ExecutionError::IdempotencyViolation { .. } => "idempotency_violation",
        ExecutionError::SystemError { .. } => "system_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_insert_if_absent() {
        let map = IdempotencyMap::new();
        assert!(map.claim("TM-1-000001"));
        assert!(!map.claim("TM-1-000001"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_broker_id_never_overwritten() {
        let map = IdempotencyMap::new();
        map.claim("TM-1-000001");
        map.record_broker_id("TM-1-000001", "B-1");
        map.record_broker_id("TM-1-000001", "B-2");
        assert_eq!(map.broker_id("TM-1-000001").as_deref(), Some("B-1"));
    }

    #[test]
    fn test_release_only_before_broker_ack() {
        let map = IdempotencyMap::new();
        map.claim("TM-1-000001");
        map.claim("TM-2-000002");
        map.record_broker_id("TM-2-000002", "B-2");

        assert!(map.release_if_unsubmitted("TM-1-000001"));
        assert!(!map.contains("TM-1-000001"));

        assert!(!map.release_if_unsubmitted("TM-2-000002"));
        assert!(map.contains("TM-2-000002"));
    }
}

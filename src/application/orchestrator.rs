//! Order orchestrator: the placement/modify/cancel pipeline.
//!
//! `place` composes validation -> risk -> persistence -> routing ->
//! execution, owns every state-machine transition, and fans out to the
//! portfolio/event/notification collaborators after a confirmed fill.
//! Compensation is asymmetric: failures before broker acknowledgment
//! leave nothing external to undo; failures after it never roll back the
//! fill - the post-trade paths are fire-and-forget with queued retry.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{
    DataError, ErrorEnvelope, ExecutionError, SystemError,
};
use crate::domain::ports::{
    DomainEvent, EventPublisher, NotificationService, PortfolioService, PositionUpdate,
};
use crate::domain::repositories::OrderRepository;
use crate::domain::trading::fill::{Fill, Trade};
use crate::domain::trading::order::{
    Order, OrderModification, OrderRequest, OrderStatus,
};
use crate::domain::validation::{OrderValidator, Validated};
use crate::infrastructure::core::breakers::BreakerFabric;
use crate::infrastructure::core::circuit_breaker::CircuitBreakerError;
use crate::infrastructure::observability::Metrics;

use super::execution::{ExecutionEngine, ExecutionResult};
use super::risk_engine::RiskEngine;
use super::routing::BrokerRouter;

/// Either the current order snapshot or the full list of reasons.
pub type OrderOutcome = Result<Order, Vec<ErrorEnvelope>>;

pub struct OrderService {
    validator: OrderValidator,
    risk: Arc<RiskEngine>,
    execution: Arc<ExecutionEngine>,
    orders: Arc<dyn OrderRepository>,
    router: Arc<dyn BrokerRouter>,
    portfolio: Arc<dyn PortfolioService>,
    events: Arc<dyn EventPublisher>,
    notifier: Arc<dyn NotificationService>,
    breakers: BreakerFabric,
    metrics: Metrics,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: OrderValidator,
        risk: Arc<RiskEngine>,
        execution: Arc<ExecutionEngine>,
        orders: Arc<dyn OrderRepository>,
        router: Arc<dyn BrokerRouter>,
        portfolio: Arc<dyn PortfolioService>,
        events: Arc<dyn EventPublisher>,
        notifier: Arc<dyn NotificationService>,
        breakers: BreakerFabric,
        metrics: Metrics,
    ) -> Self {
        Self {
            validator,
            risk,
            execution,
            orders,
            router,
            portfolio,
            events,
            notifier,
            breakers,
            metrics,
        }
    }

    /// Place an order and drive it to its terminal status, or to the
    /// reconciliation queue on timeout.
    pub async fn place(
        &self,
        request: OrderRequest,
        user_id: i64,
        correlation_id: Uuid,
    ) -> OrderOutcome {
        let now = Utc::now();
        let mut order = Order::from_request(&request, user_id, now);

        // Repeated placement of the same order id fails here, before the
        // validator, the repository or the broker see anything.
        if self.execution.idempotency().contains(&order.order_id) {
            let error = ExecutionError::IdempotencyViolation {
                order_id: order.order_id.clone(),
            };
            return Err(vec![ErrorEnvelope::from(&error)]);
        }

        // Validation: errors return together, nothing is persisted.
        let request = match self.validator.validate_new(request, now) {
            Validated::Valid(request) => request,
            Validated::Invalid(errors) => {
                for error in &errors {
                    self.metrics.inc_validation_failure(error.code());
                }
                info!(
                    "OrderService: Rejected {} on validation ({} errors)",
                    order.order_id,
                    errors.len()
                );
                return Err(errors.iter().map(ErrorEnvelope::from).collect());
            }
        };

        // Risk: blocking violations reject before any persistence of the
        // order row; the rejection itself is audited. The risk breaker
        // tracks slow evaluations and fails the order fast while open.
        let risk_work = async {
            Ok::<_, crate::domain::errors::ServiceError>(
                self.risk.check(&request, user_id, correlation_id).await,
            )
        };
        let assessment = match self.breakers.risk.call(risk_work).await {
            Ok(assessment) => assessment,
            Err(_) => {
                let system = SystemError::CircuitBreakerOpen {
                    domain: "risk".to_string(),
                };
                return Err(vec![ErrorEnvelope::from(&system)]);
            }
        };
        if assessment.is_blocking() {
            let reasons: Vec<String> = assessment
                .violations
                .iter()
                .map(|v| v.to_string())
                .collect();
            if let Err(e) = self
                .orders
                .record_rejection_audit(&order.order_id, user_id, &reasons, correlation_id)
                .await
            {
                warn!(
                    "OrderService: Failed to audit risk rejection of {}: {}",
                    order.order_id, e
                );
            }
            self.metrics.inc_orders(&order.side.to_string(), "RISK_REJECTED");
            info!(
                "OrderService: Rejected {} on risk (score {:.2})",
                order.order_id, assessment.score
            );
            return Err(assessment.violations.iter().map(ErrorEnvelope::from).collect());
        }

        if !assessment.warnings.is_empty() || !assessment.violations.is_empty() {
            let warnings: Vec<String> = assessment
                .warnings
                .iter()
                .cloned()
                .chain(assessment.violations.iter().map(|v| v.to_string()))
                .collect();
            order.metadata.insert(
                "risk_warnings".to_string(),
                serde_json::to_value(warnings).unwrap_or_default(),
            );
        }

        // Persist at VALIDATED.
        if let Err(e) = order.transition(OrderStatus::Validated, Utc::now()) {
            return Err(vec![unexpected(&e.to_string())]);
        }
        if let Err(e) = self.orders.insert_order(&order, correlation_id).await {
            return Err(vec![data_envelope(&e)]);
        }

        // Routing.
        let Some(routing) = self.router.route(order.exchange) else {
            order.rejection_reason = Some(format!("no broker available for {}", order.exchange));
            let _ = order.transition(OrderStatus::Rejected, Utc::now());
            if let Err(e) = self.orders.update_order(&order, correlation_id).await {
                warn!("OrderService: Failed to persist routing rejection: {}", e);
            }
            let system = SystemError::ServiceUnavailable {
                service: format!("broker for {}", order.exchange),
            };
            return Err(vec![ErrorEnvelope::from(&system)]);
        };

        order.broker_name = Some(routing.broker_name().to_string());
        if let Err(e) = order.transition(OrderStatus::Submitted, Utc::now()) {
            return Err(vec![unexpected(&e.to_string())]);
        }
        if let Err(e) = self.orders.update_order(&order, correlation_id).await {
            return Err(vec![data_envelope(&e)]);
        }

        self.risk.record_accepted_order(user_id);

        // Execution, guarded by the order-processing breaker.
        let execution_outcome = self
            .breakers
            .order
            .call(self.execution.execute(&order, &routing, correlation_id))
            .await;

        match execution_outcome {
            Ok(result) => self.apply_execution_result(order, result, correlation_id).await,
            Err(CircuitBreakerError::Open { .. }) => {
                // Never reached the execution engine; the order stays
                // SUBMITTED and reconciliation (or a retry) owns it.
                let system = SystemError::CircuitBreakerOpen {
                    domain: "order".to_string(),
                };
                Err(vec![ErrorEnvelope::from(&system)])
            }
            Err(CircuitBreakerError::Inner(error)) => {
                self.apply_execution_error(order, error, correlation_id).await
            }
        }
    }

    /// Modify a working order. Legal only from ACKNOWLEDGED or
    /// PARTIALLY_FILLED, and never below the filled quantity.
    pub async fn modify(
        &self,
        order_id: &str,
        modification: OrderModification,
        user_id: i64,
        correlation_id: Uuid,
    ) -> OrderOutcome {
        let mut order = self.load_for_user(order_id, user_id).await?;

        let validated = self.validator.validate_modification(&order, &modification);
        if !validated.is_valid() {
            return Err(validated.errors().iter().map(ErrorEnvelope::from).collect());
        }

        match self
            .execution
            .modify(&order, &modification, correlation_id)
            .await
        {
            Ok(_) => {
                if let Some(quantity) = modification.quantity {
                    order.quantity = quantity;
                }
                if let Some(limit) = modification.limit_price {
                    order.limit_price = Some(limit);
                }
                if let Some(stop) = modification.stop_price {
                    order.stop_price = Some(stop);
                }
                order.updated_at = Utc::now();
                if let Err(e) = self.orders.update_order(&order, correlation_id).await {
                    return Err(vec![data_envelope(&e)]);
                }
                info!("OrderService: Modified {}", order.order_id);
                Ok(order)
            }
            Err(error) => Err(vec![ErrorEnvelope::from(&error)]),
        }
    }

    /// Cancel an order. Idempotent on already-CANCELLED orders: the
    /// current snapshot is returned, not an error.
    pub async fn cancel(
        &self,
        order_id: &str,
        user_id: i64,
        correlation_id: Uuid,
    ) -> OrderOutcome {
        let mut order = self.load_for_user(order_id, user_id).await?;

        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }
        if order.status.is_terminal() {
            let error = crate::domain::errors::ValidationError::ModificationNotAllowed {
                reason: format!("order {} is already {}", order.order_id, order.status),
            };
            return Err(vec![ErrorEnvelope::from(&error)]);
        }

        // The idempotency entry may only be deleted when no broker order
        // id was ever returned; otherwise the order is driven to
        // CANCELLED through the broker.
        let released = self.execution.release_unsubmitted(&order.order_id);
        let has_broker_order = order.broker_order_id.is_some()
            || self.execution.idempotency().broker_id(&order.order_id).is_some();

        if !released && has_broker_order {
            if let Err(error) = self.execution.cancel(&order, correlation_id).await {
                return Err(vec![ErrorEnvelope::from(&error)]);
            }
        }

        if let Err(e) = order.transition(OrderStatus::Cancelled, Utc::now()) {
            return Err(vec![unexpected(&e.to_string())]);
        }
        if let Err(e) = self.orders.update_order(&order, correlation_id).await {
            return Err(vec![data_envelope(&e)]);
        }
        self.metrics.inc_orders(&order.side.to_string(), "CANCELLED");
        info!("OrderService: Cancelled {}", order.order_id);

        self.spawn_notification(
            order.user_id,
            "Order cancelled",
            format!("Order {} was cancelled", order.order_id),
            correlation_id,
        );
        Ok(order)
    }

    pub async fn get(&self, order_id: &str, user_id: i64) -> OrderOutcome {
        self.load_for_user(order_id, user_id).await
    }

    pub async fn list(
        &self,
        user_id: i64,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, Vec<ErrorEnvelope>> {
        self.orders
            .list_for_user(user_id, status, limit, offset)
            .await
            .map_err(|e| vec![data_envelope(&e)])
    }

    /// Status histogram for a user.
    pub async fn counts(
        &self,
        user_id: i64,
    ) -> Result<HashMap<OrderStatus, i64>, Vec<ErrorEnvelope>> {
        self.orders
            .status_counts(user_id)
            .await
            .map_err(|e| vec![data_envelope(&e)])
    }

    // ===== Internals =====

    async fn load_for_user(&self, order_id: &str, user_id: i64) -> OrderOutcome {
        match self.orders.find_by_order_id(order_id).await {
            Ok(Some(order)) if order.user_id == user_id => Ok(order),
            Ok(_) => {
                let error = DataError::EntityNotFound {
                    kind: "order",
                    id: order_id.to_string(),
                };
                Err(vec![data_envelope(&error)])
            }
            Err(e) => Err(vec![data_envelope(&e)]),
        }
    }

    /// Apply a non-error execution outcome and fan out post-trade work.
    async fn apply_execution_result(
        &self,
        mut order: Order,
        result: ExecutionResult,
        correlation_id: Uuid,
    ) -> OrderOutcome {
        use crate::domain::ports::BrokerOrderStatus;

        order.broker_order_id = Some(result.broker_order_id.clone());
        order.broker_name = Some(result.broker_name.clone());

        match result.status {
            BrokerOrderStatus::Filled | BrokerOrderStatus::PartialFill => {
                self.record_fill(&mut order, &result, correlation_id).await?;
                self.metrics
                    .inc_orders(&order.side.to_string(), &order.status.to_string());
                Ok(order)
            }
            BrokerOrderStatus::Pending => {
                // Poll budget exhausted: the broker is still working the
                // order. ACKNOWLEDGED; the reconciler drives it from here.
                if let Err(e) = order.transition(OrderStatus::Acknowledged, Utc::now()) {
                    return Err(vec![unexpected(&e.to_string())]);
                }
                if let Err(e) = self.orders.update_order(&order, correlation_id).await {
                    return Err(vec![data_envelope(&e)]);
                }
                Ok(order)
            }
            other => Err(vec![unexpected(&format!(
                "unexpected broker status {} in execution result",
                other
            ))]),
        }
    }

    async fn apply_execution_error(
        &self,
        mut order: Order,
        error: ExecutionError,
        correlation_id: Uuid,
    ) -> OrderOutcome {
        match &error {
            ExecutionError::OrderRejected { reason } => {
                order.rejection_reason = Some(reason.clone());
                if let Err(e) = order.transition(OrderStatus::Rejected, Utc::now()) {
                    return Err(vec![unexpected(&e.to_string())]);
                }
                if let Err(e) = self.orders.update_order(&order, correlation_id).await {
                    warn!("OrderService: Failed to persist broker rejection: {}", e);
                }
                self.metrics.inc_orders(&order.side.to_string(), "REJECTED");
            }
            ExecutionError::PartialFill {
                filled,
                broker_order_id,
                average_price,
                ..
            } => {
                // Below-threshold partial: the executed slice is still
                // recorded; the order stays PARTIALLY_FILLED and the
                // caller decides about the remainder.
                order.broker_order_id = Some(broker_order_id.clone());
                let result = ExecutionResult {
                    order_id: order.order_id.clone(),
                    broker_order_id: broker_order_id.clone(),
                    broker_name: order.broker_name.clone().unwrap_or_default(),
                    status: crate::domain::ports::BrokerOrderStatus::PartialFill,
                    filled_quantity: *filled,
                    average_price: *average_price,
                    broker_fill_id: None,
                };
                if let Err(errors) = self.record_fill(&mut order, &result, correlation_id).await {
                    return Err(errors);
                }
            }
            ExecutionError::Timeout { .. }
            | ExecutionError::BrokerApiError { .. }
            | ExecutionError::SystemError { .. }
            | ExecutionError::InsufficientLiquidity { .. } => {
                // The order stays SUBMITTED; lifecycle reconciliation owns
                // recovery from here.
                warn!(
                    "OrderService: {} left SUBMITTED after execution failure: {}",
                    order.order_id, error
                );
            }
            ExecutionError::IdempotencyViolation { .. } => {}
        }

        Err(vec![ErrorEnvelope::from(&error)])
    }

    /// Record the executed slice atomically (fill + trade + order +
    /// position + audit), then fan out the post-trade collaborators.
    async fn record_fill(
        &self,
        order: &mut Order,
        result: &ExecutionResult,
        correlation_id: Uuid,
    ) -> Result<(), Vec<ErrorEnvelope>> {
        let now = Utc::now();
        let price = result
            .average_price
            .or(order.limit_price)
            .unwrap_or_default();
        let executed = result.filled_quantity - order.filled_quantity;
        if executed <= 0 {
            return Err(vec![unexpected(&format!(
                "broker reported non-increasing fill {} for {}",
                result.filled_quantity, order.order_id
            ))]);
        }

        if let Err(e) = order.apply_execution(executed, price, now) {
            return Err(vec![unexpected(&e.to_string())]);
        }

        let fill = Fill::new(
            &order.order_id,
            executed,
            price,
            result.broker_fill_id.clone(),
            now,
        );
        let trade = Trade::from_fill(order, &fill);

        if let Err(e) = self
            .orders
            .record_execution(order, &fill, &trade, correlation_id)
            .await
        {
            return Err(vec![data_envelope(&e)]);
        }

        self.spawn_post_trade(order.clone(), trade, correlation_id);
        Ok(())
    }

    /// Fire-and-forget fan-out after a confirmed fill. Failures are
    /// logged (and, for position updates, queued by the portfolio
    /// adapter); they never roll back the fill.
    fn spawn_post_trade(&self, order: Order, trade: Trade, correlation_id: Uuid) {
        let portfolio = self.portfolio.clone();
        let events = self.events.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let update = PositionUpdate {
                user_id: trade.user_id,
                symbol: trade.symbol.clone(),
                exchange: trade.exchange,
                side: trade.side,
                quantity: trade.quantity,
                price: trade.price,
                trade_id: trade.trade_id.clone(),
                correlation_id,
                created_at: Utc::now(),
            };
            if let Err(e) = portfolio.update_position(&update).await {
                warn!(
                    "OrderService: Position update for trade {} failed: {}",
                    trade.trade_id, e
                );
            }

            let event = DomainEvent::order_executed(&order, correlation_id, Utc::now());
            let _ = events.publish(&event).await;

            let body = format!(
                "Order {} {} {} x {} ({})",
                order.order_id, order.side, order.symbol, order.filled_quantity, order.status
            );
            let _ = notifier
                .notify(order.user_id, "Order executed", &body, correlation_id)
                .await;
        });
    }

    fn spawn_notification(
        &self,
        user_id: i64,
        subject: &'static str,
        body: String,
        correlation_id: Uuid,
    ) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let _ = notifier.notify(user_id, subject, &body, correlation_id).await;
        });
    }
}

fn data_envelope(e: &DataError) -> ErrorEnvelope {
    ErrorEnvelope::from(e)
}

fn unexpected(reason: &str) -> ErrorEnvelope {
    ErrorEnvelope::from(&SystemError::UnexpectedError {
        reason: reason.to_string(),
    })
}

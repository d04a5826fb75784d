//! Periodic lifecycle tasks.
//!
//! Four loops with explicit periods: order expiration (DAY past session
//! close, GTD past expiry), reconciliation of SUBMITTED/ACKNOWLEDGED
//! orders against broker truth, draining of queued portfolio updates, and
//! the metrics snapshot. Each task is a plain function; `start` owns the
//! timer handles.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::ports::{
    BrokerOrderStatus, DomainEvent, EventPublisher, PortfolioService,
};
use crate::domain::repositories::{
    AuditEntry, AuditRepository, OrderRepository, PortfolioRepository,
};
use crate::domain::trading::fill::{Fill, Trade};
use crate::domain::trading::order::{Order, OrderStatus};
use crate::infrastructure::core::breakers::BreakerFabric;
use crate::infrastructure::observability::Metrics;

use super::execution::ExecutionEngine;

/// Task periods. Defaults match the operational policy; tests shrink them.
#[derive(Debug, Clone)]
pub struct SchedulerIntervals {
    pub expire: Duration,
    pub reconcile: Duration,
    pub drain: Duration,
    pub metrics: Duration,
    pub position_snapshot: Duration,
    /// How long a SUBMITTED/ACKNOWLEDGED order may go without an update
    /// before reconciliation picks it up.
    pub stale_after: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            expire: Duration::from_secs(60),
            reconcile: Duration::from_secs(30),
            drain: Duration::from_secs(30),
            metrics: Duration::from_secs(60),
            position_snapshot: Duration::from_secs(24 * 60 * 60),
            stale_after: Duration::from_secs(120),
        }
    }
}

pub struct LifecycleScheduler {
    orders: Arc<dyn OrderRepository>,
    positions: Arc<dyn PortfolioRepository>,
    execution: Arc<ExecutionEngine>,
    portfolio: Arc<dyn PortfolioService>,
    events: Arc<dyn EventPublisher>,
    audit: Arc<dyn AuditRepository>,
    breakers: BreakerFabric,
    metrics: Metrics,
    intervals: SchedulerIntervals,
}

impl LifecycleScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        positions: Arc<dyn PortfolioRepository>,
        execution: Arc<ExecutionEngine>,
        portfolio: Arc<dyn PortfolioService>,
        events: Arc<dyn EventPublisher>,
        audit: Arc<dyn AuditRepository>,
        breakers: BreakerFabric,
        metrics: Metrics,
        intervals: SchedulerIntervals,
    ) -> Self {
        Self {
            orders,
            positions,
            execution,
            portfolio,
            events,
            audit,
            breakers,
            metrics,
            intervals,
        }
    }

    /// Spawn all periodic tasks and return their handles.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(
            "LifecycleScheduler: Starting (expire {:?}, reconcile {:?}, drain {:?}, metrics {:?})",
            self.intervals.expire,
            self.intervals.reconcile,
            self.intervals.drain,
            self.intervals.metrics
        );

        let mut handles = Vec::new();

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.intervals.expire);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.expire_orders_once().await;
            }
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.intervals.reconcile);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.reconcile_inflight_once().await;
            }
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.intervals.drain);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.drain_portfolio_queue_once().await;
            }
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.intervals.metrics);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.snapshot_metrics_once().await;
            }
        }));

        let scheduler = self;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.intervals.position_snapshot);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                scheduler.snapshot_positions_once().await;
            }
        }));

        handles
    }

    /// Expire DAY orders past session close and GTD orders past expiry.
    /// Broker cancel is best-effort: a cancel failure does not stop the
    /// local expiry, reconciliation will resolve any disagreement.
    pub async fn expire_orders_once(&self) -> usize {
        let now = Utc::now();
        let expirable = match self.orders.find_expirable(now).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("LifecycleScheduler: expirable scan failed: {}", e);
                return 0;
            }
        };

        let mut expired = 0;
        for mut order in expirable {
            let correlation_id = Uuid::new_v4();

            if order.broker_order_id.is_some() {
                if let Err(e) = self.execution.cancel(&order, correlation_id).await {
                    warn!(
                        "LifecycleScheduler: best-effort broker cancel of {} failed: {}",
                        order.order_id, e
                    );
                }
            }

            if order.transition(OrderStatus::Expired, Utc::now()).is_err() {
                continue;
            }
            if let Err(e) = self.orders.update_order(&order, correlation_id).await {
                warn!(
                    "LifecycleScheduler: failed to persist expiry of {}: {}",
                    order.order_id, e
                );
                continue;
            }

            self.metrics.inc_orders(&order.side.to_string(), "EXPIRED");
            let event = DomainEvent::order_expired(&order, correlation_id, Utc::now());
            let _ = self.events.publish(&event).await;
            info!("LifecycleScheduler: Expired {}", order.order_id);
            expired += 1;
        }
        expired
    }

    /// Poll broker status for orders stuck in SUBMITTED/ACKNOWLEDGED and
    /// drive the state machine to the broker-reported truth.
    pub async fn reconcile_inflight_once(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.intervals.stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let stale = match self.orders.find_stale_inflight(cutoff).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("LifecycleScheduler: stale scan failed: {}", e);
                return 0;
            }
        };

        let mut reconciled = 0;
        for order in stale {
            if self.reconcile_order(order).await {
                reconciled += 1;
            }
        }
        reconciled
    }

    async fn reconcile_order(&self, mut order: Order) -> bool {
        let correlation_id = Uuid::new_v4();

        // A SUBMITTED order the broker never acknowledged cannot be
        // polled; with the idempotency claim still held, rejecting it
        // locally is safe and final.
        if order.broker_order_id.is_none() {
            order.rejection_reason = Some("no broker acknowledgement received".to_string());
            if order.transition(OrderStatus::Rejected, Utc::now()).is_err() {
                return false;
            }
            if let Err(e) = self.orders.update_order(&order, correlation_id).await {
                warn!(
                    "LifecycleScheduler: failed to persist reconciliation of {}: {}",
                    order.order_id, e
                );
                return false;
            }
            info!(
                "LifecycleScheduler: Rejected unacknowledged order {}",
                order.order_id
            );
            return true;
        }

        let response = match self.execution.fetch_status(&order, correlation_id).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "LifecycleScheduler: status probe for {} failed: {}",
                    order.order_id, e
                );
                return false;
            }
        };

        match response.status {
            BrokerOrderStatus::Filled | BrokerOrderStatus::PartialFill => {
                let executed = response.filled_quantity - order.filled_quantity;
                if executed > 0 {
                    let price = response
                        .average_price
                        .or(order.limit_price)
                        .unwrap_or_default();
                    if order.apply_execution(executed, price, Utc::now()).is_err() {
                        return false;
                    }
                    let fill = Fill::new(
                        &order.order_id,
                        executed,
                        price,
                        response.broker_fill_id.clone(),
                        Utc::now(),
                    );
                    let trade = Trade::from_fill(&order, &fill);
                    if let Err(e) = self
                        .orders
                        .record_execution(&order, &fill, &trade, correlation_id)
                        .await
                    {
                        warn!(
                            "LifecycleScheduler: failed to record reconciled fill for {}: {}",
                            order.order_id, e
                        );
                        return false;
                    }
                    info!(
                        "LifecycleScheduler: Reconciled {} to {} ({} filled)",
                        order.order_id, order.status, order.filled_quantity
                    );
                    return true;
                }
                false
            }
            BrokerOrderStatus::Pending => {
                if order.status == OrderStatus::Submitted {
                    if order
                        .transition(OrderStatus::Acknowledged, Utc::now())
                        .is_err()
                    {
                        return false;
                    }
                    return self.persist_reconciled(&order, correlation_id).await;
                }
                // Already ACKNOWLEDGED and the broker is still working it.
                false
            }
            BrokerOrderStatus::Rejected => {
                order.rejection_reason = response.reason.clone();
                if order.transition(OrderStatus::Rejected, Utc::now()).is_err() {
                    return false;
                }
                self.persist_reconciled(&order, correlation_id).await
            }
            BrokerOrderStatus::Cancelled => {
                if order.transition(OrderStatus::Cancelled, Utc::now()).is_err() {
                    return false;
                }
                self.persist_reconciled(&order, correlation_id).await
            }
            BrokerOrderStatus::Expired | BrokerOrderStatus::Failed => {
                if order.transition(OrderStatus::Expired, Utc::now()).is_err() {
                    return false;
                }
                self.persist_reconciled(&order, correlation_id).await
            }
        }
    }

    async fn persist_reconciled(&self, order: &Order, correlation_id: Uuid) -> bool {
        match self.orders.update_order(order, correlation_id).await {
            Ok(()) => {
                info!(
                    "LifecycleScheduler: Reconciled {} to {}",
                    order.order_id, order.status
                );
                true
            }
            Err(e) => {
                warn!(
                    "LifecycleScheduler: failed to persist reconciliation of {}: {}",
                    order.order_id, e
                );
                false
            }
        }
    }

    /// Replay position updates queued while the portfolio breaker was
    /// open. Returns the number applied.
    pub async fn drain_portfolio_queue_once(&self) -> usize {
        let queued = self.portfolio.queued_updates();
        if queued == 0 {
            return 0;
        }
        let applied = self.portfolio.drain_queued_updates().await;
        self.metrics
            .queued_position_updates
            .set(self.portfolio.queued_updates() as f64);
        if applied > 0 {
            info!(
                "LifecycleScheduler: Drained {} queued position updates ({} remaining)",
                applied,
                self.portfolio.queued_updates()
            );
            let entry = AuditEntry {
                actor: "lifecycle-scheduler".to_string(),
                action: "POSITION_UPDATE_QUEUE_DRAINED".to_string(),
                entity_kind: "portfolio_queue".to_string(),
                entity_id: "local".to_string(),
                old_state: Some(serde_json::json!({ "queued": queued })),
                new_state: Some(serde_json::json!({
                    "applied": applied,
                    "remaining": self.portfolio.queued_updates(),
                })),
                correlation_id: Uuid::new_v4(),
            };
            if let Err(e) = self.audit.append(&entry).await {
                warn!("LifecycleScheduler: failed to audit queue drain: {}", e);
            }
        }
        applied
    }

    /// Publish breaker states and queue depth into the metrics registry.
    pub async fn snapshot_metrics_once(&self) {
        for (domain, state) in self.breakers.states().await {
            self.metrics.set_breaker_state(domain, state);
        }
        self.metrics
            .queued_position_updates
            .set(self.portfolio.queued_updates() as f64);
    }

    /// Capture the daily position history snapshot.
    pub async fn snapshot_positions_once(&self) {
        if let Err(e) = self.positions.snapshot_history(Utc::now()).await {
            warn!("LifecycleScheduler: position snapshot failed: {}", e);
        }
    }
}

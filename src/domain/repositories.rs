//! Repository ports for durable state.
//!
//! Implementations run each mutation inside a single transaction and append
//! audit rows for every state change of orders, trades and positions in
//! that same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DataError;
use crate::domain::trading::exchange::Exchange;
use crate::domain::trading::fill::{Fill, Trade};
use crate::domain::trading::order::{Order, OrderStatus};
use crate::domain::trading::position::{Position, RiskLimits};

/// One append-only audit record.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub old_state: Option<Value>,
    pub new_state: Option<Value>,
    pub correlation_id: Uuid,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new order row (plus its audit entry).
    async fn insert_order(&self, order: &Order, correlation_id: Uuid) -> Result<(), DataError>;

    /// Persist the current state of an existing order (plus audit entry).
    async fn update_order(&self, order: &Order, correlation_id: Uuid) -> Result<(), DataError>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>, DataError>;

    async fn list_for_user(
        &self,
        user_id: i64,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, DataError>;

    /// Status histogram for a user.
    async fn status_counts(&self, user_id: i64) -> Result<HashMap<OrderStatus, i64>, DataError>;

    /// Record one execution atomically: the fill row, the derived trade,
    /// the updated order and the portfolio upsert all commit together.
    async fn record_execution(
        &self,
        order: &Order,
        fill: &Fill,
        trade: &Trade,
        correlation_id: Uuid,
    ) -> Result<(), DataError>;

    /// Audit-only record of a rejection that never persisted an order row
    /// (risk rejections).
    async fn record_rejection_audit(
        &self,
        order_id: &str,
        user_id: i64,
        reasons: &[String],
        correlation_id: Uuid,
    ) -> Result<(), DataError>;

    /// DAY orders past their session close and GTD orders past expiry, in
    /// non-terminal states.
    async fn find_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Order>, DataError>;

    /// SUBMITTED/ACKNOWLEDGED orders not updated since `cutoff`; owned by
    /// the reconciliation task.
    async fn find_stale_inflight(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, DataError>;
}

#[async_trait]
pub trait RiskLimitsRepository: Send + Sync {
    async fn find(&self, user_id: i64) -> Result<Option<RiskLimits>, DataError>;

    async fn upsert(&self, limits: &RiskLimits) -> Result<(), DataError>;
}

#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    async fn find_position(
        &self,
        user_id: i64,
        symbol: &str,
        exchange: Exchange,
    ) -> Result<Option<Position>, DataError>;

    async fn list_positions(&self, user_id: i64) -> Result<Vec<Position>, DataError>;

    /// Copy the current position rows into the daily history table.
    async fn snapshot_history(&self, as_of: DateTime<Utc>) -> Result<u64, DataError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), DataError>;

    async fn recent_for_entity(
        &self,
        entity_kind: &str,
        entity_id: &str,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, DataError>;
}

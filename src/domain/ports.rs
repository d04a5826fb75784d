//! Outbound service ports.
//!
//! Every external collaborator (broker auth, broker adapters, portfolio,
//! event bus, notifications) is consumed through one of these traits.
//! Implementations live in `infrastructure`; tests inject the mocks from
//! `infrastructure::mock`. All calls carry the request correlation id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::ServiceError;
use crate::domain::trading::exchange::Exchange;
use crate::domain::trading::order::{Order, OrderSide, OrderType, TimeInForce};

// ===== Broker auth =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    TokenExpired,
}

/// A broker session handle issued by the broker-auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConnection {
    pub user_id: i64,
    pub broker: String,
    pub active: bool,
    pub status: ConnectionStatus,
    pub access_token: String,
    pub token_expires_at: DateTime<Utc>,
}

impl BrokerConnection {
    /// A connection is usable iff active, CONNECTED and the token has not
    /// expired. Anything else forces a refresh before use.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.status == ConnectionStatus::Connected && self.token_expires_at > now
    }
}

#[async_trait]
pub trait BrokerAuthService: Send + Sync {
    async fn get_connection(
        &self,
        user_id: i64,
        broker: &str,
        correlation_id: Uuid,
    ) -> Result<BrokerConnection, ServiceError>;

    async fn validate_token(
        &self,
        connection: &BrokerConnection,
        correlation_id: Uuid,
    ) -> Result<bool, ServiceError>;

    /// Refresh an expired token. A refresh failure is non-retryable: the
    /// user must re-authenticate with the broker.
    async fn refresh_token(
        &self,
        connection: &BrokerConnection,
        correlation_id: Uuid,
    ) -> Result<BrokerConnection, ServiceError>;

    async fn get_health(&self, broker: &str) -> Result<bool, ServiceError>;
}

// ===== Broker adapter =====

/// Broker-agnostic order submission payload.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerOrderRequest {
    pub order_id: String,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

impl BrokerOrderRequest {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            exchange: order.exchange,
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            limit_price: order.limit_price,
            stop_price: order.stop_price,
            time_in_force: order.time_in_force,
        }
    }
}

/// Broker-reported order state, as classified by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerOrderStatus {
    Pending,
    PartialFill,
    Filled,
    Rejected,
    Cancelled,
    Expired,
    Failed,
}

impl BrokerOrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BrokerOrderStatus::Pending | BrokerOrderStatus::PartialFill)
    }
}

impl fmt::Display for BrokerOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrokerOrderStatus::Pending => "PENDING",
            BrokerOrderStatus::PartialFill => "PARTIAL_FILL",
            BrokerOrderStatus::Filled => "FILLED",
            BrokerOrderStatus::Rejected => "REJECTED",
            BrokerOrderStatus::Cancelled => "CANCELLED",
            BrokerOrderStatus::Expired => "EXPIRED",
            BrokerOrderStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderResponse {
    pub broker_order_id: String,
    pub status: BrokerOrderStatus,
    pub filled_quantity: i64,
    pub average_price: Option<Decimal>,
    pub broker_fill_id: Option<String>,
    pub reason: Option<String>,
}

/// Changes forwarded to the broker on a modify.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerModifyRequest {
    pub broker_order_id: String,
    pub quantity: Option<i64>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

/// One concrete broker integration. Submit/modify/cancel/status are the
/// only operations the execution engine needs; everything else (sessions,
/// tokens) belongs to the broker-auth service.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn supports_exchange(&self, exchange: Exchange) -> bool;

    async fn submit_order(
        &self,
        connection: &BrokerConnection,
        request: &BrokerOrderRequest,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ServiceError>;

    async fn modify_order(
        &self,
        connection: &BrokerConnection,
        request: &BrokerModifyRequest,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ServiceError>;

    async fn cancel_order(
        &self,
        connection: &BrokerConnection,
        broker_order_id: &str,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ServiceError>;

    async fn get_status(
        &self,
        connection: &BrokerConnection,
        broker_order_id: &str,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ServiceError>;
}

// ===== Portfolio =====

/// Pre-trade impact assessment from the portfolio service.
///
/// `from_fallback` marks the conservative cached record served while the
/// portfolio breaker is open; the risk engine flags such trades instead of
/// treating the outage as a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioImpact {
    pub available_buying_power: Decimal,
    pub total_portfolio_value: Decimal,
    pub projected_concentration_pct: f64,
    pub projected_margin_usage: f64,
    pub margin_impact_acceptable: bool,
    #[serde(default)]
    pub from_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRisk {
    pub symbol: String,
    pub current_quantity: i64,
    pub max_position_size: i64,
    #[serde(default)]
    pub from_fallback: bool,
}

/// Post-trade position mutation sent to the portfolio service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub user_id: i64,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    pub quantity: i64,
    pub price: Decimal,
    pub trade_id: String,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PortfolioService: Send + Sync {
    async fn calculate_impact(
        &self,
        user_id: i64,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        order_value: Decimal,
        correlation_id: Uuid,
    ) -> Result<PortfolioImpact, ServiceError>;

    async fn get_position_risk(
        &self,
        user_id: i64,
        symbol: &str,
        correlation_id: Uuid,
    ) -> Result<PositionRisk, ServiceError>;

    async fn update_position(&self, update: &PositionUpdate) -> Result<(), ServiceError>;

    /// Number of position updates deferred while the portfolio breaker was
    /// open. Zero for implementations that never queue.
    fn queued_updates(&self) -> usize {
        0
    }

    /// Replay deferred position updates in creation order. Returns how
    /// many were applied; remaining entries stay queued.
    async fn drain_queued_updates(&self) -> usize {
        0
    }
}

// ===== Events & notifications =====

/// An event published to the bus. Fire-and-forget: publication failures
/// are logged and dropped, the audit trail is the source for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: String,
    pub correlation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn order_executed(order: &Order, correlation_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            event_type: "ORDER_EXECUTED".to_string(),
            correlation_id,
            occurred_at: now,
            payload: serde_json::json!({
                "orderId": order.order_id,
                "userId": order.user_id,
                "symbol": order.symbol,
                "exchange": order.exchange.as_str(),
                "side": order.side.to_string(),
                "status": order.status.to_string(),
                "filledQuantity": order.filled_quantity,
                "averageFillPrice": order.average_fill_price,
            }),
        }
    }

    pub fn order_expired(order: &Order, correlation_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            event_type: "ORDER_EXPIRED".to_string(),
            correlation_id,
            occurred_at: now,
            payload: serde_json::json!({
                "orderId": order.order_id,
                "userId": order.user_id,
                "symbol": order.symbol,
            }),
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), ServiceError>;

    async fn publish_batch(&self, events: &[DomainEvent]) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(
        &self,
        user_id: i64,
        subject: &str,
        body: &str,
        correlation_id: Uuid,
    ) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_connection_usability() {
        let now = Utc::now();
        let mut conn = BrokerConnection {
            user_id: 12345,
            broker: "ZERODHA".to_string(),
            active: true,
            status: ConnectionStatus::Connected,
            access_token: "tok".to_string(),
            token_expires_at: now + Duration::hours(1),
        };
        assert!(conn.is_usable(now));

        conn.token_expires_at = now - Duration::seconds(1);
        assert!(!conn.is_usable(now));

        conn.token_expires_at = now + Duration::hours(1);
        conn.status = ConnectionStatus::TokenExpired;
        assert!(!conn.is_usable(now));

        conn.status = ConnectionStatus::Connected;
        conn.active = false;
        assert!(!conn.is_usable(now));
    }

    #[test]
    fn test_broker_status_terminality() {
        assert!(!BrokerOrderStatus::Pending.is_terminal());
        assert!(!BrokerOrderStatus::PartialFill.is_terminal());
        assert!(BrokerOrderStatus::Filled.is_terminal());
        assert!(BrokerOrderStatus::Rejected.is_terminal());
        assert!(BrokerOrderStatus::Cancelled.is_terminal());
    }
}

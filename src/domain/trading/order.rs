//! The order aggregate and its lifecycle state machine.
//!
//! Every status change goes through [`Order::transition`], which enforces
//! the transition graph. Terminal orders (FILLED / CANCELLED / REJECTED /
//! EXPIRED) are frozen: any further transition attempt is an error the
//! caller must treat as a bug or a reconciliation conflict.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::exchange::Exchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLimit,
}

impl OrderType {
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::StopLoss | OrderType::StopLimit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopLoss => write!(f, "STOP_LOSS"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
    Gtd,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Day => write!(f, "DAY"),
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
            TimeInForce::Gtd => write!(f, "GTD"),
        }
    }
}

// ===== Status & transitions =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Validated,
    Submitted,
    Acknowledged,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// No transitions leave a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Modification is only legal while the broker is working the order.
    pub fn is_modifiable(&self) -> bool {
        matches!(self, OrderStatus::Acknowledged | OrderStatus::PartiallyFilled)
    }

    /// The allowed transition graph.
    ///
    /// PENDING/VALIDATED may go to CANCELLED directly: that is the
    /// user-cancel-before-submission path, which never reaches a broker.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Pending => matches!(to, Validated | Rejected | Cancelled),
            Validated => matches!(to, Submitted | Rejected | Cancelled),
            Submitted => matches!(
                to,
                Acknowledged | PartiallyFilled | Filled | Rejected | Cancelled | Expired
            ),
            Acknowledged => {
                matches!(to, PartiallyFilled | Filled | Rejected | Cancelled | Expired)
            }
            // Fills accumulate, so PARTIALLY_FILLED -> PARTIALLY_FILLED is legal.
            PartiallyFilled => matches!(to, PartiallyFilled | Filled | Cancelled | Expired),
            Filled | Cancelled | Rejected | Expired => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Validated => write!(f, "VALIDATED"),
            OrderStatus::Submitted => write!(f, "SUBMITTED"),
            OrderStatus::Acknowledged => write!(f, "ACKNOWLEDGED"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
            OrderStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Rejected status change. Treated as a halt/alert signal by callers: the
/// state machine never silently ignores an illegal transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal order transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

// ===== Request / modification shapes =====

/// A user-submitted trade intent, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-supplied order identity. When present it becomes the
    /// external order id, making repeated placement of the same intent
    /// detectable at the idempotency gate; otherwise a fresh `TM-` id is
    /// generated.
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub expiry_date: Option<DateTime<Utc>>,
    /// Reference price for MARKET order value estimation. Optional; the
    /// risk engine falls back to its configured default when absent.
    pub reference_price: Option<Decimal>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Requested changes to a working order. Symbol, side and order type are
/// immutable; absent fields keep their current values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderModification {
    pub quantity: Option<i64>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

// ===== Order aggregate =====

/// External order identity: `TM-<epoch-millis>-<random>`.
pub fn new_order_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random_range(0..1_000_000);
    format!("TM-{}-{:06}", now.timestamp_millis(), suffix)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Opaque internal identity.
    pub id: Uuid,
    /// Externally visible identifier (`TM-...`), unique.
    pub order_id: String,
    pub user_id: i64,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub expiry_date: Option<DateTime<Utc>>,
    pub status: OrderStatus,
    pub broker_order_id: Option<String>,
    pub broker_name: Option<String>,
    pub filled_quantity: i64,
    pub average_fill_price: Option<Decimal>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Order {
    /// Build a PENDING order from a validated-shape request.
    pub fn from_request(request: &OrderRequest, user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: request
                .client_order_id
                .clone()
                .unwrap_or_else(|| new_order_id(now)),
            user_id,
            symbol: request.symbol.clone(),
            exchange: request.exchange,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            expiry_date: request.expiry_date,
            status: OrderStatus::Pending,
            broker_order_id: None,
            broker_name: None,
            filled_quantity: 0,
            average_fill_price: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            executed_at: None,
            metadata: request.metadata.clone(),
        }
    }

    /// Apply a status change through the transition graph.
    pub fn transition(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        match to {
            OrderStatus::Submitted => self.submitted_at = Some(now),
            OrderStatus::Filled => self.executed_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Remaining quantity the broker is still working.
    pub fn remaining_quantity(&self) -> i64 {
        self.quantity - self.filled_quantity
    }

    /// Record an execution of `quantity` at `price`, maintaining the
    /// volume-weighted average fill price and the fill invariants.
    ///
    /// Drives the status to FILLED or PARTIALLY_FILLED. Returns the
    /// over-fill as an error instead of clamping: a broker reporting more
    /// than the requested quantity is a reconciliation incident.
    pub fn apply_execution(
        &mut self,
        quantity: i64,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        debug_assert!(quantity > 0, "fill quantity must be positive");
        let new_filled = self.filled_quantity + quantity;
        if new_filled > self.quantity {
            return Err(InvalidTransition {
                from: self.status,
                to: OrderStatus::Filled,
            });
        }

        let previous_notional = self
            .average_fill_price
            .unwrap_or(Decimal::ZERO)
            * Decimal::from(self.filled_quantity);
        let fill_notional = price * Decimal::from(quantity);
        self.average_fill_price = Some((previous_notional + fill_notional) / Decimal::from(new_filled));
        self.filled_quantity = new_filled;

        let target = if new_filled == self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.transition(target, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> OrderRequest {
        OrderRequest {
            client_order_id: None,
            symbol: "RELIANCE".to_string(),
            exchange: Exchange::Nse,
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: 100,
            limit_price: Some(dec!(2450.75)),
            stop_price: None,
            time_in_force: TimeInForce::Day,
            expiry_date: None,
            reference_price: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_order_id_format() {
        let id = new_order_id(Utc::now());
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TM");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn test_happy_path_transitions() {
        let now = Utc::now();
        let mut order = Order::from_request(&request(), 12345, now);
        assert_eq!(order.status, OrderStatus::Pending);

        order.transition(OrderStatus::Validated, now).unwrap();
        order.transition(OrderStatus::Submitted, now).unwrap();
        assert!(order.submitted_at.is_some());
        order.transition(OrderStatus::Acknowledged, now).unwrap();
        order.transition(OrderStatus::PartiallyFilled, now).unwrap();
        order.transition(OrderStatus::Filled, now).unwrap();
        assert!(order.executed_at.is_some());
        assert!(order.status.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        let now = Utc::now();
        let mut order = Order::from_request(&request(), 12345, now);
        order.transition(OrderStatus::Rejected, now).unwrap();

        for to in [
            OrderStatus::Pending,
            OrderStatus::Validated,
            OrderStatus::Submitted,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
        ] {
            let err = order.transition(to, now).unwrap_err();
            assert_eq!(err.from, OrderStatus::Rejected);
        }
    }

    #[test]
    fn test_skipping_validation_is_illegal() {
        let now = Utc::now();
        let mut order = Order::from_request(&request(), 12345, now);
        assert!(order.transition(OrderStatus::Submitted, now).is_err());
    }

    #[test]
    fn test_modifiable_states() {
        assert!(OrderStatus::Acknowledged.is_modifiable());
        assert!(OrderStatus::PartiallyFilled.is_modifiable());
        assert!(!OrderStatus::Submitted.is_modifiable());
        assert!(!OrderStatus::Filled.is_modifiable());
    }

    #[test]
    fn test_apply_execution_vwap() {
        let now = Utc::now();
        let mut order = Order::from_request(&request(), 12345, now);
        order.transition(OrderStatus::Validated, now).unwrap();
        order.transition(OrderStatus::Submitted, now).unwrap();
        order.transition(OrderStatus::Acknowledged, now).unwrap();

        order.apply_execution(40, dec!(2450.00), now).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_quantity, 40);
        assert_eq!(order.average_fill_price, Some(dec!(2450.00)));

        order.apply_execution(60, dec!(2451.00), now).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, 100);
        // (40*2450 + 60*2451) / 100 = 2450.60
        assert_eq!(order.average_fill_price, Some(dec!(2450.60)));
    }

    #[test]
    fn test_overfill_rejected() {
        let now = Utc::now();
        let mut order = Order::from_request(&request(), 12345, now);
        order.transition(OrderStatus::Validated, now).unwrap();
        order.transition(OrderStatus::Submitted, now).unwrap();
        order.transition(OrderStatus::Acknowledged, now).unwrap();

        assert!(order.apply_execution(101, dec!(2450.00), now).is_err());
        assert_eq!(order.filled_quantity, 0);
    }
}

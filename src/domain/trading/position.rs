//! Portfolio positions and per-user risk limits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::exchange::Exchange;
use super::order::OrderSide;

/// The standing of a user in a symbol on an exchange.
///
/// Keyed by (user, symbol, exchange). Quantity is signed: positive long,
/// negative short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub user_id: i64,
    pub symbol: String,
    pub exchange: Exchange,
    pub quantity: i64,
    pub average_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn empty(user_id: i64, symbol: &str, exchange: Exchange, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            symbol: symbol.to_string(),
            exchange,
            quantity: 0,
            average_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_price: Decimal::ZERO,
            updated_at: now,
        }
    }

    /// Apply a trade to the position.
    ///
    /// BUY increments quantity and recomputes the volume-weighted average
    /// cost. SELL decrements quantity and realizes P&L against the running
    /// average cost; the average cost does not shift on SELL. Short
    /// positions follow the same signed arithmetic.
    pub fn apply_trade(&mut self, side: OrderSide, quantity: i64, price: Decimal, now: DateTime<Utc>) {
        match side {
            OrderSide::Buy => {
                let new_quantity = self.quantity + quantity;
                if new_quantity != 0 {
                    let existing = self.average_cost * Decimal::from(self.quantity);
                    let added = price * Decimal::from(quantity);
                    self.average_cost = (existing + added) / Decimal::from(new_quantity);
                }
                self.quantity = new_quantity;
            }
            OrderSide::Sell => {
                self.realized_pnl += (price - self.average_cost) * Decimal::from(quantity);
                self.quantity -= quantity;
                if self.quantity == 0 {
                    self.average_cost = Decimal::ZERO;
                }
            }
        }
        self.last_price = price;
        self.unrealized_pnl = (self.last_price - self.average_cost) * Decimal::from(self.quantity);
        self.updated_at = now;
    }

    /// Re-mark the position at a new last price.
    pub fn mark(&mut self, last_price: Decimal, now: DateTime<Utc>) {
        self.last_price = last_price;
        self.unrealized_pnl = (last_price - self.average_cost) * Decimal::from(self.quantity);
        self.updated_at = now;
    }

    pub fn market_value(&self) -> Decimal {
        self.last_price * Decimal::from(self.quantity)
    }
}

/// Per-user risk limits, unique by user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub user_id: i64,
    pub max_position_value: Decimal,
    pub max_single_order_value: Decimal,
    pub max_daily_trades: u32,
    pub max_open_orders: u32,
    pub pattern_day_trader: bool,
    pub day_trading_buying_power: Decimal,
}

impl RiskLimits {
    /// Conservative defaults applied to users without a stored row.
    pub fn default_for(user_id: i64) -> Self {
        Self {
            user_id,
            max_position_value: Decimal::from(50_000_000u64),
            max_single_order_value: Decimal::from(10_000_000u64),
            max_daily_trades: 100,
            max_open_orders: 50,
            pattern_day_trader: false,
            day_trading_buying_power: Decimal::ZERO,
        }
    }
}

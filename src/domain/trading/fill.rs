//! Fills and the trades derived from them.
//!
//! A fill is a broker-reported execution event against an order; fills are
//! append-only. A trade is the settled unit derived from a fill and is what
//! triggers the portfolio mutation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::exchange::Exchange;
use super::order::{Order, OrderSide};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: String,
    pub quantity: i64,
    pub price: Decimal,
    pub fill_time: DateTime<Utc>,
    pub broker_fill_id: Option<String>,
    pub commission: Decimal,
    pub taxes: Decimal,
}

impl Fill {
    pub fn new(
        order_id: &str,
        quantity: i64,
        price: Decimal,
        broker_fill_id: Option<String>,
        fill_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            quantity,
            price,
            fill_time,
            broker_fill_id,
            commission: Decimal::ZERO,
            taxes: Decimal::ZERO,
        }
    }

    pub fn gross_amount(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// A completed execution unit. Inserting a trade upserts the matching
/// portfolio position in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: String,
    pub user_id: i64,
    pub symbol: String,
    pub exchange: Exchange,
    pub side: OrderSide,
    pub quantity: i64,
    pub price: Decimal,
    /// Gross amount plus fees for a BUY, minus fees for a SELL.
    pub net_amount: Decimal,
    pub settlement_date: DateTime<Utc>,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Derive the trade for a fill. Settlement is T+2 calendar days.
    pub fn from_fill(order: &Order, fill: &Fill) -> Self {
        let gross = fill.gross_amount();
        let fees = fill.commission + fill.taxes;
        let net_amount = match order.side {
            OrderSide::Buy => gross + fees,
            OrderSide::Sell => gross - fees,
        };
        Self {
            trade_id: format!("TR-{}", Uuid::new_v4()),
            order_id: order.order_id.clone(),
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            exchange: order.exchange,
            side: order.side,
            quantity: fill.quantity,
            price: fill.price,
            net_amount,
            settlement_date: fill.fill_time + Duration::days(2),
            executed_at: fill.fill_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::order::{OrderRequest, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn order(side: OrderSide) -> Order {
        let request = OrderRequest {
            client_order_id: None,
            symbol: "RELIANCE".to_string(),
            exchange: Exchange::Nse,
            side,
            order_type: OrderType::Limit,
            quantity: 100,
            limit_price: Some(dec!(2450.75)),
            stop_price: None,
            time_in_force: TimeInForce::Day,
            expiry_date: None,
            reference_price: None,
            metadata: serde_json::Map::new(),
        };
        Order::from_request(&request, 12345, Utc::now())
    }

    #[test]
    fn test_trade_net_amount_buy_includes_fees() {
        let order = order(OrderSide::Buy);
        let mut fill = Fill::new(&order.order_id, 100, dec!(2450.75), None, Utc::now());
        fill.commission = dec!(20);
        fill.taxes = dec!(5);

        let trade = Trade::from_fill(&order, &fill);
        assert_eq!(trade.net_amount, dec!(245075) + dec!(25));
        assert_eq!(trade.quantity, 100);
        assert!(trade.trade_id.starts_with("TR-"));
    }

    #[test]
    fn test_trade_net_amount_sell_deducts_fees() {
        let order = order(OrderSide::Sell);
        let mut fill = Fill::new(&order.order_id, 100, dec!(2450.75), None, Utc::now());
        fill.commission = dec!(20);

        let trade = Trade::from_fill(&order, &fill);
        assert_eq!(trade.net_amount, dec!(245075) - dec!(20));
    }

    #[test]
    fn test_settlement_is_t_plus_two() {
        let order = order(OrderSide::Buy);
        let fill = Fill::new(&order.order_id, 10, dec!(2450.75), None, Utc::now());
        let trade = Trade::from_fill(&order, &fill);
        assert_eq!(trade.settlement_date - fill.fill_time, Duration::days(2));
    }
}

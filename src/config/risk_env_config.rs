//! Risk engine configuration parsing from environment variables.

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use super::{parse_f64, parse_u32, parse_u64};

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub max_order_value: Decimal,
    pub max_daily_trades: u32,
    /// Maximum portfolio share of a single symbol, in percent.
    pub max_position_concentration_pct: f64,
    /// Extra buying power demanded on top of the order value (0.1 = 10%).
    pub min_buying_power_buffer: f64,
    /// Maximum projected margin usage, as a fraction.
    pub max_margin_usage: f64,
    /// Fallback reference price for MARKET orders when the caller supplies
    /// none. Test-grade; a market-data lookup replaces this in production.
    pub default_market_reference_price: Decimal,
    /// Per-check budget for portfolio adapter calls.
    pub adapter_timeout_millis: u64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        let max_order_value_f64 = parse_f64("MAX_ORDER_VALUE", 10_000_000.0)?;
        let reference_price_f64 = parse_f64("DEFAULT_MARKET_REFERENCE_PRICE", 100.0)?;

        Ok(Self {
            max_order_value: Decimal::from_f64(max_order_value_f64)
                .unwrap_or_else(|| Decimal::from(10_000_000u64)),
            max_daily_trades: parse_u32("MAX_DAILY_TRADES", 100)?,
            max_position_concentration_pct: parse_f64("MAX_POSITION_CONCENTRATION", 30.0)?,
            min_buying_power_buffer: parse_f64("MIN_BUYING_POWER_BUFFER", 0.1)?,
            max_margin_usage: parse_f64("MAX_MARGIN_USAGE", 0.8)?,
            default_market_reference_price: Decimal::from_f64(reference_price_f64)
                .unwrap_or_else(|| Decimal::from(100)),
            adapter_timeout_millis: parse_u64("RISK_ADAPTER_TIMEOUT_MILLIS", 5_000)?,
        })
    }
}

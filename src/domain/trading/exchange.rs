use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported listing exchanges.
///
/// Tick and lot sizes drive price/quantity validation; the session close
/// drives DAY-order expiry in the lifecycle scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Nse,
    Bse,
    Nyse,
    Nasdaq,
    Lse,
}

impl Exchange {
    /// Minimum price increment for the exchange.
    pub fn tick_size(&self) -> Decimal {
        match self {
            Exchange::Nse | Exchange::Bse => dec!(0.05),
            Exchange::Nyse | Exchange::Nasdaq | Exchange::Lse => dec!(0.01),
        }
    }

    /// Minimum order-quantity multiple. All supported exchanges trade in
    /// single-share lots today; kept per-exchange so derivatives lots can
    /// slot in later.
    pub fn lot_size(&self) -> i64 {
        1
    }

    /// Regular-session close in UTC, used for DAY-order expiry.
    ///
    /// Approximations that ignore DST shifts: NSE/BSE 15:30 IST, NYSE/NASDAQ
    /// 16:00 ET, LSE 16:30 London.
    pub fn session_close_utc(&self) -> NaiveTime {
        match self {
            Exchange::Nse | Exchange::Bse => NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            Exchange::Nyse | Exchange::Nasdaq => NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
            Exchange::Lse => NaiveTime::from_hms_opt(16, 30, 0).unwrap(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
            Exchange::Nyse => "NYSE",
            Exchange::Nasdaq => "NASDAQ",
            Exchange::Lse => "LSE",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NSE" => Ok(Exchange::Nse),
            "BSE" => Ok(Exchange::Bse),
            "NYSE" => Ok(Exchange::Nyse),
            "NASDAQ" => Ok(Exchange::Nasdaq),
            "LSE" => Ok(Exchange::Lse),
            _ => anyhow::bail!("Unsupported exchange: {}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_sizes() {
        assert_eq!(Exchange::Nse.tick_size(), dec!(0.05));
        assert_eq!(Exchange::Bse.tick_size(), dec!(0.05));
        assert_eq!(Exchange::Nyse.tick_size(), dec!(0.01));
        assert_eq!(Exchange::Nasdaq.tick_size(), dec!(0.01));
        assert_eq!(Exchange::Lse.tick_size(), dec!(0.01));
    }

    #[test]
    fn test_parse_roundtrip() {
        for ex in ["NSE", "BSE", "NYSE", "NASDAQ", "LSE"] {
            let parsed: Exchange = ex.parse().unwrap();
            assert_eq!(parsed.to_string(), ex);
        }
        assert!("TSE".parse::<Exchange>().is_err());
    }
}

pub mod order_repository;
pub mod portfolio_repository;
pub mod risk_limits_repository;

pub use order_repository::{SqliteAuditRepository, SqliteOrderRepository};
pub use portfolio_repository::SqlitePortfolioRepository;
pub use risk_limits_repository::SqliteRiskLimitsRepository;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::errors::DataError;

pub(crate) fn db_err(e: sqlx::Error) -> DataError {
    DataError::Database {
        reason: e.to_string(),
    }
}

pub(crate) fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn parse_decimal(raw: &str, column: &str) -> Result<Decimal, DataError> {
    Decimal::from_str(raw).map_err(|e| DataError::DataIntegrityViolation {
        reason: format!("bad decimal in {}: {}", column, e),
    })
}

//! SQLite repository for per-user risk limits.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::DataError;
use crate::domain::repositories::RiskLimitsRepository;
use crate::domain::trading::position::RiskLimits;

use super::{db_err, millis, parse_decimal};

pub struct SqliteRiskLimitsRepository {
    pool: SqlitePool,
}

impl SqliteRiskLimitsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RiskLimitsRepository for SqliteRiskLimitsRepository {
    async fn find(&self, user_id: i64) -> Result<Option<RiskLimits>, DataError> {
        let row = sqlx::query("SELECT * FROM risk_limits WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|row| {
            let max_position: String = row.try_get("max_position_value").map_err(db_err)?;
            let max_order: String = row.try_get("max_single_order_value").map_err(db_err)?;
            let buying_power: String = row.try_get("day_trading_buying_power").map_err(db_err)?;
            Ok(RiskLimits {
                user_id: row.try_get("user_id").map_err(db_err)?,
                max_position_value: parse_decimal(&max_position, "max_position_value")?,
                max_single_order_value: parse_decimal(&max_order, "max_single_order_value")?,
                max_daily_trades: row.try_get::<i64, _>("max_daily_trades").map_err(db_err)? as u32,
                max_open_orders: row.try_get::<i64, _>("max_open_orders").map_err(db_err)? as u32,
                pattern_day_trader: row.try_get("pattern_day_trader").map_err(db_err)?,
                day_trading_buying_power: parse_decimal(&buying_power, "day_trading_buying_power")?,
            })
        })
        .transpose()
    }

    async fn upsert(&self, limits: &RiskLimits) -> Result<(), DataError> {
        sqlx::query(
            r#"
            INSERT INTO risk_limits (
                user_id, max_position_value, max_single_order_value,
                max_daily_trades, max_open_orders, pattern_day_trader,
                day_trading_buying_power, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                max_position_value = excluded.max_position_value,
                max_single_order_value = excluded.max_single_order_value,
                max_daily_trades = excluded.max_daily_trades,
                max_open_orders = excluded.max_open_orders,
                pattern_day_trader = excluded.pattern_day_trader,
                day_trading_buying_power = excluded.day_trading_buying_power,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(limits.user_id)
        .bind(limits.max_position_value.to_string())
        .bind(limits.max_single_order_value.to_string())
        .bind(limits.max_daily_trades as i64)
        .bind(limits.max_open_orders as i64)
        .bind(limits.pattern_day_trader)
        .bind(limits.day_trading_buying_power.to_string())
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_upsert_and_find_roundtrip() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteRiskLimitsRepository::new(db.pool);

        assert!(repo.find(12345).await.unwrap().is_none());

        let mut limits = RiskLimits::default_for(12345);
        limits.max_daily_trades = 25;
        limits.pattern_day_trader = true;
        repo.upsert(&limits).await.unwrap();

        let loaded = repo.find(12345).await.unwrap().expect("limits exist");
        assert_eq!(loaded.max_daily_trades, 25);
        assert!(loaded.pattern_day_trader);
        assert_eq!(loaded.max_single_order_value, Decimal::from(10_000_000u64));

        // Upsert replaces, it does not duplicate.
        limits.max_daily_trades = 50;
        repo.upsert(&limits).await.unwrap();
        assert_eq!(repo.find(12345).await.unwrap().unwrap().max_daily_trades, 50);
    }
}

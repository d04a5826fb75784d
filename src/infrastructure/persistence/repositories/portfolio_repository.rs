//! SQLite repository for locally persisted portfolio positions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::domain::errors::DataError;
use crate::domain::repositories::PortfolioRepository;
use crate::domain::trading::exchange::Exchange;
use crate::domain::trading::position::Position;

use super::order_repository::map_row_to_position;
use super::{db_err, millis};

pub struct SqlitePortfolioRepository {
    pool: SqlitePool,
}

impl SqlitePortfolioRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PortfolioRepository for SqlitePortfolioRepository {
    async fn find_position(
        &self,
        user_id: i64,
        symbol: &str,
        exchange: Exchange,
    ) -> Result<Option<Position>, DataError> {
        let row = sqlx::query(
            "SELECT * FROM portfolios WHERE user_id = ? AND symbol = ? AND exchange = ?",
        )
        .bind(user_id)
        .bind(symbol)
        .bind(exchange.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| map_row_to_position(&r)).transpose()
    }

    async fn list_positions(&self, user_id: i64) -> Result<Vec<Position>, DataError> {
        let rows = sqlx::query("SELECT * FROM portfolios WHERE user_id = ? ORDER BY symbol")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|r| map_row_to_position(r)).collect()
    }

    async fn snapshot_history(&self, as_of: DateTime<Utc>) -> Result<u64, DataError> {
        let result = sqlx::query(
            r#"
            INSERT INTO portfolio_history (
                as_of, user_id, symbol, exchange, quantity, average_cost,
                realized_pnl, unrealized_pnl, last_price
            )
            SELECT ?, user_id, symbol, exchange, quantity, average_cost,
                   realized_pnl, unrealized_pnl, last_price
            FROM portfolios
            "#,
        )
        .bind(millis(as_of))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let rows = result.rows_affected();
        if rows > 0 {
            info!("Captured portfolio history snapshot ({} rows)", rows);
        }
        Ok(rows)
    }
}

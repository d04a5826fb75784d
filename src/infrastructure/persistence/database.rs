use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Orders. Key constraints: order_id unique, filled <= quantity,
        //    expiry present iff GTD.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                limit_price TEXT,
                stop_price TEXT,
                time_in_force TEXT NOT NULL,
                expiry_date INTEGER,
                status TEXT NOT NULL,
                broker_order_id TEXT,
                broker_name TEXT,
                filled_quantity INTEGER NOT NULL DEFAULT 0
                    CHECK (filled_quantity >= 0 AND filled_quantity <= quantity),
                average_fill_price TEXT,
                rejection_reason TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                submitted_at INTEGER,
                executed_at INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}',
                CHECK ((time_in_force = 'GTD') = (expiry_date IS NOT NULL))
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orders table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_user_status
            ON orders (user_id, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orders index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_status_updated
            ON orders (status, updated_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orders status index")?;

        // 2. Fills (append-only)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_fills (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(order_id),
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                price TEXT NOT NULL,
                fill_time INTEGER NOT NULL,
                broker_fill_id TEXT,
                commission TEXT NOT NULL DEFAULT '0',
                taxes TEXT NOT NULL DEFAULT '0'
            );
            CREATE INDEX IF NOT EXISTS idx_fills_order ON order_fills (order_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create order_fills table")?;

        // 3. Trades
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(order_id),
                user_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                price TEXT NOT NULL,
                net_amount TEXT NOT NULL,
                settlement_date INTEGER NOT NULL,
                executed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_user ON trades (user_id, executed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trades table")?;

        // 4. Portfolio positions, one row per (user, symbol, exchange)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                user_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                average_cost TEXT NOT NULL,
                realized_pnl TEXT NOT NULL DEFAULT '0',
                unrealized_pnl TEXT NOT NULL DEFAULT '0',
                last_price TEXT NOT NULL DEFAULT '0',
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, symbol, exchange)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create portfolios table")?;

        // 5. Daily position snapshots
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                as_of INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                average_cost TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                last_price TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_user_asof
            ON portfolio_history (user_id, as_of);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create portfolio_history table")?;

        // 6. Risk limits, unique per user
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_limits (
                user_id INTEGER PRIMARY KEY,
                max_position_value TEXT NOT NULL,
                max_single_order_value TEXT NOT NULL,
                max_daily_trades INTEGER NOT NULL,
                max_open_orders INTEGER NOT NULL,
                pattern_day_trader BOOLEAN NOT NULL DEFAULT 0,
                day_trading_buying_power TEXT NOT NULL DEFAULT '0',
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk_limits table")?;

        // 7. Audit log (append-only; every mutation of the core tables
        //    writes a row here in the same transaction)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trading_audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                old_state TEXT,
                new_state TEXT,
                correlation_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_entity
            ON trading_audit_log (entity_kind, entity_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trading_audit_log table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}

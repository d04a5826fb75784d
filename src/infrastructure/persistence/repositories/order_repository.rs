//! SQLite repository for orders, fills, trades and the audit log.
//!
//! Every mutation runs in one transaction and appends its audit rows
//! inside that transaction. `record_execution` is the atomic path: fill,
//! trade, order update and portfolio upsert commit together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::DataError;
use crate::domain::repositories::{AuditEntry, AuditRepository, OrderRepository};
use crate::domain::trading::exchange::Exchange;
use crate::domain::trading::fill::{Fill, Trade};
use crate::domain::trading::order::{
    Order, OrderSide, OrderStatus, OrderType, TimeInForce,
};
use crate::domain::trading::position::Position;

use super::{db_err, from_millis, millis, parse_decimal};

const ACTOR_SERVICE: &str = "order-service";

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn insert_order(&self, order: &Order, correlation_id: Uuid) -> Result<(), DataError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_id, user_id, symbol, exchange, side, order_type,
                quantity, limit_price, stop_price, time_in_force, expiry_date,
                status, broker_order_id, broker_name, filled_quantity,
                average_fill_price, rejection_reason, created_at, updated_at,
                submitted_at, executed_at, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order.id.to_string())
        .bind(&order.order_id)
        .bind(order.user_id)
        .bind(&order.symbol)
        .bind(order.exchange.as_str())
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.quantity)
        .bind(order.limit_price.map(|p| p.to_string()))
        .bind(order.stop_price.map(|p| p.to_string()))
        .bind(order.time_in_force.to_string())
        .bind(order.expiry_date.map(millis))
        .bind(order.status.to_string())
        .bind(&order.broker_order_id)
        .bind(&order.broker_name)
        .bind(order.filled_quantity)
        .bind(order.average_fill_price.map(|p| p.to_string()))
        .bind(&order.rejection_reason)
        .bind(millis(order.created_at))
        .bind(millis(order.updated_at))
        .bind(order.submitted_at.map(millis))
        .bind(order.executed_at.map(millis))
        .bind(serde_json::Value::Object(order.metadata.clone()).to_string())
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            if is_unique_violation(&e) {
                return Err(DataError::DuplicateEntity {
                    kind: "order",
                    id: order.order_id.clone(),
                });
            }
            return Err(db_err(e));
        }

        insert_audit(
            &mut tx,
            &AuditEntry {
                actor: ACTOR_SERVICE.to_string(),
                action: "ORDER_CREATED".to_string(),
                entity_kind: "order".to_string(),
                entity_id: order.order_id.clone(),
                old_state: None,
                new_state: serde_json::to_value(order).ok(),
                correlation_id,
            },
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        info!("Persisted Order {}", order.order_id);
        Ok(())
    }

    async fn update_order(&self, order: &Order, correlation_id: Uuid) -> Result<(), DataError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let old = fetch_order(&mut tx, &order.order_id).await?;
        update_order_row(&mut tx, order).await?;

        insert_audit(
            &mut tx,
            &AuditEntry {
                actor: ACTOR_SERVICE.to_string(),
                action: "ORDER_UPDATED".to_string(),
                entity_kind: "order".to_string(),
                entity_id: order.order_id.clone(),
                old_state: old.as_ref().and_then(|o| serde_json::to_value(o).ok()),
                new_state: serde_json::to_value(order).ok(),
                correlation_id,
            },
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>, DataError> {
        let row = sqlx::query("SELECT * FROM orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| map_row_to_order(&r)).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: i64,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, DataError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT * FROM orders WHERE user_id = ? AND status = ?
                    ORDER BY created_at DESC LIMIT ? OFFSET ?
                    "#,
                )
                .bind(user_id)
                .bind(status.to_string())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM orders WHERE user_id = ?
                    ORDER BY created_at DESC LIMIT ? OFFSET ?
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(db_err)?;

        rows.iter().map(map_row_to_order).collect()
    }

    async fn status_counts(&self, user_id: i64) -> Result<HashMap<OrderStatus, i64>, DataError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) as count FROM orders WHERE user_id = ? GROUP BY status",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut counts = HashMap::new();
        for row in rows {
            let status_str: String = row.try_get("status").map_err(db_err)?;
            let count: i64 = row.try_get("count").map_err(db_err)?;
            counts.insert(parse_status(&status_str)?, count);
        }
        Ok(counts)
    }

    async fn record_execution(
        &self,
        order: &Order,
        fill: &Fill,
        trade: &Trade,
        correlation_id: Uuid,
    ) -> Result<(), DataError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let old_order = fetch_order(&mut tx, &order.order_id).await?;
        update_order_row(&mut tx, order).await?;

        sqlx::query(
            r#"
            INSERT INTO order_fills (
                id, order_id, quantity, price, fill_time, broker_fill_id, commission, taxes
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(fill.id.to_string())
        .bind(&fill.order_id)
        .bind(fill.quantity)
        .bind(fill.price.to_string())
        .bind(millis(fill.fill_time))
        .bind(&fill.broker_fill_id)
        .bind(fill.commission.to_string())
        .bind(fill.taxes.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO trades (
                trade_id, order_id, user_id, symbol, exchange, side,
                quantity, price, net_amount, settlement_date, executed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.trade_id)
        .bind(&trade.order_id)
        .bind(trade.user_id)
        .bind(&trade.symbol)
        .bind(trade.exchange.as_str())
        .bind(trade.side.to_string())
        .bind(trade.quantity)
        .bind(trade.price.to_string())
        .bind(trade.net_amount.to_string())
        .bind(millis(trade.settlement_date))
        .bind(millis(trade.executed_at))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // Trigger surface: the trade insert upserts the matching position
        // with volume-weighted average cost, atomically with the trade.
        let old_position = fetch_position(&mut tx, trade.user_id, &trade.symbol, trade.exchange).await?;
        let mut position = old_position.clone().unwrap_or_else(|| {
            Position::empty(trade.user_id, &trade.symbol, trade.exchange, trade.executed_at)
        });
        position.apply_trade(trade.side, trade.quantity, trade.price, trade.executed_at);
        upsert_position(&mut tx, &position).await?;

        for entry in [
            AuditEntry {
                actor: ACTOR_SERVICE.to_string(),
                action: "ORDER_FILL_APPLIED".to_string(),
                entity_kind: "order".to_string(),
                entity_id: order.order_id.clone(),
                old_state: old_order.as_ref().and_then(|o| serde_json::to_value(o).ok()),
                new_state: serde_json::to_value(order).ok(),
                correlation_id,
            },
            AuditEntry {
                actor: ACTOR_SERVICE.to_string(),
                action: "TRADE_INSERTED".to_string(),
                entity_kind: "trade".to_string(),
                entity_id: trade.trade_id.clone(),
                old_state: None,
                new_state: serde_json::to_value(trade).ok(),
                correlation_id,
            },
            AuditEntry {
                actor: ACTOR_SERVICE.to_string(),
                action: "POSITION_UPDATED".to_string(),
                entity_kind: "position".to_string(),
                entity_id: format!("{}:{}:{}", trade.user_id, trade.symbol, trade.exchange),
                old_state: old_position.as_ref().and_then(|p| serde_json::to_value(p).ok()),
                new_state: serde_json::to_value(&position).ok(),
                correlation_id,
            },
        ] {
            insert_audit(&mut tx, &entry).await.map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        info!(
            "Recorded execution for {} ({} @ {})",
            order.order_id, fill.quantity, fill.price
        );
        Ok(())
    }

    async fn record_rejection_audit(
        &self,
        order_id: &str,
        user_id: i64,
        reasons: &[String],
        correlation_id: Uuid,
    ) -> Result<(), DataError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_audit(
            &mut conn,
            &AuditEntry {
                actor: ACTOR_SERVICE.to_string(),
                action: "ORDER_REJECTED".to_string(),
                entity_kind: "order".to_string(),
                entity_id: order_id.to_string(),
                old_state: None,
                new_state: serde_json::to_value(serde_json::json!({
                    "userId": user_id,
                    "reasons": reasons,
                }))
                .ok(),
                correlation_id,
            },
        )
        .await
        .map_err(db_err)
    }

    async fn find_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Order>, DataError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status IN ('SUBMITTED', 'ACKNOWLEDGED', 'PARTIALLY_FILLED')
              AND time_in_force IN ('DAY', 'GTD')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let orders: Vec<Order> = rows
            .iter()
            .map(map_row_to_order)
            .collect::<Result<_, _>>()?;

        Ok(orders
            .into_iter()
            .filter(|order| is_expired(order, now))
            .collect())
    }

    async fn find_stale_inflight(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, DataError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status IN ('SUBMITTED', 'ACKNOWLEDGED')
              AND updated_at < ?
            ORDER BY updated_at ASC
            "#,
        )
        .bind(millis(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_row_to_order).collect()
    }
}

/// DAY orders expire once the session close of their exchange has passed;
/// GTD orders expire past their expiry date.
fn is_expired(order: &Order, now: DateTime<Utc>) -> bool {
    match order.time_in_force {
        TimeInForce::Gtd => order.expiry_date.map(|e| e <= now).unwrap_or(false),
        TimeInForce::Day => {
            if order.created_at.date_naive() < now.date_naive() {
                return true;
            }
            let close_today = now
                .date_naive()
                .and_time(order.exchange.session_close_utc())
                .and_utc();
            order.created_at < close_today && now >= close_today
        }
        _ => false,
    }
}

// ===== Audit repository =====

pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn append(&self, entry: &AuditEntry) -> Result<(), DataError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_audit(&mut conn, entry).await.map_err(db_err)
    }

    async fn recent_for_entity(
        &self,
        entity_kind: &str,
        entity_id: &str,
        limit: i64,
    ) -> Result<Vec<AuditEntry>, DataError> {
        let rows = sqlx::query(
            r#"
            SELECT actor, action, entity_kind, entity_id, old_state, new_state, correlation_id
            FROM trading_audit_log
            WHERE entity_kind = ? AND entity_id = ?
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(entity_kind)
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let correlation: String = row.try_get("correlation_id").map_err(db_err)?;
                Ok(AuditEntry {
                    actor: row.try_get("actor").map_err(db_err)?,
                    action: row.try_get("action").map_err(db_err)?,
                    entity_kind: row.try_get("entity_kind").map_err(db_err)?,
                    entity_id: row.try_get("entity_id").map_err(db_err)?,
                    old_state: row
                        .try_get::<Option<String>, _>("old_state")
                        .map_err(db_err)?
                        .and_then(|s| serde_json::from_str(&s).ok()),
                    new_state: row
                        .try_get::<Option<String>, _>("new_state")
                        .map_err(db_err)?
                        .and_then(|s| serde_json::from_str(&s).ok()),
                    correlation_id: Uuid::parse_str(&correlation).unwrap_or_default(),
                })
            })
            .collect()
    }
}

// ===== Shared row plumbing =====

async fn insert_audit(conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO trading_audit_log (
            actor, action, entity_kind, entity_id, old_state, new_state,
            correlation_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.actor)
    .bind(&entry.action)
    .bind(&entry.entity_kind)
    .bind(&entry.entity_id)
    .bind(entry.old_state.as_ref().map(|v| v.to_string()))
    .bind(entry.new_state.as_ref().map(|v| v.to_string()))
    .bind(entry.correlation_id.to_string())
    .bind(millis(Utc::now()))
    .execute(conn)
    .await?;
    Ok(())
}

async fn fetch_order(
    tx: &mut SqliteConnection,
    order_id: &str,
) -> Result<Option<Order>, DataError> {
    let row = sqlx::query("SELECT * FROM orders WHERE order_id = ?")
        .bind(order_id)
        .fetch_optional(tx)
        .await
        .map_err(db_err)?;
    row.map(|r| map_row_to_order(&r)).transpose()
}

async fn update_order_row(tx: &mut SqliteConnection, order: &Order) -> Result<(), DataError> {
    let result = sqlx::query(
        r#"
        UPDATE orders SET
            quantity = ?, limit_price = ?, stop_price = ?, expiry_date = ?,
            status = ?, broker_order_id = ?, broker_name = ?,
            filled_quantity = ?, average_fill_price = ?, rejection_reason = ?,
            updated_at = ?, submitted_at = ?, executed_at = ?, metadata = ?
        WHERE order_id = ?
        "#,
    )
    .bind(order.quantity)
    .bind(order.limit_price.map(|p| p.to_string()))
    .bind(order.stop_price.map(|p| p.to_string()))
    .bind(order.expiry_date.map(millis))
    .bind(order.status.to_string())
    .bind(&order.broker_order_id)
    .bind(&order.broker_name)
    .bind(order.filled_quantity)
    .bind(order.average_fill_price.map(|p| p.to_string()))
    .bind(&order.rejection_reason)
    .bind(millis(order.updated_at))
    .bind(order.submitted_at.map(millis))
    .bind(order.executed_at.map(millis))
    .bind(serde_json::Value::Object(order.metadata.clone()).to_string())
    .bind(&order.order_id)
    .execute(tx)
    .await
    .map_err(db_err)?;

    if result.rows_affected() == 0 {
        return Err(DataError::EntityNotFound {
            kind: "order",
            id: order.order_id.clone(),
        });
    }
    Ok(())
}

async fn fetch_position(
    tx: &mut SqliteConnection,
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
    .fetch_optional(tx)
    .await
    .map_err(db_err)?;
    row.map(|r| map_row_to_position(&r)).transpose()
}

async fn upsert_position(tx: &mut SqliteConnection, position: &Position) -> Result<(), DataError> {
    sqlx::query(
        r#"
        INSERT INTO portfolios (
            user_id, symbol, exchange, quantity, average_cost,
            realized_pnl, unrealized_pnl, last_price, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id, symbol, exchange) DO UPDATE SET
            quantity = excluded.quantity,
            average_cost = excluded.average_cost,
            realized_pnl = excluded.realized_pnl,
            unrealized_pnl = excluded.unrealized_pnl,
            last_price = excluded.last_price,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(position.user_id)
    .bind(&position.symbol)
    .bind(position.exchange.as_str())
    .bind(position.quantity)
    .bind(position.average_cost.to_string())
    .bind(position.realized_pnl.to_string())
    .bind(position.unrealized_pnl.to_string())
    .bind(position.last_price.to_string())
    .bind(millis(position.updated_at))
    .execute(tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) fn map_row_to_position(row: &SqliteRow) -> Result<Position, DataError> {
    let exchange_str: String = row.try_get("exchange").map_err(db_err)?;
    let average_cost: String = row.try_get("average_cost").map_err(db_err)?;
    let realized: String = row.try_get("realized_pnl").map_err(db_err)?;
    let unrealized: String = row.try_get("unrealized_pnl").map_err(db_err)?;
    let last_price: String = row.try_get("last_price").map_err(db_err)?;

    Ok(Position {
        user_id: row.try_get("user_id").map_err(db_err)?,
        symbol: row.try_get("symbol").map_err(db_err)?,
        exchange: parse_exchange(&exchange_str)?,
        quantity: row.try_get("quantity").map_err(db_err)?,
        average_cost: parse_decimal(&average_cost, "average_cost")?,
        realized_pnl: parse_decimal(&realized, "realized_pnl")?,
        unrealized_pnl: parse_decimal(&unrealized, "unrealized_pnl")?,
        last_price: parse_decimal(&last_price, "last_price")?,
        updated_at: from_millis(row.try_get("updated_at").map_err(db_err)?),
    })
}

fn map_row_to_order(row: &SqliteRow) -> Result<Order, DataError> {
    let id_str: String = row.try_get("id").map_err(db_err)?;
    let exchange_str: String = row.try_get("exchange").map_err(db_err)?;
    let side_str: String = row.try_get("side").map_err(db_err)?;
    let type_str: String = row.try_get("order_type").map_err(db_err)?;
    let tif_str: String = row.try_get("time_in_force").map_err(db_err)?;
    let status_str: String = row.try_get("status").map_err(db_err)?;
    let metadata_str: String = row.try_get("metadata").map_err(db_err)?;

    let limit_price: Option<String> = row.try_get("limit_price").map_err(db_err)?;
    let stop_price: Option<String> = row.try_get("stop_price").map_err(db_err)?;
    let avg_price: Option<String> = row.try_get("average_fill_price").map_err(db_err)?;

    Ok(Order {
        id: Uuid::parse_str(&id_str).map_err(|e| DataError::DataIntegrityViolation {
            reason: format!("bad order uuid: {}", e),
        })?,
        order_id: row.try_get("order_id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        symbol: row.try_get("symbol").map_err(db_err)?,
        exchange: parse_exchange(&exchange_str)?,
        side: parse_side(&side_str)?,
        order_type: parse_order_type(&type_str)?,
        quantity: row.try_get("quantity").map_err(db_err)?,
        limit_price: limit_price
            .map(|p| parse_decimal(&p, "limit_price"))
            .transpose()?,
        stop_price: stop_price
            .map(|p| parse_decimal(&p, "stop_price"))
            .transpose()?,
        time_in_force: parse_tif(&tif_str)?,
        expiry_date: row
            .try_get::<Option<i64>, _>("expiry_date")
            .map_err(db_err)?
            .map(from_millis),
        status: parse_status(&status_str)?,
        broker_order_id: row.try_get("broker_order_id").map_err(db_err)?,
        broker_name: row.try_get("broker_name").map_err(db_err)?,
        filled_quantity: row.try_get("filled_quantity").map_err(db_err)?,
        average_fill_price: avg_price
            .map(|p| parse_decimal(&p, "average_fill_price"))
            .transpose()?,
        rejection_reason: row.try_get("rejection_reason").map_err(db_err)?,
        created_at: from_millis(row.try_get("created_at").map_err(db_err)?),
        updated_at: from_millis(row.try_get("updated_at").map_err(db_err)?),
        submitted_at: row
            .try_get::<Option<i64>, _>("submitted_at")
            .map_err(db_err)?
            .map(from_millis),
        executed_at: row
            .try_get::<Option<i64>, _>("executed_at")
            .map_err(db_err)?
            .map(from_millis),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

pub(crate) fn parse_exchange(s: &str) -> Result<Exchange, DataError> {
    Exchange::from_str(s).map_err(|_| DataError::DataIntegrityViolation {
        reason: format!("unknown exchange: {}", s),
    })
}

fn parse_side(s: &str) -> Result<OrderSide, DataError> {
    match s {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(DataError::DataIntegrityViolation {
            reason: format!("unknown side: {}", other),
        }),
    }
}

fn parse_order_type(s: &str) -> Result<OrderType, DataError> {
    match s {
        "MARKET" => Ok(OrderType::Market),
        "LIMIT" => Ok(OrderType::Limit),
        "STOP_LOSS" => Ok(OrderType::StopLoss),
        "STOP_LIMIT" => Ok(OrderType::StopLimit),
        other => Err(DataError::DataIntegrityViolation {
            reason: format!("unknown order type: {}", other),
        }),
    }
}

fn parse_tif(s: &str) -> Result<TimeInForce, DataError> {
    match s {
        "DAY" => Ok(TimeInForce::Day),
        "GTC" => Ok(TimeInForce::Gtc),
        "IOC" => Ok(TimeInForce::Ioc),
        "FOK" => Ok(TimeInForce::Fok),
        "GTD" => Ok(TimeInForce::Gtd),
        other => Err(DataError::DataIntegrityViolation {
            reason: format!("unknown time in force: {}", other),
        }),
    }
}

pub(crate) fn parse_status(s: &str) -> Result<OrderStatus, DataError> {
    match s {
        "PENDING" => Ok(OrderStatus::Pending),
        "VALIDATED" => Ok(OrderStatus::Validated),
        "SUBMITTED" => Ok(OrderStatus::Submitted),
        "ACKNOWLEDGED" => Ok(OrderStatus::Acknowledged),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELLED" => Ok(OrderStatus::Cancelled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" => Ok(OrderStatus::Expired),
        other => Err(DataError::DataIntegrityViolation {
            reason: format!("unknown order status: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::order::OrderRequest;
    use crate::infrastructure::persistence::Database;
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

    async fn repo() -> (SqliteOrderRepository, SqliteAuditRepository) {
        let db = Database::in_memory().await.unwrap();
        (
            SqliteOrderRepository::new(db.pool.clone()),
            SqliteAuditRepository::new(db.pool),
        )
    }

    #[tokio::test]
    async fn test_insert_and_roundtrip() {
        let (orders, _) = repo().await;
        let order = Order::from_request(&request(), 12345, Utc::now());
        orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

        let loaded = orders
            .find_by_order_id(&order.order_id)
            .await
            .unwrap()
            .expect("order should exist");
        assert_eq!(loaded.symbol, "RELIANCE");
        assert_eq!(loaded.limit_price, Some(dec!(2450.75)));
        assert_eq!(loaded.status, OrderStatus::Pending);
        assert_eq!(loaded.user_id, 12345);
    }

    #[tokio::test]
    async fn test_duplicate_order_id_rejected() {
        let (orders, _) = repo().await;
        let order = Order::from_request(&request(), 12345, Utc::now());
        orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

        let mut dup = Order::from_request(&request(), 12345, Utc::now());
        dup.order_id = order.order_id.clone();
        let err = orders.insert_order(&dup, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_ENTITY");
    }

    #[tokio::test]
    async fn test_record_execution_is_atomic_and_updates_position() {
        let (orders, audit) = repo().await;
        let now = Utc::now();
        let mut order = Order::from_request(&request(), 12345, now);
        orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

        order.transition(OrderStatus::Validated, now).unwrap();
        order.transition(OrderStatus::Submitted, now).unwrap();
        order.transition(OrderStatus::Acknowledged, now).unwrap();
        order.apply_execution(100, dec!(2450.75), now).unwrap();

        let fill = Fill::new(&order.order_id, 100, dec!(2450.75), None, now);
        let trade = Trade::from_fill(&order, &fill);
        orders
            .record_execution(&order, &fill, &trade, Uuid::new_v4())
            .await
            .unwrap();

        let loaded = orders
            .find_by_order_id(&order.order_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, OrderStatus::Filled);
        assert_eq!(loaded.filled_quantity, 100);

        let trail = audit
            .recent_for_entity("position", &format!("12345:RELIANCE:{}", Exchange::Nse), 10)
            .await
            .unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, "POSITION_UPDATED");
    }

    #[tokio::test]
    async fn test_status_counts() {
        let (orders, _) = repo().await;
        let now = Utc::now();

        for _ in 0..3 {
            let order = Order::from_request(&request(), 7, now);
            orders.insert_order(&order, Uuid::new_v4()).await.unwrap();
        }
        let mut rejected = Order::from_request(&request(), 7, now);
        rejected.transition(OrderStatus::Rejected, now).unwrap();
        orders.insert_order(&rejected, Uuid::new_v4()).await.unwrap();

        let counts = orders.status_counts(7).await.unwrap();
        assert_eq!(counts.get(&OrderStatus::Pending), Some(&3));
        assert_eq!(counts.get(&OrderStatus::Rejected), Some(&1));
    }

    #[tokio::test]
    async fn test_find_expirable_gtd() {
        let (orders, _) = repo().await;
        let now = Utc::now();

        let mut gtd = request();
        gtd.time_in_force = TimeInForce::Gtd;
        gtd.expiry_date = Some(now - chrono::Duration::minutes(5));
        let mut order = Order::from_request(&gtd, 9, now - chrono::Duration::days(2));
        order.transition(OrderStatus::Validated, now).unwrap();
        order.transition(OrderStatus::Submitted, now).unwrap();
        order.transition(OrderStatus::Acknowledged, now).unwrap();
        orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

        let expirable = orders.find_expirable(now).await.unwrap();
        assert_eq!(expirable.len(), 1);
        assert_eq!(expirable[0].order_id, order.order_id);
    }
}

//! Shared test harness: the full order pipeline wired to in-memory
//! persistence and scriptable mock collaborators.

use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use tradegate::application::execution::{ExecutionEngine, IdempotencyMap};
use tradegate::application::lifecycle::{LifecycleScheduler, SchedulerIntervals};
use tradegate::application::orchestrator::OrderService;
use tradegate::application::risk_engine::RiskEngine;
use tradegate::application::routing::FirstSupportedRouter;
use tradegate::config::{BreakerEnvConfig, BreakerSettings, ExecutionEnvConfig, RiskEnvConfig};
use tradegate::domain::trading::exchange::Exchange;
use tradegate::domain::trading::order::{OrderRequest, OrderSide, OrderType, TimeInForce};
use tradegate::domain::validation::OrderValidator;
use tradegate::infrastructure::core::breakers::BreakerFabric;
use tradegate::infrastructure::mock::{
    MockBrokerAdapter, MockBrokerAuthService, MockEventPublisher, MockNotificationService,
    MockPortfolioService,
};
use tradegate::infrastructure::observability::Metrics;
use tradegate::infrastructure::persistence::Database;
use tradegate::infrastructure::persistence::repositories::{
    SqliteAuditRepository, SqliteOrderRepository, SqlitePortfolioRepository,
    SqliteRiskLimitsRepository,
};
use tradegate::infrastructure::portfolio::ResilientPortfolioService;

pub const TEST_BROKER: &str = "MOCKBR";

pub struct TestHarness {
    pub service: Arc<OrderService>,
    pub scheduler: Arc<LifecycleScheduler>,
    pub execution: Arc<ExecutionEngine>,
    pub broker: Arc<MockBrokerAdapter>,
    pub portfolio_inner: Arc<MockPortfolioService>,
    pub portfolio: Arc<ResilientPortfolioService>,
    pub events: Arc<MockEventPublisher>,
    pub notifier: Arc<MockNotificationService>,
    pub orders: Arc<SqliteOrderRepository>,
    pub audit: Arc<SqliteAuditRepository>,
    pub positions: Arc<SqlitePortfolioRepository>,
    pub breakers: BreakerFabric,
    pub pool: SqlitePool,
}

/// Execution config tuned for tests: millisecond polling, three polls.
pub fn fast_execution_config() -> ExecutionEnvConfig {
    ExecutionEnvConfig {
        timeout_millis: 1_000,
        max_retries: 3,
        retry_delay_millis: 10,
        status_poll_interval_millis: 10,
        max_status_polls: 3,
        status_check_timeout_millis: 500,
        cancel_timeout_millis: 500,
        partial_fill_accept_pct: 50.0,
    }
}

/// Breaker config with a portfolio breaker that opens after three
/// failures and probes again after 200ms.
pub fn fast_breaker_config() -> BreakerEnvConfig {
    BreakerEnvConfig {
        order: BreakerSettings::order_defaults(),
        risk: BreakerSettings::risk_defaults(),
        broker: BreakerSettings::broker_defaults(),
        portfolio: BreakerSettings {
            failure_rate_pct: 65.0,
            slow_rate_pct: 80.0,
            slow_call_threshold: Duration::from_secs(7),
            sliding_window: 12,
            minimum_calls: 3,
            open_duration: Duration::from_millis(200),
            half_open_trials: 2,
        },
    }
}

pub async fn harness() -> TestHarness {
    let db = Database::in_memory().await.expect("in-memory db");
    let pool = db.pool.clone();
    let metrics = Metrics::new().expect("metrics");
    let breakers = BreakerFabric::new(&fast_breaker_config());

    let orders = Arc::new(SqliteOrderRepository::new(pool.clone()));
    let limits = Arc::new(SqliteRiskLimitsRepository::new(pool.clone()));
    let positions = Arc::new(SqlitePortfolioRepository::new(pool.clone()));
    let audit = Arc::new(SqliteAuditRepository::new(pool.clone()));

    let auth = Arc::new(MockBrokerAuthService::new());
    let broker = Arc::new(MockBrokerAdapter::accepting_all(TEST_BROKER));
    let portfolio_inner = Arc::new(MockPortfolioService::new());
    let portfolio = Arc::new(ResilientPortfolioService::new(
        portfolio_inner.clone(),
        breakers.portfolio.clone(),
    ));
    let events = Arc::new(MockEventPublisher::new());
    let notifier = Arc::new(MockNotificationService::new());

    let adapters: Vec<Arc<dyn tradegate::domain::ports::BrokerAdapter>> = vec![broker.clone()];
    let portfolio_dyn: Arc<dyn tradegate::domain::ports::PortfolioService> = portfolio.clone();

    let router = Arc::new(FirstSupportedRouter::new(adapters));
    let execution = Arc::new(ExecutionEngine::new(
        auth.clone(),
        router.clone(),
        breakers.broker.clone(),
        Arc::new(IdempotencyMap::new()),
        fast_execution_config(),
        metrics.clone(),
    ));
    let risk = Arc::new(RiskEngine::new(
        portfolio_dyn.clone(),
        limits,
        RiskEnvConfig::from_env().expect("risk config"),
        metrics.clone(),
    ));

    let service = Arc::new(OrderService::new(
        OrderValidator::new(),
        risk,
        execution.clone(),
        orders.clone(),
        router,
        portfolio_dyn.clone(),
        events.clone(),
        notifier.clone(),
        breakers.clone(),
        metrics.clone(),
    ));

    let scheduler = Arc::new(LifecycleScheduler::new(
        orders.clone(),
        positions.clone(),
        execution.clone(),
        portfolio_dyn,
        events.clone(),
        audit.clone(),
        breakers.clone(),
        metrics,
        SchedulerIntervals {
            stale_after: Duration::from_millis(0),
            ..SchedulerIntervals::default()
        },
    ));

    TestHarness {
        service,
        scheduler,
        execution,
        broker,
        portfolio_inner,
        portfolio,
        events,
        notifier,
        orders,
        audit,
        positions,
        breakers,
        pool,
    }
}

pub fn limit_buy(symbol: &str, quantity: i64, limit: Decimal) -> OrderRequest {
    OrderRequest {
        client_order_id: None,
        symbol: symbol.to_string(),
        exchange: Exchange::Nse,
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        quantity,
        limit_price: Some(limit),
        stop_price: None,
        time_in_force: TimeInForce::Day,
        expiry_date: None,
        reference_price: None,
        metadata: serde_json::Map::new(),
    }
}

pub async fn fills_for(pool: &SqlitePool, order_id: &str) -> i64 {
    use sqlx::Row;
    sqlx::query("SELECT COUNT(*) AS c FROM order_fills WHERE order_id = ?")
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("fill count query")
        .try_get("c")
        .expect("fill count column")
}

pub async fn order_rows(pool: &SqlitePool) -> i64 {
    use sqlx::Row;
    sqlx::query("SELECT COUNT(*) AS c FROM orders")
        .fetch_one(pool)
        .await
        .expect("order count query")
        .try_get("c")
        .expect("order count column")
}

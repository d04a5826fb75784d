//! Application wiring.
//!
//! Explicit construction of the orchestrator with its adapters and
//! breakers; no global registry. `MODE=live` wires the HTTP adapters,
//! `MODE=mock` the in-process mocks (local development and tests).

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, Mode};
use crate::domain::ports::{
    BrokerAdapter, BrokerAuthService, EventPublisher, NotificationService, PortfolioService,
};
use crate::domain::validation::OrderValidator;
use crate::infrastructure::broker::{BrokerAuthClient, HttpBrokerAdapter};
use crate::infrastructure::core::breakers::BreakerFabric;
use crate::infrastructure::events::HttpEventPublisher;
use crate::infrastructure::events::publisher::HttpNotificationService;
use crate::infrastructure::mock::{
    MockBrokerAdapter, MockBrokerAuthService, MockEventPublisher, MockNotificationService,
    MockPortfolioService,
};
use crate::infrastructure::observability::{HealthIndicator, Metrics};
use crate::infrastructure::persistence::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteAuditRepository, SqliteOrderRepository, SqlitePortfolioRepository,
    SqliteRiskLimitsRepository,
};
use crate::infrastructure::portfolio::{PortfolioClient, ResilientPortfolioService};

use super::execution::{ExecutionEngine, IdempotencyMap};
use super::lifecycle::{LifecycleScheduler, SchedulerIntervals};
use super::orchestrator::OrderService;
use super::risk_engine::RiskEngine;
use super::routing::FirstSupportedRouter;

pub struct Application {
    pub order_service: Arc<OrderService>,
    pub scheduler: Arc<LifecycleScheduler>,
    pub breakers: BreakerFabric,
    pub metrics: Metrics,
    pub health: Arc<HealthIndicator>,
    pub portfolio: Arc<dyn PortfolioService>,
    pub audit: Arc<SqliteAuditRepository>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        let metrics = Metrics::new()?;
        let breakers = BreakerFabric::new(&config.breakers);

        // Persistence
        let orders = Arc::new(SqliteOrderRepository::new(db.pool.clone()));
        let limits = Arc::new(SqliteRiskLimitsRepository::new(db.pool.clone()));
        let positions = Arc::new(SqlitePortfolioRepository::new(db.pool.clone()));
        let audit = Arc::new(SqliteAuditRepository::new(db.pool.clone()));

        // Outbound adapters
        let (auth, portfolio_inner, events, notifier, adapters): (
            Arc<dyn BrokerAuthService>,
            Arc<dyn PortfolioService>,
            Arc<dyn EventPublisher>,
            Arc<dyn NotificationService>,
            Vec<Arc<dyn BrokerAdapter>>,
        ) = match config.mode {
            Mode::Live => {
                info!("Application: Wiring live HTTP adapters");
                let auth: Arc<dyn BrokerAuthService> = Arc::new(BrokerAuthClient::new(
                    &config.services,
                    breakers.broker.clone(),
                ));
                let portfolio: Arc<dyn PortfolioService> = Arc::new(PortfolioClient::new(
                    &config.services,
                    Duration::from_millis(config.risk.adapter_timeout_millis),
                ));
                let events: Arc<dyn EventPublisher> =
                    Arc::new(HttpEventPublisher::new(&config.services));
                let notifier: Arc<dyn NotificationService> =
                    Arc::new(HttpNotificationService::new(&config.services));
                let adapters = config
                    .services
                    .brokers
                    .iter()
                    .map(|spec| {
                        Arc::new(HttpBrokerAdapter::new(
                            spec,
                            &config.services,
                            Duration::from_millis(config.execution.timeout_millis),
                        )) as Arc<dyn BrokerAdapter>
                    })
                    .collect();
                (auth, portfolio, events, notifier, adapters)
            }
            Mode::Mock => {
                info!("Application: Wiring in-process mock adapters");
                let auth: Arc<dyn BrokerAuthService> = Arc::new(MockBrokerAuthService::new());
                let portfolio: Arc<dyn PortfolioService> = Arc::new(MockPortfolioService::new());
                let events: Arc<dyn EventPublisher> = Arc::new(MockEventPublisher::new());
                let notifier: Arc<dyn NotificationService> =
                    Arc::new(MockNotificationService::new());
                let adapters = config
                    .services
                    .brokers
                    .iter()
                    .map(|spec| {
                        Arc::new(MockBrokerAdapter::new(spec.name.clone(), spec.exchanges.clone()))
                            as Arc<dyn BrokerAdapter>
                    })
                    .collect();
                (auth, portfolio, events, notifier, adapters)
            }
        };

        // The portfolio breaker, conservative fallbacks and the update
        // queue wrap whichever inner service was wired.
        let portfolio: Arc<dyn PortfolioService> = Arc::new(ResilientPortfolioService::new(
            portfolio_inner,
            breakers.portfolio.clone(),
        ));

        let router = Arc::new(FirstSupportedRouter::new(adapters));
        let idempotency = Arc::new(IdempotencyMap::new());
        let execution = Arc::new(ExecutionEngine::new(
            auth.clone(),
            router.clone(),
            breakers.broker.clone(),
            idempotency,
            config.execution.clone(),
            metrics.clone(),
        ));
        let risk = Arc::new(RiskEngine::new(
            portfolio.clone(),
            limits,
            config.risk.clone(),
            metrics.clone(),
        ));

        let order_service = Arc::new(OrderService::new(
            OrderValidator::new(),
            risk,
            execution.clone(),
            orders.clone(),
            router.clone(),
            portfolio.clone(),
            events.clone(),
            notifier,
            breakers.clone(),
            metrics.clone(),
        ));

        let scheduler = Arc::new(LifecycleScheduler::new(
            orders,
            positions,
            execution,
            portfolio.clone(),
            events,
            audit.clone(),
            breakers.clone(),
            metrics.clone(),
            SchedulerIntervals::default(),
        ));

        let broker_names = config
            .services
            .brokers
            .iter()
            .map(|b| b.name.clone())
            .collect();
        let health = Arc::new(HealthIndicator::new(db.pool.clone(), auth, broker_names));

        Ok(Self {
            order_service,
            scheduler,
            breakers,
            metrics,
            health,
            portfolio,
            audit,
        })
    }

    /// Start the periodic lifecycle tasks.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.scheduler.clone().start()
    }
}

//! Liveness, readiness and broker-connectivity indicators.

use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::ports::BrokerAuthService;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// The process is up and responding.
    pub live: bool,
    /// The database answers queries.
    pub ready: bool,
    /// Broker-auth reported health per configured broker.
    pub broker_connectivity: HashMap<String, bool>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.live && self.ready && self.broker_connectivity.values().all(|ok| *ok)
    }
}

pub struct HealthIndicator {
    pool: SqlitePool,
    auth: Arc<dyn BrokerAuthService>,
    brokers: Vec<String>,
}

impl HealthIndicator {
    pub fn new(pool: SqlitePool, auth: Arc<dyn BrokerAuthService>, brokers: Vec<String>) -> Self {
        Self {
            pool,
            auth,
            brokers,
        }
    }

    pub async fn check(&self) -> HealthStatus {
        let ready = sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok();

        let mut broker_connectivity = HashMap::new();
        for broker in &self.brokers {
            let healthy = self.auth.get_health(broker).await.unwrap_or(false);
            broker_connectivity.insert(broker.clone(), healthy);
        }

        HealthStatus {
            live: true,
            ready,
            broker_connectivity,
        }
    }
}

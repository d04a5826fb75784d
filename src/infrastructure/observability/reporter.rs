//! Push-based metrics reporter for tradegate
//!
//! Periodically outputs metrics as structured JSON to stdout. No HTTP
//! server, no incoming connections - only outbound data.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::domain::ports::PortfolioService;
use crate::infrastructure::core::breakers::BreakerFabric;
use crate::infrastructure::observability::health::HealthIndicator;
use crate::infrastructure::observability::metrics::Metrics;

/// Metrics snapshot for JSON output
#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub breakers: Vec<BreakerSnapshot>,
    pub queued_position_updates: usize,
    pub healthy: bool,
}

#[derive(Serialize)]
pub struct BreakerSnapshot {
    pub domain: String,
    pub state: String,
}

/// Push-based metrics reporter
pub struct MetricsReporter {
    metrics: Metrics,
    breakers: BreakerFabric,
    portfolio: Arc<dyn PortfolioService>,
    health: Arc<HealthIndicator>,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        metrics: Metrics,
        breakers: BreakerFabric,
        portfolio: Arc<dyn PortfolioService>,
        health: Arc<HealthIndicator>,
        interval_seconds: u64,
    ) -> Self {
        Self {
            metrics,
            breakers,
            portfolio,
            health,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Run the reporter in a loop, outputting metrics periodically
    pub async fn run(self) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let snapshot = self.collect_snapshot().await;
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    info!("METRICS_JSON:{}", json);
                    info!(
                        "Breakers: {} | Queued updates: {} | Uptime: {}s",
                        snapshot
                            .breakers
                            .iter()
                            .map(|b| format!("{}={}", b.domain, b.state))
                            .collect::<Vec<_>>()
                            .join(" "),
                        snapshot.queued_position_updates,
                        snapshot.uptime_seconds
                    );
                }
                Err(e) => warn!("Failed to serialize metrics: {}", e),
            }
        }
    }

    /// Collect the current snapshot and refresh the gauges it reads.
    async fn collect_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        self.metrics.uptime_seconds.set(uptime as f64);

        let mut breakers = Vec::new();
        for (domain, state) in self.breakers.states().await {
            self.metrics.set_breaker_state(domain, state);
            breakers.push(BreakerSnapshot {
                domain: domain.to_string(),
                state: format!("{:?}", state),
            });
        }

        let queued = self.portfolio.queued_updates();
        self.metrics.queued_position_updates.set(queued as f64);

        let health = self.health.check().await;

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            breakers,
            queued_position_updates: queued,
            healthy: health.is_healthy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerEnvConfig;
    use crate::infrastructure::mock::{MockBrokerAuthService, MockPortfolioService};
    use crate::infrastructure::persistence::Database;

    #[tokio::test]
    async fn test_metrics_snapshot_collection() {
        let db = Database::in_memory().await.expect("in-memory db");
        let metrics = Metrics::new().expect("Failed to create metrics");
        let breakers = BreakerFabric::new(&BreakerEnvConfig::from_env().unwrap());
        let portfolio: Arc<dyn PortfolioService> = Arc::new(MockPortfolioService::new());
        let health = Arc::new(HealthIndicator::new(
            db.pool,
            Arc::new(MockBrokerAuthService::new()),
            vec!["MOCKBR".to_string()],
        ));

        let reporter = MetricsReporter::new(metrics.clone(), breakers, portfolio, health, 60);
        let snapshot = reporter.collect_snapshot().await;

        assert!(!snapshot.timestamp.is_empty());
        assert_eq!(snapshot.breakers.len(), 4);
        assert!(snapshot.breakers.iter().all(|b| b.state == "Closed"));
        assert_eq!(snapshot.queued_position_updates, 0);
        assert!(snapshot.healthy);

        // The gauges the snapshot reads were refreshed as a side effect.
        let rendered = metrics.render();
        assert!(rendered.contains("tradegate_breaker_state"));
        assert!(rendered.contains("tradegate_queued_position_updates"));
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-01-10T10:00:00Z".to_string(),
            uptime_seconds: 3600,
            version: "0.3.1".to_string(),
            breakers: vec![
                BreakerSnapshot {
                    domain: "broker".to_string(),
                    state: "Open".to_string(),
                },
                BreakerSnapshot {
                    domain: "portfolio".to_string(),
                    state: "Closed".to_string(),
                },
            ],
            queued_position_updates: 3,
            healthy: false,
        };

        let json = serde_json::to_string(&snapshot).expect("Failed to serialize");
        assert!(json.contains("\"breakers\""));
        assert!(json.contains("\"broker\""));
        assert!(json.contains("Open"));
        assert!(json.contains("\"queued_position_updates\":3"));
        assert!(json.contains("\"healthy\":false"));
    }
}

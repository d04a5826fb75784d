//! Fire-and-forget event publication.
//!
//! Publication never fails the caller: errors are logged, counted and
//! dropped. Missed events are reconstructable from the audit trail, so
//! there is no retry queue here.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ServicesEnvConfig;
use crate::domain::errors::ServiceError;
use crate::domain::ports::{DomainEvent, EventPublisher, NotificationService};
use crate::infrastructure::broker::{map_transport_error, remote_error};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

pub struct HttpEventPublisher {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    dropped: AtomicU64,
}

impl HttpEventPublisher {
    pub fn new(config: &ServicesEnvConfig) -> Self {
        Self {
            client: HttpClientFactory::create_client(Duration::from_secs(5), 1),
            base_url: config.event_bus_base_url.clone(),
            api_key: config.service_api_key.clone(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Events dropped since startup; feeds the replay decision.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn post(&self, path: &str, body: serde_json::Value, correlation_id: Uuid) -> Result<(), ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Correlation-Id", correlation_id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    /// Always returns Ok: a failed publish is logged and dropped.
    async fn publish(&self, event: &DomainEvent) -> Result<(), ServiceError> {
        let body = serde_json::to_value(event).unwrap_or_default();
        match self.post("/api/v1/events", body, event.correlation_id).await {
            Ok(()) => {
                debug!("HttpEventPublisher: Published {}", event.event_type);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "HttpEventPublisher: Dropped {} event ({})",
                    event.event_type, e
                );
            }
        }
        Ok(())
    }

    async fn publish_batch(&self, events: &[DomainEvent]) -> Result<(), ServiceError> {
        if events.is_empty() {
            return Ok(());
        }
        let correlation_id = events[0].correlation_id;
        let body = serde_json::to_value(events).unwrap_or_default();
        if let Err(e) = self.post("/api/v1/events/batch", body, correlation_id).await {
            self.dropped.fetch_add(events.len() as u64, Ordering::Relaxed);
            warn!(
                "HttpEventPublisher: Dropped batch of {} events ({})",
                events.len(),
                e
            );
        }
        Ok(())
    }
}

/// Notification delivery through the event bus' notification endpoint.
///
/// Same fire-and-forget discipline as events: the caller is never blocked
/// or failed by a notification problem.
pub struct HttpNotificationService {
    publisher: HttpEventPublisher,
}

impl HttpNotificationService {
    pub fn new(config: &ServicesEnvConfig) -> Self {
        Self {
            publisher: HttpEventPublisher::new(config),
        }
    }
}

#[async_trait]
impl NotificationService for HttpNotificationService {
    async fn notify(
        &self,
        user_id: i64,
        subject: &str,
        body: &str,
        correlation_id: Uuid,
    ) -> Result<(), ServiceError> {
        let payload = serde_json::json!({
            "userId": user_id,
            "subject": subject,
            "body": body,
        });
        if let Err(e) = self
            .publisher
            .post("/api/v1/notifications", payload, correlation_id)
            .await
        {
            warn!(
                "HttpNotificationService: Dropped notification for user {} ({})",
                user_id, e
            );
        }
        Ok(())
    }
}

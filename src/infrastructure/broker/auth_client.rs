//! HTTP client for the broker-auth service.
//!
//! Manages broker sessions: connection handles, token validation and
//! refresh, and broker health. All calls run under the broker circuit
//! breaker. When the breaker is open, `get_connection` serves a stub
//! connection marked TOKEN_EXPIRED, which forces the caller down the
//! refresh path instead of fabricating a usable session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

use crate::config::ServicesEnvConfig;
use crate::domain::errors::ServiceError;
use crate::domain::ports::{BrokerAuthService, BrokerConnection, ConnectionStatus};
use crate::infrastructure::core::circuit_breaker::CircuitBreaker;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

use super::{map_transport_error, remote_error};

pub struct BrokerAuthClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    breaker: Arc<CircuitBreaker>,
}

impl BrokerAuthClient {
    pub fn new(config: &ServicesEnvConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client: HttpClientFactory::create_client(Duration::from_secs(10), 3),
            base_url: config.broker_auth_base_url.clone(),
            api_key: config.service_api_key.clone(),
            breaker,
        }
    }

    async fn post_connection(
        &self,
        path: &str,
        user_id: i64,
        broker: &str,
        correlation_id: Uuid,
    ) -> Result<BrokerConnection, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Correlation-Id", correlation_id.to_string())
            .json(&ConnectionRequest {
                user_id,
                broker: broker.to_string(),
            })
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        let dto: ConnectionDto = response
            .json()
            .await
            .map_err(|e| ServiceError::Decode {
                reason: e.to_string(),
            })?;
        Ok(dto.into_connection(user_id, broker))
    }
}

#[async_trait]
impl BrokerAuthService for BrokerAuthClient {
    async fn get_connection(
        &self,
        user_id: i64,
        broker: &str,
        correlation_id: Uuid,
    ) -> Result<BrokerConnection, ServiceError> {
        let work = self.post_connection("/api/v1/connections", user_id, broker, correlation_id);
        self.breaker
            .call_with_fallback(work, || token_expired_stub(user_id, broker))
            .await
            .map_err(|e| match e {
                crate::infrastructure::core::circuit_breaker::CircuitBreakerError::Inner(inner) => {
                    inner
                }
                open => ServiceError::Connection {
                    reason: open.to_string(),
                },
            })
    }

    async fn validate_token(
        &self,
        connection: &BrokerConnection,
        correlation_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let url = format!("{}/api/v1/connections/validate", self.base_url);
        let work = async {
            let started = Instant::now();
            let response = self
                .client
                .post(&url)
                .header("X-Api-Key", &self.api_key)
                .header("X-Correlation-Id", correlation_id.to_string())
                .json(&ConnectionRequest {
                    user_id: connection.user_id,
                    broker: connection.broker.clone(),
                })
                .send()
                .await
                .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

            if !response.status().is_success() {
                return Err(remote_error(response).await);
            }

            let dto: ValidateDto = response.json().await.map_err(|e| ServiceError::Decode {
                reason: e.to_string(),
            })?;
            Ok(dto.valid)
        };

        self.breaker
            .call(work)
            .await
            .map_err(flatten_breaker_error)
    }

    async fn refresh_token(
        &self,
        connection: &BrokerConnection,
        correlation_id: Uuid,
    ) -> Result<BrokerConnection, ServiceError> {
        info!(
            "BrokerAuthClient: Refreshing token for user {} on {}",
            connection.user_id, connection.broker
        );
        let work = self.post_connection(
            "/api/v1/connections/refresh",
            connection.user_id,
            &connection.broker,
            correlation_id,
        );
        // No fallback on refresh: a failed refresh must surface so the
        // user can be sent back through broker authentication.
        self.breaker.call(work).await.map_err(flatten_breaker_error)
    }

    async fn get_health(&self, broker: &str) -> Result<bool, ServiceError> {
        let url = format!("{}/api/v1/health/{}", self.base_url, broker);
        let work = async {
            let started = Instant::now();
            let response = self
                .client
                .get(&url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await
                .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

            if !response.status().is_success() {
                return Err(remote_error(response).await);
            }

            let dto: HealthDto = response.json().await.map_err(|e| ServiceError::Decode {
                reason: e.to_string(),
            })?;
            Ok(dto.healthy)
        };

        self.breaker.call(work).await.map_err(flatten_breaker_error)
    }
}

fn flatten_breaker_error(
    e: crate::infrastructure::core::circuit_breaker::CircuitBreakerError<ServiceError>,
) -> ServiceError {
    match e {
        crate::infrastructure::core::circuit_breaker::CircuitBreakerError::Inner(inner) => inner,
        open => ServiceError::Connection {
            reason: open.to_string(),
        },
    }
}

/// The open-breaker stub: unusable by construction, forcing a refresh
/// attempt whose failure surfaces immediately.
fn token_expired_stub(user_id: i64, broker: &str) -> BrokerConnection {
    BrokerConnection {
        user_id,
        broker: broker.to_string(),
        active: true,
        status: ConnectionStatus::TokenExpired,
        access_token: String::new(),
        token_expires_at: Utc::now(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionRequest {
    user_id: i64,
    broker: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionDto {
    active: bool,
    status: String,
    access_token: String,
    token_expires_at: DateTime<Utc>,
}

impl ConnectionDto {
    fn into_connection(self, user_id: i64, broker: &str) -> BrokerConnection {
        let status = match self.status.as_str() {
            "CONNECTED" => ConnectionStatus::Connected,
            "TOKEN_EXPIRED" => ConnectionStatus::TokenExpired,
            _ => ConnectionStatus::Disconnected,
        };
        BrokerConnection {
            user_id,
            broker: broker.to_string(),
            active: self.active,
            status,
            access_token: self.access_token,
            token_expires_at: self.token_expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidateDto {
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct HealthDto {
    healthy: bool,
}

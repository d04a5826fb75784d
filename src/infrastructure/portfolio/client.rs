//! HTTP client for the portfolio service.
//!
//! Plain transport: breaker protection, conservative fallbacks and the
//! position-update queue live in [`super::resilient::ResilientPortfolioService`],
//! which wraps this client at bootstrap.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::ServicesEnvConfig;
use crate::domain::errors::ServiceError;
use crate::domain::ports::{PortfolioImpact, PortfolioService, PositionRisk, PositionUpdate};
use crate::domain::trading::order::OrderSide;
use crate::infrastructure::broker::{map_transport_error, remote_error};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

pub struct PortfolioClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
}

impl PortfolioClient {
    pub fn new(config: &ServicesEnvConfig, timeout: Duration) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout, 2),
            base_url: config.portfolio_base_url.clone(),
            api_key: config.service_api_key.clone(),
        }
    }
}

#[async_trait]
impl PortfolioService for PortfolioClient {
    async fn calculate_impact(
        &self,
        user_id: i64,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        order_value: Decimal,
        correlation_id: Uuid,
    ) -> Result<PortfolioImpact, ServiceError> {
        let url = format!("{}/api/v1/impact", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Correlation-Id", correlation_id.to_string())
            .json(&serde_json::json!({
                "userId": user_id,
                "symbol": symbol,
                "side": side.to_string(),
                "quantity": quantity,
                "orderValue": order_value,
            }))
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        let dto: ImpactDto = response.json().await.map_err(|e| ServiceError::Decode {
            reason: e.to_string(),
        })?;
        Ok(dto.into_impact())
    }

    async fn get_position_risk(
        &self,
        user_id: i64,
        symbol: &str,
        correlation_id: Uuid,
    ) -> Result<PositionRisk, ServiceError> {
        let url = format!(
            "{}/api/v1/positions/{}/risk?symbol={}",
            self.base_url, user_id, symbol
        );
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Correlation-Id", correlation_id.to_string())
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        let dto: PositionRiskDto = response.json().await.map_err(|e| ServiceError::Decode {
            reason: e.to_string(),
        })?;
        Ok(dto.into_risk())
    }

    async fn update_position(&self, update: &PositionUpdate) -> Result<(), ServiceError> {
        let url = format!("{}/api/v1/positions/update", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Correlation-Id", update.correlation_id.to_string())
            .json(update)
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        Ok(())
    }
}

// ===== Wire DTOs =====

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImpactDto {
    available_buying_power: Decimal,
    total_portfolio_value: Decimal,
    projected_concentration_pct: f64,
    projected_margin_usage: f64,
    margin_impact_acceptable: bool,
}

impl ImpactDto {
    fn into_impact(self) -> PortfolioImpact {
        PortfolioImpact {
            available_buying_power: self.available_buying_power,
            total_portfolio_value: self.total_portfolio_value,
            projected_concentration_pct: self.projected_concentration_pct,
            projected_margin_usage: self.projected_margin_usage,
            margin_impact_acceptable: self.margin_impact_acceptable,
            from_fallback: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRiskDto {
    symbol: String,
    current_quantity: i64,
    max_position_size: i64,
}

impl PositionRiskDto {
    fn into_risk(self) -> PositionRisk {
        PositionRisk {
            symbol: self.symbol,
            current_quantity: self.current_quantity,
            max_position_size: self.max_position_size,
            from_fallback: false,
        }
    }
}

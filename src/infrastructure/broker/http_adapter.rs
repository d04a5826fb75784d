//! HTTP broker adapter.
//!
//! Order operations are proxied through the broker-auth service, which
//! holds the vendor integrations; this adapter owns the order-operation
//! surface for one named broker and the set of exchanges it supports.
//! Breaker protection is applied by the execution engine, which owns the
//! per-call deadlines.

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

use crate::config::{BrokerSpec, ServicesEnvConfig};
use crate::domain::errors::ServiceError;
use crate::domain::ports::{
    BrokerAdapter, BrokerConnection, BrokerModifyRequest, BrokerOrderRequest, BrokerOrderResponse,
    BrokerOrderStatus,
};
use crate::domain::trading::exchange::Exchange;
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

use super::{map_transport_error, remote_error};

pub struct HttpBrokerAdapter {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    name: String,
    exchanges: Vec<Exchange>,
}

impl HttpBrokerAdapter {
    pub fn new(spec: &BrokerSpec, config: &ServicesEnvConfig, timeout: Duration) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout, 0),
            base_url: config.broker_auth_base_url.clone(),
            api_key: config.service_api_key.clone(),
            name: spec.name.clone(),
            exchanges: spec.exchanges.clone(),
        }
    }

    fn orders_url(&self) -> String {
        format!("{}/api/v1/brokers/{}/orders", self.base_url, self.name)
    }

    fn headers(
        &self,
        builder: reqwest_middleware::RequestBuilder,
        connection: &BrokerConnection,
        correlation_id: Uuid,
    ) -> reqwest_middleware::RequestBuilder {
        builder
            .header("X-Api-Key", &self.api_key)
            .header("X-Correlation-Id", correlation_id.to_string())
            .header("Authorization", format!("Bearer {}", connection.access_token))
    }

    async fn decode(response: reqwest::Response) -> Result<BrokerOrderResponse, ServiceError> {
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        let dto: BrokerOrderDto = response.json().await.map_err(|e| ServiceError::Decode {
            reason: e.to_string(),
        })?;
        Ok(dto.into_response())
    }
}

#[async_trait]
impl BrokerAdapter for HttpBrokerAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_exchange(&self, exchange: Exchange) -> bool {
        self.exchanges.contains(&exchange)
    }

    async fn submit_order(
        &self,
        connection: &BrokerConnection,
        request: &BrokerOrderRequest,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ServiceError> {
        let body = SubmitOrderDto::from_request(request);
        let started = Instant::now();

        let response = self
            .headers(self.client.post(self.orders_url()), connection, correlation_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        let result = Self::decode(response).await?;
        info!(
            "HttpBrokerAdapter[{}]: Submitted {} -> broker order {} ({})",
            self.name, request.order_id, result.broker_order_id, result.status
        );
        Ok(result)
    }

    async fn modify_order(
        &self,
        connection: &BrokerConnection,
        request: &BrokerModifyRequest,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ServiceError> {
        let url = format!("{}/{}", self.orders_url(), request.broker_order_id);
        let started = Instant::now();

        let response = self
            .headers(self.client.put(&url), connection, correlation_id)
            .json(&ModifyOrderDto::from_request(request))
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        Self::decode(response).await
    }

    async fn cancel_order(
        &self,
        connection: &BrokerConnection,
        broker_order_id: &str,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ServiceError> {
        let url = format!("{}/{}", self.orders_url(), broker_order_id);
        let started = Instant::now();

        let response = self
            .headers(self.client.delete(&url), connection, correlation_id)
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        // An already-closed order is a cancel success from our side.
        if response.status().as_u16() == 404 {
            info!(
                "HttpBrokerAdapter[{}]: Order {} not found for cancellation (already closed?)",
                self.name, broker_order_id
            );
            return Ok(BrokerOrderResponse {
                broker_order_id: broker_order_id.to_string(),
                status: BrokerOrderStatus::Cancelled,
                filled_quantity: 0,
                average_price: None,
                broker_fill_id: None,
                reason: Some("not found at broker".to_string()),
            });
        }

        Self::decode(response).await
    }

    async fn get_status(
        &self,
        connection: &BrokerConnection,
        broker_order_id: &str,
        correlation_id: Uuid,
    ) -> Result<BrokerOrderResponse, ServiceError> {
        let url = format!("{}/{}", self.orders_url(), broker_order_id);
        let started = Instant::now();

        let response = self
            .headers(self.client.get(&url), connection, correlation_id)
            .send()
            .await
            .map_err(|e| map_transport_error(e, started.elapsed().as_millis() as u64))?;

        Self::decode(response).await
    }
}

// ===== Wire DTOs =====

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitOrderDto {
    client_order_id: String,
    symbol: String,
    exchange: String,
    side: String,
    order_type: String,
    quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
    time_in_force: String,
}

impl SubmitOrderDto {
    fn from_request(request: &BrokerOrderRequest) -> Self {
        Self {
            client_order_id: request.order_id.clone(),
            symbol: request.symbol.clone(),
            exchange: request.exchange.as_str().to_string(),
            side: request.side.to_string(),
            order_type: request.order_type.to_string(),
            quantity: request.quantity,
            limit_price: request.limit_price.map(|p| p.to_string()),
            stop_price: request.stop_price.map(|p| p.to_string()),
            time_in_force: request.time_in_force.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyOrderDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
}

impl ModifyOrderDto {
    fn from_request(request: &BrokerModifyRequest) -> Self {
        Self {
            quantity: request.quantity,
            limit_price: request.limit_price.map(|p| p.to_string()),
            stop_price: request.stop_price.map(|p| p.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrokerOrderDto {
    broker_order_id: String,
    status: String,
    #[serde(default)]
    filled_quantity: i64,
    average_price: Option<String>,
    broker_fill_id: Option<String>,
    reason: Option<String>,
}

impl BrokerOrderDto {
    fn into_response(self) -> BrokerOrderResponse {
        let status = match self.status.as_str() {
            "PENDING" | "OPEN" | "ACCEPTED" | "NEW" => BrokerOrderStatus::Pending,
            "PARTIAL_FILL" | "PARTIALLY_FILLED" => BrokerOrderStatus::PartialFill,
            "FILLED" => BrokerOrderStatus::Filled,
            "REJECTED" => BrokerOrderStatus::Rejected,
            "CANCELLED" | "CANCELED" => BrokerOrderStatus::Cancelled,
            "EXPIRED" => BrokerOrderStatus::Expired,
            _ => BrokerOrderStatus::Failed,
        };
        BrokerOrderResponse {
            broker_order_id: self.broker_order_id,
            status,
            filled_quantity: self.filled_quantity,
            average_price: self
                .average_price
                .as_deref()
                .and_then(|p| p.parse::<Decimal>().ok()),
            broker_fill_id: self.broker_fill_id,
            reason: self.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_status_mapping() {
        let dto = BrokerOrderDto {
            broker_order_id: "B-1".into(),
            status: "PARTIALLY_FILLED".into(),
            filled_quantity: 30,
            average_price: Some("2450.00".into()),
            broker_fill_id: None,
            reason: None,
        };
        let response = dto.into_response();
        assert_eq!(response.status, BrokerOrderStatus::PartialFill);
        assert_eq!(response.filled_quantity, 30);
        assert!(response.average_price.is_some());
    }

    #[test]
    fn test_unknown_status_maps_to_failed() {
        let dto = BrokerOrderDto {
            broker_order_id: "B-1".into(),
            status: "HALTED".into(),
            filled_quantity: 0,
            average_price: None,
            broker_fill_id: None,
            reason: Some("venue halt".into()),
        };
        assert_eq!(dto.into_response().status, BrokerOrderStatus::Failed);
    }
}

//! In-process mock collaborators.
//!
//! Used by integration tests and by `MODE=mock` local runs. Each mock is
//! scriptable: push canned responses (or failures) onto its script queue
//! and it pops them per call, falling back to a sensible default when the
//! queue is empty. All recorded interactions are inspectable.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::ServiceError;
use crate::domain::ports::{
    BrokerAdapter, BrokerAuthService, BrokerConnection, BrokerModifyRequest, BrokerOrderRequest,
    BrokerOrderResponse, BrokerOrderStatus, ConnectionStatus, DomainEvent, EventPublisher,
    NotificationService, PortfolioImpact, PortfolioService, PositionRisk, PositionUpdate,
};
use crate::domain::trading::exchange::Exchange;

type ServiceResult<T> = Result<T, ServiceError>;

// ===== Broker auth =====

pub struct MockBrokerAuthService {
    pub connections: Mutex<VecDeque<ServiceResult<BrokerConnection>>>,
    pub refreshes: Mutex<VecDeque<ServiceResult<BrokerConnection>>>,
}

impl MockBrokerAuthService {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(VecDeque::new()),
            refreshes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_connection(&self, result: ServiceResult<BrokerConnection>) {
        self.connections.lock().unwrap().push_back(result);
    }

    pub fn usable_connection(user_id: i64, broker: &str) -> BrokerConnection {
        BrokerConnection {
            user_id,
            broker: broker.to_string(),
            active: true,
            status: ConnectionStatus::Connected,
            access_token: "mock-token".to_string(),
            token_expires_at: Utc::now() + Duration::hours(8),
        }
    }
}

impl Default for MockBrokerAuthService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerAuthService for MockBrokerAuthService {
    async fn get_connection(
        &self,
        user_id: i64,
        broker: &str,
        _correlation_id: Uuid,
    ) -> ServiceResult<BrokerConnection> {
        self.connections
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::usable_connection(user_id, broker)))
    }

    async fn validate_token(
        &self,
        connection: &BrokerConnection,
        _correlation_id: Uuid,
    ) -> ServiceResult<bool> {
        Ok(connection.is_usable(Utc::now()))
    }

    async fn refresh_token(
        &self,
        connection: &BrokerConnection,
        _correlation_id: Uuid,
    ) -> ServiceResult<BrokerConnection> {
        self.refreshes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(Self::usable_connection(connection.user_id, &connection.broker))
            })
    }

    async fn get_health(&self, _broker: &str) -> ServiceResult<bool> {
        Ok(true)
    }
}

// ===== Broker adapter =====

pub struct MockBrokerAdapter {
    name: String,
    exchanges: Vec<Exchange>,
    pub submissions: Mutex<Vec<BrokerOrderRequest>>,
    pub cancels: Mutex<Vec<String>>,
    pub status_queries: Mutex<Vec<String>>,
    submit_script: Mutex<VecDeque<ServiceResult<BrokerOrderResponse>>>,
    status_script: Mutex<VecDeque<ServiceResult<BrokerOrderResponse>>>,
    cancel_script: Mutex<VecDeque<ServiceResult<BrokerOrderResponse>>>,
}

impl MockBrokerAdapter {
    pub fn new(name: impl Into<String>, exchanges: Vec<Exchange>) -> Self {
        Self {
            name: name.into(),
            exchanges,
            submissions: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            status_queries: Mutex::new(Vec::new()),
            submit_script: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(VecDeque::new()),
            cancel_script: Mutex::new(VecDeque::new()),
        }
    }

    /// A mock broker that accepts everything on every exchange.
    pub fn accepting_all(name: impl Into<String>) -> Self {
        Self::new(
            name,
            vec![
                Exchange::Nse,
                Exchange::Bse,
                Exchange::Nyse,
                Exchange::Nasdaq,
                Exchange::Lse,
            ],
        )
    }

    pub fn push_submit_response(&self, result: ServiceResult<BrokerOrderResponse>) {
        self.submit_script.lock().unwrap().push_back(result);
    }

    pub fn push_status_response(&self, result: ServiceResult<BrokerOrderResponse>) {
        self.status_script.lock().unwrap().push_back(result);
    }

    pub fn push_cancel_response(&self, result: ServiceResult<BrokerOrderResponse>) {
        self.cancel_script.lock().unwrap().push_back(result);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn filled(request: &BrokerOrderRequest, price: Decimal) -> BrokerOrderResponse {
        BrokerOrderResponse {
            broker_order_id: format!("MB-{}", request.order_id),
            status: BrokerOrderStatus::Filled,
            filled_quantity: request.quantity,
            average_price: Some(price),
            broker_fill_id: Some(format!("MF-{}", request.order_id)),
            reason: None,
        }
    }
}

#[async_trait]
impl BrokerAdapter for MockBrokerAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_exchange(&self, exchange: Exchange) -> bool {
        self.exchanges.contains(&exchange)
    }

    async fn submit_order(
        &self,
        _connection: &BrokerConnection,
        request: &BrokerOrderRequest,
        _correlation_id: Uuid,
    ) -> ServiceResult<BrokerOrderResponse> {
        self.submissions.lock().unwrap().push(request.clone());
        self.submit_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                let price = request.limit_price.unwrap_or_else(|| Decimal::from(100));
                Ok(Self::filled(request, price))
            })
    }

    async fn modify_order(
        &self,
        _connection: &BrokerConnection,
        request: &BrokerModifyRequest,
        _correlation_id: Uuid,
    ) -> ServiceResult<BrokerOrderResponse> {
        Ok(BrokerOrderResponse {
            broker_order_id: request.broker_order_id.clone(),
            status: BrokerOrderStatus::Pending,
            filled_quantity: 0,
            average_price: None,
            broker_fill_id: None,
            reason: None,
        })
    }

    async fn cancel_order(
        &self,
        _connection: &BrokerConnection,
        broker_order_id: &str,
        _correlation_id: Uuid,
    ) -> ServiceResult<BrokerOrderResponse> {
        self.cancels.lock().unwrap().push(broker_order_id.to_string());
        self.cancel_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(BrokerOrderResponse {
                    broker_order_id: broker_order_id.to_string(),
                    status: BrokerOrderStatus::Cancelled,
                    filled_quantity: 0,
                    average_price: None,
                    broker_fill_id: None,
                    reason: None,
                })
            })
    }

    async fn get_status(
        &self,
        _connection: &BrokerConnection,
        broker_order_id: &str,
        _correlation_id: Uuid,
    ) -> ServiceResult<BrokerOrderResponse> {
        self.status_queries
            .lock()
            .unwrap()
            .push(broker_order_id.to_string());
        self.status_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(BrokerOrderResponse {
                    broker_order_id: broker_order_id.to_string(),
                    status: BrokerOrderStatus::Pending,
                    filled_quantity: 0,
                    average_price: None,
                    broker_fill_id: None,
                    reason: None,
                })
            })
    }
}

// ===== Portfolio =====

pub struct MockPortfolioService {
    pub impacts: Mutex<VecDeque<ServiceResult<PortfolioImpact>>>,
    pub position_risks: Mutex<VecDeque<ServiceResult<PositionRisk>>>,
    pub updates: Mutex<Vec<PositionUpdate>>,
    /// When set, every call fails with a connection error. Used to trip
    /// the portfolio breaker in tests.
    pub fail_all: Mutex<bool>,
}

impl MockPortfolioService {
    pub fn new() -> Self {
        Self {
            impacts: Mutex::new(VecDeque::new()),
            position_risks: Mutex::new(VecDeque::new()),
            updates: Mutex::new(Vec::new()),
            fail_all: Mutex::new(false),
        }
    }

    pub fn set_fail_all(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }

    pub fn push_impact(&self, result: ServiceResult<PortfolioImpact>) {
        self.impacts.lock().unwrap().push_back(result);
    }

    pub fn push_position_risk(&self, result: ServiceResult<PositionRisk>) {
        self.position_risks.lock().unwrap().push_back(result);
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    /// An impact that approves everything: large buying power, low
    /// concentration and margin usage.
    pub fn generous_impact() -> PortfolioImpact {
        PortfolioImpact {
            available_buying_power: Decimal::from(100_000_000u64),
            total_portfolio_value: Decimal::from(100_000_000u64),
            projected_concentration_pct: 1.0,
            projected_margin_usage: 0.1,
            margin_impact_acceptable: true,
            from_fallback: false,
        }
    }

    fn failure(&self) -> Option<ServiceError> {
        if *self.fail_all.lock().unwrap() {
            Some(ServiceError::Connection {
                reason: "portfolio service unreachable (mock)".to_string(),
            })
        } else {
            None
        }
    }
}

impl Default for MockPortfolioService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortfolioService for MockPortfolioService {
    async fn calculate_impact(
        &self,
        _user_id: i64,
        _symbol: &str,
        _side: crate::domain::trading::order::OrderSide,
        _quantity: i64,
        _order_value: Decimal,
        _correlation_id: Uuid,
    ) -> ServiceResult<PortfolioImpact> {
        if let Some(e) = self.failure() {
            return Err(e);
        }
        self.impacts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::generous_impact()))
    }

    async fn get_position_risk(
        &self,
        _user_id: i64,
        symbol: &str,
        _correlation_id: Uuid,
    ) -> ServiceResult<PositionRisk> {
        if let Some(e) = self.failure() {
            return Err(e);
        }
        self.position_risks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PositionRisk {
                    symbol: symbol.to_string(),
                    current_quantity: 0,
                    max_position_size: 1_000_000,
                    from_fallback: false,
                })
            })
    }

    async fn update_position(&self, update: &PositionUpdate) -> ServiceResult<()> {
        if let Some(e) = self.failure() {
            return Err(e);
        }
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

// ===== Events & notifications =====

#[derive(Default)]
pub struct MockEventPublisher {
    pub events: Mutex<Vec<DomainEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> ServiceResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn publish_batch(&self, events: &[DomainEvent]) -> ServiceResult<()> {
        self.events.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockNotificationService {
    pub notifications: Mutex<Vec<(i64, String)>>,
}

impl MockNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationService for MockNotificationService {
    async fn notify(
        &self,
        user_id: i64,
        subject: &str,
        _body: &str,
        _correlation_id: Uuid,
    ) -> ServiceResult<()> {
        self.notifications
            .lock()
            .unwrap()
            .push((user_id, subject.to_string()));
        Ok(())
    }
}

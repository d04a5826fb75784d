//! Broker routing.
//!
//! Routing is pluggable behind [`BrokerRouter`]. The default picks the
//! first configured broker supporting the order's exchange; a
//! best-execution router can replace it without touching the orchestrator.

use std::sync::Arc;

use crate::domain::ports::BrokerAdapter;
use crate::domain::trading::exchange::Exchange;

/// The routing decision for one order.
#[derive(Clone)]
pub struct Routing {
    pub broker: Arc<dyn BrokerAdapter>,
}

impl Routing {
    pub fn broker_name(&self) -> &str {
        self.broker.name()
    }
}

pub trait BrokerRouter: Send + Sync {
    /// Choose a broker for an order on the given exchange.
    fn route(&self, exchange: Exchange) -> Option<Routing>;

    /// Resolve a broker by name, for operations on already-routed orders.
    fn by_name(&self, name: &str) -> Option<Arc<dyn BrokerAdapter>>;
}

/// Default router: first configured broker whose supported-exchange set
/// contains the order's exchange.
pub struct FirstSupportedRouter {
    brokers: Vec<Arc<dyn BrokerAdapter>>,
}

impl FirstSupportedRouter {
    pub fn new(brokers: Vec<Arc<dyn BrokerAdapter>>) -> Self {
        Self { brokers }
    }
}

impl BrokerRouter for FirstSupportedRouter {
    fn route(&self, exchange: Exchange) -> Option<Routing> {
        self.brokers
            .iter()
            .find(|b| b.supports_exchange(exchange))
            .map(|broker| Routing {
                broker: broker.clone(),
            })
    }

    fn by_name(&self, name: &str) -> Option<Arc<dyn BrokerAdapter>> {
        self.brokers.iter().find(|b| b.name() == name).cloned()
    }
}

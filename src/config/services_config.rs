//! Outbound service endpoints and the broker roster.

use anyhow::Result;
use std::env;
use std::str::FromStr;

use crate::domain::trading::exchange::Exchange;

/// One broker the service can route to, with the exchanges it supports.
#[derive(Debug, Clone)]
pub struct BrokerSpec {
    pub name: String,
    pub exchanges: Vec<Exchange>,
}

#[derive(Debug, Clone)]
pub struct ServicesEnvConfig {
    pub broker_auth_base_url: String,
    pub portfolio_base_url: String,
    pub event_bus_base_url: String,
    pub service_api_key: String,
    /// Parsed from `BROKERS`, e.g. "ZERODHA:NSE,BSE;ALPACA:NYSE,NASDAQ".
    pub brokers: Vec<BrokerSpec>,
}

impl ServicesEnvConfig {
    pub fn from_env() -> Result<Self> {
        let brokers_str = env::var("BROKERS")
            .unwrap_or_else(|_| "ZERODHA:NSE,BSE;ALPACA:NYSE,NASDAQ,LSE".to_string());
        let brokers = parse_brokers(&brokers_str)?;

        Ok(Self {
            broker_auth_base_url: env::var("BROKER_AUTH_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8086".to_string()),
            portfolio_base_url: env::var("PORTFOLIO_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8083".to_string()),
            event_bus_base_url: env::var("EVENT_BUS_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8085".to_string()),
            service_api_key: env::var("SERVICE_API_KEY").unwrap_or_default(),
            brokers,
        })
    }
}

fn parse_brokers(raw: &str) -> Result<Vec<BrokerSpec>> {
    let mut brokers = Vec::new();
    for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
        let Some((name, exchanges)) = entry.split_once(':') else {
            anyhow::bail!("Invalid BROKERS entry (expected NAME:EX1,EX2): {}", entry);
        };
        let exchanges = exchanges
            .split(',')
            .map(|e| Exchange::from_str(e.trim()))
            .collect::<Result<Vec<_>>>()?;
        brokers.push(BrokerSpec {
            name: name.trim().to_string(),
            exchanges,
        });
    }
    Ok(brokers)
}

//! Prometheus metrics definitions for tradegate
//!
//! All metrics use the `tradegate_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

use crate::infrastructure::core::circuit_breaker::CircuitState;

/// Prometheus metrics for the order-management core
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Total orders by side and terminal status
    pub orders_total: CounterVec,
    /// Placement latency by broker and outcome
    pub execution_latency_seconds: HistogramVec,
    /// Placement outcomes by broker
    pub executions_total: CounterVec,
    /// Risk check latency by check name
    pub risk_check_latency_seconds: HistogramVec,
    /// Risk violations by code
    pub risk_violations_total: CounterVec,
    /// Validation failures by code
    pub validation_failures_total: CounterVec,
    /// Breaker state per domain (0=closed, 1=half-open, 2=open)
    pub breaker_state: GenericGaugeVec<AtomicF64>,
    /// Position updates waiting for replay
    pub queued_position_updates: GenericGauge<AtomicF64>,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_total = CounterVec::new(
            Opts::new("tradegate_orders_total", "Total orders by side and status"),
            &["side", "status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let execution_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tradegate_execution_latency_seconds",
                "Broker placement latency in seconds",
            )
            .buckets(vec![
                0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ]),
            &["broker", "outcome"],
        )?;
        registry.register(Box::new(execution_latency_seconds.clone()))?;

        let executions_total = CounterVec::new(
            Opts::new(
                "tradegate_executions_total",
                "Placement outcomes by broker",
            ),
            &["broker", "outcome"],
        )?;
        registry.register(Box::new(executions_total.clone()))?;

        let risk_check_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tradegate_risk_check_latency_seconds",
                "Risk check latency in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0]),
            &["check"],
        )?;
        registry.register(Box::new(risk_check_latency_seconds.clone()))?;

        let risk_violations_total = CounterVec::new(
            Opts::new(
                "tradegate_risk_violations_total",
                "Risk violations by code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(risk_violations_total.clone()))?;

        let validation_failures_total = CounterVec::new(
            Opts::new(
                "tradegate_validation_failures_total",
                "Validation failures by code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(validation_failures_total.clone()))?;

        let breaker_state = GaugeVec::new(
            Opts::new(
                "tradegate_breaker_state",
                "Circuit breaker state per domain (0=closed, 1=half-open, 2=open)",
            ),
            &["domain"],
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        let queued_position_updates = Gauge::with_opts(Opts::new(
            "tradegate_queued_position_updates",
            "Position updates queued for replay",
        ))?;
        registry.register(Box::new(queued_position_updates.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "tradegate_uptime_seconds",
            "Service uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            orders_total,
            execution_latency_seconds,
            executions_total,
            risk_check_latency_seconds,
            risk_violations_total,
            validation_failures_total,
            breaker_state,
            queued_position_updates,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    /// Increment order counter
    pub fn inc_orders(&self, side: &str, status: &str) {
        self.orders_total.with_label_values(&[side, status]).inc();
    }

    /// Record one placement outcome with its duration
    pub fn observe_execution(&self, broker: &str, outcome: &str, latency: f64) {
        self.execution_latency_seconds
            .with_label_values(&[broker, outcome])
            .observe(latency);
        self.executions_total
            .with_label_values(&[broker, outcome])
            .inc();
    }

    pub fn observe_risk_check(&self, check: &str, latency: f64) {
        self.risk_check_latency_seconds
            .with_label_values(&[check])
            .observe(latency);
    }

    pub fn inc_risk_violation(&self, code: &str) {
        self.risk_violations_total.with_label_values(&[code]).inc();
    }

    pub fn inc_validation_failure(&self, code: &str) {
        self.validation_failures_total
            .with_label_values(&[code])
            .inc();
    }

    pub fn set_breaker_state(&self, domain: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        };
        self.breaker_state.with_label_values(&[domain]).set(value);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        assert!(metrics.render().contains("tradegate_"));
    }

    #[test]
    fn test_order_counter() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_orders("BUY", "FILLED");
        metrics.inc_orders("SELL", "REJECTED");
        let output = metrics.render();
        assert!(output.contains("tradegate_orders_total"));
    }

    #[test]
    fn test_breaker_state_gauge() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.set_breaker_state("portfolio", CircuitState::Open);
        let output = metrics.render();
        assert!(output.contains("tradegate_breaker_state"));
        assert!(output.contains("portfolio"));
    }

    #[test]
    fn test_execution_observation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.observe_execution("ZERODHA", "filled", 0.8);
        let output = metrics.render();
        assert!(output.contains("tradegate_execution_latency_seconds"));
        assert!(output.contains("tradegate_executions_total"));
    }
}

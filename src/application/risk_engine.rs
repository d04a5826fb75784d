//! Pre-trade risk engine.
//!
//! Six checks per order: order value, daily trade count, buying power,
//! position limit, concentration, margin. The two portfolio fetches they
//! depend on run concurrently; an adapter failure never cancels the peer
//! fetch, and every violation is accumulated so the caller sees the full
//! picture. A portfolio failure while the breaker is closed is a CRITICAL
//! system violation; the breaker-open fallback record instead lets the
//! trade through with elevated-risk warnings.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::config::RiskEnvConfig;
use crate::domain::errors::{RiskViolation, Severity};
use crate::domain::ports::{PortfolioImpact, PortfolioService, PositionRisk};
use crate::domain::repositories::RiskLimitsRepository;
use crate::domain::trading::order::{OrderRequest, OrderSide};
use crate::domain::trading::position::RiskLimits;
use crate::infrastructure::observability::Metrics;

/// Aggregated outcome of a risk evaluation.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub violations: Vec<RiskViolation>,
    /// Non-blocking advisories, e.g. fallback-based decisions.
    pub warnings: Vec<String>,
    /// 0.0 = no violations, 1.0 = critical. Derived from the maximum
    /// severity, so it is invariant under violation ordering.
    pub score: f64,
}

impl RiskAssessment {
    fn from_parts(violations: Vec<RiskViolation>, warnings: Vec<String>) -> Self {
        let score = match violations.iter().map(|v| v.severity()).max() {
            None => 0.0,
            Some(Severity::Low) => 0.25,
            Some(Severity::Medium) => 0.5,
            Some(Severity::High) => 0.75,
            Some(Severity::Critical) => 1.0,
        };
        Self {
            violations,
            warnings,
            score,
        }
    }

    /// Any HIGH or CRITICAL violation blocks the order.
    pub fn is_blocking(&self) -> bool {
        self.violations.iter().any(|v| v.is_blocking())
    }
}

/// Per-user accepted-order counter with a date-stamped reset at local
/// midnight. In-process; a shared counter across replicas would replace
/// this behind the same surface.
#[derive(Default)]
pub struct DailyTradeCounter {
    counts: Mutex<HashMap<i64, (NaiveDate, u32)>>,
}

impl DailyTradeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, user_id: i64, today: NaiveDate) -> u32 {
        let mut counts = self.counts.lock().unwrap();
        match counts.get(&user_id) {
            Some((date, count)) if *date == today => *count,
            Some(_) => {
                counts.insert(user_id, (today, 0));
                0
            }
            None => 0,
        }
    }

    pub fn record(&self, user_id: i64, today: NaiveDate) {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts.entry(user_id).or_insert((today, 0));
        if entry.0 != today {
            *entry = (today, 0);
        }
        entry.1 += 1;
    }
}

pub struct RiskEngine {
    portfolio: Arc<dyn PortfolioService>,
    limits: Arc<dyn RiskLimitsRepository>,
    config: RiskEnvConfig,
    daily_trades: DailyTradeCounter,
    metrics: Metrics,
}

impl RiskEngine {
    pub fn new(
        portfolio: Arc<dyn PortfolioService>,
        limits: Arc<dyn RiskLimitsRepository>,
        config: RiskEnvConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            portfolio,
            limits,
            config,
            daily_trades: DailyTradeCounter::new(),
            metrics,
        }
    }

    /// Estimated order value. MARKET orders use the caller-supplied
    /// reference price, falling back to the configured default.
    pub fn estimated_order_value(&self, request: &OrderRequest) -> Decimal {
        let price = request
            .limit_price
            .or(request.reference_price)
            .unwrap_or(self.config.default_market_reference_price);
        price * Decimal::from(request.quantity)
    }

    /// Run all six checks and merge their outcomes.
    pub async fn check(
        &self,
        request: &OrderRequest,
        user_id: i64,
        correlation_id: Uuid,
    ) -> RiskAssessment {
        let started = Instant::now();
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        let mut adapter_failures: Vec<String> = Vec::new();

        let order_value = self.estimated_order_value(request);
        let limits = match self.limits.find(user_id).await {
            Ok(Some(limits)) => limits,
            Ok(None) => RiskLimits::default_for(user_id),
            Err(e) => {
                warn!(
                    "RiskEngine: risk_limits lookup failed for user {} ({}); using defaults",
                    user_id, e
                );
                warnings.push("risk limits unavailable; defaults applied".to_string());
                RiskLimits::default_for(user_id)
            }
        };

        // The two portfolio fetches feeding checks 3-6 run concurrently;
        // neither failure cancels the other.
        let adapter_budget = Duration::from_millis(self.config.adapter_timeout_millis);
        let (impact, position_risk) = tokio::join!(
            timeout(
                adapter_budget,
                self.portfolio.calculate_impact(
                    user_id,
                    &request.symbol,
                    request.side,
                    request.quantity,
                    order_value,
                    correlation_id,
                ),
            ),
            timeout(
                adapter_budget,
                self.portfolio
                    .get_position_risk(user_id, &request.symbol, correlation_id),
            ),
        );

        // 1. Order value limit
        let check_started = Instant::now();
        let max_value = self.config.max_order_value.min(limits.max_single_order_value);
        if order_value > max_value {
            violations.push(RiskViolation::OrderValueLimitExceeded {
                value: order_value,
                max: max_value,
            });
        }
        self.observe("order_value", check_started);

        // 2. Daily trade limit
        let check_started = Instant::now();
        let today = Utc::now().date_naive();
        let max_trades = self.config.max_daily_trades.min(limits.max_daily_trades);
        let count = self.daily_trades.count(user_id, today);
        if count >= max_trades {
            violations.push(RiskViolation::DailyTradeLimitExceeded {
                count,
                max: max_trades,
            });
        }
        self.observe("daily_trades", check_started);

        // 3. Buying power
        let check_started = Instant::now();
        match &impact {
            Ok(Ok(impact)) => {
                if impact.from_fallback {
                    warnings.push(
                        "portfolio impact served from conservative fallback; trade allowed with elevated risk"
                            .to_string(),
                    );
                }
                self.check_buying_power(order_value, impact, &mut violations);
            }
            other => adapter_failures.push(describe_adapter_failure("calculate_impact", other)),
        }
        self.observe("buying_power", check_started);

        // 4. Position limit
        let check_started = Instant::now();
        match &position_risk {
            Ok(Ok(risk)) => {
                if risk.from_fallback {
                    warnings.push(
                        "position risk served from conservative fallback".to_string(),
                    );
                }
                self.check_position_limit(request, risk, &mut violations);
            }
            other => adapter_failures.push(describe_adapter_failure("get_position_risk", other)),
        }
        self.observe("position_limit", check_started);

        // 5. Concentration and 6. Margin, both over the impact record.
        if let Ok(Ok(impact)) = &impact {
            let check_started = Instant::now();
            self.check_concentration(&request.symbol, impact, &mut violations);
            self.observe("concentration", check_started);

            let check_started = Instant::now();
            self.check_margin(impact, &mut violations);
            self.observe("margin", check_started);
        }

        // One CRITICAL system violation per evaluation, no matter how many
        // adapter fetches failed.
        if !adapter_failures.is_empty() {
            violations.push(RiskViolation::RiskSystemUnavailable {
                reason: adapter_failures.join("; "),
            });
        }

        for violation in &violations {
            self.metrics.inc_risk_violation(violation.code());
        }
        self.observe("total", started);

        RiskAssessment::from_parts(violations, warnings)
    }

    /// Record one accepted order against the user's daily counter.
    pub fn record_accepted_order(&self, user_id: i64) {
        self.daily_trades.record(user_id, Utc::now().date_naive());
    }

    fn check_buying_power(
        &self,
        order_value: Decimal,
        impact: &PortfolioImpact,
        violations: &mut Vec<RiskViolation>,
    ) {
        let buffer = Decimal::from_f64(1.0 + self.config.min_buying_power_buffer)
            .unwrap_or(Decimal::ONE);
        let required = order_value * buffer;
        if required > impact.available_buying_power {
            violations.push(RiskViolation::InsufficientBuyingPower {
                required,
                available: impact.available_buying_power,
            });
        }
    }

    fn check_position_limit(
        &self,
        request: &OrderRequest,
        risk: &PositionRisk,
        violations: &mut Vec<RiskViolation>,
    ) {
        let signed_quantity = match request.side {
            OrderSide::Buy => request.quantity,
            OrderSide::Sell => -request.quantity,
        };
        let projected = risk.current_quantity + signed_quantity;
        if projected.abs() > risk.max_position_size {
            violations.push(RiskViolation::PositionLimitExceeded {
                symbol: request.symbol.clone(),
                projected,
                max: risk.max_position_size,
            });
        }
    }

    fn check_concentration(
        &self,
        symbol: &str,
        impact: &PortfolioImpact,
        violations: &mut Vec<RiskViolation>,
    ) {
        if impact.projected_concentration_pct > self.config.max_position_concentration_pct {
            violations.push(RiskViolation::ConcentrationRiskExceeded {
                symbol: symbol.to_string(),
                projected_pct: impact.projected_concentration_pct,
                max_pct: self.config.max_position_concentration_pct,
            });
        }
    }

    fn check_margin(&self, impact: &PortfolioImpact, violations: &mut Vec<RiskViolation>) {
        if !impact.margin_impact_acceptable
            || impact.projected_margin_usage > self.config.max_margin_usage
        {
            violations.push(RiskViolation::MarginRequirementNotMet {
                projected: impact.projected_margin_usage,
                max: self.config.max_margin_usage,
            });
        }
    }

    fn observe(&self, check: &str, started: Instant) {
        self.metrics
            .observe_risk_check(check, started.elapsed().as_secs_f64());
    }
}

/// A portfolio adapter failure during risk becomes part of a CRITICAL
/// system violation (the conservative fallback path returns Ok instead
/// and never lands here).
fn describe_adapter_failure<T>(
    operation: &str,
    outcome: &Result<Result<T, crate::domain::errors::ServiceError>, tokio::time::error::Elapsed>,
) -> String {
    match outcome {
        Ok(Err(e)) => format!("{} failed: {}", operation, e),
        Err(_) => format!("{} timed out", operation),
        Ok(Ok(_)) => unreachable!("describe_adapter_failure called on success"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ServiceError;
    use crate::domain::trading::exchange::Exchange;
    use crate::domain::trading::order::{OrderType, TimeInForce};
    use crate::infrastructure::mock::MockPortfolioService;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct NoLimits;

    #[async_trait]
    impl RiskLimitsRepository for NoLimits {
        async fn find(
            &self,
            _user_id: i64,
        ) -> Result<Option<RiskLimits>, crate::domain::errors::DataError> {
            Ok(None)
        }

        async fn upsert(
            &self,
            _limits: &RiskLimits,
        ) -> Result<(), crate::domain::errors::DataError> {
            Ok(())
        }
    }

    fn engine(portfolio: Arc<MockPortfolioService>) -> RiskEngine {
        RiskEngine::new(
            portfolio,
            Arc::new(NoLimits),
            RiskEnvConfig::from_env().unwrap(),
            Metrics::new().unwrap(),
        )
    }

    fn request(quantity: i64, limit: Decimal) -> OrderRequest {
        OrderRequest {
            client_order_id: None,
            symbol: "RELIANCE".to_string(),
            exchange: Exchange::Nse,
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit),
            stop_price: None,
            time_in_force: TimeInForce::Day,
            expiry_date: None,
            reference_price: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_clean_order_passes() {
        let portfolio = Arc::new(MockPortfolioService::new());
        let engine = engine(portfolio);

        let assessment = engine.check(&request(100, dec!(2450.75)), 12345, Uuid::new_v4()).await;
        assert!(assessment.violations.is_empty());
        assert_eq!(assessment.score, 0.0);
        assert!(!assessment.is_blocking());
    }

    #[tokio::test]
    async fn test_insufficient_buying_power_includes_buffer() {
        let portfolio = Arc::new(MockPortfolioService::new());
        portfolio.push_impact(Ok(PortfolioImpact {
            available_buying_power: dec!(1000000),
            ..MockPortfolioService::generous_impact()
        }));
        let engine = engine(portfolio);

        // 1000 @ 1200.00 = 1,200,000; with the 10% buffer 1,320,000 is
        // required against 1,000,000 available.
        let assessment = engine.check(&request(1000, dec!(1200.00)), 12345, Uuid::new_v4()).await;
        let violation = assessment
            .violations
            .iter()
            .find(|v| v.code() == "INSUFFICIENT_BUYING_POWER")
            .expect("buying power violation");
        match violation {
            RiskViolation::InsufficientBuyingPower { required, available } => {
                assert_eq!(*required, dec!(1320000.0));
                assert_eq!(*available, dec!(1000000));
            }
            other => panic!("unexpected violation {:?}", other),
        }
        assert!(assessment.is_blocking());
        assert_eq!(assessment.score, 0.75);
    }

    #[tokio::test]
    async fn test_order_value_limit() {
        let portfolio = Arc::new(MockPortfolioService::new());
        let engine = engine(portfolio);

        // 10,000 @ 1,500 = 15,000,000 > 10,000,000 default cap.
        let assessment = engine.check(&request(10_000, dec!(1500.00)), 12345, Uuid::new_v4()).await;
        assert!(
            assessment
                .violations
                .iter()
                .any(|v| v.code() == "ORDER_VALUE_LIMIT_EXCEEDED")
        );
    }

    #[tokio::test]
    async fn test_daily_trade_limit_blocks_after_max() {
        let portfolio = Arc::new(MockPortfolioService::new());
        let engine = engine(portfolio);

        for _ in 0..100 {
            engine.record_accepted_order(777);
        }

        let assessment = engine.check(&request(10, dec!(2450.75)), 777, Uuid::new_v4()).await;
        assert!(
            assessment
                .violations
                .iter()
                .any(|v| v.code() == "DAILY_TRADE_LIMIT_EXCEEDED")
        );
        // Daily-trade is MEDIUM: advisory, not blocking.
        assert!(!assessment.is_blocking());
        assert_eq!(assessment.score, 0.5);
    }

    #[tokio::test]
    async fn test_adapter_failures_collapse_to_one_critical_violation() {
        let portfolio = Arc::new(MockPortfolioService::new());
        portfolio.push_impact(Err(ServiceError::Connection {
            reason: "refused".into(),
        }));
        portfolio.push_position_risk(Err(ServiceError::Connection {
            reason: "refused".into(),
        }));
        let engine = engine(portfolio);

        let assessment = engine.check(&request(100, dec!(2450.75)), 12345, Uuid::new_v4()).await;
        assert!(assessment.is_blocking());
        assert_eq!(assessment.score, 1.0);

        // Both failed fetches merge into a single system violation that
        // names each failed operation.
        let unavailable: Vec<_> = assessment
            .violations
            .iter()
            .filter(|v| matches!(v, RiskViolation::RiskSystemUnavailable { .. }))
            .collect();
        assert_eq!(unavailable.len(), 1);
        let message = unavailable[0].to_string();
        assert!(message.contains("calculate_impact"));
        assert!(message.contains("get_position_risk"));
    }

    #[tokio::test]
    async fn test_single_adapter_failure_still_critical() {
        let portfolio = Arc::new(MockPortfolioService::new());
        portfolio.push_impact(Err(ServiceError::Timeout { elapsed_ms: 5000 }));
        let engine = engine(portfolio);

        let assessment = engine.check(&request(100, dec!(2450.75)), 12345, Uuid::new_v4()).await;
        assert!(assessment.is_blocking());
        let unavailable: Vec<_> = assessment
            .violations
            .iter()
            .filter(|v| matches!(v, RiskViolation::RiskSystemUnavailable { .. }))
            .collect();
        assert_eq!(unavailable.len(), 1);
        assert!(unavailable[0].to_string().contains("calculate_impact"));
    }

    #[tokio::test]
    async fn test_fallback_impact_allows_with_warning() {
        let portfolio = Arc::new(MockPortfolioService::new());
        portfolio.push_impact(Ok(PortfolioImpact {
            from_fallback: true,
            ..MockPortfolioService::generous_impact()
        }));
        let engine = engine(portfolio);

        let assessment = engine.check(&request(100, dec!(2450.75)), 12345, Uuid::new_v4()).await;
        assert!(!assessment.is_blocking());
        assert!(!assessment.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_violation_set_is_order_invariant() {
        // Two engines seeing the same failing checks in different fetch
        // orders produce the same violation set and score.
        let portfolio = Arc::new(MockPortfolioService::new());
        portfolio.push_impact(Ok(PortfolioImpact {
            available_buying_power: Decimal::ZERO,
            projected_concentration_pct: 90.0,
            ..MockPortfolioService::generous_impact()
        }));
        let engine1 = engine(portfolio);
        let first = engine1.check(&request(100, dec!(2450.75)), 1, Uuid::new_v4()).await;

        let portfolio = Arc::new(MockPortfolioService::new());
        portfolio.push_impact(Ok(PortfolioImpact {
            projected_concentration_pct: 90.0,
            available_buying_power: Decimal::ZERO,
            ..MockPortfolioService::generous_impact()
        }));
        let engine2 = engine(portfolio);
        let second = engine2.check(&request(100, dec!(2450.75)), 1, Uuid::new_v4()).await;

        let mut codes_a: Vec<_> = first.violations.iter().map(|v| v.code()).collect();
        let mut codes_b: Vec<_> = second.violations.iter().map(|v| v.code()).collect();
        codes_a.sort_unstable();
        codes_b.sort_unstable();
        assert_eq!(codes_a, codes_b);
        assert_eq!(first.score, second.score);
    }

    #[test]
    fn test_daily_counter_resets_on_new_day() {
        let counter = DailyTradeCounter::new();
        let yesterday = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();

        counter.record(1, yesterday);
        counter.record(1, yesterday);
        assert_eq!(counter.count(1, yesterday), 2);
        assert_eq!(counter.count(1, today), 0);
    }
}

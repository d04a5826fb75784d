//! Error taxonomies for the order-management core.
//!
//! One flat sum type per subsystem (validation, risk, execution, data,
//! system), each carrying a stable code, a severity, an optional offending
//! field and a retryability flag. Adapters speak `ServiceError`; it is
//! translated into the subsystem taxonomies at the orchestration boundary.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Severity attached to every error code.
///
/// HIGH and CRITICAL risk violations block an order; MEDIUM/LOW are
/// surfaced as warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

// ===== Validation =====

/// Errors produced by the order validation engine.
///
/// Validation errors are accumulated, never short-circuited: the caller
/// receives every problem with the request at once.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid symbol: {reason}")]
    InvalidSymbol { reason: String },

    #[error("Invalid quantity: {reason}")]
    InvalidQuantity { reason: String },

    #[error("Invalid price ({field}): {reason}")]
    InvalidPrice { field: &'static str, reason: String },

    #[error("Invalid order type: {reason}")]
    InvalidOrderType { reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Time-in-force error: {reason}")]
    TimeInForceError { reason: String },

    #[error("Modification not allowed: {reason}")]
    ModificationNotAllowed { reason: String },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidSymbol { .. } => "INVALID_SYMBOL",
            ValidationError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            ValidationError::InvalidPrice { .. } => "INVALID_PRICE",
            ValidationError::InvalidOrderType { .. } => "INVALID_ORDER_TYPE",
            ValidationError::MissingField { .. } => "MISSING_FIELD",
            ValidationError::TimeInForceError { .. } => "TIME_IN_FORCE_ERROR",
            ValidationError::ModificationNotAllowed { .. } => "MODIFICATION_NOT_ALLOWED",
        }
    }

    /// The request field the error refers to, when it maps to a single one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::InvalidSymbol { .. } => Some("symbol"),
            ValidationError::InvalidQuantity { .. } => Some("quantity"),
            ValidationError::InvalidPrice { field, .. } => Some(field),
            ValidationError::InvalidOrderType { .. } => Some("orderType"),
            ValidationError::MissingField { field } => Some(field),
            ValidationError::TimeInForceError { .. } => Some("timeInForce"),
            ValidationError::ModificationNotAllowed { .. } => None,
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Medium
    }

    pub fn retryable(&self) -> bool {
        false
    }
}

// ===== Risk =====

/// Pre-trade risk violations. HIGH/CRITICAL block the order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskViolation {
    #[error("Order value {value} exceeds limit {max}")]
    OrderValueLimitExceeded { value: Decimal, max: Decimal },

    #[error("Daily trade limit reached: {count} of {max}")]
    DailyTradeLimitExceeded { count: u32, max: u32 },

    #[error("Insufficient buying power: required {required}, available {available}")]
    InsufficientBuyingPower {
        required: Decimal,
        available: Decimal,
    },

    #[error("Position limit exceeded for {symbol}: projected {projected}, max {max}")]
    PositionLimitExceeded {
        symbol: String,
        projected: i64,
        max: i64,
    },

    #[error("Concentration risk for {symbol}: projected {projected_pct:.2}% > max {max_pct:.2}%")]
    ConcentrationRiskExceeded {
        symbol: String,
        projected_pct: f64,
        max_pct: f64,
    },

    #[error("Margin requirement not met: projected usage {projected:.2} > max {max:.2}")]
    MarginRequirementNotMet { projected: f64, max: f64 },

    #[error("Risk system unavailable: {reason}")]
    RiskSystemUnavailable { reason: String },
}

impl RiskViolation {
    pub fn code(&self) -> &'static str {
        match self {
            RiskViolation::OrderValueLimitExceeded { .. } => "ORDER_VALUE_LIMIT_EXCEEDED",
            RiskViolation::DailyTradeLimitExceeded { .. } => "DAILY_TRADE_LIMIT_EXCEEDED",
            RiskViolation::InsufficientBuyingPower { .. } => "INSUFFICIENT_BUYING_POWER",
            RiskViolation::PositionLimitExceeded { .. } => "POSITION_LIMIT_EXCEEDED",
            RiskViolation::ConcentrationRiskExceeded { .. } => "CONCENTRATION_RISK_EXCEEDED",
            RiskViolation::MarginRequirementNotMet { .. } => "MARGIN_REQUIREMENT_NOT_MET",
            RiskViolation::RiskSystemUnavailable { .. } => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            RiskViolation::DailyTradeLimitExceeded { .. }
            | RiskViolation::ConcentrationRiskExceeded { .. } => Severity::Medium,
            RiskViolation::OrderValueLimitExceeded { .. }
            | RiskViolation::InsufficientBuyingPower { .. }
            | RiskViolation::PositionLimitExceeded { .. }
            | RiskViolation::MarginRequirementNotMet { .. } => Severity::High,
            RiskViolation::RiskSystemUnavailable { .. } => Severity::Critical,
        }
    }

    /// Risk violations are never retryable within the same session.
    pub fn retryable(&self) -> bool {
        false
    }

    /// Whether this violation alone blocks the order.
    pub fn is_blocking(&self) -> bool {
        self.severity() >= Severity::High
    }
}

// ===== Execution =====

/// Terminal errors from the broker execution path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Broker API error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    BrokerApiError {
        status: Option<u16>,
        message: String,
    },

    #[error("Order rejected by broker: {reason}")]
    OrderRejected { reason: String },

    #[error("Execution timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Partial fill: {filled} of {requested} executed")]
    PartialFill {
        filled: i64,
        requested: i64,
        broker_order_id: String,
        average_price: Option<Decimal>,
    },

    #[error("Insufficient liquidity for {symbol}")]
    InsufficientLiquidity { symbol: String },

    #[error("Duplicate submission for order {order_id}")]
    IdempotencyViolation { order_id: String },

    #[error("Execution system error: {reason}")]
    SystemError { reason: String },
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::BrokerApiError { .. } => "BROKER_API_ERROR",
            ExecutionError::OrderRejected { .. } => "ORDER_REJECTED",
            ExecutionError::Timeout { .. } => "EXECUTION_TIMEOUT",
            ExecutionError::PartialFill { .. } => "PARTIAL_FILL",
            ExecutionError::InsufficientLiquidity { .. } => "INSUFFICIENT_LIQUIDITY",
            ExecutionError::IdempotencyViolation { .. } => "IDEMPOTENCY_VIOLATION",
            ExecutionError::SystemError { .. } => "SYSTEM_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ExecutionError::BrokerApiError { status, .. } => {
                if status.map(|s| s >= 500).unwrap_or(true) {
                    Severity::High
                } else {
                    Severity::Medium
                }
            }
            ExecutionError::OrderRejected { .. }
            | ExecutionError::Timeout { .. }
            | ExecutionError::InsufficientLiquidity { .. } => Severity::High,
            ExecutionError::PartialFill { .. } => Severity::Medium,
            ExecutionError::IdempotencyViolation { .. } | ExecutionError::SystemError { .. } => {
                Severity::Critical
            }
        }
    }

    /// Whether an automated retry is safe.
    ///
    /// SYSTEM_ERROR is only retryable after investigation, so it reports
    /// `false` here; IDEMPOTENCY_VIOLATION must never be retried.
    pub fn retryable(&self) -> bool {
        match self {
            ExecutionError::BrokerApiError { status, .. } => {
                matches!(status, Some(s) if *s >= 500 || *s == 429)
            }
            ExecutionError::Timeout { .. } | ExecutionError::PartialFill { .. } => true,
            _ => false,
        }
    }
}

// ===== Data =====

/// Persistence-layer errors.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: &'static str, id: String },

    #[error("Duplicate {kind}: {id}")]
    DuplicateEntity { kind: &'static str, id: String },

    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Data integrity violation: {reason}")]
    DataIntegrityViolation { reason: String },
}

impl DataError {
    pub fn code(&self) -> &'static str {
        match self {
            DataError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            DataError::DuplicateEntity { .. } => "DUPLICATE_ENTITY",
            DataError::Database { .. } => "DATABASE_ERROR",
            DataError::DataIntegrityViolation { .. } => "DATA_INTEGRITY_VIOLATION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            DataError::EntityNotFound { .. } => Severity::Medium,
            DataError::DuplicateEntity { .. } => Severity::Medium,
            DataError::Database { .. } => Severity::High,
            DataError::DataIntegrityViolation { .. } => Severity::Critical,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, DataError::Database { .. })
    }
}

// ===== System =====

/// Cross-cutting system errors surfaced at the orchestration boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SystemError {
    #[error("Service unavailable: {service}")]
    ServiceUnavailable { service: String },

    #[error("Circuit breaker open for domain {domain}")]
    CircuitBreakerOpen { domain: String },

    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("Resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    #[error("Unexpected error: {reason}")]
    UnexpectedError { reason: String },
}

impl SystemError {
    pub fn code(&self) -> &'static str {
        match self {
            SystemError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            SystemError::CircuitBreakerOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            SystemError::ConfigError { .. } => "CONFIG_ERROR",
            SystemError::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            SystemError::UnexpectedError { .. } => "UNEXPECTED_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SystemError::ConfigError { .. } => Severity::High,
            _ => Severity::Critical,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            SystemError::ServiceUnavailable { .. } | SystemError::CircuitBreakerOpen { .. }
        )
    }
}

// ===== Adapter transport errors =====

/// Transport-level failure of an outbound service call.
///
/// This is the error type every adapter port returns. The circuit breaker
/// classifies it: connection/timeout/decode failures and 5xx responses
/// count against the failure rate, 4xx responses do not (they are
/// request-shaped problems, not dependency health).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("connection failure: {reason}")]
    Connection { reason: String },

    #[error("call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("remote returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("response decode failure: {reason}")]
    Decode { reason: String },
}

impl ServiceError {
    /// Whether this failure counts toward a circuit breaker's failure rate.
    pub fn trips_breaker(&self) -> bool {
        match self {
            ServiceError::Connection { .. }
            | ServiceError::Timeout { .. }
            | ServiceError::Decode { .. } => true,
            ServiceError::Remote { status, .. } => *status >= 500,
            ServiceError::InvalidRequest { .. } => false,
        }
    }

    /// Translate into the execution taxonomy for the broker path.
    pub fn into_execution_error(self) -> ExecutionError {
        match self {
            ServiceError::Timeout { elapsed_ms } => ExecutionError::Timeout { elapsed_ms },
            ServiceError::Remote { status, message } => ExecutionError::BrokerApiError {
                status: Some(status),
                message,
            },
            other => ExecutionError::BrokerApiError {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

// ===== Envelope =====

/// The error shape returned to callers of the public API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub severity: Severity,
    pub retryable: bool,
}

impl ErrorEnvelope {
    pub fn new(
        code: &str,
        message: impl Into<String>,
        field: Option<&str>,
        severity: Severity,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: field.map(str::to_string),
            severity,
            retryable,
        }
    }
}

impl From<&ValidationError> for ErrorEnvelope {
    fn from(e: &ValidationError) -> Self {
        ErrorEnvelope::new(e.code(), e.to_string(), e.field(), e.severity(), e.retryable())
    }
}

impl From<&RiskViolation> for ErrorEnvelope {
    fn from(e: &RiskViolation) -> Self {
        ErrorEnvelope::new(e.code(), e.to_string(), None, e.severity(), e.retryable())
    }
}

impl From<&ExecutionError> for ErrorEnvelope {
    fn from(e: &ExecutionError) -> Self {
        ErrorEnvelope::new(e.code(), e.to_string(), None, e.severity(), e.retryable())
    }
}

impl From<&DataError> for ErrorEnvelope {
    fn from(e: &DataError) -> Self {
        ErrorEnvelope::new(e.code(), e.to_string(), None, e.severity(), e.retryable())
    }
}

impl From<&SystemError> for ErrorEnvelope {
    fn from(e: &SystemError) -> Self {
        ErrorEnvelope::new(e.code(), e.to_string(), None, e.severity(), e.retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buying_power_violation_formatting() {
        let v = RiskViolation::InsufficientBuyingPower {
            required: dec!(1320000),
            available: dec!(1000000),
        };
        let msg = v.to_string();
        assert!(msg.contains("1320000"));
        assert!(msg.contains("1000000"));
        assert_eq!(v.code(), "INSUFFICIENT_BUYING_POWER");
        assert!(v.is_blocking());
    }

    #[test]
    fn test_daily_trade_limit_is_medium_and_non_blocking() {
        let v = RiskViolation::DailyTradeLimitExceeded { count: 100, max: 100 };
        assert_eq!(v.severity(), Severity::Medium);
        assert!(!v.is_blocking());
    }

    #[test]
    fn test_broker_api_error_severity_depends_on_status() {
        let e5xx = ExecutionError::BrokerApiError {
            status: Some(503),
            message: "unavailable".into(),
        };
        let e4xx = ExecutionError::BrokerApiError {
            status: Some(422),
            message: "bad params".into(),
        };
        assert_eq!(e5xx.severity(), Severity::High);
        assert!(e5xx.retryable());
        assert_eq!(e4xx.severity(), Severity::Medium);
        assert!(!e4xx.retryable());
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        let e = ExecutionError::BrokerApiError {
            status: Some(429),
            message: "slow down".into(),
        };
        assert!(e.retryable());
    }

    #[test]
    fn test_idempotency_violation_never_retryable() {
        let e = ExecutionError::IdempotencyViolation {
            order_id: "TM-1-1".into(),
        };
        assert_eq!(e.severity(), Severity::Critical);
        assert!(!e.retryable());
    }

    #[test]
    fn test_service_error_breaker_classification() {
        assert!(ServiceError::Connection { reason: "refused".into() }.trips_breaker());
        assert!(ServiceError::Timeout { elapsed_ms: 5000 }.trips_breaker());
        assert!(ServiceError::Remote { status: 502, message: "bad gateway".into() }.trips_breaker());
        assert!(!ServiceError::Remote { status: 422, message: "bad qty".into() }.trips_breaker());
        assert!(!ServiceError::InvalidRequest { reason: "negative qty".into() }.trips_breaker());
    }

    #[test]
    fn test_envelope_carries_field_for_price_errors() {
        let e = ValidationError::InvalidPrice {
            field: "limitPrice",
            reason: "required for LIMIT orders".into(),
        };
        let env = ErrorEnvelope::from(&e);
        assert_eq!(env.code, "INVALID_PRICE");
        assert_eq!(env.field.as_deref(), Some("limitPrice"));
        assert!(!env.retryable);
    }
}

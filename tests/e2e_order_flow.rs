//! End-to-end placement scenarios through the full pipeline with mock
//! collaborators and in-memory persistence.

mod common;

use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use common::{fills_for, harness, limit_buy, order_rows};
use tradegate::domain::errors::Severity;
use tradegate::domain::ports::PortfolioImpact;
use tradegate::domain::repositories::PortfolioRepository;
use tradegate::domain::trading::exchange::Exchange;
use tradegate::domain::trading::order::{OrderStatus, OrderType, TimeInForce};
use tradegate::infrastructure::mock::MockPortfolioService;

#[tokio::test]
async fn test_happy_path_limit_buy_fills_and_fans_out() {
    let h = harness().await;

    let placed = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect("placement should succeed");

    assert_eq!(placed.status, OrderStatus::Filled);
    assert_eq!(placed.filled_quantity, 100);
    assert_eq!(placed.average_fill_price, Some(dec!(2450.75)));
    assert_eq!(placed.broker_name.as_deref(), Some(common::TEST_BROKER));

    // One fill row, persisted atomically with the trade.
    assert_eq!(fills_for(&h.pool, &placed.order_id).await, 1);

    // Local portfolio position moved with the trade insert.
    let position = h
        .positions
        .find_position(12345, "RELIANCE", Exchange::Nse)
        .await
        .unwrap()
        .expect("position should exist");
    assert_eq!(position.quantity, 100);
    assert_eq!(position.average_cost, dec!(2450.75));

    // Fire-and-forget fan-out: event, notification, portfolio RPC.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.events.event_count(), 1);
    assert_eq!(h.notifier.notification_count(), 1);
    assert_eq!(h.portfolio_inner.update_count(), 1);
}

#[tokio::test]
async fn test_validation_burst_reports_every_error_and_persists_nothing() {
    let h = harness().await;

    let mut bad = limit_buy("", 0, dec!(1.00));
    bad.limit_price = None;
    bad.time_in_force = TimeInForce::Gtd;
    bad.expiry_date = None;
    bad.order_type = OrderType::Limit;

    let errors = h
        .service
        .place(bad, 12345, Uuid::new_v4())
        .await
        .expect_err("placement must fail validation");

    let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(&"INVALID_SYMBOL"));
    assert!(codes.contains(&"INVALID_QUANTITY"));
    assert!(codes.contains(&"INVALID_PRICE"));
    assert!(codes.contains(&"TIME_IN_FORCE_ERROR"));

    let price_error = errors.iter().find(|e| e.code == "INVALID_PRICE").unwrap();
    assert_eq!(price_error.field.as_deref(), Some("limitPrice"));

    // No order row, no broker call.
    assert_eq!(order_rows(&h.pool).await, 0);
    assert_eq!(h.broker.submission_count(), 0);
}

#[tokio::test]
async fn test_risk_rejection_blocks_before_broker() {
    let h = harness().await;
    h.portfolio_inner.push_impact(Ok(PortfolioImpact {
        available_buying_power: dec!(1000000),
        ..MockPortfolioService::generous_impact()
    }));

    let errors = h
        .service
        .place(limit_buy("RELIANCE", 1000, dec!(1200.00)), 12345, Uuid::new_v4())
        .await
        .expect_err("risk must reject");

    let violation = errors
        .iter()
        .find(|e| e.code == "INSUFFICIENT_BUYING_POWER")
        .expect("buying power violation");
    assert_eq!(violation.severity, Severity::High);
    assert!(violation.message.contains("1320000"));
    assert!(violation.message.contains("1000000"));
    assert!(!violation.retryable);

    // Rejected pre-persistence: only the audit entry remains.
    assert_eq!(order_rows(&h.pool).await, 0);
    assert_eq!(h.broker.submission_count(), 0);
}

#[tokio::test]
async fn test_duplicate_placement_hits_idempotency_gate() {
    let h = harness().await;

    let mut request = limit_buy("RELIANCE", 100, dec!(2450.75));
    request.client_order_id = Some("TM-1719500000000-042117".to_string());

    let first = h
        .service
        .place(request.clone(), 12345, Uuid::new_v4())
        .await
        .expect("first placement succeeds");
    assert_eq!(first.status, OrderStatus::Filled);

    let errors = h
        .service
        .place(request, 12345, Uuid::new_v4())
        .await
        .expect_err("second placement must fail");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, "IDEMPOTENCY_VIOLATION");
    assert_eq!(errors[0].severity, Severity::Critical);
    assert!(!errors[0].retryable);

    // The broker saw exactly one submission.
    assert_eq!(h.broker.submission_count(), 1);
}

#[tokio::test]
async fn test_list_and_counts() {
    let h = harness().await;

    for _ in 0..3 {
        h.service
            .place(limit_buy("RELIANCE", 10, dec!(2450.75)), 42, Uuid::new_v4())
            .await
            .expect("placement succeeds");
    }

    let listed = h.service.list(42, Some(OrderStatus::Filled), 10, 0).await.unwrap();
    assert_eq!(listed.len(), 3);

    let counts = h.service.counts(42).await.unwrap();
    assert_eq!(counts.get(&OrderStatus::Filled), Some(&3));

    // Another user sees nothing.
    assert!(h.service.list(43, None, 10, 0).await.unwrap().is_empty());
}

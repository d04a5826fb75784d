//! Execution-path scenarios: broker rejection, acknowledgement on poll
//! exhaustion, partial-fill policy, cancellation.

mod common;

use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{fills_for, harness, limit_buy};
use tradegate::domain::errors::ServiceError;
use tradegate::domain::ports::{BrokerOrderResponse, BrokerOrderStatus};
use tradegate::domain::trading::order::OrderStatus;

fn pending(broker_order_id: &str) -> BrokerOrderResponse {
    BrokerOrderResponse {
        broker_order_id: broker_order_id.to_string(),
        status: BrokerOrderStatus::Pending,
        filled_quantity: 0,
        average_price: None,
        broker_fill_id: None,
        reason: None,
    }
}

#[tokio::test]
async fn test_broker_rejection_persists_reason() {
    let h = harness().await;
    h.broker.push_submit_response(Ok(BrokerOrderResponse {
        broker_order_id: "B-1".into(),
        status: BrokerOrderStatus::Rejected,
        filled_quantity: 0,
        average_price: None,
        broker_fill_id: None,
        reason: Some("margin check failed at broker".into()),
    }));

    let errors = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect_err("broker rejection must surface");
    assert_eq!(errors[0].code, "ORDER_REJECTED");
    assert!(!errors[0].retryable);

    let orders = h.service.list(12345, None, 10, 0).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Rejected);
    assert_eq!(
        orders[0].rejection_reason.as_deref(),
        Some("margin check failed at broker")
    );
}

#[tokio::test]
async fn test_poll_exhaustion_leaves_order_acknowledged() {
    let h = harness().await;
    // Submit acknowledges; every status probe stays PENDING (the mock's
    // default), so the poll budget runs out.
    h.broker.push_submit_response(Ok(pending("B-2")));

    let placed = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect("execution hands over to reconciliation, not an error");

    assert_eq!(placed.status, OrderStatus::Acknowledged);
    assert_eq!(placed.broker_order_id.as_deref(), Some("B-2"));
    assert_eq!(h.broker.submission_count(), 1);

    // Reconciliation later drives the order to broker truth, without a
    // second submission.
    h.broker.push_status_response(Ok(BrokerOrderResponse {
        broker_order_id: "B-2".into(),
        status: BrokerOrderStatus::Filled,
        filled_quantity: 100,
        average_price: Some(dec!(2450.75)),
        broker_fill_id: Some("F-2".into()),
        reason: None,
    }));
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let reconciled = h.scheduler.reconcile_inflight_once().await;
    assert_eq!(reconciled, 1);

    let order = h
        .service
        .get(&placed.order_id, 12345)
        .await
        .expect("order exists");
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_quantity, 100);
    assert_eq!(h.broker.submission_count(), 1);
}

#[tokio::test]
async fn test_partial_fill_below_threshold_surfaces_error() {
    let h = harness().await;
    h.broker.push_submit_response(Ok(BrokerOrderResponse {
        broker_order_id: "B-3".into(),
        status: BrokerOrderStatus::PartialFill,
        filled_quantity: 30,
        average_price: Some(dec!(2450.00)),
        broker_fill_id: Some("F-3".into()),
        reason: None,
    }));

    let errors = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.00)), 12345, Uuid::new_v4())
        .await
        .expect_err("30% fill rate is below the 50% accept threshold");
    assert_eq!(errors[0].code, "PARTIAL_FILL");
    assert!(errors[0].retryable);

    // The executed slice is still recorded.
    let orders = h.service.list(12345, None, 10, 0).await.unwrap();
    assert_eq!(orders[0].status, OrderStatus::PartiallyFilled);
    assert_eq!(orders[0].filled_quantity, 30);
    assert_eq!(fills_for(&h.pool, &orders[0].order_id).await, 1);
}

#[tokio::test]
async fn test_partial_fill_at_threshold_is_accepted() {
    let h = harness().await;
    h.broker.push_submit_response(Ok(BrokerOrderResponse {
        broker_order_id: "B-4".into(),
        status: BrokerOrderStatus::PartialFill,
        filled_quantity: 50,
        average_price: Some(dec!(2450.00)),
        broker_fill_id: Some("F-4".into()),
        reason: None,
    }));

    let placed = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.00)), 12345, Uuid::new_v4())
        .await
        .expect("50% fill rate is accepted");
    assert_eq!(placed.status, OrderStatus::PartiallyFilled);
    assert_eq!(placed.filled_quantity, 50);
}

#[tokio::test]
async fn test_broker_transport_failure_leaves_order_submitted() {
    let h = harness().await;
    h.broker.push_submit_response(Err(ServiceError::Connection {
        reason: "connection refused".into(),
    }));

    let errors = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect_err("transport failure surfaces");
    assert_eq!(errors[0].code, "BROKER_API_ERROR");

    let orders = h.service.list(12345, None, 10, 0).await.unwrap();
    assert_eq!(orders[0].status, OrderStatus::Submitted);
}

#[tokio::test]
async fn test_transient_5xx_submit_is_retried_once_broker_recovers() {
    let h = harness().await;
    h.broker.push_submit_response(Err(ServiceError::Remote {
        status: 503,
        message: "upstream briefly unavailable".into(),
    }));

    let placed = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect("retryable 5xx is retried and the second attempt fills");
    assert_eq!(placed.status, OrderStatus::Filled);

    // Both attempts carried the same client order id.
    let submissions = h.broker.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].order_id, submissions[1].order_id);
}

#[tokio::test]
async fn test_cancel_is_idempotent_on_cancelled_orders() {
    let h = harness().await;
    h.broker.push_submit_response(Ok(pending("B-5")));

    let placed = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect("acknowledged placement");
    assert_eq!(placed.status, OrderStatus::Acknowledged);

    let cancelled = h
        .service
        .cancel(&placed.order_id, 12345, Uuid::new_v4())
        .await
        .expect("cancel succeeds");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.broker.cancels.lock().unwrap().len(), 1);

    // Second cancel: current snapshot, no error, no broker call.
    let again = h
        .service
        .cancel(&placed.order_id, 12345, Uuid::new_v4())
        .await
        .expect("second cancel is idempotent");
    assert_eq!(again.status, OrderStatus::Cancelled);
    assert_eq!(h.broker.cancels.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_of_filled_order_is_a_precondition_error() {
    let h = harness().await;

    let placed = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect("filled placement");
    assert_eq!(placed.status, OrderStatus::Filled);

    let errors = h
        .service
        .cancel(&placed.order_id, 12345, Uuid::new_v4())
        .await
        .expect_err("terminal orders cannot be cancelled");
    assert_eq!(errors[0].code, "MODIFICATION_NOT_ALLOWED");
}

#[tokio::test]
async fn test_modify_from_acknowledged_updates_order() {
    let h = harness().await;
    h.broker.push_submit_response(Ok(pending("B-6")));

    let placed = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect("acknowledged placement");

    let modified = h
        .service
        .modify(
            &placed.order_id,
            tradegate::domain::trading::order::OrderModification {
                quantity: Some(150),
                limit_price: Some(dec!(2451.00)),
                stop_price: None,
            },
            12345,
            Uuid::new_v4(),
        )
        .await
        .expect("modification succeeds from ACKNOWLEDGED");
    assert_eq!(modified.quantity, 150);
    assert_eq!(modified.limit_price, Some(dec!(2451.00)));
}

#[tokio::test]
async fn test_modify_filled_order_rejected() {
    let h = harness().await;

    let placed = h
        .service
        .place(limit_buy("RELIANCE", 100, dec!(2450.75)), 12345, Uuid::new_v4())
        .await
        .expect("filled placement");

    let errors = h
        .service
        .modify(
            &placed.order_id,
            tradegate::domain::trading::order::OrderModification {
                quantity: Some(150),
                ..Default::default()
            },
            12345,
            Uuid::new_v4(),
        )
        .await
        .expect_err("FILLED is not modifiable");
    assert_eq!(errors[0].code, "MODIFICATION_NOT_ALLOWED");
}

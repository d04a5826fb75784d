//! Lifecycle scheduler scenarios: expiration and reconciliation of
//! in-flight orders.

mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{harness, limit_buy, TEST_BROKER};
use tradegate::domain::repositories::OrderRepository;
use tradegate::domain::trading::order::{Order, OrderStatus, TimeInForce};

/// An order the broker is working: ACKNOWLEDGED with broker identifiers.
fn acknowledged_order(
    request: tradegate::domain::trading::order::OrderRequest,
    user_id: i64,
    created_at: chrono::DateTime<Utc>,
) -> Order {
    let mut order = Order::from_request(&request, user_id, created_at);
    order.transition(OrderStatus::Validated, created_at).unwrap();
    order.transition(OrderStatus::Submitted, created_at).unwrap();
    order.transition(OrderStatus::Acknowledged, created_at).unwrap();
    order.broker_order_id = Some(format!("B-{}", order.order_id));
    order.broker_name = Some(TEST_BROKER.to_string());
    order
}

#[tokio::test]
async fn test_gtd_orders_past_expiry_are_expired_with_broker_cancel() {
    let h = harness().await;
    let now = Utc::now();

    let mut request = limit_buy("RELIANCE", 100, dec!(2450.75));
    request.time_in_force = TimeInForce::Gtd;
    request.expiry_date = Some(now - Duration::minutes(10));
    let order = acknowledged_order(request, 12345, now - Duration::days(3));
    h.orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

    let expired = h.scheduler.expire_orders_once().await;
    assert_eq!(expired, 1);

    let reloaded = h
        .orders
        .find_by_order_id(&order.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::Expired);

    // Best-effort broker cancel went out, and the expiry was published.
    assert_eq!(h.broker.cancels.lock().unwrap().len(), 1);
    assert_eq!(h.events.event_count(), 1);
}

#[tokio::test]
async fn test_day_orders_from_previous_session_expire() {
    let h = harness().await;
    let yesterday = Utc::now() - Duration::days(1);

    let order = acknowledged_order(limit_buy("RELIANCE", 100, dec!(2450.75)), 7, yesterday);
    h.orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

    assert_eq!(h.scheduler.expire_orders_once().await, 1);
    let reloaded = h
        .orders
        .find_by_order_id(&order.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::Expired);
}

#[tokio::test]
async fn test_gtc_orders_never_expire() {
    let h = harness().await;
    let last_week = Utc::now() - Duration::days(7);

    let mut request = limit_buy("RELIANCE", 100, dec!(2450.75));
    request.time_in_force = TimeInForce::Gtc;
    let order = acknowledged_order(request, 7, last_week);
    h.orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

    assert_eq!(h.scheduler.expire_orders_once().await, 0);
}

#[tokio::test]
async fn test_unacknowledged_submitted_order_is_rejected_on_reconcile() {
    let h = harness().await;
    let now = Utc::now();

    let mut order = Order::from_request(&limit_buy("RELIANCE", 100, dec!(2450.75)), 9, now);
    order.transition(OrderStatus::Validated, now).unwrap();
    order.transition(OrderStatus::Submitted, now).unwrap();
    order.broker_name = Some(TEST_BROKER.to_string());
    // No broker_order_id: the broker never acknowledged.
    h.orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

    assert_eq!(h.scheduler.reconcile_inflight_once().await, 1);
    let reloaded = h
        .orders
        .find_by_order_id(&order.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::Rejected);
    assert!(
        reloaded
            .rejection_reason
            .as_deref()
            .unwrap()
            .contains("no broker acknowledgement")
    );
}

#[tokio::test]
async fn test_reconcile_applies_broker_reported_cancellation() {
    let h = harness().await;
    let order = acknowledged_order(
        limit_buy("RELIANCE", 100, dec!(2450.75)),
        11,
        Utc::now() - Duration::minutes(5),
    );
    h.orders.insert_order(&order, Uuid::new_v4()).await.unwrap();

    h.broker
        .push_status_response(Ok(tradegate::domain::ports::BrokerOrderResponse {
            broker_order_id: order.broker_order_id.clone().unwrap(),
            status: tradegate::domain::ports::BrokerOrderStatus::Cancelled,
            filled_quantity: 0,
            average_price: None,
            broker_fill_id: None,
            reason: None,
        }));

    assert_eq!(h.scheduler.reconcile_inflight_once().await, 1);
    let reloaded = h
        .orders
        .find_by_order_id(&order.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, OrderStatus::Cancelled);
}

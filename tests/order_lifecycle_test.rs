//! End-to-end order lifecycle against the sea-orm store on SQLite.
//!
//! Covers pricing at checkout, payment request, verification (confirmed,
//! rejected, unreachable gateway), idempotent re-verification and the
//! conditional updates that keep racing writers consistent.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{shipping_info, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use storefront_api::{
    errors::{GatewayError, ServiceError},
    models::{DiscountType, FulfillmentStatus, LineItem, NewOrder, OrderPatch, PaymentStatus},
    repositories::{OrderRepository, OrderStore},
    services::orders::{CheckoutRequest, PaymentFailure},
    services::payment_gateway::PaymentAuthority,
};

fn cart(price: Decimal, quantity: u32) -> Vec<LineItem> {
    vec![LineItem {
        product_id: "p-1".to_string(),
        name: "Saffron 5g".to_string(),
        price,
        quantity,
        image: None,
    }]
}

fn checkout(stated: Decimal, coupon: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        shipping_info: shipping_info(),
        line_items: cart(dec!(100000), 2),
        stated_amount: stated,
        coupon_code: coupon.map(str::to_string),
    }
}

#[tokio::test]
async fn checkout_without_coupon_prices_on_the_server() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;

    let order = orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    assert_eq!(order.subtotal, dec!(200000));
    assert_eq!(order.shipping_cost, dec!(50000));
    assert_eq!(order.discount_amount(), dec!(0));
    assert_eq!(order.amount, dec!(250000));
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.fulfillment_status, FulfillmentStatus::Processing);
    assert_eq!(order.version, 1);

    let reloaded = orders.get_by_public_id(&order.public_id).await.unwrap();
    assert_eq!(reloaded.id, order.id);
    assert_eq!(reloaded.amount, dec!(250000));
    assert_eq!(reloaded.line_items, order.line_items);
    assert_eq!(reloaded.shipping_info, shipping_info());
    let by_id = orders.get_by_internal_id(order.id).await.unwrap();
    assert_eq!(by_id.public_id, order.public_id);
}

#[tokio::test]
async fn tampered_amount_is_rejected_and_nothing_is_stored() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;

    let result = orders
        .create_order(checkout(dec!(249000), None), None)
        .await;
    assert_matches!(result, Err(ServiceError::AmountMismatch { .. }));
}

#[tokio::test]
async fn percent_coupon_is_snapshotted_into_the_order() {
    let app = TestApp::new().await;
    app.seed_discount("save20", DiscountType::Percent, dec!(20), None)
        .await;

    let order = app
        .state
        .services
        .orders
        .create_order(checkout(dec!(210000), Some("SAVE20")), None)
        .await
        .unwrap();
    assert_eq!(order.discount_amount(), dec!(40000));
    assert_eq!(order.amount, dec!(210000));
    assert_eq!(order.discount.as_ref().unwrap().code, "SAVE20");
}

#[tokio::test]
async fn expired_coupon_prices_the_cart_without_discount() {
    let app = TestApp::new().await;
    app.seed_discount(
        "OLD10",
        DiscountType::Fixed,
        dec!(10000),
        Some(Utc::now() - Duration::days(1)),
    )
    .await;

    let order = app
        .state
        .services
        .orders
        .create_order(checkout(dec!(250000), Some("old10")), None)
        .await
        .unwrap();
    assert!(order.discount.is_none());
    assert_eq!(order.amount, dec!(250000));
}

#[tokio::test]
async fn confirmed_payment_is_settled_once() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;

    let order = orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    let redirect = orders.request_payment(&order.public_id).await.unwrap();
    assert!(redirect.redirect_url.ends_with(&redirect.authority));

    let requests = app.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, dec!(250000));
    assert_eq!(
        requests[0].2,
        format!(
            "https://shop.test/api/v1/payments/callback?orderId={}",
            order.public_id
        )
    );

    app.gateway.confirm_next("201");
    let first = orders
        .verify_payment(&order.public_id, &redirect.authority)
        .await
        .unwrap();
    assert!(first.is_success());
    assert_eq!(first.order.payment_status, PaymentStatus::Paid);
    assert_eq!(first.order.payment_ref_id.as_deref(), Some("201"));

    // Nothing queued: a second gateway call would be a rejection
    let second = orders
        .verify_payment(&order.public_id, &redirect.authority)
        .await
        .unwrap();
    assert!(second.is_success());
    assert_eq!(second.order.payment_ref_id.as_deref(), Some("201"));
    assert_eq!(app.gateway.verifications().len(), 1);
    assert_eq!(
        app.gateway.verifications()[0],
        (dec!(250000), redirect.authority.clone())
    );
}

#[tokio::test]
async fn gateway_non_confirmation_fails_the_order() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;

    let order = orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    let redirect = orders.request_payment(&order.public_id).await.unwrap();

    let result = orders
        .verify_payment(&order.public_id, &redirect.authority)
        .await
        .unwrap();
    assert!(!result.is_success());
    assert_eq!(result.order.payment_status, PaymentStatus::Failed);
    assert_eq!(result.order.payment_ref_id, None);
    assert_matches!(
        result.failure,
        Some(PaymentFailure::Rejected { code: Some(-51), .. })
    );
}

#[tokio::test]
async fn unreachable_gateway_fails_closed() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;

    let order = orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    let redirect = orders.request_payment(&order.public_id).await.unwrap();
    app.gateway.push_verification(Err(GatewayError::Timeout));

    let result = orders
        .verify_payment(&order.public_id, &redirect.authority)
        .await
        .unwrap();
    assert_eq!(result.order.payment_status, PaymentStatus::Failed);
    assert_matches!(result.failure, Some(PaymentFailure::Unavailable(_)));
}

#[tokio::test]
async fn forged_authority_leaves_the_order_untouched() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;

    let order = orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    orders.request_payment(&order.public_id).await.unwrap();
    let before = orders.get_by_public_id(&order.public_id).await.unwrap();

    let result = orders
        .verify_payment(&order.public_id, "A-FORGED")
        .await;
    assert_matches!(result, Err(ServiceError::AuthorityMismatch(_)));

    let after = orders.get_by_public_id(&order.public_id).await.unwrap();
    assert_eq!(after, before);
    assert!(app.gateway.verifications().is_empty());
}

#[tokio::test]
async fn failed_payment_request_keeps_the_previous_authority() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;

    let order = orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    app.gateway.push_authority(Ok(PaymentAuthority {
        authority: "A-FIRST".to_string(),
    }));
    orders.request_payment(&order.public_id).await.unwrap();

    app.gateway
        .push_authority(Err(GatewayError::Transport("connection reset".to_string())));
    let retry = orders.request_payment(&order.public_id).await;
    assert_matches!(retry, Err(ServiceError::GatewayUnavailable(_)));

    let stored = orders.get_by_public_id(&order.public_id).await.unwrap();
    assert_eq!(stored.payment_authority.as_deref(), Some("A-FIRST"));
}

#[tokio::test]
async fn new_payment_attempt_replaces_the_authority() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;

    let order = orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    let first = orders.request_payment(&order.public_id).await.unwrap();
    let second = orders.request_payment(&order.public_id).await.unwrap();
    assert_ne!(first.authority, second.authority);

    let stale = orders
        .verify_payment(&order.public_id, &first.authority)
        .await;
    assert_matches!(stale, Err(ServiceError::AuthorityMismatch(_)));
}

#[tokio::test]
async fn conditional_update_refuses_a_stale_transition() {
    let app = TestApp::new().await;
    let store = OrderRepository::new(app.state.db.clone());

    let order = app
        .state
        .services
        .orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    store
        .update(order.id, OrderPatch::attach_authority("A-1"))
        .await
        .unwrap();
    let paid = store
        .update(order.id, OrderPatch::mark_paid("A-1", "R-1"))
        .await
        .unwrap();
    assert_eq!(paid.version, 3);

    let late_failure = store
        .update(order.id, OrderPatch::mark_failed("A-1"))
        .await;
    assert_matches!(late_failure, Err(ServiceError::ConcurrentModification(id)) if id == order.id);

    let stored = store.find_by_internal_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.payment_ref_id.as_deref(), Some("R-1"));
}

#[tokio::test]
async fn store_rejects_duplicate_public_ids() {
    let app = TestApp::new().await;
    let store = OrderRepository::new(app.state.db.clone());
    let new_order = NewOrder {
        owner_id: None,
        shipping_info: shipping_info(),
        line_items: cart(dec!(1000), 1),
        subtotal: dec!(1000),
        shipping_cost: dec!(50000),
        discount: None,
        amount: dec!(51000),
    };

    store.create("HP-1", &new_order).await.unwrap();
    let again = store.create("HP-1", &new_order).await;
    assert_matches!(again, Err(ServiceError::DuplicateId(id)) if id == "HP-1");
}

#[tokio::test]
async fn fulfillment_changes_do_not_touch_payment() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;
    let admin = storefront_api::auth::Identity {
        user_id: "admin-1".to_string(),
        display_name: "ops".to_string(),
        roles: vec!["admin".to_string()],
    };

    let order = orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();
    let shipped = orders
        .update_fulfillment(order.id, FulfillmentStatus::Shipped, &admin)
        .await
        .unwrap();
    assert_eq!(shipped.fulfillment_status, FulfillmentStatus::Shipped);
    assert_eq!(shipped.payment_status, PaymentStatus::Pending);
    assert_eq!(shipped.version, 2);

    let missing = orders
        .update_fulfillment(uuid::Uuid::new_v4(), FulfillmentStatus::Delivered, &admin)
        .await;
    assert_matches!(missing, Err(ServiceError::OrderNotFound(_)));
}

#[tokio::test]
async fn owner_history_is_newest_first() {
    let app = TestApp::new().await;
    let orders = &app.state.services.orders;
    let alice = storefront_api::auth::Identity {
        user_id: "u-alice".to_string(),
        display_name: "alice".to_string(),
        roles: vec![],
    };

    let first = orders
        .create_order(checkout(dec!(250000), None), Some(&alice))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = orders
        .create_order(checkout(dec!(250000), None), Some(&alice))
        .await
        .unwrap();
    orders
        .create_order(checkout(dec!(250000), None), None)
        .await
        .unwrap();

    let mine = orders.list_for_owner(&alice).await.unwrap();
    let ids: Vec<_> = mine.iter().map(|o| o.public_id.clone()).collect();
    assert_eq!(ids, vec![second.public_id, first.public_id]);
}

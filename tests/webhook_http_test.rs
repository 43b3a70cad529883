//! End-to-end webhook delivery through the router: raw bodies, signature
//! headers, and the status codes providers key their retry logic on.
mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use common::{MockPaymentProvider, RecordingNotifier, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use storefront_api::{
    app_router,
    config::{AppConfig, HostedCheckoutConfig, PaymentConfig},
    entities::order,
    handlers::AppServices,
    services::{
        checkout::{CheckoutOutcome, CheckoutRequest},
        payments::{
            hosted_checkout::{
                signature_header, HostedCheckoutProvider, EVENT_SESSION_COMPLETED,
                SIGNATURE_HEADER,
            },
            PaymentGateway, PaymentProvider,
        },
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

const WEBHOOK_SECRET: &str = "whsec_test_0123456789abcdef";

fn hosted_config() -> HostedCheckoutConfig {
    HostedCheckoutConfig {
        secret_key: "sk_test_123".to_string(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
        base_url: "https://checkout.test".to_string(),
        webhook_tolerance_secs: 300,
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        environment: "test".into(),
        log_level: "warn".into(),
        log_json: false,
        db_max_connections: 1,
        db_min_connections: 1,
        auto_schema: true,
        shipping_price: dec!(50),
        refund_window_days: 14,
        cors_allowed_origins: None,
        payment: PaymentConfig::default(),
    }
}

/// Router wired with the mock "paymob" provider plus a real hosted-checkout
/// provider so signatures are verified for real.
async fn spawn_router() -> (TestApp, Router) {
    let app = TestApp::spawn().await;

    let provider = Arc::new(MockPaymentProvider::new());
    let hosted = Arc::new(HostedCheckoutProvider::new(&hosted_config(), "EGP"));
    let providers: Vec<Arc<dyn PaymentProvider>> = vec![provider, hosted];
    let gateway = Arc::new(PaymentGateway::new(providers, "paymob").unwrap());

    let services = AppServices::new(
        app.db.clone(),
        &test_config(),
        gateway,
        Arc::new(RecordingNotifier::default()),
        None,
    );

    let state = AppState {
        db: app.db.clone(),
        config: Arc::new(test_config()),
        services,
    };
    let router = app_router(state);
    (app, router)
}

async fn place_online_order(app: &TestApp, user_id: Uuid) -> Uuid {
    match app
        .services
        .checkout
        .place_order(
            user_id,
            CheckoutRequest {
                shipping_address: "9 Zamalek St".to_string(),
                payment_method: "online".to_string(),
                coupon_code: None,
                phone: "01234567890".to_string(),
            },
        )
        .await
        .unwrap()
    {
        CheckoutOutcome::Redirect { order_id, .. } => order_id,
        other => panic!("expected redirect, got {other:?}"),
    }
}

fn hosted_event_body(order_id: Uuid) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": EVENT_SESSION_COMPLETED,
        "data": {
            "session_id": "cs_test_1",
            "transaction_id": "ch_test_1",
            "metadata": { "order_id": order_id.to_string() }
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn signed_hosted_checkout_event_marks_the_order_paid() {
    let (app, router) = spawn_router().await;
    let user = app.seed_user("hosted@example.com").await;
    let p = app.seed_product("Sofa", dec!(900), dec!(0), 2).await;
    app.seed_cart(user.id, &[(p.id, 1)]).await;
    let order_id = place_online_order(&app, user.id).await;

    let body = hosted_event_body(order_id);
    let header = signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), &body);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payments/checkout/webhook")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, header)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order_status, "paid");
    assert_eq!(stored.transaction_id.as_deref(), Some("ch_test_1"));
}

#[tokio::test]
async fn tampered_signature_is_rejected_before_any_effect() {
    let (app, router) = spawn_router().await;
    let user = app.seed_user("tamper@example.com").await;
    let p = app.seed_product("Table", dec!(400), dec!(0), 2).await;
    app.seed_cart(user.id, &[(p.id, 1)]).await;
    let order_id = place_online_order(&app, user.id).await;

    let body = hosted_event_body(order_id);
    let header = signature_header("whsec_wrong_secret_value", Utc::now().timestamp(), &body);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payments/checkout/webhook")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, header)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order_status, "waiting");
}

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let (app, router) = spawn_router().await;
    let user = app.seed_user("stale@example.com").await;
    let p = app.seed_product("Frame", dec!(35), dec!(0), 9).await;
    app.seed_cart(user.id, &[(p.id, 1)]).await;
    let order_id = place_online_order(&app, user.id).await;

    let body = hosted_event_body(order_id);
    let old = Utc::now().timestamp() - 3600;
    let header = signature_header(WEBHOOK_SECRET, old, &body);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payments/checkout/webhook")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, header)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_order_in_a_valid_event_is_404() {
    let (_app, router) = spawn_router().await;

    let body = hosted_event_body(Uuid::new_v4());
    let header = signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), &body);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payments/checkout/webhook")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, header)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unrecognized_paymob_body_is_acknowledged_without_effects() {
    let (app, router) = spawn_router().await;
    let user = app.seed_user("garbled@example.com").await;
    let p = app.seed_product("Desk", dec!(120), dec!(0), 4).await;
    app.seed_cart(user.id, &[(p.id, 1)]).await;
    let order_id = place_online_order(&app, user.id).await;

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payments/paymob/webhook")
                .header("content-type", "application/json")
                .body(Body::from("not json at all"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = order::Entity::find_by_id(order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order_status, "waiting");
}

#[tokio::test]
async fn missing_auth_header_on_the_api_is_401() {
    let (_app, router) = spawn_router().await;

    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/orders")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_probe_answers() {
    let (_app, router) = spawn_router().await;

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

mod common;

use common::TestApp;
use sea_orm::EntityTrait;
use storefront_api::{
    entities::order,
    errors::ServiceError,
    services::{cancellation::CancellationOutcome, payments::RefundOutcome},
};
use uuid::Uuid;

#[tokio::test]
async fn cash_order_cancels_without_touching_the_provider() {
    let app = TestApp::spawn().await;
    let user = app.seed_user("cash-cancel@example.com").await;
    let seeded = app.seed_order(user.id, "cash", "waiting", None, 5).await;

    let outcome = app
        .services
        .cancellation
        .cancel_order(seeded.id, user.id)
        .await
        .unwrap();
    assert_eq!(outcome, CancellationOutcome::Cancelled);

    let stored = order::Entity::find_by_id(seeded.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order_status, "cancelled");
    assert_eq!(stored.shipping_status, "cancelled");
    assert!(app.provider.refund_calls().is_empty());
}

#[tokio::test]
async fn paid_online_order_refunds_the_full_amount() {
    let app = TestApp::spawn().await;
    let user = app.seed_user("refund@example.com").await;
    let seeded = app
        .seed_order(user.id, "online", "paid", Some("txn-42"), 14)
        .await;

    let outcome = app
        .services
        .cancellation
        .cancel_order(seeded.id, user.id)
        .await
        .unwrap();
    assert_eq!(outcome, CancellationOutcome::CancelledAndRefunded);

    // total_price 250.00 -> 25000 minor units
    assert_eq!(app.provider.refund_calls(), vec![("txn-42".to_string(), 25000)]);

    let stored = order::Entity::find_by_id(seeded.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order_status, "cancelled");
}

#[tokio::test]
async fn window_expires_after_fourteen_days() {
    let app = TestApp::spawn().await;
    let user = app.seed_user("late@example.com").await;
    let seeded = app
        .seed_order(user.id, "online", "paid", Some("txn-late"), 15)
        .await;

    let err = app
        .services
        .cancellation
        .cancel_order(seeded.id, user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::RefundWindowExpired(14)));
    assert!(app.provider.refund_calls().is_empty());

    let stored = order::Entity::find_by_id(seeded.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order_status, "paid");
}

#[tokio::test]
async fn failed_refund_aborts_and_leaves_the_order_untouched() {
    let app = TestApp::spawn().await;
    let user = app.seed_user("refund-fail@example.com").await;
    let seeded = app
        .seed_order(user.id, "online", "paid", Some("txn-stuck"), 2)
        .await;

    app.provider.script_refund(RefundOutcome {
        success: false,
        provider_error: Some("insufficient provider balance".to_string()),
    });

    let err = app
        .services
        .cancellation
        .cancel_order(seeded.id, user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));

    let stored = order::Entity::find_by_id(seeded.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.order_status, "paid");
    assert_eq!(stored.shipping_status, "pending");
}

#[tokio::test]
async fn unpaid_online_order_cancels_without_a_refund() {
    let app = TestApp::spawn().await;
    let user = app.seed_user("never-paid@example.com").await;
    let seeded = app.seed_order(user.id, "online", "waiting", None, 1).await;

    let outcome = app
        .services
        .cancellation
        .cancel_order(seeded.id, user.id)
        .await
        .unwrap();
    assert_eq!(outcome, CancellationOutcome::Cancelled);
    assert!(app.provider.refund_calls().is_empty());
}

#[tokio::test]
async fn someone_elses_order_reads_as_not_found() {
    let app = TestApp::spawn().await;
    let owner = app.seed_user("owner@example.com").await;
    let stranger = app.seed_user("stranger@example.com").await;
    let seeded = app.seed_order(owner.id, "cash", "waiting", None, 0).await;

    let err = app
        .services
        .cancellation
        .cancel_order(seeded.id, stranger.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn cancelling_twice_conflicts() {
    let app = TestApp::spawn().await;
    let user = app.seed_user("twice@example.com").await;
    let seeded = app.seed_order(user.id, "cash", "waiting", None, 0).await;

    app.services
        .cancellation
        .cancel_order(seeded.id, user.id)
        .await
        .unwrap();
    let err = app
        .services
        .cancellation
        .cancel_order(seeded.id, user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let app = TestApp::spawn().await;
    let user = app.seed_user("ghost@example.com").await;

    let err = app
        .services
        .cancellation
        .cancel_order(Uuid::new_v4(), user.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

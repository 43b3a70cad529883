//! Shared harness for the integration tests: an in-memory SQLite database
//! with the full schema, the service container wired to a scriptable payment
//! provider, and seed helpers for users, products, carts and coupons.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

use storefront_api::{
    config::{AppConfig, PaymentConfig},
    db::ensure_schema,
    entities::{cart, cart_item, coupon, order, product, user},
    errors::ServiceError,
    handlers::AppServices,
    notifications::{NotificationError, NotificationSender, OrderConfirmation},
    services::payments::{
        BillingInfo, PaymentConfirmation, PaymentGateway, PaymentInitiation, PaymentLineItem,
        PaymentProvider, RefundOutcome,
    },
};

/// Provider double registered under the active provider name. Initiation
/// always redirects to a fixed URL; refunds are scripted per test and
/// recorded for assertions.
pub struct MockPaymentProvider {
    pub refund_result: Mutex<RefundOutcome>,
    pub refund_calls: Mutex<Vec<(String, i64)>>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self {
            refund_result: Mutex::new(RefundOutcome {
                success: true,
                provider_error: None,
            }),
            refund_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script_refund(&self, outcome: RefundOutcome) {
        *self.refund_result.lock().unwrap() = outcome;
    }

    pub fn refund_calls(&self) -> Vec<(String, i64)> {
        self.refund_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    fn name(&self) -> &'static str {
        "paymob"
    }

    async fn initiate(
        &self,
        order: &order::Model,
        _lines: &[PaymentLineItem],
        _billing: &BillingInfo,
    ) -> Result<PaymentInitiation, ServiceError> {
        Ok(PaymentInitiation::Redirect {
            url: format!("https://pay.test/redirect/{}", order.id),
        })
    }

    fn verify_and_extract(
        &self,
        body: &[u8],
        _headers: &axum::http::HeaderMap,
    ) -> Result<PaymentConfirmation, ServiceError> {
        serde_json::from_slice(body)
            .map_err(|e| ServiceError::MalformedEvent(format!("bad test payload: {e}")))
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount_minor: i64,
    ) -> Result<RefundOutcome, ServiceError> {
        self.refund_calls
            .lock()
            .unwrap()
            .push((transaction_id.to_string(), amount_minor));
        Ok(self.refund_result.lock().unwrap().clone())
    }
}

/// Captures confirmations instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<OrderConfirmation>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<OrderConfirmation> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(confirmation);
        Ok(())
    }
}

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub provider: Arc<MockPaymentProvider>,
    pub notifier: Arc<RecordingNotifier>,
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

impl TestApp {
    pub async fn spawn() -> Self {
        // One connection so every statement sees the same in-memory database.
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1).min_connections(1);
        let db = Arc::new(
            Database::connect(opts)
                .await
                .expect("connect to in-memory sqlite"),
        );
        ensure_schema(&db).await.expect("create schema");

        let provider = Arc::new(MockPaymentProvider::new());
        let providers: Vec<Arc<dyn PaymentProvider>> = vec![provider.clone()];
        let gateway = Arc::new(PaymentGateway::new(providers, "paymob").expect("gateway"));
        let notifier = Arc::new(RecordingNotifier::default());

        let services = AppServices::new(
            db.clone(),
            &test_config(),
            gateway,
            notifier.clone(),
            None,
        );

        Self {
            db,
            services,
            provider,
            notifier,
        }
    }

    pub async fn seed_user(&self, email: &str) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            name: Set("Test User".to_string()),
            phone: Set(Some("01012345678".to_string())),
            addresses: Set(serde_json::json!([])),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("insert user")
    }

    pub async fn seed_product(&self, title: &str, price: Decimal, discount: Decimal, stock: i32) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            price: Set(price),
            discount: Set(discount),
            stock: Set(stock),
            order_count: Set(0),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("insert product")
    }

    /// Finds or creates the user's cart (one per user) and adds the items.
    pub async fn seed_cart(&self, user_id: Uuid, items: &[(Uuid, i32)]) -> cart::Model {
        let existing = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .expect("query cart");
        let cart = match existing {
            Some(cart) => cart,
            None => cart::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                ..Default::default()
            }
            .insert(&*self.db)
            .await
            .expect("insert cart"),
        };

        for (product_id, quantity) in items {
            cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(*product_id),
                quantity: Set(*quantity),
                ..Default::default()
            }
            .insert(&*self.db)
            .await
            .expect("insert cart item");
        }

        cart
    }

    pub async fn seed_coupon(&self, code: &str, percentage: Decimal) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            percentage: Set(percentage),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("insert coupon")
    }

    /// Inserts an order directly, bypassing checkout, with full control over
    /// status fields and creation time. Used by cancellation-window tests.
    pub async fn seed_order(
        &self,
        user_id: Uuid,
        payment_method: &str,
        order_status: &str,
        transaction_id: Option<&str>,
        created_days_ago: i64,
    ) -> order::Model {
        let created = Utc::now() - chrono::Duration::days(created_days_ago);
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            shipping_address: Set("12 Nile St".to_string()),
            phone: Set("01012345678".to_string()),
            payment_method: Set(payment_method.to_string()),
            coupon_code: Set(None),
            shipping_price: Set(dec!(50)),
            total_price_before_discount: Set(dec!(250)),
            total_price_after_discount: Set(dec!(200)),
            total_price: Set(dec!(250)),
            order_status: Set(order_status.to_string()),
            shipping_status: Set("pending".to_string()),
            transaction_id: Set(transaction_id.map(|s| s.to_string())),
            created_at: Set(created),
            updated_at: Set(Some(created)),
        }
        .insert(&*self.db)
        .await
        .expect("insert order")
    }
}

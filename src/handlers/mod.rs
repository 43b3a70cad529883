pub mod orders;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    notifications::NotificationSender,
    services::{
        cancellation::CancellationService, checkout::CheckoutService, orders::OrderService,
        payments::PaymentGateway, reconciliation::ReconciliationService,
    },
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

/// The service container handed to every handler through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub cancellation: Arc<CancellationService>,
    pub gateway: Arc<PaymentGateway>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        gateway: Arc<PaymentGateway>,
        notifier: Arc<dyn NotificationSender>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let orders = Arc::new(OrderService::new(db.clone(), event_sender.clone()));
        let reconciliation = Arc::new(ReconciliationService::new(
            db.clone(),
            notifier,
            event_sender.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            orders.clone(),
            reconciliation.clone(),
            gateway.clone(),
            event_sender.clone(),
            config.shipping_price,
        ));
        let cancellation = Arc::new(CancellationService::new(
            db,
            orders.clone(),
            gateway.clone(),
            event_sender,
            config.refund_window_days,
        ));

        Self {
            orders,
            checkout,
            reconciliation,
            cancellation,
            gateway,
        }
    }
}

/// Identity of the calling user, taken from the `X-User-Id` header the
/// upstream auth proxy injects. Absent or malformed means unauthenticated.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("Missing X-User-Id header".to_string()))?;

        let user_id = Uuid::parse_str(header)
            .map_err(|_| ServiceError::Unauthorized("Invalid X-User-Id header".to_string()))?;

        Ok(AuthenticatedUser { user_id })
    }
}

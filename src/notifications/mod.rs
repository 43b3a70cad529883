use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Order-confirmation payload: the frozen item snapshots and final total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub email: String,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<ConfirmationItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationItem {
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound notification boundary. Delivery is fire-and-log for callers:
/// reconciliation never fails an order because an email bounced.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError>;
}

/// Structured-log sender, the default wiring. A real mail integration
/// implements the same trait behind configuration.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        info!(
            order_id = %confirmation.order_id,
            email = %confirmation.email,
            total = %confirmation.total_price,
            items = confirmation.items.len(),
            "order confirmation sent"
        );
        Ok(())
    }
}

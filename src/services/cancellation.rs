use crate::{
    entities::order::{self, OrderStatus, PaymentMethod},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        orders::OrderService,
        payments::{PaymentGateway, to_minor_units},
    },
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How the cancellation was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationOutcome {
    /// Cash order, or an online order that never reached the provider.
    Cancelled,
    /// Online order whose captured payment was refunded at the provider.
    CancelledAndRefunded,
}

#[derive(Clone)]
pub struct CancellationService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    gateway: Arc<PaymentGateway>,
    event_sender: Option<Arc<EventSender>>,
    refund_window_days: i64,
}

impl CancellationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        gateway: Arc<PaymentGateway>,
        event_sender: Option<Arc<EventSender>>,
        refund_window_days: i64,
    ) -> Self {
        Self {
            db,
            orders,
            gateway,
            event_sender,
            refund_window_days,
        }
    }

    /// Cancels an order on behalf of its owner, refunding a captured online
    /// payment first. The refund at the provider must succeed before any
    /// local state changes; a failed refund leaves the order untouched.
    #[instrument(skip(self), fields(order_id = %order_id, user_id = %user_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<CancellationOutcome, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.order_status == OrderStatus::Cancelled.as_str() {
            return Err(ServiceError::Conflict(
                "Order is already cancelled".to_string(),
            ));
        }

        let age_days = (Utc::now() - order.created_at).num_days();
        if age_days > self.refund_window_days {
            return Err(ServiceError::RefundWindowExpired(self.refund_window_days));
        }

        let refunded_transaction = self.refund_if_captured(&order).await?;
        let order = self.orders.mark_cancelled(order).await?;

        if let Some(transaction_id) = refunded_transaction {
            if let Some(event_sender) = &self.event_sender {
                event_sender
                    .send(Event::PaymentRefunded {
                        order_id: order.id,
                        transaction_id,
                    })
                    .await;
            }
            info!(order_id = %order.id, "Order cancelled and payment refunded");
            Ok(CancellationOutcome::CancelledAndRefunded)
        } else {
            info!(order_id = %order.id, "Order cancelled");
            Ok(CancellationOutcome::Cancelled)
        }
    }

    /// Issues a provider refund when the order actually carries a captured
    /// transaction. Online orders that were never paid (no transaction id)
    /// cancel without touching the provider. Returns the refunded transaction
    /// id when a refund happened.
    async fn refund_if_captured(
        &self,
        order: &order::Model,
    ) -> Result<Option<String>, ServiceError> {
        if order.payment_method != PaymentMethod::Online.as_str() {
            return Ok(None);
        }

        let transaction_id = match &order.transaction_id {
            Some(id) => id.clone(),
            None => {
                warn!(
                    order_id = %order.id,
                    "Online order has no transaction id, cancelling without refund"
                );
                return Ok(None);
            }
        };

        let amount_minor = to_minor_units(order.total_price)?;
        let provider = self.gateway.active();
        let outcome = provider.refund(&transaction_id, amount_minor).await?;

        if !outcome.success {
            return Err(ServiceError::ExternalServiceError(format!(
                "Refund rejected by {}: {}",
                provider.name(),
                outcome
                    .provider_error
                    .as_deref()
                    .unwrap_or("no reason given")
            )));
        }

        Ok(Some(transaction_id))
    }
}

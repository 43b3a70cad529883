//! Applies the effects of a confirmed payment exactly once.
//!
//! Providers deliver confirmations at least once, sometimes concurrently.
//! The single authoritative de-duplication point is a conditional update that
//! flips `order_status` from waiting to paid; everything downstream (coupon
//! redemption, stock decrement, cart clearing, notification) runs only for
//! the delivery that won that flip.

use crate::{
    entities::{
        cart, cart_item, coupon, coupon_redemption,
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        product,
        user::Entity as UserEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{ConfirmationItem, NotificationSender, OrderConfirmation},
    services::payments::PaymentConfirmation,
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What a delivery amounted to. Duplicates and failure events acknowledge
/// without effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// First confirmation for this order; effects were applied.
    Applied,
    /// The order was already paid; nothing was reapplied.
    AlreadyPaid,
    /// Unsuccessful or irrelevant event; acknowledged with no effects.
    Ignored,
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn NotificationSender>,
    event_sender: Option<Arc<EventSender>>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        notifier: Arc<dyn NotificationSender>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            notifier,
            event_sender,
        }
    }

    /// Reconciles one provider confirmation into order state.
    #[instrument(skip(self, confirmation), fields(order_id = %confirmation.local_order_id))]
    pub async fn apply_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        if !confirmation.success {
            info!("Unsuccessful payment event acknowledged without effects");
            return Ok(ReconciliationOutcome::Ignored);
        }

        let order = OrderEntity::find_by_id(confirmation.local_order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        // Idempotency gate: a single conditional update, not read-then-write.
        // Concurrent deliveries race on this statement and exactly one wins.
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Paid.as_str()),
            )
            .col_expr(
                order::Column::TransactionId,
                Expr::value(confirmation.external_transaction_id.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(confirmation.local_order_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Waiting.as_str()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return match OrderStatus::parse(&order.order_status) {
                Some(OrderStatus::Paid) => {
                    info!("Duplicate confirmation for paid order; acknowledged");
                    Ok(ReconciliationOutcome::AlreadyPaid)
                }
                _ => {
                    warn!(
                        status = %order.order_status,
                        "Confirmation for non-waiting order ignored"
                    );
                    Ok(ReconciliationOutcome::Ignored)
                }
            };
        }

        if let Some(event_sender) = &self.event_sender {
            event_sender
                .send(Event::OrderPaid {
                    order_id: order.id,
                    transaction_id: confirmation.external_transaction_id.clone(),
                })
                .await;
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        // The status flip is committed; everything below is downstream and
        // must not run again on a redelivery.
        self.apply_order_effects(&order, &items).await?;

        Ok(ReconciliationOutcome::Applied)
    }

    /// The payment side effects shared by both confirmation paths: webhook
    /// reconciliation for online orders and synchronous application for cash
    /// orders at checkout. Keeping one routine stops the two paths from
    /// diverging.
    #[instrument(skip(self, order, items), fields(order_id = %order.id))]
    pub async fn apply_order_effects(
        &self,
        order: &OrderModel,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        if let Some(code) = &order.coupon_code {
            self.redeem_coupon(code, order.user_id).await?;
        }

        for item in items {
            self.decrement_stock(item.product_id, item.quantity).await?;
        }

        self.clear_cart(order.user_id).await?;
        self.send_confirmation(order, items).await;

        Ok(())
    }

    /// Appends the user to the coupon's redemption set. The unique index over
    /// (coupon_id, user_id) plus insert-ignore makes the append idempotent
    /// under concurrent confirmations.
    async fn redeem_coupon(&self, code: &str, user_id: Uuid) -> Result<(), ServiceError> {
        let coupon = match coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
        {
            Some(coupon) => coupon,
            None => {
                // The code was validated at checkout; deletion since then is
                // tolerated rather than failing a confirmed payment.
                warn!(code, "Coupon vanished before redemption; skipping");
                return Ok(());
            }
        };

        let rows = coupon_redemption::Entity::insert(coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon.id),
            user_id: Set(user_id),
            redeemed_at: Set(Utc::now()),
        })
        .on_conflict(
            OnConflict::columns([
                coupon_redemption::Column::CouponId,
                coupon_redemption::Column::UserId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(&*self.db)
        .await?;

        if rows > 0 {
            info!(code, %user_id, "Coupon redeemed");
            if let Some(event_sender) = &self.event_sender {
                event_sender
                    .send(Event::CouponRedeemed {
                        coupon_id: coupon.id,
                        user_id,
                    })
                    .await;
            }
        }

        Ok(())
    }

    /// Conditionally decrements stock and bumps the order counter in one
    /// statement, scoped to the product row. Exhausted stock skips silently:
    /// a partial-fulfillment policy, not an error.
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(
                product::Column::OrderCount,
                Expr::col(product::Column::OrderCount).add(1),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gt(0))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(%product_id, quantity, "Stock exhausted; decrement skipped");
        }

        Ok(())
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let cart = match cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        {
            Some(cart) => cart,
            None => return Ok(()),
        };

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&*self.db)
            .await?;

        if let Some(event_sender) = &self.event_sender {
            event_sender.send(Event::CartCleared(cart.id)).await;
        }

        Ok(())
    }

    /// Fire-and-log: a bounced confirmation email never fails a paid order,
    /// and is never retried through the reconciler.
    async fn send_confirmation(&self, order: &OrderModel, items: &[order_item::Model]) {
        let email = match UserEntity::find_by_id(order.user_id).one(&*self.db).await {
            Ok(Some(user)) => user.email,
            Ok(None) => {
                warn!(order_id = %order.id, "User missing; confirmation not sent");
                return;
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "User lookup failed; confirmation not sent");
                return;
            }
        };

        let titles = self.product_titles(items).await;
        let confirmation = OrderConfirmation {
            order_id: order.id,
            email,
            total_price: order.total_price,
            created_at: order.created_at,
            items: items
                .iter()
                .map(|item| ConfirmationItem {
                    title: titles
                        .get(&item.product_id)
                        .cloned()
                        .unwrap_or_else(|| item.product_id.to_string()),
                    quantity: item.quantity,
                    unit_price: item.discounted_price_at_order,
                })
                .collect(),
        };

        if let Err(e) = self.notifier.send_order_confirmation(confirmation).await {
            warn!(order_id = %order.id, error = %e, "Order confirmation delivery failed");
        }
    }

    async fn product_titles(&self, items: &[order_item::Model]) -> HashMap<Uuid, String> {
        let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        match product::Entity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await
        {
            Ok(products) => products.into_iter().map(|p| (p.id, p.title)).collect(),
            Err(e) => {
                warn!(error = %e, "Product title lookup failed");
                HashMap::new()
            }
        }
    }
}

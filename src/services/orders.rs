use crate::{
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderStatus, ShippingStatus,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::PriceBreakdown,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Everything needed to persist a new order: identity, contact, and the
/// frozen price breakdown.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub shipping_address: String,
    pub phone: String,
    pub payment_method: order::PaymentMethod,
    pub coupon_code: Option<String>,
    pub shipping_price: rust_decimal::Decimal,
    pub breakdown: PriceBreakdown,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListPage {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// The order ledger: owns order rows and their two status fields. Payment
/// confirmation flips `order_status` through the reconciler's conditional
/// update, not through this service.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Persists an order and its item snapshots in one transaction. The new
    /// order always starts as waiting/pending.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_order(&self, input: NewOrder) -> Result<OrderWithItems, ServiceError> {
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(input.user_id),
            shipping_address: Set(input.shipping_address),
            phone: Set(input.phone),
            payment_method: Set(input.payment_method.as_str().to_string()),
            coupon_code: Set(input.coupon_code),
            shipping_price: Set(input.shipping_price),
            total_price_before_discount: Set(input.breakdown.total_before_discount),
            total_price_after_discount: Set(input.breakdown.total_after_discount),
            total_price: Set(input.breakdown.total_price),
            order_status: Set(OrderStatus::Waiting.as_str().to_string()),
            shipping_status: Set(ShippingStatus::Pending.as_str().to_string()),
            transaction_id: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(input.breakdown.lines.len());
        for line in &input.breakdown.lines {
            let item = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                price_at_order: Set(line.price_at_order),
                discount_at_order: Set(line.discount_at_order),
                discounted_price_at_order: Set(line.discounted_price_at_order),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await?;

        info!(order_id = %order_id, "Order created");

        if let Some(event_sender) = &self.event_sender {
            event_sender.send(Event::OrderCreated(order_id)).await;
        }

        Ok(OrderWithItems {
            order: order_model,
            items,
        })
    }

    pub async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        let order = match OrderEntity::find_by_id(order_id).one(&*self.db).await? {
            Some(order) => order,
            None => return Ok(None),
        };
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    #[instrument(skip(self))]
    pub async fn list_orders(&self, page: u64, per_page: u64) -> Result<OrderListPage, ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderListPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListPage, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(OrderListPage {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Moves the fulfillment status. Re-setting the current value is a
    /// conflict, not a silent no-op. Setting `shipped` also forces
    /// `order_status = paid` — an existing business rule kept as-is, even
    /// though it can mark an unpaid cash order paid from a fulfillment
    /// action.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status.as_str()))]
    pub async fn update_shipping_status(
        &self,
        order_id: Uuid,
        new_status: ShippingStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let current = ShippingStatus::parse(&order.shipping_status).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "order {} has unknown shipping status '{}'",
                order_id, order.shipping_status
            ))
        })?;

        if current == new_status {
            return Err(ServiceError::Conflict(format!(
                "shipping status is already {}",
                current.as_str()
            )));
        }
        if !current.can_transition_to(new_status) {
            return Err(ServiceError::InvalidOperation(format!(
                "cannot move shipping status from {} to {}",
                current.as_str(),
                new_status.as_str()
            )));
        }

        let old_status = order.shipping_status.clone();
        let mut active: OrderActiveModel = order.into();
        active.shipping_status = Set(new_status.as_str().to_string());
        if new_status == ShippingStatus::Shipped {
            active.order_status = Set(OrderStatus::Paid.as_str().to_string());
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(&*self.db).await?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %new_status.as_str(),
            "Shipping status updated"
        );

        if let Some(event_sender) = &self.event_sender {
            event_sender
                .send(Event::ShippingStatusChanged {
                    order_id,
                    old_status,
                    new_status: new_status.as_str().to_string(),
                })
                .await;
        }

        Ok(updated)
    }

    /// Marks both status fields cancelled. Callers enforce refund policy
    /// first; this is the final, unconditional flip.
    #[instrument(skip(self), fields(order_id = %order.id))]
    pub async fn mark_cancelled(&self, order: OrderModel) -> Result<OrderModel, ServiceError> {
        let order_id = order.id;
        let mut active: OrderActiveModel = order.into();
        active.order_status = Set(OrderStatus::Cancelled.as_str().to_string());
        active.shipping_status = Set(ShippingStatus::Cancelled.as_str().to_string());
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(&*self.db).await?;

        info!(order_id = %order_id, "Order cancelled");
        if let Some(event_sender) = &self.event_sender {
            event_sender.send(Event::OrderCancelled(order_id)).await;
        }

        Ok(updated)
    }
}

use crate::{
    entities::{
        cart, cart_item, coupon, coupon_redemption,
        order::PaymentMethod,
        product,
        user::{self, Entity as UserEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        orders::{NewOrder, OrderService, OrderWithItems},
        payments::{BillingInfo, PaymentGateway, PaymentInitiation, PaymentLineItem, to_minor_units},
        pricing::{self, CartLine},
        reconciliation::ReconciliationService,
    },
};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Local mobile pattern accepted at checkout.
static PHONE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^01[0125][0-9]{8}$").expect("valid phone regex"));

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 3, message = "Shipping address must be at least 3 characters"))]
    pub shipping_address: String,

    /// "cash" or "online".
    #[validate(length(min = 1, message = "Payment method is required"))]
    pub payment_method: String,

    pub coupon_code: Option<String>,

    #[validate(regex(path = "PHONE_REGEX", message = "Phone must be a valid mobile number"))]
    pub phone: String,
}

/// Result of a checkout: a persisted cash order, or the provider handoff
/// artifact for an online payment.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CheckoutOutcome {
    Placed(Box<OrderWithItems>),
    Redirect { order_id: Uuid, url: String },
    Session { order_id: Uuid, session_id: String },
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    reconciliation: Arc<ReconciliationService>,
    gateway: Arc<PaymentGateway>,
    event_sender: Option<Arc<EventSender>>,
    shipping_price: Decimal,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        reconciliation: Arc<ReconciliationService>,
        gateway: Arc<PaymentGateway>,
        event_sender: Option<Arc<EventSender>>,
        shipping_price: Decimal,
    ) -> Self {
        Self {
            db,
            orders,
            reconciliation,
            gateway,
            event_sender,
            shipping_price,
        }
    }

    /// Turns the user's cart into a durable order. Cash orders get their
    /// payment effects applied synchronously; online orders return a provider
    /// handoff artifact and wait for the webhook.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        request.validate()?;

        let payment_method = PaymentMethod::parse(&request.payment_method).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "payment_method must be 'cash' or 'online', got '{}'",
                request.payment_method
            ))
        })?;

        let (lines, products) = self.load_cart_lines(user_id).await?;
        let coupon_pct = match &request.coupon_code {
            Some(code) => Some(self.resolve_coupon(code, user_id).await?),
            None => None,
        };

        let breakdown = pricing::price_cart(&lines, coupon_pct, self.shipping_price);

        let placed = self
            .orders
            .create_order(NewOrder {
                user_id,
                shipping_address: request.shipping_address.clone(),
                phone: request.phone.clone(),
                payment_method,
                coupon_code: request.coupon_code.clone(),
                shipping_price: self.shipping_price,
                breakdown,
            })
            .await?;

        let user = UserEntity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;
        self.remember_address(&user, &request.shipping_address)
            .await?;

        if payment_method == PaymentMethod::Cash {
            self.reconciliation
                .apply_order_effects(&placed.order, &placed.items)
                .await?;
            info!(order_id = %placed.order.id, "Cash order placed");
            return Ok(CheckoutOutcome::Placed(Box::new(placed)));
        }

        let billing = billing_info(&user, &request);
        let payment_lines = payment_lines(&placed, &products)?;

        let provider = self.gateway.active();
        let initiation = provider
            .initiate(&placed.order, &payment_lines, &billing)
            .await?;

        if let Some(event_sender) = &self.event_sender {
            event_sender
                .send(Event::PaymentInitiated {
                    order_id: placed.order.id,
                    provider: provider.name().to_string(),
                })
                .await;
        }

        Ok(match initiation {
            PaymentInitiation::Redirect { url } => CheckoutOutcome::Redirect {
                order_id: placed.order.id,
                url,
            },
            PaymentInitiation::Session { session_id } => CheckoutOutcome::Session {
                order_id: placed.order.id,
                session_id,
            },
        })
    }

    /// Resolves the cart to product snapshots. An empty cart rejects the
    /// checkout outright.
    async fn load_cart_lines(
        &self,
        user_id: Uuid,
    ) -> Result<(Vec<CartLine>, HashMap<Uuid, product::Model>), ServiceError> {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        let items = match cart {
            Some(cart) => {
                cart_item::Entity::find()
                    .filter(cart_item::Column::CartId.eq(cart.id))
                    .all(&*self.db)
                    .await?
            }
            None => Vec::new(),
        };

        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Your cart is empty".to_string(),
            ));
        }

        let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let product = products.get(&item.product_id).ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;
            lines.push(CartLine {
                product_id: product.id,
                quantity: item.quantity,
                unit_price: product.price,
                discount_pct: product.discount,
            });
        }

        Ok((lines, products))
    }

    /// Coupon lookup + single-use check. Redemption itself is appended only
    /// after payment confirmation.
    async fn resolve_coupon(&self, code: &str, user_id: Uuid) -> Result<Decimal, ServiceError> {
        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::InvalidCoupon(code.to_string()))?;

        let already_used = coupon_redemption::Entity::find()
            .filter(coupon_redemption::Column::CouponId.eq(coupon.id))
            .filter(coupon_redemption::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .is_some();

        if already_used {
            return Err(ServiceError::CouponAlreadyUsed(code.to_string()));
        }

        Ok(coupon.percentage)
    }

    /// Appends a previously unseen shipping address to the user profile.
    async fn remember_address(
        &self,
        user: &user::Model,
        address: &str,
    ) -> Result<(), ServiceError> {
        if user.has_address(address) {
            return Ok(());
        }

        let mut addresses = user
            .addresses
            .as_array()
            .cloned()
            .unwrap_or_default();
        addresses.push(serde_json::Value::String(address.to_string()));

        let mut active = user.clone().into_active_model();
        active.addresses = Set(serde_json::Value::Array(addresses));
        active.update(&*self.db).await?;

        Ok(())
    }
}

fn billing_info(user: &user::Model, request: &CheckoutRequest) -> BillingInfo {
    let (first_name, last_name) = user.name_parts();
    BillingInfo {
        email: user.email.clone(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        phone: request.phone.clone(),
        street: request.shipping_address.clone(),
        city: "Cairo".to_string(),
        country: "EG".to_string(),
    }
}

fn payment_lines(
    placed: &OrderWithItems,
    products: &HashMap<Uuid, product::Model>,
) -> Result<Vec<PaymentLineItem>, ServiceError> {
    placed
        .items
        .iter()
        .map(|item| {
            Ok(PaymentLineItem {
                name: products
                    .get(&item.product_id)
                    .map(|p| p.title.clone())
                    .unwrap_or_else(|| item.product_id.to_string()),
                amount_cents: to_minor_units(item.discounted_price_at_order)?,
                quantity: item.quantity,
            })
        })
        .collect()
}

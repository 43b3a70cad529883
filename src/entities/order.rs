use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order row. The price columns are a snapshot frozen at creation time and
/// are never recomputed from current product state.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,
    pub shipping_address: String,
    pub phone: String,
    pub payment_method: String,
    pub coupon_code: Option<String>,
    pub shipping_price: Decimal,
    pub total_price_before_discount: Decimal,
    pub total_price_after_discount: Decimal,
    pub total_price: Decimal,
    pub order_status: String,
    pub shipping_status: String,
    /// Provider transaction id, set once payment is confirmed.
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }

        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(now));
        }

        Ok(active_model)
    }
}

/// Payment method chosen at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Online => "online",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(Self::Cash),
            "online" => Some(Self::Online),
            _ => None,
        }
    }
}

/// Payment side of the order state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Waiting,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Fulfillment side of the order state machine, tracked independently of the
/// payment status except for one coupling: shipping an order marks it paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShippingStatus {
    Pending,
    Prepared,
    Shipped,
    Cancelled,
}

impl ShippingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Prepared => "prepared",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "prepared" => Some(Self::Prepared),
            "shipped" => Some(Self::Shipped),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Valid forward moves: pending -> prepared -> shipped, or any
    /// non-terminal state -> cancelled.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Prepared)
                | (Self::Prepared, Self::Shipped)
                | (Self::Pending, Self::Cancelled)
                | (Self::Prepared, Self::Cancelled)
                | (Self::Shipped, Self::Cancelled)
        )
    }
}

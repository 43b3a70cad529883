use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Product entity. Checkout reads `price`/`discount`/`stock`; reconciliation
/// conditionally decrements `stock` and bumps `order_count`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Product title must be between 1 and 255 characters"
    ))]
    pub title: String,

    pub price: Decimal,

    /// Product-level discount percentage (0-100).
    pub discount: Decimal,

    /// Units available; never negative.
    pub stock: i32,

    /// Monotonic counter of confirmed orders containing this product.
    pub order_count: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
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
            if let ActiveValue::NotSet = active_model.order_count {
                active_model.order_count = Set(0);
            }
        }
        active_model.updated_at = Set(Some(now));

        Ok(active_model)
    }
}

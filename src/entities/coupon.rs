use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discount coupon. The redemption set lives in `coupon_redemptions`; a user
/// id appears there at most once per coupon (unique index), appended only
/// after payment is confirmed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub code: String,

    /// Discount percentage (0-100) applied to the discounted subtotal.
    pub percentage: Decimal,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_redemption::Entity")]
    Redemptions,
}

impl Related<super::coupon_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(Utc::now());
            }
        }
        Ok(active_model)
    }
}

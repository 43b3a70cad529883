use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// User entity. Authentication lives outside this service; checkout only
/// reads contact details and appends previously unseen shipping addresses.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(email(message = "Email must be a valid address"))]
    pub email: String,

    pub name: String,
    pub phone: Option<String>,

    /// Known shipping addresses, stored as a JSON array of strings.
    #[sea_orm(column_type = "Json")]
    pub addresses: Json,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Model {
    /// First/last name split used for provider billing data.
    pub fn name_parts(&self) -> (&str, &str) {
        let mut parts = self.name.split_whitespace();
        let first = parts.next().unwrap_or("First");
        let last = parts.next().unwrap_or("Last");
        (first, last)
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.addresses
            .as_array()
            .map(|list| list.iter().any(|a| a.as_str() == Some(address)))
            .unwrap_or(false)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

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
        active_model.updated_at = Set(Some(now));
        Ok(active_model)
    }
}

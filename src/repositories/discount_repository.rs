use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::entities::discount::{ActiveModel as DiscountActiveModel, Column, Entity as DiscountEntity};
use crate::errors::ServiceError;
use crate::models::{normalize_code, Discount};
use crate::services::discounts::DiscountLookup;

/// Read access to the `discounts` table
#[derive(Debug, Clone)]
pub struct DiscountRepository {
    db: Arc<DatabaseConnection>,
}

impl DiscountRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a coupon with its code normalised. Used for seeding.
    pub async fn create(&self, discount: Discount) -> Result<Discount, ServiceError> {
        let model = DiscountActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(normalize_code(&discount.code)),
            discount_type: Set(discount.discount_type),
            value: Set(discount.value),
            is_active: Set(discount.is_active),
            expires_at: Set(discount.expires_at),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(self.db.as_ref()).await?.into())
    }
}

#[async_trait]
impl DiscountLookup for DiscountRepository {
    async fn find_active(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Discount>, ServiceError> {
        let code = normalize_code(code);
        let found = DiscountEntity::find()
            .filter(Column::Code.eq(code.as_str()))
            .filter(Column::IsActive.eq(true))
            .one(self.db.as_ref())
            .await?
            .map(Discount::from)
            .filter(|discount| discount.is_applicable(now));

        if found.is_none() {
            debug!(code = %code, "no applicable discount");
        }
        Ok(found)
    }
}

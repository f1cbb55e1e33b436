use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::order::{
    ActiveModel as OrderActiveModel, Column, Entity as OrderEntity, Model as OrderModel,
};
use crate::errors::ServiceError;
use crate::models::{FulfillmentStatus, NewOrder, Order, OrderPatch, OrderStats, PaymentStatus};

use super::OrderStore;

/// sea-orm backed order store
#[derive(Debug, Clone)]
pub struct OrderRepository {
    db: Arc<DatabaseConnection>,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn load(&self, id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        OrderEntity::find_by_id(id)
            .one(self.db())
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<serde_json::Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::InternalError(format!("cannot encode {}: {}", what, e)))
}

#[async_trait]
impl OrderStore for OrderRepository {
    #[instrument(skip(self, order))]
    async fn create(&self, public_id: &str, order: &NewOrder) -> Result<Order, ServiceError> {
        let now = Utc::now();
        let model = OrderActiveModel {
            id: Set(Uuid::new_v4()),
            public_id: Set(public_id.to_string()),
            owner_id: Set(order.owner_id.clone()),
            shipping_info: Set(to_json(&order.shipping_info, "shipping_info")?),
            line_items: Set(to_json(&order.line_items, "line_items")?),
            subtotal: Set(order.subtotal),
            shipping_cost: Set(order.shipping_cost),
            discount_code: Set(order.discount.as_ref().map(|d| d.code.clone())),
            discount_amount: Set(order
                .discount
                .as_ref()
                .map(|d| d.amount)
                .unwrap_or_default()),
            amount: Set(order.amount),
            payment_status: Set(PaymentStatus::Pending),
            fulfillment_status: Set(FulfillmentStatus::Processing),
            payment_authority: Set(None),
            payment_ref_id: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = model
            .insert(self.db())
            .await
            .map_err(|e| ServiceError::from_insert(e, public_id))?;
        debug!(order_id = %inserted.id, "order row inserted");
        Order::try_from(inserted)
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Order>, ServiceError> {
        OrderEntity::find()
            .filter(Column::PublicId.eq(public_id))
            .one(self.db())
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn find_by_internal_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        self.load(id).await?.map(Order::try_from).transpose()
    }

    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Order>, ServiceError> {
        OrderEntity::find()
            .filter(Column::OwnerId.eq(owner_id))
            .order_by_desc(Column::CreatedAt)
            .all(self.db())
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn list_recent(&self, limit: u64) -> Result<Vec<Order>, ServiceError> {
        OrderEntity::find()
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(self.db())
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn stats(&self) -> Result<OrderStats, ServiceError> {
        let orders = OrderEntity::find().count(self.db()).await?;
        let paid_amounts: Vec<Decimal> = OrderEntity::find()
            .select_only()
            .column(Column::Amount)
            .filter(Column::PaymentStatus.eq(PaymentStatus::Paid))
            .into_tuple::<Decimal>()
            .all(self.db())
            .await?;

        let mut stats = OrderStats {
            orders,
            ..Default::default()
        };
        for amount in paid_amounts {
            stats.add_paid(amount)?;
        }
        Ok(stats)
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<Order, ServiceError> {
        let mut changes = OrderActiveModel {
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(status) = patch.payment_status {
            changes.payment_status = Set(status);
        }
        if let Some(authority) = patch.payment_authority {
            changes.payment_authority = Set(Some(authority));
        }
        if let Some(ref_id) = patch.payment_ref_id {
            changes.payment_ref_id = Set(Some(ref_id));
        }
        if let Some(status) = patch.fulfillment_status {
            changes.fulfillment_status = Set(status);
        }

        let mut query = OrderEntity::update_many()
            .set(changes)
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .filter(Column::Id.eq(id));
        if let Some(expected) = patch.expect_payment_status {
            query = query.filter(Column::PaymentStatus.eq(expected));
        }
        if let Some(authority) = patch.expect_authority {
            query = query.filter(Column::PaymentAuthority.eq(authority));
        }

        let result = query.exec(self.db()).await?;
        if result.rows_affected == 0 {
            return match self.load(id).await? {
                None => Err(ServiceError::OrderNotFound(id.to_string())),
                Some(_) => Err(ServiceError::ConcurrentModification(id)),
            };
        }

        let model = self
            .load(id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(id.to_string()))?;
        Order::try_from(model)
    }
}

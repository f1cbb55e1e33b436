use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{normalize_code, Discount, NewOrder, Order, OrderPatch, OrderStats, PaymentStatus};
use crate::services::discounts::DiscountLookup;

use super::OrderStore;

/// Process-local order store with the same conditional-update semantics as
/// the database one.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    by_public_id: DashMap<String, Uuid>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, public_id: &str, order: &NewOrder) -> Result<Order, ServiceError> {
        match self.by_public_id.entry(public_id.to_string()) {
            Entry::Occupied(_) => Err(ServiceError::DuplicateId(public_id.to_string())),
            Entry::Vacant(slot) => {
                let id = Uuid::new_v4();
                let stored = order
                    .clone()
                    .into_order(id, public_id.to_string(), Utc::now());
                self.orders.insert(id, stored.clone());
                slot.insert(id);
                Ok(stored)
            }
        }
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Order>, ServiceError> {
        let id = match self.by_public_id.get(public_id) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        self.find_by_internal_id(id).await
    }

    async fn find_by_internal_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Order>, ServiceError> {
        let mut owned: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.value().owner_id.as_deref() == Some(owner_id))
            .map(|entry| entry.value().clone())
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn list_recent(&self, limit: u64) -> Result<Vec<Order>, ServiceError> {
        let mut all: Vec<Order> = self.orders.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(all)
    }

    async fn stats(&self) -> Result<OrderStats, ServiceError> {
        let mut stats = OrderStats {
            orders: self.orders.len() as u64,
            ..Default::default()
        };
        for entry in self.orders.iter() {
            if entry.value().payment_status == PaymentStatus::Paid {
                stats.add_paid(entry.value().amount)?;
            }
        }
        Ok(stats)
    }

    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<Order, ServiceError> {
        // The shard write lock makes check-and-apply atomic
        let mut entry = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| ServiceError::OrderNotFound(id.to_string()))?;
        if !patch.preconditions_hold(entry.value()) {
            return Err(ServiceError::ConcurrentModification(id));
        }
        patch.apply_to(entry.value_mut(), Utc::now());
        Ok(entry.value().clone())
    }
}

/// Coupon table kept in memory, keyed by normalised code
#[derive(Debug, Default)]
pub struct InMemoryDiscountStore {
    discounts: DashMap<String, Discount>,
}

impl InMemoryDiscountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mut discount: Discount) {
        discount.code = normalize_code(&discount.code);
        self.discounts.insert(discount.code.clone(), discount);
    }
}

#[async_trait]
impl DiscountLookup for InMemoryDiscountStore {
    async fn find_active(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Discount>, ServiceError> {
        Ok(self
            .discounts
            .get(&normalize_code(code))
            .map(|entry| entry.value().clone())
            .filter(|discount| discount.is_applicable(now)))
    }
}

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{NewOrder, Order, OrderPatch, OrderStats};

pub mod discount_repository;
pub mod memory;
pub mod order_repository;

pub use discount_repository::DiscountRepository;
pub use memory::{InMemoryDiscountStore, InMemoryOrderStore};
pub use order_repository::OrderRepository;

/// Persistence contract for orders.
///
/// `update` is conditional: when any `expect_*` precondition of the patch no
/// longer holds it fails with `ConcurrentModification` and changes nothing.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new pending order under `public_id`; `DuplicateId` if taken.
    async fn create(&self, public_id: &str, order: &NewOrder) -> Result<Order, ServiceError>;

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Order>, ServiceError>;

    async fn find_by_internal_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError>;

    /// Orders placed by `owner_id`, newest first.
    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Order>, ServiceError>;

    /// Most recent orders across all owners, newest first.
    async fn list_recent(&self, limit: u64) -> Result<Vec<Order>, ServiceError>;

    /// Order counts and revenue collected from paid orders.
    async fn stats(&self) -> Result<OrderStats, ServiceError>;

    async fn update(&self, id: Uuid, patch: OrderPatch) -> Result<Order, ServiceError>;
}

pub mod discount;
pub mod order;

pub use discount::DiscountType;
pub use order::{FulfillmentStatus, PaymentStatus};

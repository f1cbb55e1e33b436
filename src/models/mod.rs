pub mod discount;
pub mod order;

pub use discount::{normalize_code, Discount, DiscountType};
pub use order::{
    max_money, validate_money, AppliedDiscount, FulfillmentStatus, LineItem, NewOrder, Order,
    OrderPatch, OrderStats, PaymentStatus, ShippingInfo,
};

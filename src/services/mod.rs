// Pricing and coupons
pub mod discounts;
pub mod pricing;

// Product truth
pub mod catalog;

// Order lifecycle and payment
pub mod orders;
pub mod payment_gateway;

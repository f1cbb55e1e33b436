use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::entities::discount;

pub use crate::entities::discount::DiscountType;

/// Canonical form of a coupon code
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A coupon as the pricing rules see it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Discount {
    pub code: String,
    pub discount_type: DiscountType,
    #[schema(value_type = String, example = "20")]
    pub value: Decimal,
    #[serde(skip)]
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Discount {
    /// Active and either open-ended or expiring after `now`.
    pub fn is_applicable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expiry| expiry > now)
    }
}

impl From<discount::Model> for Discount {
    fn from(model: discount::Model) -> Self {
        Self {
            code: model.code,
            discount_type: model.discount_type,
            value: model.value,
            is_active: model.is_active,
            expires_at: model.expires_at,
        }
    }
}

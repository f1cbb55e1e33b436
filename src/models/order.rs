use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::entities::order;
use crate::errors::ServiceError;

pub use crate::entities::order::{FulfillmentStatus, PaymentStatus};

const MAX_MONEY_UNITS: i64 = 1_000_000_000_000_000;

/// Largest unit price or stated total accepted from a client.
pub fn max_money() -> Decimal {
    Decimal::new(MAX_MONEY_UNITS, 0)
}

/// Rejects negative amounts and amounts above [`max_money`].
pub fn validate_money(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() || *value > max_money() {
        let mut err = ValidationError::new("money_range");
        err.message = Some("amount is out of range".into());
        return Err(err);
    }
    Ok(())
}

/// Delivery details captured at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingInfo {
    #[validate(length(min = 1, max = 100, message = "first name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "last name is required"))]
    pub last_name: String,
    #[validate(length(min = 5, max = 32, message = "phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, max = 100, message = "province is required"))]
    pub province: String,
    #[validate(length(min = 1, max = 100, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 500, message = "address is required"))]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 20))]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// A cart line, snapshotted into the order at creation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct LineItem {
    #[serde(alias = "id")]
    #[validate(length(min = 1, max = 64))]
    pub product_id: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[schema(value_type = String, example = "100000")]
    #[validate(custom = "validate_money")]
    pub price: Decimal,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl LineItem {
    pub fn line_total(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Coupon applied to an order and the amount it took off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AppliedDiscount {
    pub code: String,
    #[schema(value_type = String, example = "40000")]
    pub amount: Decimal,
}

/// Stored order as seen by the rest of the service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub public_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub shipping_info: ShippingInfo,
    #[serde(rename = "products")]
    pub line_items: Vec<LineItem>,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    pub discount: Option<AppliedDiscount>,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    /// Proves possession of the current payment attempt; never rendered
    #[serde(skip_serializing)]
    #[schema(ignore)]
    pub payment_authority: Option<String>,
    pub payment_ref_id: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn discount_amount(&self) -> Decimal {
        self.discount
            .as_ref()
            .map(|d| d.amount)
            .unwrap_or(Decimal::ZERO)
    }
}

impl TryFrom<order::Model> for Order {
    type Error = ServiceError;

    fn try_from(model: order::Model) -> Result<Self, Self::Error> {
        let shipping_info = serde_json::from_value(model.shipping_info).map_err(|e| {
            ServiceError::StoreError(format!(
                "order {} has unreadable shipping_info: {}",
                model.public_id, e
            ))
        })?;
        let line_items = serde_json::from_value(model.line_items).map_err(|e| {
            ServiceError::StoreError(format!(
                "order {} has unreadable line_items: {}",
                model.public_id, e
            ))
        })?;
        let discount = model.discount_code.map(|code| AppliedDiscount {
            code,
            amount: model.discount_amount,
        });

        Ok(Order {
            id: model.id,
            public_id: model.public_id,
            owner_id: model.owner_id,
            shipping_info,
            line_items,
            subtotal: model.subtotal,
            shipping_cost: model.shipping_cost,
            discount,
            amount: model.amount,
            payment_status: model.payment_status,
            fulfillment_status: model.fulfillment_status,
            payment_authority: model.payment_authority,
            payment_ref_id: model.payment_ref_id,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// Sales summary for the back office
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderStats {
    pub orders: u64,
    pub paid_orders: u64,
    /// Sum of `amount` over paid orders
    #[schema(value_type = String, example = "460000")]
    pub revenue: Decimal,
}

impl OrderStats {
    /// Folds one paid order into the summary.
    pub fn add_paid(&mut self, amount: Decimal) -> Result<(), ServiceError> {
        self.paid_orders += 1;
        self.revenue = self
            .revenue
            .checked_add(amount)
            .ok_or_else(|| ServiceError::InternalError("revenue total overflowed".to_string()))?;
        Ok(())
    }
}

/// Everything needed to persist a freshly priced order, minus its ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    pub owner_id: Option<String>,
    pub shipping_info: ShippingInfo,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Option<AppliedDiscount>,
    pub amount: Decimal,
}

impl NewOrder {
    /// Materialises the order a store returns from `create`.
    pub fn into_order(self, id: Uuid, public_id: String, now: DateTime<Utc>) -> Order {
        Order {
            id,
            public_id,
            owner_id: self.owner_id,
            shipping_info: self.shipping_info,
            line_items: self.line_items,
            subtotal: self.subtotal,
            shipping_cost: self.shipping_cost,
            discount: self.discount,
            amount: self.amount,
            payment_status: PaymentStatus::Pending,
            fulfillment_status: FulfillmentStatus::Processing,
            payment_authority: None,
            payment_ref_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Conditional change to an order.
///
/// `expect_*` fields are preconditions checked against the stored record;
/// the store refuses the patch with `ConcurrentModification` when any of
/// them no longer holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub expect_payment_status: Option<PaymentStatus>,
    pub expect_authority: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_authority: Option<String>,
    pub payment_ref_id: Option<String>,
    pub fulfillment_status: Option<FulfillmentStatus>,
}

impl OrderPatch {
    /// Binds a new gateway authority to a still-pending order.
    pub fn attach_authority(authority: impl Into<String>) -> Self {
        Self {
            expect_payment_status: Some(PaymentStatus::Pending),
            payment_authority: Some(authority.into()),
            ..Default::default()
        }
    }

    /// pending → paid for the attempt identified by `authority`.
    pub fn mark_paid(authority: impl Into<String>, ref_id: impl Into<String>) -> Self {
        Self {
            expect_payment_status: Some(PaymentStatus::Pending),
            expect_authority: Some(authority.into()),
            payment_status: Some(PaymentStatus::Paid),
            payment_ref_id: Some(ref_id.into()),
            ..Default::default()
        }
    }

    /// pending → failed for the attempt identified by `authority`.
    pub fn mark_failed(authority: impl Into<String>) -> Self {
        Self {
            expect_payment_status: Some(PaymentStatus::Pending),
            expect_authority: Some(authority.into()),
            payment_status: Some(PaymentStatus::Failed),
            ..Default::default()
        }
    }

    /// pending → paid for a confirmed attempt whose authority has since
    /// been replaced; restores the confirmed authority.
    pub fn record_confirmation(authority: impl Into<String>, ref_id: impl Into<String>) -> Self {
        Self {
            expect_payment_status: Some(PaymentStatus::Pending),
            payment_status: Some(PaymentStatus::Paid),
            payment_authority: Some(authority.into()),
            payment_ref_id: Some(ref_id.into()),
            ..Default::default()
        }
    }

    pub fn fulfillment(status: FulfillmentStatus) -> Self {
        Self {
            fulfillment_status: Some(status),
            ..Default::default()
        }
    }

    /// Whether `order` satisfies the patch preconditions.
    pub fn preconditions_hold(&self, order: &Order) -> bool {
        let status_ok = self
            .expect_payment_status
            .map_or(true, |expected| order.payment_status == expected);
        let authority_ok = self
            .expect_authority
            .as_deref()
            .map_or(true, |expected| order.payment_authority.as_deref() == Some(expected));
        status_ok && authority_ok
    }

    /// Applies the patch in place, bumping the version.
    pub fn apply_to(&self, order: &mut Order, now: DateTime<Utc>) {
        if let Some(status) = self.payment_status {
            order.payment_status = status;
        }
        if let Some(authority) = &self.payment_authority {
            order.payment_authority = Some(authority.clone());
        }
        if let Some(ref_id) = &self.payment_ref_id {
            order.payment_ref_id = Some(ref_id.clone());
        }
        if let Some(status) = self.fulfillment_status {
            order.fulfillment_status = status;
        }
        order.version += 1;
        order.updated_at = now;
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::PricingConfig;
use crate::errors::ServiceError;
use crate::models::{AppliedDiscount, Discount, DiscountType, LineItem};
use crate::services::discounts::DiscountLookup;

/// What a cart costs, as decided by the server.
///
/// Always satisfies `total == subtotal + shipping_cost - discount_amount()`
/// and `total >= 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Option<AppliedDiscount>,
    pub total: Decimal,
}

impl PriceBreakdown {
    pub fn discount_amount(&self) -> Decimal {
        self.discount
            .as_ref()
            .map(|d| d.amount)
            .unwrap_or(Decimal::ZERO)
    }

    /// Whether a client-stated amount is within `tolerance` of the total.
    pub fn accepts(&self, stated: Decimal, tolerance: Decimal) -> bool {
        self.total
            .checked_sub(stated)
            .map_or(false, |diff| diff.abs() <= tolerance)
    }
}

fn too_large() -> ServiceError {
    ServiceError::InvalidCart("cart total is too large".to_string())
}

/// Pure pricing rules: subtotal, flat shipping, one optional coupon.
#[derive(Debug, Clone)]
pub struct MoneyCalculator {
    shipping_cost: Decimal,
}

impl MoneyCalculator {
    pub fn new(shipping_cost: Decimal) -> Self {
        Self { shipping_cost }
    }

    pub fn from_config(config: &PricingConfig) -> Self {
        Self::new(config.shipping_cost)
    }

    /// Prices `items`, applying `discount` only if it is usable at `now`.
    pub fn compute(
        &self,
        items: &[LineItem],
        discount: Option<&Discount>,
        now: DateTime<Utc>,
    ) -> Result<PriceBreakdown, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::InvalidCart("cart is empty".to_string()));
        }

        let mut subtotal = Decimal::ZERO;
        for item in items {
            if item.price <= Decimal::ZERO || item.quantity == 0 {
                return Err(ServiceError::InvalidCart(format!(
                    "product {} must have a positive price and quantity",
                    item.product_id
                )));
            }
            subtotal = item
                .line_total()
                .and_then(|line| subtotal.checked_add(line))
                .ok_or_else(too_large)?;
        }

        let shipping_cost = if subtotal > Decimal::ZERO {
            self.shipping_cost
        } else {
            Decimal::ZERO
        };
        let gross = subtotal
            .checked_add(shipping_cost)
            .ok_or_else(too_large)?;

        let discount = match discount.filter(|d| d.is_applicable(now)) {
            Some(d) => {
                let raw = match d.discount_type {
                    DiscountType::Percent => subtotal
                        .checked_mul(d.value)
                        .map(|scaled| scaled / Decimal::ONE_HUNDRED)
                        .ok_or_else(too_large)?,
                    DiscountType::Fixed => d.value,
                };
                // Clamped so the total can never go negative
                Some(AppliedDiscount {
                    code: d.code.clone(),
                    amount: raw.max(Decimal::ZERO).min(gross),
                })
            }
            None => None,
        };

        let total = gross - discount.as_ref().map(|d| d.amount).unwrap_or(Decimal::ZERO);

        Ok(PriceBreakdown {
            subtotal,
            shipping_cost,
            discount,
            total,
        })
    }

    /// Resolves `coupon_code` through `lookup`, then prices the cart.
    ///
    /// Unknown, inactive or expired codes price the cart without a discount.
    pub async fn quote(
        &self,
        lookup: &dyn DiscountLookup,
        items: &[LineItem],
        coupon_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PriceBreakdown, ServiceError> {
        let discount = match coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let found = lookup.find_active(code, now).await?;
                if found.is_none() {
                    debug!(coupon = %code, "coupon ignored: invalid or expired");
                }
                found
            }
            None => None,
        };
        self.compute(items, discount.as_ref(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryDiscountStore;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn item(price: Decimal, quantity: u32) -> LineItem {
        LineItem {
            product_id: "p-1".into(),
            name: "Saffron 5g".into(),
            price,
            quantity,
            image: None,
        }
    }

    fn coupon(discount_type: DiscountType, value: Decimal) -> Discount {
        Discount {
            code: "SAVE20".into(),
            discount_type,
            value,
            is_active: true,
            expires_at: None,
        }
    }

    fn calculator() -> MoneyCalculator {
        MoneyCalculator::new(dec!(50000))
    }

    #[test]
    fn two_units_without_coupon() {
        let breakdown = calculator()
            .compute(&[item(dec!(100000), 2)], None, Utc::now())
            .unwrap();
        assert_eq!(breakdown.subtotal, dec!(200000));
        assert_eq!(breakdown.shipping_cost, dec!(50000));
        assert_eq!(breakdown.discount_amount(), dec!(0));
        assert_eq!(breakdown.total, dec!(250000));
    }

    #[test]
    fn percent_coupon_takes_share_of_subtotal_only() {
        let save20 = coupon(DiscountType::Percent, dec!(20));
        let breakdown = calculator()
            .compute(&[item(dec!(100000), 2)], Some(&save20), Utc::now())
            .unwrap();
        assert_eq!(breakdown.discount_amount(), dec!(40000));
        assert_eq!(breakdown.total, dec!(210000));
        assert_eq!(breakdown.discount.unwrap().code, "SAVE20");
    }

    #[test]
    fn fixed_coupon_is_clamped_at_zero_total() {
        let huge = coupon(DiscountType::Fixed, dec!(1000000));
        let breakdown = calculator()
            .compute(&[item(dec!(1000), 1)], Some(&huge), Utc::now())
            .unwrap();
        assert_eq!(breakdown.total, dec!(0));
        assert_eq!(breakdown.discount_amount(), dec!(51000));
    }

    #[test]
    fn expired_coupon_is_not_applied() {
        let now = Utc::now();
        let mut expired = coupon(DiscountType::Percent, dec!(50));
        expired.expires_at = Some(now - Duration::minutes(1));
        let breakdown = calculator()
            .compute(&[item(dec!(100000), 1)], Some(&expired), now)
            .unwrap();
        assert!(breakdown.discount.is_none());
        assert_eq!(breakdown.total, dec!(150000));
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![item(dec!(0), 1)])]
    #[case(vec![item(dec!(-5), 1)])]
    #[case(vec![item(dec!(10), 0)])]
    fn invalid_carts_are_rejected(#[case] items: Vec<LineItem>) {
        let result = calculator().compute(&items, None, Utc::now());
        assert_matches!(result, Err(ServiceError::InvalidCart(_)));
    }

    #[rstest]
    #[case(dec!(250000), true)]
    #[case(dec!(250001), true)]
    #[case(dec!(249999), true)]
    #[case(dec!(249000), false)]
    #[case(dec!(250002), false)]
    fn tolerance_window(#[case] stated: Decimal, #[case] accepted: bool) {
        let breakdown = calculator()
            .compute(&[item(dec!(100000), 2)], None, Utc::now())
            .unwrap();
        assert_eq!(breakdown.accepts(stated, dec!(1)), accepted);
    }

    #[rstest]
    #[case(vec![item(Decimal::MAX, 1)])]
    #[case(vec![item(Decimal::MAX, 2)])]
    #[case(vec![item(Decimal::MAX, 1), item(dec!(1), 1)])]
    fn overflowing_carts_are_rejected(#[case] items: Vec<LineItem>) {
        let result = calculator().compute(&items, None, Utc::now());
        assert_matches!(result, Err(ServiceError::InvalidCart(_)));
    }

    #[test]
    fn overflowing_percent_discount_is_rejected() {
        let save20 = coupon(DiscountType::Percent, dec!(20));
        let huge = item(dec!(7000000000000000000000000000), 1);
        let result = calculator().compute(&[huge], Some(&save20), Utc::now());
        assert_matches!(result, Err(ServiceError::InvalidCart(_)));
    }

    #[test]
    fn extreme_stated_amounts_are_refused() {
        let breakdown = calculator()
            .compute(&[item(dec!(100000), 2)], None, Utc::now())
            .unwrap();
        assert!(!breakdown.accepts(Decimal::MIN, dec!(1)));
        assert!(!breakdown.accepts(Decimal::MAX, dec!(1)));
    }

    #[tokio::test]
    async fn quote_resolves_coupon_case_insensitively() {
        let store = InMemoryDiscountStore::new();
        store.insert(coupon(DiscountType::Percent, dec!(20)));

        let breakdown = calculator()
            .quote(&store, &[item(dec!(100000), 2)], Some("save20"), Utc::now())
            .await
            .unwrap();
        assert_eq!(breakdown.total, dec!(210000));

        let unknown = calculator()
            .quote(&store, &[item(dec!(100000), 2)], Some("NOPE"), Utc::now())
            .await
            .unwrap();
        assert_eq!(unknown.total, dec!(250000));
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::errors::ServiceError;
use crate::models::{normalize_code, Discount};

/// Read-only resolution of coupon codes.
#[async_trait]
pub trait DiscountLookup: Send + Sync {
    /// The discount for `code` if it is active and unexpired at `now`.
    ///
    /// Codes compare case-insensitively. Inactive, expired and unknown codes
    /// all come back as `None`.
    async fn find_active(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Discount>, ServiceError>;
}

/// Coupon validation for the checkout page
#[derive(Clone)]
pub struct DiscountService {
    lookup: Arc<dyn DiscountLookup>,
}

impl DiscountService {
    pub fn new(lookup: Arc<dyn DiscountLookup>) -> Self {
        Self { lookup }
    }

    /// Returns the coupon or `DiscountNotFound` ("invalid or expired").
    #[instrument(skip(self))]
    pub async fn validate_coupon(&self, code: &str) -> Result<Discount, ServiceError> {
        let normalized = normalize_code(code);
        if normalized.is_empty() {
            return Err(ServiceError::ValidationError(
                "coupon code is required".to_string(),
            ));
        }

        match self.lookup.find_active(&normalized, Utc::now()).await? {
            Some(discount) => {
                info!(code = %discount.code, "coupon validated");
                Ok(discount)
            }
            None => Err(ServiceError::DiscountNotFound(normalized)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiscountType;
    use crate::repositories::InMemoryDiscountStore;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn service() -> DiscountService {
        let store = InMemoryDiscountStore::new();
        store.insert(Discount {
            code: "welcome".into(),
            discount_type: DiscountType::Fixed,
            value: dec!(10000),
            is_active: true,
            expires_at: None,
        });
        store.insert(Discount {
            code: "OLD".into(),
            discount_type: DiscountType::Percent,
            value: dec!(10),
            is_active: true,
            expires_at: Some(Utc::now() - Duration::days(1)),
        });
        store.insert(Discount {
            code: "OFF".into(),
            discount_type: DiscountType::Percent,
            value: dec!(10),
            is_active: false,
            expires_at: None,
        });
        DiscountService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn valid_code_is_returned_normalised() {
        let discount = service().validate_coupon("Welcome").await.unwrap();
        assert_eq!(discount.code, "WELCOME");
        assert_eq!(discount.value, dec!(10000));
    }

    #[tokio::test]
    async fn expired_inactive_and_unknown_share_one_error() {
        let svc = service();
        for code in ["OLD", "off", "MISSING"] {
            let err = svc.validate_coupon(code).await.unwrap_err();
            assert_matches!(err, ServiceError::DiscountNotFound(_));
        }
    }

    #[tokio::test]
    async fn blank_code_is_a_validation_error() {
        let err = service().validate_coupon("   ").await.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
}

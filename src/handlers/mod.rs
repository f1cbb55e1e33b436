pub mod admin;
pub mod discounts;
pub mod orders;
pub mod payments;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use std::sync::Arc;
use validator::Validate;

use crate::errors::ServiceError;
use crate::services::discounts::DiscountService;
use crate::services::orders::OrderService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub discounts: Arc<DiscountService>,
}

impl AppServices {
    pub fn new(orders: OrderService, discounts: DiscountService) -> Self {
        Self {
            orders: Arc::new(orders),
            discounts: Arc::new(discounts),
        }
    }
}

/// Unwraps a JSON body and validates it before any business logic runs.
///
/// Missing or mistyped fields are reported the same way as failed
/// validation rules: as "incomplete data".
pub(crate) fn validated<T: Validate>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, ServiceError> {
    let Json(body) = payload
        .map_err(|e| ServiceError::ValidationError(format!("incomplete data: {}", e.body_text())))?;
    body.validate()?;
    Ok(body)
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Order not found: HP-1718000000000",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Order not found: HP-1718000000000")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

/// Failures reported by the payment gateway client.
///
/// `Rejected` is the only definitive answer; everything else means the
/// outcome at the gateway is unknown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway transport failure: {0}")]
    Transport(String),

    #[error("gateway call timed out")]
    Timeout,

    #[error("gateway rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("gateway returned an unreadable response: {0}")]
    InvalidResponse(String),

    #[error("amount {0} cannot be charged")]
    InvalidAmount(Decimal),
}

impl GatewayError {
    /// True when the gateway gave a definitive negative answer
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::InvalidAmount(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("Order amount does not match the cart total")]
    AmountMismatch { stated: Decimal, computed: Decimal },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Discount code is invalid or expired: {0}")]
    DiscountNotFound(String),

    #[error("Payment authority does not match order {0}")]
    AuthorityMismatch(String),

    #[error("Order {0} is not awaiting payment")]
    OrderNotPayable(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment rejected by gateway (code {code}): {message}")]
    GatewayRejected { code: i64, message: String },

    #[error("Duplicate public order id: {0}")]
    DuplicateId(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(format!("incomplete data: {}", err))
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected { code, message } => {
                ServiceError::GatewayRejected { code, message }
            }
            GatewayError::InvalidAmount(amount) => {
                ServiceError::ValidationError(format!("amount {} cannot be charged", amount))
            }
            other => ServiceError::GatewayUnavailable(other.to_string()),
        }
    }
}

impl ServiceError {
    /// Classifies an insert failure, surfacing unique violations as `DuplicateId`.
    pub fn from_insert(err: DbErr, public_id: &str) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::DuplicateId(public_id.to_string())
            }
            _ => ServiceError::DatabaseError(err),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_)
            | Self::InvalidCart(_)
            | Self::AmountMismatch { .. }
            | Self::AuthorityMismatch(_) => StatusCode::BAD_REQUEST,
            Self::OrderNotFound(_) | Self::DiscountNotFound(_) => StatusCode::NOT_FOUND,
            Self::OrderNotPayable(_)
            | Self::DuplicateId(_)
            | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::GatewayRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_) | Self::StoreError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::ValidationError(msg) | Self::InvalidCart(msg) => msg.clone(),
            // Never echo the computed total back to the client
            Self::AmountMismatch { .. } => {
                "amount mismatch: the cart total has changed, please refresh and retry".to_string()
            }
            Self::DiscountNotFound(_) => "Discount code is invalid or expired".to_string(),
            Self::GatewayUnavailable(_) => {
                "Payment gateway is unavailable, please retry shortly".to_string()
            }
            Self::GatewayRejected { code, .. } => {
                format!("Payment was rejected by the gateway (code {})", code)
            }
            Self::DuplicateId(_) | Self::ConcurrentModification(_) => {
                "The order was modified concurrently, please retry".to_string()
            }
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::StoreError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

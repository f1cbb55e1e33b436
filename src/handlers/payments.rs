use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::validated;
use crate::errors::ServiceError;
use crate::models::Order;
use crate::services::orders::PaymentVerification;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PaymentRequestBody {
    #[validate(length(min = 1, max = 64, message = "order_public_id is required"))]
    pub order_public_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentRedirectResponse {
    pub order_public_id: String,
    pub authority: String,
    /// Gateway page the shopper is sent to
    pub redirect_url: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, max = 128, message = "authority is required"))]
    pub authority: String,
    #[validate(length(min = 1, max = 64, message = "order_public_id is required"))]
    pub order_public_id: String,
}

/// Query the gateway appends when it sends the shopper back
#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct GatewayCallbackQuery {
    #[serde(rename = "Authority")]
    #[param(rename = "Authority")]
    #[validate(length(min = 1, max = 128, message = "Authority is required"))]
    pub authority: String,
    /// `OK` or `NOK` as reported by the gateway; verification decides either way
    #[serde(rename = "Status", default)]
    #[param(rename = "Status")]
    pub status: Option<String>,
    #[serde(rename = "orderId")]
    #[param(rename = "orderId")]
    #[validate(length(min = 1, max = 64, message = "orderId is required"))]
    pub order_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentVerificationResponse {
    pub success: bool,
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn verification_response(result: PaymentVerification) -> Response {
    let status = match &result.failure {
        None => StatusCode::OK,
        Some(failure) if failure.is_unconfirmed() => StatusCode::BAD_GATEWAY,
        Some(_) => StatusCode::PAYMENT_REQUIRED,
    };
    let success = result.is_success();
    let reason = result.failure.as_ref().map(ToString::to_string);
    let message = if success {
        Some("Payment confirmed".to_string())
    } else {
        reason.clone()
    };

    let body = ApiResponse::with_outcome(
        success,
        PaymentVerificationResponse {
            success,
            order: result.order,
            reason,
        },
        message,
    );
    (status, Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/request",
    summary = "Request payment",
    description = "Open a payment attempt at the gateway and return the redirect target",
    request_body = PaymentRequestBody,
    responses(
        (status = 200, description = "Payment attempt opened", body = ApiResponse<PaymentRedirectResponse>),
        (status = 400, description = "Incomplete data", body = crate::errors::ErrorResponse),
        (status = 402, description = "Gateway refused the request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn request_payment(
    State(state): State<AppState>,
    payload: Result<Json<PaymentRequestBody>, JsonRejection>,
) -> Result<Json<ApiResponse<PaymentRedirectResponse>>, ServiceError> {
    let body = validated(payload)?;
    let redirect = state
        .services
        .orders
        .request_payment(&body.order_public_id)
        .await?;

    Ok(Json(ApiResponse::success(PaymentRedirectResponse {
        order_public_id: redirect.order_public_id,
        authority: redirect.authority,
        redirect_url: redirect.redirect_url,
    })))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    summary = "Verify payment",
    description = "Settle the payment attempt identified by the authority; the order always ends paid or failed",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed", body = ApiResponse<PaymentVerificationResponse>),
        (status = 400, description = "Incomplete data or authority mismatch", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment failed", body = ApiResponse<PaymentVerificationResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unreachable; order marked failed", body = ApiResponse<PaymentVerificationResponse>),
    ),
    tag = "payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let body = validated(payload)?;
    let result = state
        .services
        .orders
        .verify_payment(&body.order_public_id, &body.authority)
        .await?;
    Ok(verification_response(result))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/callback",
    summary = "Gateway callback",
    description = "Return target of the gateway redirect; verifies the presented authority",
    params(GatewayCallbackQuery),
    responses(
        (status = 200, description = "Payment confirmed", body = ApiResponse<PaymentVerificationResponse>),
        (status = 400, description = "Incomplete data or authority mismatch", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment failed", body = ApiResponse<PaymentVerificationResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unreachable; order marked failed", body = ApiResponse<PaymentVerificationResponse>),
    ),
    tag = "payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<GatewayCallbackQuery>,
) -> Result<Response, ServiceError> {
    query.validate()?;
    info!(
        order_id = %query.order_id,
        gateway_status = query.status.as_deref().unwrap_or("unknown"),
        "gateway callback received"
    );
    let result = state
        .services
        .orders
        .verify_payment(&query.order_id, &query.authority)
        .await?;
    Ok(verification_response(result))
}

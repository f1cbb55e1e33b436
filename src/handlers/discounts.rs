use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use super::validated;
use crate::errors::ServiceError;
use crate::models::Discount;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1, max = 64, message = "coupon_code is required"))]
    pub coupon_code: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    summary = "Validate coupon",
    description = "Check a coupon code before checkout",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Coupon is usable", body = ApiResponse<Discount>),
        (status = 400, description = "Incomplete data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Invalid or expired coupon", body = crate::errors::ErrorResponse),
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    payload: Result<Json<ValidateCouponRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Discount>>, ServiceError> {
    let body = validated(payload)?;
    let discount = state
        .services
        .discounts
        .validate_coupon(&body.coupon_code)
        .await?;
    Ok(Json(ApiResponse::success(discount)))
}

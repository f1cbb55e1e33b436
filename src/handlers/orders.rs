use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::auth::{Identity, MaybeIdentity};
use crate::errors::ServiceError;
use crate::models::{validate_money, FulfillmentStatus, LineItem, Order, ShippingInfo};
use crate::services::orders::CheckoutRequest;
use crate::{ApiResponse, AppState};

/// Checkout submission
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate]
    pub shipping_info: ShippingInfo,
    #[validate(length(min = 1, message = "at least one product is required"))]
    pub products: Vec<LineItem>,
    /// Total shown to the shopper; must match the server's total
    #[schema(value_type = String, example = "250000")]
    #[validate(custom = "validate_money")]
    pub amount: Decimal,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_public_id: String,
    pub order: Order,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateFulfillmentStatusRequest {
    pub status: FulfillmentStatus,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Price the cart on the server, cross-check the stated amount and persist a pending order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CreateOrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Incomplete data or amount mismatch", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security((), ("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    MaybeIdentity(caller): MaybeIdentity,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let body = validated(payload)?;
    let request = CheckoutRequest {
        shipping_info: body.shipping_info,
        line_items: body.products,
        stated_amount: body.amount,
        coupon_code: body.coupon_code,
    };

    let order = state
        .services
        .orders
        .create_order(request, caller.as_ref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateOrderResponse {
            order_public_id: order.public_id.clone(),
            order,
        })),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/mine",
    summary = "List my orders",
    description = "Orders placed by the authenticated caller, newest first",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<Order>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    caller: Identity,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let orders = state.services.orders.list_for_owner(&caller).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{public_id}",
    summary = "Get order",
    description = "Invoice projection of an order by its public id",
    params(("public_id" = String, Path, description = "Public order id, e.g. HP-1718000000000")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<Order>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.services.orders.get_by_public_id(&public_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/by-id/{id}",
    summary = "Get order by internal id",
    params(("id" = Uuid, Path, description = "Internal order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<Order>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.services.orders.get_by_internal_id(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/by-id/{id}/fulfillment-status",
    summary = "Update fulfillment status",
    description = "Administrative fulfillment change; payment state is untouched",
    params(("id" = Uuid, Path, description = "Internal order id")),
    request_body = UpdateFulfillmentStatusRequest,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<Order>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_fulfillment_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    caller: Identity,
    payload: Result<Json<UpdateFulfillmentStatusRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let body = validated(payload)?;
    let order = state
        .services
        .orders
        .update_fulfillment(id, body.status, &caller)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

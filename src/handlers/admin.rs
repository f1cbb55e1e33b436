use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::Identity;
use crate::errors::ServiceError;
use crate::models::{Order, OrderStats};
use crate::{ApiResponse, AppState};

const DEFAULT_LIMIT: u64 = 100;
const MAX_LIMIT: u64 = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    /// Maximum number of orders to return (default 100, at most 500)
    pub limit: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    summary = "List all orders",
    description = "Most recent orders across all shoppers, newest first",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<Order>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    caller: Identity,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>, ServiceError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let orders = state.services.orders.list_all(&caller, limit).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/stats",
    summary = "Sales stats",
    description = "Order count and revenue collected from paid orders",
    responses(
        (status = 200, description = "Stats computed", body = ApiResponse<OrderStats>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn stats(
    State(state): State<AppState>,
    caller: Identity,
) -> Result<Json<ApiResponse<OrderStats>>, ServiceError> {
    let stats = state.services.orders.stats(&caller).await?;
    Ok(Json(ApiResponse::success(stats)))
}

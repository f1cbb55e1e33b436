//! Storefront API
//!
//! Order lifecycle and payment reconciliation for the storefront: server-side
//! pricing of carts, persisted orders, and Zarinpal payment attempts that are
//! settled exactly once.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod models;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    extract::{FromRef, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::{IdentityVerifier, JwtIdentityVerifier};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::handlers::AppServices;
use crate::repositories::{DiscountRepository, OrderRepository};
use crate::services::catalog::InMemoryCatalog;
use crate::services::discounts::{DiscountLookup, DiscountService};
use crate::services::orders::{OrderService, OrderSettings};
use crate::services::payment_gateway::PaymentGateway;
use crate::services::pricing::MoneyCalculator;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
    pub identity: Arc<dyn IdentityVerifier>,
}

impl AppState {
    /// Wires the database-backed services around `db` and `gateway`.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(OrderRepository::new(db.clone()));
        let discounts: Arc<dyn DiscountLookup> = Arc::new(DiscountRepository::new(db.clone()));

        let mut orders = OrderService::new(
            store,
            gateway,
            discounts.clone(),
            MoneyCalculator::from_config(&config.pricing),
            OrderSettings::from_config(&config)?,
        );
        if !config.catalog.is_empty() {
            orders = orders.with_catalog(Arc::new(InMemoryCatalog::from_entries(&config.catalog)));
        }

        Ok(Self {
            identity: Arc::new(JwtIdentityVerifier::new(&config.jwt_secret)),
            services: AppServices::new(orders, DiscountService::new(discounts)),
            config: Arc::new(config),
            db,
        })
    }
}

impl FromRef<AppState> for Arc<dyn IdentityVerifier> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.identity)
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::with_outcome(true, data, None)
    }

    /// Response carrying `data` whether or not the operation succeeded.
    pub fn with_outcome(success: bool, data: T, message: Option<String>) -> Self {
        Self {
            success,
            data: Some(data),
            message,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn failed_outcome_still_carries_data() {
        let response = ApiResponse::with_outcome(false, 7, Some("declined".into()));
        assert!(!response.success);
        assert_eq!(response.data, Some(7));
        assert_eq!(response.message.as_deref(), Some("declined"));
        assert!(response.meta.is_some());
    }
}

/// Routes served under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/mine", get(handlers::orders::list_my_orders))
        .route("/orders/:public_id", get(handlers::orders::get_order))
        .route("/orders/by-id/:id", get(handlers::orders::get_order_by_id))
        .route(
            "/orders/by-id/:id/fulfillment-status",
            put(handlers::orders::update_fulfillment_status),
        );

    let payments = Router::new()
        .route("/payments/request", post(handlers::payments::request_payment))
        .route("/payments/verify", post(handlers::payments::verify_payment))
        .route("/payments/callback", get(handlers::payments::payment_callback));

    let coupons = Router::new().route(
        "/coupons/validate",
        post(handlers::discounts::validate_coupon),
    );

    let admin = Router::new()
        .route("/admin/orders", get(handlers::admin::list_orders))
        .route("/admin/stats", get(handlers::admin::stats));

    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(orders)
        .merge(payments)
        .merge(coupons)
        .merge(admin)
}

/// Full application router: the v1 API, Swagger UI, request ids and tracing.
///
/// CORS and compression are left to the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git": option_env!("GIT_HASH").unwrap_or("unknown"),
        "service": "storefront-api",
        "environment": state.config.environment,
        "currency": state.config.pricing.currency,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Json(ApiResponse::success(status_data))
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(err) => {
            ::tracing::warn!(error = %err, "database ping failed");
            "unhealthy"
        }
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Json(ApiResponse::success(health_data))
}

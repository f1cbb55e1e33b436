use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Order & Payment API

Checkout, payment and invoice endpoints of the storefront.

## Money

Amounts are decimal strings in the store currency. The server prices every
cart itself; the `amount` a client submits at checkout is only compared
against that price and a mismatch is rejected with
`amount mismatch: the cart total has changed, please refresh and retry`.

## Payment flow

1. `POST /api/v1/orders` creates a pending order.
2. `POST /api/v1/payments/request` opens a gateway attempt and returns the
   page to send the shopper to.
3. The gateway sends the shopper back to `/api/v1/payments/callback`, or the
   client calls `POST /api/v1/payments/verify`. Either way the attempt ends
   `paid` or `failed`, and repeating the call returns the recorded result.

## Authentication

Checkout works anonymously. Listing your own orders and administrative
updates need a bearer token:

```
Authorization: Bearer <your-jwt-token>
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Checkout and order retrieval"),
        (name = "payments", description = "Gateway payment attempts"),
        (name = "coupons", description = "Coupon validation"),
        (name = "admin", description = "Back-office order listing and sales stats")
    ),
    paths(
        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_id,
        crate::handlers::orders::update_fulfillment_status,

        // Payments
        crate::handlers::payments::request_payment,
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::payment_callback,

        // Coupons
        crate::handlers::discounts::validate_coupon,

        // Back office
        crate::handlers::admin::list_orders,
        crate::handlers::admin::stats,
    ),
    components(
        schemas(
            crate::models::Order,
            crate::models::ShippingInfo,
            crate::models::LineItem,
            crate::models::AppliedDiscount,
            crate::models::PaymentStatus,
            crate::models::FulfillmentStatus,
            crate::models::Discount,
            crate::models::DiscountType,
            crate::models::OrderStats,
            crate::handlers::orders::CreateOrderRequest,
            crate::handlers::orders::CreateOrderResponse,
            crate::handlers::orders::UpdateFulfillmentStatusRequest,
            crate::handlers::payments::PaymentRequestBody,
            crate::handlers::payments::PaymentRedirectResponse,
            crate::handlers::payments::VerifyPaymentRequest,
            crate::handlers::payments::PaymentVerificationResponse,
            crate::handlers::discounts::ValidateCouponRequest,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi
            .components
            .get_or_insert_with(utoipa::openapi::Components::new);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_the_checkout_and_payment_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/payments/verify"));
        assert!(json.contains("/api/v1/coupons/validate"));
        assert!(json.contains("/api/v1/admin/stats"));
        assert!(json.contains("Bearer"));
        assert!(!json.contains("payment_authority"));
    }
}

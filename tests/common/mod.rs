#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_api::{
    auth::{Identity, JwtIdentityVerifier},
    config::AppConfig,
    db::{self, DbConfig},
    errors::GatewayError,
    models::{Discount, DiscountType, ShippingInfo},
    repositories::DiscountRepository,
    services::payment_gateway::{PaymentAuthority, PaymentGateway, VerifiedPayment},
    AppState,
};
use tower::ServiceExt;

pub const TEST_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Gateway double that replays queued answers and records what it was asked.
///
/// With nothing queued, requests succeed with a fresh authority and
/// verifications are rejected with code -51.
#[derive(Default)]
pub struct ScriptedGateway {
    authorities: Mutex<VecDeque<Result<PaymentAuthority, GatewayError>>>,
    verifications: Mutex<VecDeque<Result<VerifiedPayment, GatewayError>>>,
    requested: Mutex<Vec<(Decimal, String, String)>>,
    verified: Mutex<Vec<(Decimal, String)>>,
    issued: AtomicUsize,
}

impl ScriptedGateway {
    pub fn push_authority(&self, answer: Result<PaymentAuthority, GatewayError>) {
        self.authorities.lock().unwrap().push_back(answer);
    }

    pub fn push_verification(&self, answer: Result<VerifiedPayment, GatewayError>) {
        self.verifications.lock().unwrap().push_back(answer);
    }

    pub fn confirm_next(&self, ref_id: &str) {
        self.push_verification(Ok(VerifiedPayment {
            ref_id: ref_id.to_string(),
        }));
    }

    pub fn requests(&self) -> Vec<(Decimal, String, String)> {
        self.requested.lock().unwrap().clone()
    }

    pub fn verifications(&self) -> Vec<(Decimal, String)> {
        self.verified.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn request_authority(
        &self,
        amount: Decimal,
        description: &str,
        callback_url: &str,
    ) -> Result<PaymentAuthority, GatewayError> {
        self.requested.lock().unwrap().push((
            amount,
            description.to_string(),
            callback_url.to_string(),
        ));
        let queued = self.authorities.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(PaymentAuthority {
                authority: format!("A{:035}", n),
            })
        })
    }

    async fn verify(&self, amount: Decimal, authority: &str) -> Result<VerifiedPayment, GatewayError> {
        self.verified
            .lock()
            .unwrap()
            .push((amount, authority.to_string()));
        let queued = self.verifications.lock().unwrap().pop_front();
        queued.unwrap_or(Err(GatewayError::Rejected {
            code: -51,
            message: "payment not completed".to_string(),
        }))
    }

    fn redirect_url(&self, authority: &str) -> String {
        format!("https://sandbox.zarinpal.test/pg/StartPay/{}", authority)
    }
}

/// Application backed by an in-memory SQLite database with migrations applied.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    pub discounts: DiscountRepository,
    verifier: JwtIdentityVerifier,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.gateway.callback_url = "https://shop.test/api/v1/payments/callback".to_string();
        adjust(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig::in_memory())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let gateway = Arc::new(ScriptedGateway::default());
        let state = AppState::build(db.clone(), cfg, gateway.clone()).expect("app state");
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            discounts: DiscountRepository::new(db),
            verifier: JwtIdentityVerifier::new(TEST_SECRET),
        }
    }

    pub fn token_for(&self, user_id: &str, roles: &[&str]) -> String {
        let identity = Identity {
            user_id: user_id.to_string(),
            display_name: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        self.verifier
            .issue(&identity, Duration::hours(1))
            .expect("token")
    }

    pub async fn seed_discount(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: Decimal,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.discounts
            .create(Discount {
                code: code.to_string(),
                discount_type,
                value,
                is_active: true,
                expires_at,
            })
            .await
            .expect("seed discount");
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.send(method, uri, body, None).await
    }

    pub async fn request_as(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: &str,
    ) -> Response {
        self.send(method, uri, body, Some(token)).await
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn shipping_info() -> ShippingInfo {
    ShippingInfo {
        first_name: "Sara".to_string(),
        last_name: "Ahmadi".to_string(),
        phone: "09120000000".to_string(),
        province: "Tehran".to_string(),
        city: "Tehran".to_string(),
        address: "Valiasr St. 12".to_string(),
        postal_code: Some("1234567890".to_string()),
        notes: None,
    }
}

use async_trait::async_trait;
use metrics::counter;
use reqwest::header::ACCEPT;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::config::GatewayConfig;
use crate::errors::GatewayError;

/// Gateway code for a successful request or verification
const CODE_OK: i64 = 100;
/// Gateway code for a payment that was already verified earlier
const CODE_ALREADY_VERIFIED: i64 = 101;

/// Token identifying one payment attempt at the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAuthority {
    pub authority: String,
}

/// Proof that the gateway settled a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    pub ref_id: String,
}

/// Outbound payment provider.
///
/// Errors distinguish a definitive rejection from an unknown outcome; see
/// [`GatewayError::is_rejection`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment attempt for `amount` and returns its authority.
    async fn request_authority(
        &self,
        amount: Decimal,
        description: &str,
        callback_url: &str,
    ) -> Result<PaymentAuthority, GatewayError>;

    /// Confirms the attempt `authority` was paid in full for `amount`.
    async fn verify(&self, amount: Decimal, authority: &str)
        -> Result<VerifiedPayment, GatewayError>;

    /// Where the shopper is sent to pay for `authority`.
    fn redirect_url(&self, authority: &str) -> String;
}

#[derive(Serialize)]
struct PaymentRequestBody<'a> {
    merchant_id: &'a str,
    amount: i64,
    description: &'a str,
    callback_url: &'a str,
}

#[derive(Serialize)]
struct PaymentVerifyBody<'a> {
    merchant_id: &'a str,
    amount: i64,
    authority: &'a str,
}

/// `data` is an object on success and `[]` otherwise; `errors` the reverse.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Value,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RequestData {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    authority: Option<String>,
}

#[derive(Deserialize)]
struct VerifyData {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    ref_id: Option<Value>,
}

/// Converts an order amount to the integral unit the gateway charges in.
pub fn to_gateway_amount(amount: Decimal) -> Result<i64, GatewayError> {
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    if rounded <= Decimal::ZERO {
        return Err(GatewayError::InvalidAmount(amount));
    }
    rounded
        .to_i64()
        .ok_or(GatewayError::InvalidAmount(amount))
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}

fn outcome_label(result: &Result<(), &GatewayError>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(GatewayError::Timeout) => "timeout",
        Err(GatewayError::Transport(_)) | Err(GatewayError::InvalidResponse(_)) => "unavailable",
        Err(GatewayError::Rejected { .. }) | Err(GatewayError::InvalidAmount(_)) => "rejected",
    }
}

/// Zarinpal v4 REST client
#[derive(Debug, Clone)]
pub struct ZarinpalGateway {
    client: reqwest::Client,
    merchant_id: String,
    request_url: String,
    verify_url: String,
    start_pay_url: String,
}

impl ZarinpalGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Transport(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            merchant_id: config.merchant_id.clone(),
            request_url: config.request_url.clone(),
            verify_url: config.verify_url.clone(),
            start_pay_url: config.start_pay_url.clone(),
        })
    }

    /// Posts `body` and returns the `data` object, or the reason there is none.
    async fn call<B, D>(&self, operation: &'static str, url: &str, body: &B) -> Result<D, GatewayError>
    where
        B: Serialize + Sync,
        D: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let text = response.text().await.map_err(classify)?;

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) if status.is_server_error() => {
                return Err(GatewayError::Transport(format!(
                    "{} answered HTTP {}: {}",
                    operation, status, e
                )))
            }
            Err(e) => return Err(GatewayError::InvalidResponse(e.to_string())),
        };

        if envelope.data.is_object() {
            return serde_json::from_value(envelope.data)
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()));
        }
        if envelope.errors.is_object() {
            let err: ErrorBody = serde_json::from_value(envelope.errors)
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            return Err(GatewayError::Rejected {
                code: err.code,
                message: err.message,
            });
        }
        if status.is_server_error() {
            return Err(GatewayError::Transport(format!(
                "{} answered HTTP {}",
                operation, status
            )));
        }
        Err(GatewayError::InvalidResponse(format!(
            "{} answered HTTP {} without data or errors",
            operation, status
        )))
    }

    fn record(operation: &'static str, result: Result<(), &GatewayError>) {
        counter!(
            "storefront_gateway_calls_total",
            1,
            "operation" => operation,
            "outcome" => outcome_label(&result)
        );
        match result {
            Ok(()) => {}
            Err(err) if err.is_rejection() => {
                warn!(operation, error = %err, "gateway rejected call")
            }
            Err(err) => error!(operation, error = %err, "gateway call failed"),
        }
    }
}

#[async_trait]
impl PaymentGateway for ZarinpalGateway {
    #[instrument(skip(self, description))]
    async fn request_authority(
        &self,
        amount: Decimal,
        description: &str,
        callback_url: &str,
    ) -> Result<PaymentAuthority, GatewayError> {
        let result = async {
            let body = PaymentRequestBody {
                merchant_id: &self.merchant_id,
                amount: to_gateway_amount(amount)?,
                description,
                callback_url,
            };
            let data: RequestData = self.call("request", &self.request_url, &body).await?;
            info!(code = data.code, "gateway payment request answered");

            match (data.code, data.authority) {
                (CODE_OK, Some(authority)) if !authority.is_empty() => {
                    Ok(PaymentAuthority { authority })
                }
                (CODE_OK, _) => Err(GatewayError::InvalidResponse(
                    "success without authority".to_string(),
                )),
                (code, _) => Err(GatewayError::Rejected {
                    code,
                    message: data.message,
                }),
            }
        }
        .await;

        Self::record("request", result.as_ref().map(|_| ()));
        result
    }

    #[instrument(skip(self))]
    async fn verify(
        &self,
        amount: Decimal,
        authority: &str,
    ) -> Result<VerifiedPayment, GatewayError> {
        let result = async {
            let body = PaymentVerifyBody {
                merchant_id: &self.merchant_id,
                amount: to_gateway_amount(amount)?,
                authority,
            };
            let data: VerifyData = self.call("verify", &self.verify_url, &body).await?;
            info!(code = data.code, "gateway verification answered");

            if data.code != CODE_OK && data.code != CODE_ALREADY_VERIFIED {
                return Err(GatewayError::Rejected {
                    code: data.code,
                    message: data.message,
                });
            }
            let ref_id = match data.ref_id {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) if !s.is_empty() => s,
                _ => {
                    return Err(GatewayError::InvalidResponse(
                        "confirmation without ref_id".to_string(),
                    ))
                }
            };
            Ok(VerifiedPayment { ref_id })
        }
        .await;

        Self::record("verify", result.as_ref().map(|_| ()));
        result
    }

    fn redirect_url(&self, authority: &str) -> String {
        format!("{}/{}", self.start_pay_url.trim_end_matches('/'), authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AUTHORITY: &str = "A00000000000000000000000000217885159";

    fn gateway_for(server: &MockServer, timeout_secs: u64) -> ZarinpalGateway {
        let config = GatewayConfig {
            merchant_id: "merchant-1".into(),
            request_url: format!("{}/pg/v4/payment/request.json", server.uri()),
            verify_url: format!("{}/pg/v4/payment/verify.json", server.uri()),
            start_pay_url: "https://www.zarinpal.com/pg/StartPay/".into(),
            callback_url: "https://shop.example/api/v1/payments/callback".into(),
            timeout_secs,
        };
        ZarinpalGateway::new(&config).unwrap()
    }

    #[tokio::test]
    async fn request_sends_wire_format_and_returns_authority() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/request.json"))
            .and(body_json(json!({
                "merchant_id": "merchant-1",
                "amount": 250000,
                "description": "Order HP-1",
                "callback_url": "https://shop.example/cb?orderId=HP-1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"code": 100, "message": "Success", "authority": AUTHORITY, "fee_type": "Merchant", "fee": 100},
                "errors": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, 5);
        let granted = gateway
            .request_authority(
                dec!(250000),
                "Order HP-1",
                "https://shop.example/cb?orderId=HP-1",
            )
            .await
            .unwrap();
        assert_eq!(granted.authority, AUTHORITY);
        assert_eq!(
            gateway.redirect_url(&granted.authority),
            format!("https://www.zarinpal.com/pg/StartPay/{}", AUTHORITY)
        );
    }

    #[tokio::test]
    async fn request_error_envelope_is_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/request.json"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "data": [],
                "errors": {"code": -9, "message": "The input params invalid, validation error.", "validations": []}
            })))
            .mount(&server)
            .await;

        let err = gateway_for(&server, 5)
            .request_authority(dec!(1000), "Order HP-2", "https://shop.example/cb")
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Rejected { code: -9, .. });
    }

    #[tokio::test]
    async fn verify_confirms_with_numeric_ref_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/verify.json"))
            .and(body_json(json!({
                "merchant_id": "merchant-1",
                "amount": 210000,
                "authority": AUTHORITY
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"code": 100, "message": "Verified", "ref_id": 201, "card_pan": "502229******5995"},
                "errors": []
            })))
            .mount(&server)
            .await;

        let verified = gateway_for(&server, 5)
            .verify(dec!(210000), AUTHORITY)
            .await
            .unwrap();
        assert_eq!(verified.ref_id, "201");
    }

    #[tokio::test]
    async fn verify_treats_already_verified_as_confirmation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/verify.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"code": 101, "message": "Verified", "ref_id": 201},
                "errors": []
            })))
            .mount(&server)
            .await;

        let verified = gateway_for(&server, 5)
            .verify(dec!(1000), AUTHORITY)
            .await
            .unwrap();
        assert_eq!(verified.ref_id, "201");
    }

    #[tokio::test]
    async fn verify_non_confirmation_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pg/v4/payment/verify.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [],
                "errors": {"code": -51, "message": "Session is not valid, session is not active paid try."}
            })))
            .mount(&server)
            .await;

        let err = gateway_for(&server, 5)
            .verify(dec!(1000), AUTHORITY)
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Rejected { code: -51, .. });
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn slow_gateway_is_a_timeout_not_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"code": 100, "ref_id": 1}, "errors": []}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = gateway_for(&server, 1)
            .verify(dec!(1000), AUTHORITY)
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Timeout);
        assert!(!err.is_rejection());
    }

    #[tokio::test]
    async fn server_error_page_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let err = gateway_for(&server, 5)
            .request_authority(dec!(1000), "Order HP-3", "https://shop.example/cb")
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Transport(_));
    }

    #[test]
    fn amounts_round_to_whole_units() {
        assert_eq!(to_gateway_amount(dec!(250000)).unwrap(), 250000);
        assert_eq!(to_gateway_amount(dec!(1234.5)).unwrap(), 1235);
        assert_eq!(to_gateway_amount(dec!(1234.49)).unwrap(), 1234);
        assert_matches!(
            to_gateway_amount(dec!(0)),
            Err(GatewayError::InvalidAmount(_))
        );
    }
}

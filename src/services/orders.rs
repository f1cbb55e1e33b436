use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use url::Url;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Identity;
use crate::config::AppConfig;
use crate::errors::{GatewayError, ServiceError};
use crate::models::{
    validate_money, FulfillmentStatus, LineItem, NewOrder, Order, OrderPatch, OrderStats,
    PaymentStatus, ShippingInfo,
};
use crate::repositories::OrderStore;
use crate::services::catalog::ProductCatalog;
use crate::services::discounts::DiscountLookup;
use crate::services::payment_gateway::PaymentGateway;
use crate::services::pricing::MoneyCalculator;

/// Query parameter carrying the public order id on the gateway callback
pub const CALLBACK_ORDER_PARAM: &str = "orderId";

/// Tunables of the order lifecycle, resolved once at startup.
#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub amount_tolerance: Decimal,
    pub callback_url: Url,
    pub public_id_prefix: String,
    pub store_timeout: Duration,
    pub max_id_attempts: u32,
}

impl OrderSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let callback_url = Url::parse(&config.gateway.callback_url).map_err(|e| {
            ServiceError::InternalError(format!(
                "gateway callback url {:?} is invalid: {}",
                config.gateway.callback_url, e
            ))
        })?;

        Ok(Self {
            amount_tolerance: config.pricing.amount_tolerance,
            callback_url,
            public_id_prefix: config.orders.public_id_prefix.clone(),
            store_timeout: config.orders.store_timeout(),
            max_id_attempts: config.orders.max_id_attempts.max(1),
        })
    }
}

/// Time-derived public order ids, strictly increasing within the process.
///
/// Uniqueness across processes is left to the store's unique constraint.
#[derive(Debug)]
pub struct PublicIdGenerator {
    prefix: String,
    last: AtomicI64,
}

impl PublicIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::starting_at(prefix, 0)
    }

    /// Generator whose next id is at least `millis + 1`.
    pub fn starting_at(prefix: impl Into<String>, millis: i64) -> Self {
        Self {
            prefix: prefix.into(),
            last: AtomicI64::new(millis),
        }
    }

    pub fn next_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return format!("{}-{}", self.prefix, candidate),
                Err(actual) => current = actual,
            }
        }
    }
}

/// A checkout as submitted by the shopper
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub shipping_info: ShippingInfo,
    pub line_items: Vec<LineItem>,
    /// Total the client displayed; only cross-checked, never charged
    pub stated_amount: Decimal,
    pub coupon_code: Option<String>,
}

/// Where to send the shopper to pay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRedirect {
    pub order_public_id: String,
    pub authority: String,
    pub redirect_url: String,
}

/// Why a verification did not end in a paid order
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentFailure {
    #[error("payment was rejected by the gateway: {message}")]
    Rejected { code: Option<i64>, message: String },

    #[error("payment could not be confirmed with the gateway: {0}")]
    Unavailable(String),

    #[error("an earlier verification of this payment failed")]
    PreviouslyFailed,

    #[error("the order was cancelled")]
    Cancelled,
}

impl PaymentFailure {
    fn from_gateway(err: &GatewayError) -> Self {
        match err {
            GatewayError::Rejected { code, message } => PaymentFailure::Rejected {
                code: Some(*code),
                message: message.clone(),
            },
            GatewayError::InvalidAmount(_) => PaymentFailure::Rejected {
                code: None,
                message: err.to_string(),
            },
            other => PaymentFailure::Unavailable(other.to_string()),
        }
    }

    /// Whether the outcome at the gateway is still unknown
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, PaymentFailure::Unavailable(_))
    }
}

/// Result of a verification: the order as stored afterwards plus the
/// failure reason, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub order: Order,
    pub failure: Option<PaymentFailure>,
}

impl PaymentVerification {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Verdict for an order that already left `pending`; `None` while pending.
    fn settled(order: Order) -> Option<Self> {
        let failure = match order.payment_status {
            PaymentStatus::Pending => return None,
            PaymentStatus::Paid => None,
            PaymentStatus::Failed => Some(PaymentFailure::PreviouslyFailed),
            PaymentStatus::Cancelled => Some(PaymentFailure::Cancelled),
        };
        Some(Self { order, failure })
    }
}

/// Order lifecycle: checkout, payment request and payment verification.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    discounts: Arc<dyn DiscountLookup>,
    catalog: Option<Arc<dyn ProductCatalog>>,
    calculator: MoneyCalculator,
    ids: Arc<PublicIdGenerator>,
    settings: Arc<OrderSettings>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        discounts: Arc<dyn DiscountLookup>,
        calculator: MoneyCalculator,
        settings: OrderSettings,
    ) -> Self {
        let ids = Arc::new(PublicIdGenerator::new(settings.public_id_prefix.clone()));
        Self {
            store,
            gateway,
            discounts,
            catalog: None,
            calculator,
            ids,
            settings: Arc::new(settings),
        }
    }

    /// Re-snapshots line items from `catalog` instead of trusting the cart.
    pub fn with_catalog(mut self, catalog: Arc<dyn ProductCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_id_generator(mut self, ids: PublicIdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match tokio::time::timeout(self.settings.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                error!(operation, timeout = ?self.settings.store_timeout, "order store call timed out");
                counter!("storefront_store_timeouts_total", 1, "operation" => operation);
                Err(ServiceError::StoreError(format!("{} timed out", operation)))
            }
        }
    }

    async fn load_public(&self, public_id: &str) -> Result<Order, ServiceError> {
        self.bounded("find_by_public_id", self.store.find_by_public_id(public_id))
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(public_id.to_string()))
    }

    fn callback_url_for(&self, public_id: &str) -> Url {
        let mut url = self.settings.callback_url.clone();
        url.query_pairs_mut()
            .append_pair(CALLBACK_ORDER_PARAM, public_id);
        url
    }

    /// Prices the cart on the server, cross-checks the client's total and
    /// persists a pending order.
    #[instrument(skip(self, request, caller), fields(owner = caller.map(|c| c.user_id.as_str()).unwrap_or("anonymous")))]
    pub async fn create_order(
        &self,
        request: CheckoutRequest,
        caller: Option<&Identity>,
    ) -> Result<Order, ServiceError> {
        request.shipping_info.validate()?;
        for item in &request.line_items {
            item.validate()?;
        }
        if validate_money(&request.stated_amount).is_err() {
            return Err(ServiceError::ValidationError(
                "incomplete data: amount is out of range".to_string(),
            ));
        }

        let items = match &self.catalog {
            Some(catalog) => catalog.snapshot(&request.line_items)?,
            None => request.line_items,
        };

        let breakdown = self
            .calculator
            .quote(
                self.discounts.as_ref(),
                &items,
                request.coupon_code.as_deref(),
                Utc::now(),
            )
            .await?;

        if !breakdown.accepts(request.stated_amount, self.settings.amount_tolerance) {
            warn!(
                stated = %request.stated_amount,
                computed = %breakdown.total,
                "client-stated amount does not match the computed total"
            );
            counter!("storefront_amount_mismatch_total", 1);
            return Err(ServiceError::AmountMismatch {
                stated: request.stated_amount,
                computed: breakdown.total,
            });
        }

        let new_order = NewOrder {
            owner_id: caller.map(|c| c.user_id.clone()),
            shipping_info: request.shipping_info,
            line_items: items,
            subtotal: breakdown.subtotal,
            shipping_cost: breakdown.shipping_cost,
            discount: breakdown.discount,
            amount: breakdown.total,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let public_id = self.ids.next_id();
            match self.bounded("create", self.store.create(&public_id, &new_order)).await {
                Ok(order) => {
                    info!(public_id = %order.public_id, amount = %order.amount, "order created");
                    counter!("storefront_orders_created_total", 1);
                    return Ok(order);
                }
                Err(ServiceError::DuplicateId(taken)) if attempt < self.settings.max_id_attempts => {
                    warn!(public_id = %taken, attempt, "public order id already taken, generating another");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Opens a gateway payment attempt and binds its authority to the order.
    ///
    /// A gateway failure leaves the order untouched.
    #[instrument(skip(self))]
    pub async fn request_payment(&self, public_id: &str) -> Result<PaymentRedirect, ServiceError> {
        let order = self.load_public(public_id).await?;
        if order.payment_status != PaymentStatus::Pending {
            return Err(ServiceError::OrderNotPayable(order.public_id));
        }
        if order.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "order {} has nothing to charge",
                order.public_id
            )));
        }

        let callback = self.callback_url_for(&order.public_id);
        let description = format!("Order {}", order.public_id);
        let issued = self
            .gateway
            .request_authority(order.amount, &description, callback.as_str())
            .await
            .map_err(|e| {
                if e.is_rejection() {
                    warn!(error = %e, "gateway refused the payment request");
                } else {
                    error!(error = %e, "gateway unreachable for payment request");
                }
                ServiceError::from(e)
            })?;

        let patch = OrderPatch::attach_authority(issued.authority.clone());
        match self.bounded("update", self.store.update(order.id, patch)).await {
            Ok(_) => {}
            // Settled between our read and the write
            Err(ServiceError::ConcurrentModification(_)) => {
                return Err(ServiceError::OrderNotPayable(order.public_id));
            }
            Err(err) => return Err(err),
        }

        info!(public_id = %order.public_id, "payment attempt opened");
        Ok(PaymentRedirect {
            redirect_url: self.gateway.redirect_url(&issued.authority),
            authority: issued.authority,
            order_public_id: order.public_id,
        })
    }

    /// Settles the payment attempt identified by `presented_authority`.
    ///
    /// Always leaves the order `paid` or `failed` once the gateway was asked,
    /// even when the gateway could not be reached, unless a newer payment
    /// request replaced the attempt meanwhile. A confirmation always wins
    /// over a newer attempt. Orders that already left `pending` are answered
    /// from the record without calling the gateway.
    #[instrument(skip(self, presented_authority))]
    pub async fn verify_payment(
        &self,
        public_id: &str,
        presented_authority: &str,
    ) -> Result<PaymentVerification, ServiceError> {
        let order = self.load_public(public_id).await?;

        if order.payment_authority.as_deref() != Some(presented_authority) {
            warn!(public_id = %order.public_id, "presented payment authority does not match the order");
            counter!("storefront_authority_mismatch_total", 1);
            return Err(ServiceError::AuthorityMismatch(order.public_id));
        }

        let order_id = order.id;
        let amount = order.amount;
        if let Some(settled) = PaymentVerification::settled(order) {
            info!(status = %settled.order.payment_status, "payment already settled");
            return Ok(settled);
        }

        let (patch, failure, confirmed_ref) =
            match self.gateway.verify(amount, presented_authority).await {
                Ok(verified) => (
                    OrderPatch::mark_paid(presented_authority, verified.ref_id.clone()),
                    None,
                    Some(verified.ref_id),
                ),
                Err(err) => {
                    if err.is_rejection() {
                        warn!(error = %err, "gateway did not confirm the payment");
                    } else {
                        error!(error = %err, "gateway unreachable during verification, failing closed");
                    }
                    (
                        OrderPatch::mark_failed(presented_authority),
                        Some(PaymentFailure::from_gateway(&err)),
                        None,
                    )
                }
            };

        let result = match self.bounded("update", self.store.update(order_id, patch)).await {
            Ok(order) => PaymentVerification { order, failure },
            Err(ServiceError::ConcurrentModification(id)) => {
                let current = self.reload(id, public_id).await?;
                if current.payment_status != PaymentStatus::Pending {
                    let lost =
                        confirmed_ref.filter(|_| current.payment_status != PaymentStatus::Paid);
                    if let Some(ref_id) = lost {
                        error!(
                            ref_id = %ref_id,
                            status = %current.payment_status,
                            "gateway confirmed a payment the order could not record"
                        );
                    }
                    PaymentVerification::settled(current)
                        .ok_or(ServiceError::ConcurrentModification(id))?
                } else if let Some(ref_id) = confirmed_ref {
                    self.record_superseded_confirmation(id, public_id, presented_authority, ref_id)
                        .await?
                } else {
                    // A newer payment attempt owns the order now
                    info!("payment attempt superseded before it failed, order stays pending");
                    PaymentVerification {
                        order: current,
                        failure,
                    }
                }
            }
            Err(err) => return Err(err),
        };

        let outcome = if result.is_success() { "paid" } else { "failed" };
        counter!("storefront_payments_verified_total", 1, "outcome" => outcome);
        info!(status = %result.order.payment_status, "payment verification finished");
        Ok(result)
    }

    async fn reload(&self, id: Uuid, public_id: &str) -> Result<Order, ServiceError> {
        self.bounded("find_by_internal_id", self.store.find_by_internal_id(id))
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(public_id.to_string()))
    }

    /// The gateway confirmed `authority` while a newer attempt replaced it.
    /// Money was taken, so the confirmation is recorded on the still
    /// pending order.
    async fn record_superseded_confirmation(
        &self,
        id: Uuid,
        public_id: &str,
        authority: &str,
        ref_id: String,
    ) -> Result<PaymentVerification, ServiceError> {
        warn!(ref_id = %ref_id, "confirmed payment attempt was superseded, recording it anyway");
        let patch = OrderPatch::record_confirmation(authority, ref_id.clone());
        match self.bounded("update", self.store.update(id, patch)).await {
            Ok(order) => Ok(PaymentVerification {
                order,
                failure: None,
            }),
            Err(ServiceError::ConcurrentModification(id)) => {
                let current = self.reload(id, public_id).await?;
                if current.payment_status != PaymentStatus::Paid {
                    error!(
                        ref_id = %ref_id,
                        status = %current.payment_status,
                        "gateway confirmed a payment the order could not record"
                    );
                }
                PaymentVerification::settled(current)
                    .ok_or(ServiceError::ConcurrentModification(id))
            }
            Err(err) => {
                error!(ref_id = %ref_id, error = %err, "failed to record a confirmed payment");
                Err(err)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get_by_public_id(&self, public_id: &str) -> Result<Order, ServiceError> {
        self.load_public(public_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_by_internal_id(&self, id: Uuid) -> Result<Order, ServiceError> {
        self.bounded("find_by_internal_id", self.store.find_by_internal_id(id))
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(id.to_string()))
    }

    /// The caller's own orders, newest first.
    #[instrument(skip(self, caller), fields(owner = %caller.user_id))]
    pub async fn list_for_owner(&self, caller: &Identity) -> Result<Vec<Order>, ServiceError> {
        self.bounded("find_by_owner", self.store.find_by_owner(&caller.user_id))
            .await
    }

    /// Back-office order listing across all shoppers, newest first.
    #[instrument(skip(self, caller), fields(actor = %caller.user_id))]
    pub async fn list_all(
        &self,
        caller: &Identity,
        limit: u64,
    ) -> Result<Vec<Order>, ServiceError> {
        require_admin(caller, "listing all orders")?;
        self.bounded("list_recent", self.store.list_recent(limit)).await
    }

    #[instrument(skip(self, caller), fields(actor = %caller.user_id))]
    pub async fn stats(&self, caller: &Identity) -> Result<OrderStats, ServiceError> {
        require_admin(caller, "reading sales stats")?;
        self.bounded("stats", self.store.stats()).await
    }

    /// Administrative fulfillment change; payment fields are left alone.
    #[instrument(skip(self, caller), fields(actor = %caller.user_id))]
    pub async fn update_fulfillment(
        &self,
        id: Uuid,
        status: FulfillmentStatus,
        caller: &Identity,
    ) -> Result<Order, ServiceError> {
        require_admin(caller, "updating fulfillment status")?;

        let order = self
            .bounded("update", self.store.update(id, OrderPatch::fulfillment(status)))
            .await?;
        info!(public_id = %order.public_id, status = %status, "fulfillment status updated");
        Ok(order)
    }
}

fn require_admin(caller: &Identity, action: &str) -> Result<(), ServiceError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!("{} requires the admin role", action)))
    }
}

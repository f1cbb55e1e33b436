use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SHIPPING_COST: i64 = 50_000;
const DEFAULT_AMOUNT_TOLERANCE: i64 = 1;
const DEFAULT_CURRENCY: &str = "IRT";
const DEFAULT_GATEWAY_REQUEST_URL: &str = "https://api.zarinpal.com/pg/v4/payment/request.json";
const DEFAULT_GATEWAY_VERIFY_URL: &str = "https://api.zarinpal.com/pg/v4/payment/verify.json";
const DEFAULT_GATEWAY_START_PAY_URL: &str = "https://www.zarinpal.com/pg/StartPay/";
const DEFAULT_GATEWAY_CALLBACK_URL: &str = "http://localhost:8080/api/v1/payments/callback";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PUBLIC_ID_PREFIX: &str = "HP";
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ID_ATTEMPTS: u32 = 3;
const DEV_DEFAULT_JWT_SECRET: &str = "development_only_storefront_jwt_secret_do_not_deploy";

/// Pricing rules fed into the money calculator
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PricingConfig {
    /// Flat shipping charge applied to every non-empty cart
    #[serde(default = "default_shipping_cost")]
    #[validate(custom = "validate_non_negative")]
    pub shipping_cost: Decimal,

    /// Allowed drift between the client-stated and computed total
    #[serde(default = "default_amount_tolerance")]
    #[validate(custom = "validate_non_negative")]
    pub amount_tolerance: Decimal,

    /// Currency label, informational only
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            shipping_cost: default_shipping_cost(),
            amount_tolerance: default_amount_tolerance(),
            currency: default_currency(),
        }
    }
}

/// Payment gateway (Zarinpal v4) settings
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Merchant identifier issued by the gateway
    #[serde(default)]
    pub merchant_id: String,

    #[serde(default = "default_gateway_request_url")]
    #[validate(url)]
    pub request_url: String,

    #[serde(default = "default_gateway_verify_url")]
    #[validate(url)]
    pub verify_url: String,

    /// Prefix the authority is appended to for the shopper redirect
    #[serde(default = "default_gateway_start_pay_url")]
    #[validate(url)]
    pub start_pay_url: String,

    /// Where the gateway returns the shopper; `orderId` is appended per order
    #[serde(default = "default_gateway_callback_url")]
    #[validate(url)]
    pub callback_url: String,

    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            merchant_id: String::new(),
            request_url: default_gateway_request_url(),
            verify_url: default_gateway_verify_url(),
            start_pay_url: default_gateway_start_pay_url(),
            callback_url: default_gateway_callback_url(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Order lifecycle settings
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct OrdersConfig {
    /// Prefix of generated public order ids, e.g. `HP-1718000000000`
    #[serde(default = "default_public_id_prefix")]
    #[validate(length(min = 1, max = 16))]
    pub public_id_prefix: String,

    /// Upper bound for a single order store call
    #[serde(default = "default_store_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub store_timeout_secs: u64,

    /// How many fresh public ids to try when the store reports a duplicate
    #[serde(default = "default_max_id_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_id_attempts: u32,
}

impl OrdersConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            public_id_prefix: default_public_id_prefix(),
            store_timeout_secs: default_store_timeout_secs(),
            max_id_attempts: default_max_id_attempts(),
        }
    }
}

/// Server-held product entry; overrides client-sent name and price when present
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEntry {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret shared with the identity issuer
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub pricing: PricingConfig,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    #[validate]
    pub orders: OrdersConfig,

    /// Optional server-side catalog
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            pricing: PricingConfig::default(),
            gateway: GatewayConfig::default(),
            orders: OrdersConfig::default(),
            catalog: Vec::new(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.is_production() {
            if self.gateway.merchant_id.trim().is_empty() {
                let mut err = ValidationError::new("gateway_merchant_id_required");
                err.message = Some("Set APP__GATEWAY__MERCHANT_ID in production".into());
                errors.add("gateway", err);
            }
            if self.gateway.callback_url == DEFAULT_GATEWAY_CALLBACK_URL {
                let mut err = ValidationError::new("gateway_callback_url_required");
                err.message =
                    Some("Set APP__GATEWAY__CALLBACK_URL to the public callback address".into());
                errors.add("gateway", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_shipping_cost() -> Decimal {
    Decimal::from(DEFAULT_SHIPPING_COST)
}

fn default_amount_tolerance() -> Decimal {
    Decimal::from(DEFAULT_AMOUNT_TOLERANCE)
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_gateway_request_url() -> String {
    DEFAULT_GATEWAY_REQUEST_URL.to_string()
}
fn default_gateway_verify_url() -> String {
    DEFAULT_GATEWAY_VERIFY_URL.to_string()
}
fn default_gateway_start_pay_url() -> String {
    DEFAULT_GATEWAY_START_PAY_URL.to_string()
}
fn default_gateway_callback_url() -> String {
    DEFAULT_GATEWAY_CALLBACK_URL.to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_public_id_prefix() -> String {
    DEFAULT_PUBLIC_ID_PREFIX.to_string()
}
fn default_store_timeout_secs() -> u64 {
    DEFAULT_STORE_TIMEOUT_SECS
}
fn default_max_id_attempts() -> u32 {
    DEFAULT_MAX_ID_ATTEMPTS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("Must not be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must have at least 10 unique characters".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*, nested with `__`)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret deliberately has no default
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Flat delivery fee added to every order.
fn default_shipping_price() -> Decimal {
    dec!(50)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_refund_window_days() -> i64 {
    14
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_paymob_base_url() -> String {
    "https://accept.paymob.com/api".to_string()
}

fn default_currency() -> String {
    "EGP".to_string()
}

/// Paymob-style provider: token + remote order + payment key, redirect URL.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymobConfig {
    #[validate(length(min = 1, message = "Paymob API key is required"))]
    pub api_key: String,
    #[validate(length(min = 1, message = "Paymob integration id is required"))]
    pub integration_id: String,
    #[validate(length(min = 1, message = "Paymob iframe id is required"))]
    pub iframe_id: String,
    #[serde(default = "default_paymob_base_url")]
    pub base_url: String,
    /// Where the client lands after completing the iframe flow.
    pub return_url: Option<String>,
}

/// Hosted-checkout provider: server-created session, signed webhook events.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct HostedCheckoutConfig {
    #[validate(length(min = 1, message = "Hosted checkout secret key is required"))]
    pub secret_key: String,
    #[validate(length(min = 16, message = "Webhook secret must be at least 16 characters"))]
    pub webhook_secret: String,
    pub base_url: String,
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentConfig {
    /// Which provider `initiate`/`refund` go through: "paymob" or "hosted_checkout".
    #[serde(default = "PaymentConfig::default_provider")]
    pub provider: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub paymob: Option<PaymobConfig>,
    pub hosted_checkout: Option<HostedCheckoutConfig>,
}

impl PaymentConfig {
    fn default_provider() -> String {
        "paymob".to_string()
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            currency: default_currency(),
            paymob: None,
            hosted_checkout: None,
        }
    }
}

/// Application configuration, loaded from layered files plus `APP__`-prefixed
/// environment overrides.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Create tables on startup (sqlite/dev only).
    #[serde(default)]
    pub auto_schema: bool,

    #[serde(default = "default_shipping_price")]
    pub shipping_price: Decimal,

    /// Days after creation during which cancellation-with-refund is allowed.
    #[serde(default = "default_refund_window_days")]
    pub refund_window_days: i64,

    /// Comma-separated list of allowed CORS origins; permissive when unset
    /// in development.
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    #[validate]
    pub payment: PaymentConfig,
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration: `config/default` then `config/{environment}`, both
/// optional, then environment variables (`APP__PAYMENT__PROVIDER=...`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .set_default("environment", environment)?
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(
        environment = %app_config.environment,
        provider = %app_config.payment.provider,
        "Configuration loaded"
    );

    Ok(app_config)
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

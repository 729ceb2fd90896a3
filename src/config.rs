use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::env as std_env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "KES";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 12;
const DEFAULT_GATEWAY_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_GATEWAY_RETRY_DELAY_MS: u64 = 1500;
const DEFAULT_TOKEN_REFRESH_MARGIN_SECS: u64 = 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_MIN_PENDING_AGE_SECS: u64 = 120;
const DEV_DEFAULT_CONSUMER_KEY: &str = "dev-consumer-key-not-for-production";
const DEV_DEFAULT_CONSUMER_SECRET: &str = "dev-consumer-secret-not-for-production";

/// Payment gateway configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway API base URL (no trailing slash)
    #[validate(custom = "validate_http_url")]
    pub base_url: String,

    /// OAuth-style consumer key issued by the gateway
    #[validate(length(min = 1))]
    pub consumer_key: String,

    /// OAuth-style consumer secret issued by the gateway
    #[validate(length(min = 1))]
    pub consumer_secret: String,

    /// Publicly reachable URL of our /callback endpoint. Registered with the
    /// gateway as the notification target and passed on every order submission.
    #[validate(custom = "validate_http_url")]
    pub callback_url: String,

    /// Per-request timeout for gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Total attempts per gateway operation (first try included)
    #[serde(default = "default_gateway_retry_attempts")]
    #[validate(custom = "validate_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between retry attempts (milliseconds)
    #[serde(default = "default_gateway_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Refresh the cached bearer token this many seconds before it expires
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.payments.example.com/v3".to_string(),
            consumer_key: DEV_DEFAULT_CONSUMER_KEY.to_string(),
            consumer_secret: DEV_DEFAULT_CONSUMER_SECRET.to_string(),
            callback_url: "http://localhost:8080/callback".to_string(),
            request_timeout_secs: default_gateway_timeout_secs(),
            retry_attempts: default_gateway_retry_attempts(),
            retry_delay_ms: default_gateway_retry_delay_ms(),
            token_refresh_margin_secs: default_token_refresh_margin_secs(),
        }
    }
}

/// Background reconciliation sweep configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReconciliationConfig {
    /// Whether the periodic pending-payment sweep runs at all
    #[serde(default = "default_true_bool")]
    pub sweep_enabled: bool,

    /// Interval between sweep passes (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Only sweep pending transactions at least this old, so the sweep never
    /// races a checkout that is still talking to the gateway
    #[serde(default = "default_min_pending_age_secs")]
    pub min_pending_age_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            sweep_enabled: default_true_bool(),
            sweep_interval_secs: default_sweep_interval_secs(),
            min_pending_age_secs: default_min_pending_age_secs(),
        }
    }
}

/// Order confirmation email configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    /// From address on confirmation mail
    #[serde(default = "default_email_from")]
    pub from_address: String,

    /// Support contact surfaced to customers on checkout failures
    #[serde(default = "default_support_contact")]
    pub support_contact: String,

    /// HTTP endpoint of the mail relay. When unset, confirmations are logged
    /// instead of delivered.
    #[serde(default)]
    pub delivery_endpoint: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_address: default_email_from(),
            support_contact: default_support_contact(),
            delivery_endpoint: None,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Redis connection URL
    pub redis_url: String,

    /// Server host address
    pub host: String,

    /// Server port (1024-65535)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Payment gateway configuration
    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    /// Background reconciliation sweep configuration
    #[serde(default)]
    #[validate]
    pub reconciliation: ReconciliationConfig,

    /// Order confirmation email configuration
    #[serde(default)]
    #[validate]
    pub email: EmailConfig,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default = "default_false_bool")]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

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
    /// Statement timeout (seconds), 0 = disabled
    #[serde(default)]
    pub db_statement_timeout_secs: Option<u64>,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Default currency code for orders
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Creates a new configuration
    pub fn new(
        database_url: String,
        redis_url: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            gateway: GatewayConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            email: EmailConfig::default(),
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_statement_timeout_secs: None,
            event_channel_capacity: default_event_channel_capacity(),
            default_currency: default_currency(),
        }
    }

    /// Gets Redis URL reference
    pub fn redis_url(&self) -> &str {
        &self.redis_url
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

        if !self.is_development() {
            let key_is_placeholder = self.gateway.consumer_key.trim() == DEV_DEFAULT_CONSUMER_KEY;
            let secret_is_placeholder =
                self.gateway.consumer_secret.trim() == DEV_DEFAULT_CONSUMER_SECRET;
            if key_is_placeholder || secret_is_placeholder {
                let mut err = ValidationError::new("gateway_credentials_default_dev");
                err.message = Some(
                    "The bundled development gateway credentials must not be used outside development. Set APP__GATEWAY__CONSUMER_KEY and APP__GATEWAY__CONSUMER_SECRET to the values issued by the gateway."
                        .into(),
                );
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

    /// Gateway per-request timeout as a Duration
    pub fn gateway_request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway.request_timeout_secs)
    }

    /// Fixed delay between gateway retry attempts as a Duration
    pub fn gateway_retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.gateway.retry_delay_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
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
    2
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
fn default_false_bool() -> bool {
    false
}
fn default_true_bool() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024 // Default channel capacity
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_gateway_retry_attempts() -> u32 {
    DEFAULT_GATEWAY_RETRY_ATTEMPTS
}

fn default_gateway_retry_delay_ms() -> u64 {
    DEFAULT_GATEWAY_RETRY_DELAY_MS
}

fn default_token_refresh_margin_secs() -> u64 {
    DEFAULT_TOKEN_REFRESH_MARGIN_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_min_pending_age_secs() -> u64 {
    DEFAULT_MIN_PENDING_AGE_SECS
}

fn default_email_from() -> String {
    "orders@payflow.dev".to_string()
}

fn default_support_contact() -> String {
    "support@payflow.dev".to_string()
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

fn validate_http_url(value: &str) -> Result<(), ValidationError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("http_url");
        err.message = Some("Must be an absolute http:// or https:// URL".into());
        Err(err)
    }
}

fn validate_retry_attempts(attempts: u32) -> Result<(), ValidationError> {
    if attempts == 0 {
        let mut err = ValidationError::new("retry_attempts");
        err.message = Some("retry_attempts must be at least 1".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("payflow_api={},tower_http=debug", level);
    let filter_directive = std_env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Docker config (config/docker.toml) if DOCKER env var is set
/// 4. Environment variables (APP_*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
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

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://payflow.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    if env::var("DOCKER").is_ok() {
        info!("Docker environment detected");
        builder =
            builder.add_source(File::with_name(&format!("{}/docker", CONFIG_DIR)).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // NOTE: gateway credentials have dev placeholders, but outside development
    // they MUST come from a config file or environment variables. Check before
    // deserialization to produce a clear error message.
    let requires_live_credentials =
        !run_env.eq_ignore_ascii_case("development") && !run_env.eq_ignore_ascii_case("test");
    if requires_live_credentials
        && (config.get_string("gateway.consumer_key").is_err()
            || config.get_string("gateway.consumer_secret").is_err())
    {
        error!("Gateway credentials are not configured. Set APP__GATEWAY__CONSUMER_KEY and APP__GATEWAY__CONSUMER_SECRET to the values issued by the payment gateway.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "gateway credentials are required but not configured. Set APP__GATEWAY__CONSUMER_KEY and APP__GATEWAY__CONSUMER_SECRET."
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

#[cfg(test)]
mod cors_validation_tests {
    use super::*;

    fn base_config() -> AppConfig {
        let mut cfg = AppConfig::new(
            "sqlite://payflow.db?mode=memory".into(),
            "redis://127.0.0.1:6379".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        );
        // Placeholder credentials trip their own check; give the CORS tests
        // something live-looking so only the CORS constraint is under test.
        cfg.gateway.consumer_key = "live-key-f00d".into();
        cfg.gateway.consumer_secret = "live-secret-cafe".into();
        cfg
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_allows_override_flag() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }
}

#[cfg(test)]
mod gateway_validation_tests {
    use super::*;

    fn base_config(environment: &str) -> AppConfig {
        AppConfig::new(
            "sqlite://payflow.db?mode=memory".into(),
            "redis://127.0.0.1:6379".into(),
            "127.0.0.1".into(),
            8080,
            environment.into(),
        )
    }

    #[test]
    fn production_rejects_placeholder_credentials() {
        let mut cfg = base_config("production");
        cfg.cors_allow_any_origin = true;
        let err = cfg.validate_additional_constraints().unwrap_err();
        assert!(err.field_errors().contains_key("gateway"));
    }

    #[test]
    fn development_accepts_placeholder_credentials() {
        let cfg = base_config("development");
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn gateway_base_url_must_be_http() {
        let mut cfg = base_config("development");
        cfg.gateway.base_url = "ftp://payments.example.com".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_retry_attempts_is_rejected() {
        let mut cfg = base_config("development");
        cfg.gateway.retry_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_gateway_tuning_is_sane() {
        let cfg = base_config("development");
        assert_eq!(cfg.gateway.retry_attempts, 3);
        assert_eq!(cfg.gateway_request_timeout().as_secs(), 12);
        assert_eq!(cfg.gateway_retry_delay().as_millis(), 1500);
    }
}

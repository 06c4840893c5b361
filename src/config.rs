use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration load error: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Which implementation is used for a provider family. Resolved once at
/// process start; there is no runtime switching mid-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Mock,
    Real,
}

impl Default for ProviderMode {
    fn default() -> Self {
        ProviderMode::Mock
    }
}

/// Provider adapter selection and credentials.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub payments: ProviderMode,
    #[serde(default)]
    pub shipping: ProviderMode,
    #[serde(default)]
    pub tax: ProviderMode,
    #[serde(default)]
    pub notifications: ProviderMode,

    /// Secret key for the real payments gateway
    #[serde(default)]
    pub payments_secret_key: Option<String>,
    /// Webhook signing secret for inbound payment events
    #[serde(default)]
    pub payments_webhook_secret: Option<String>,
    /// Base URL for the real shipping carrier API
    #[serde(default)]
    pub shipping_api_url: Option<String>,
    #[serde(default)]
    pub shipping_api_key: Option<String>,
    /// Base URL for the real tax calculation API
    #[serde(default)]
    pub tax_api_url: Option<String>,
    #[serde(default)]
    pub tax_api_key: Option<String>,
    /// Endpoint the real notifications adapter posts to
    #[serde(default)]
    pub notifications_url: Option<String>,
    /// Outbound store webhook target and signing secret
    #[serde(default)]
    pub store_webhook_url: Option<String>,
    #[serde(default)]
    pub store_webhook_secret: Option<String>,
}

/// Pricing defaults used when a store has not configured rates.
#[derive(Clone, Debug, Deserialize)]
pub struct PricingConfig {
    /// Flat tax rate used by the mock tax provider (fraction, not percent)
    #[serde(default = "default_mock_tax_rate")]
    pub mock_tax_rate: Decimal,
    /// ISO currency code applied to new carts and pricing breakdowns
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            mock_tax_rate: default_mock_tax_rate(),
            currency: default_currency(),
        }
    }
}

fn default_mock_tax_rate() -> Decimal {
    // 7.25%
    Decimal::new(725, 4)
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    #[validate(length(min = 1))]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Maximum number of database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Provider adapter selection
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Pricing defaults
    #[serde(default)]
    pub pricing: PricingConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

impl AppConfig {
    /// Minimal constructor used by tests and tools.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            providers: ProvidersConfig::default(),
            pricing: PricingConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Initializes the tracing subscriber from the configured level.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("printshop_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads configuration from `config/default`, `config/{env}`, then
/// `APP__`-prefixed environment variables.
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://printshop.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_provider_mode_default_is_mock() {
        assert_eq!(ProviderMode::default(), ProviderMode::Mock);
    }

    #[test]
    fn test_provider_mode_deserialization() {
        let mode: ProviderMode = serde_json::from_str("\"real\"").unwrap();
        assert_eq!(mode, ProviderMode::Real);
        let mode: ProviderMode = serde_json::from_str("\"mock\"").unwrap();
        assert_eq!(mode, ProviderMode::Mock);
    }

    #[test]
    fn test_pricing_defaults() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.mock_tax_rate, dec!(0.0725));
        assert_eq!(pricing.currency, "USD");
    }

    #[test]
    fn test_app_config_constructor() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        assert!(!cfg.is_production());
        assert_eq!(cfg.providers.payments, ProviderMode::Mock);
    }
}

use config::{Config, ConfigError, Environment, File};
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
const DEFAULT_TOKEN_TTL_SECS: u64 = 2 * 60 * 60;
const DEFAULT_PLACEMENT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_PLACEMENT_RETRY_BACKOFF_MS: u64 = 50;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Public base URL used when building confirmation links sent by email
    #[validate(url)]
    pub public_base_url: String,

    /// Customer-facing page that the confirmation endpoint redirects to,
    /// carrying `?status=confirmed|expired|invalid|error`
    #[validate(url)]
    pub confirmation_redirect_url: String,

    /// Seconds a placement confirmation token stays valid
    #[serde(default = "default_token_ttl_secs")]
    pub placement_token_ttl_secs: u64,

    /// Bounded retries for transient store failures during placement
    #[serde(default = "default_retry_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub placement_retry_attempts: u32,

    /// Base backoff between placement retries, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub placement_retry_backoff_ms: u64,

    /// Mail gateway endpoint; when unset, outbound email is logged only
    #[serde(default)]
    pub mail_gateway_url: Option<String>,

    /// From address stamped on outbound email
    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    /// Comma-separated list of allowed CORS origins; unset means permissive
    /// CORS in development and an error elsewhere
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    // Database pool tuning
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}
fn default_retry_attempts() -> u32 {
    DEFAULT_PLACEMENT_RETRY_ATTEMPTS
}
fn default_retry_backoff_ms() -> u64 {
    DEFAULT_PLACEMENT_RETRY_BACKOFF_MS
}
fn default_mail_from() -> String {
    "orders@example.com".to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}

impl AppConfig {
    /// Minimal constructor used by tests and embedding callers.
    pub fn new(
        database_url: String,
        host: String,
        port: u16,
        environment: String,
        public_base_url: String,
        confirmation_redirect_url: String,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            public_base_url,
            confirmation_redirect_url,
            placement_token_ttl_secs: default_token_ttl_secs(),
            placement_retry_attempts: default_retry_attempts(),
            placement_retry_backoff_ms: default_retry_backoff_ms(),
            mail_gateway_url: None,
            mail_from: default_mail_from(),
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.placement_token_ttl_secs as i64)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration loading failed: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads configuration from `config/default.toml`, an optional
/// `config/{environment}.toml`, and `APP__*` environment variables,
/// in increasing precedence.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let environment = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("environment", environment.clone())?
        .set_default("public_base_url", "http://localhost:8080")?
        .set_default(
            "confirmation_redirect_url",
            "http://localhost:3000/order-confirmation",
        )?;

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }

    let env_path = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }

    let cfg: AppConfig = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()?;
    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Install the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            18080,
            "test".into(),
            "http://localhost:18080".into(),
            "http://localhost:3000/order-confirmation".into(),
        )
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = test_config();
        assert_eq!(cfg.placement_token_ttl_secs, 7200);
        assert_eq!(cfg.placement_retry_attempts, 3);
        assert!(cfg.is_development());
        cfg.validate().expect("default config should validate");
    }

    #[test]
    fn token_ttl_is_two_hours() {
        assert_eq!(test_config().token_ttl(), chrono::Duration::hours(2));
    }
}

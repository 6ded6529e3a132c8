//! API configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Which document store backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::Invalid(format!("unknown STORE_BACKEND '{}'", other))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    pub rate_limit_rps: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// HS256 secret for access tokens
    pub jwt_secret: String,
    pub jwt_expiry: Duration,
    /// Shared secret for `Stripe-Signature` verification
    pub stripe_webhook_secret: String,
    /// HMAC secret for signed stream URLs and playback tokens
    pub stream_signing_secret: String,
    /// Base URL that relative video paths are resolved against
    pub stream_cdn_base_url: String,
    pub stream_url_expiry: Duration,
    pub stream_token_expiry: Duration,
    /// Bound of the background task channel
    pub task_queue_capacity: usize,
    pub store_backend: StoreBackend,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            max_body_size: 10 * 1024 * 1024, // 10MB
            environment: "development".to_string(),
            jwt_secret: String::new(),
            jwt_expiry: Duration::from_secs(7 * 24 * 3600),
            stripe_webhook_secret: String::new(),
            stream_signing_secret: String::new(),
            stream_cdn_base_url: "http://localhost:8080/media".to_string(),
            stream_url_expiry: Duration::from_secs(900),
            stream_token_expiry: Duration::from_secs(6 * 3600),
            task_queue_capacity: 1024,
            store_backend: StoreBackend::Mongo,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("API_HOST", &defaults.host),
            port: env_or("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_or("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            max_body_size: env_or("MAX_BODY_SIZE", defaults.max_body_size),
            environment: env_string("ENVIRONMENT", &defaults.environment),
            jwt_secret: env_string("JWT_SECRET", ""),
            jwt_expiry: Duration::from_secs(env_or::<u64>("JWT_EXPIRY_DAYS", 7) * 24 * 3600),
            stripe_webhook_secret: env_string("STRIPE_WEBHOOK_SECRET", ""),
            stream_signing_secret: env_string("STREAM_SIGNING_SECRET", ""),
            stream_cdn_base_url: env_string("STREAM_CDN_BASE_URL", &defaults.stream_cdn_base_url),
            stream_url_expiry: Duration::from_secs(env_or("STREAM_URL_EXPIRY_SECS", 900)),
            stream_token_expiry: Duration::from_secs(env_or("STREAM_TOKEN_EXPIRY_SECS", 21600)),
            task_queue_capacity: env_or("TASK_QUEUE_CAPACITY", defaults.task_queue_capacity),
            store_backend: env_or("STORE_BACKEND", defaults.store_backend),
        }
    }

    /// Check if running in development mode.
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "development"
    }

    /// Reject settings the server cannot run with.
    ///
    /// Empty signing secrets are tolerated only with `ENVIRONMENT=development`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("JWT_SECRET", &self.jwt_secret),
            ("STREAM_SIGNING_SECRET", &self.stream_signing_secret),
        ] {
            if !value.is_empty() {
                continue;
            }
            if !self.is_development() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be set unless ENVIRONMENT=development",
                    key
                )));
            }
            warn!("{} is empty; tokens are signed with an empty key", key);
        }
        if self.task_queue_capacity == 0 {
            return Err(ConfigError::Invalid("TASK_QUEUE_CAPACITY must be positive".into()));
        }
        if self.stripe_webhook_secret.is_empty() {
            warn!("STRIPE_WEBHOOK_SECRET is not set; provider webhooks will be rejected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("mongo".parse::<StoreBackend>().unwrap(), StoreBackend::Mongo);
        assert_eq!("Memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_empty_secrets_only_in_development() {
        assert!(ApiConfig::default().validate().is_ok());

        let config = ApiConfig {
            environment: "staging".into(),
            stream_signing_secret: "stream".into(),
            ..ApiConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_production_requires_secrets() {
        let config = ApiConfig {
            environment: "production".into(),
            ..ApiConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ApiConfig {
            environment: "production".into(),
            jwt_secret: "secret".into(),
            stream_signing_secret: "stream".into(),
            ..ApiConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("API_PORT", "9090");
        std::env::set_var("JWT_EXPIRY_DAYS", "2");
        std::env::set_var("STORE_BACKEND", "memory");

        let config = ApiConfig::from_env();
        assert_eq!(config.port, 9090);
        assert_eq!(config.jwt_expiry, Duration::from_secs(2 * 24 * 3600));
        assert_eq!(config.store_backend, StoreBackend::Memory);

        std::env::remove_var("API_PORT");
        std::env::remove_var("JWT_EXPIRY_DAYS");
        std::env::remove_var("STORE_BACKEND");

        let config = ApiConfig::from_env();
        assert_eq!(config.port, 8080);
        assert_eq!(config.stream_url_expiry, Duration::from_secs(900));
    }
}

//! Configuration types for the HTTP service
//!
//! Every section is defaulted so a service starts from an empty file. The
//! service crate layers files and `RK__` environment variables on top.

use recovery_keeper_core::{
    circuit_breaker::CircuitBreakerConfig, retry::BackoffSchedule, DeadLetterQueueConfig,
    Environment, MemoryPressureConfig, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Deployment environment; staging and production are production-like
    pub environment: Environment,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Inbound webhook settings
    pub webhooks: WebhookConfig,

    /// Retry and circuit breaker settings for outbound calls
    pub resilience: ResilienceConfig,

    /// Dead-letter queue settings
    pub dead_letter: DeadLetterConfig,

    /// Memory-pressure guard settings
    pub memory: MemoryPressureConfig,

    /// Outbound platform API settings
    pub platform: PlatformApiConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check the configuration for values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "must be greater than 0"));
        }
        if self.server.max_body_size == 0 {
            return Err(invalid("server.max_body_size", "must be greater than 0"));
        }

        self.webhooks.validate(self.environment)?;
        self.resilience.validate()?;
        self.dead_letter.validate()?;
        self.platform.validate()?;

        let ratio = self.memory.threshold_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid("memory.threshold_ratio", "must be within (0, 1]"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable compression
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
            enable_cors: true,
            enable_compression: true,
        }
    }
}

/// Where the webhook shared secret comes from.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum WebhookSecretConfig {
    /// Secret inline in the configuration. Development only.
    Literal { value: String },

    /// Name of an environment variable holding the secret.
    Env { name: String },
}

impl std::fmt::Debug for WebhookSecretConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal { .. } => f
                .debug_struct("Literal")
                .field("value", &"<REDACTED>")
                .finish(),
            Self::Env { name } => f.debug_struct("Env").field("name", name).finish(),
        }
    }
}

/// Inbound webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook endpoint path
    pub endpoint_path: String,

    /// Header carrying the signature
    pub signature_header: String,

    /// Header carrying the Unix timestamp
    pub timestamp_header: String,

    /// Allowed clock skew for the timestamp header
    pub timestamp_tolerance_seconds: i64,

    pub secret: Option<WebhookSecretConfig>,

    /// Extra event types treated as known, on top of the built-in table
    pub extra_known_events: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/webhooks/whop".to_string(),
            signature_header: "x-whop-signature".to_string(),
            timestamp_header: "x-whop-timestamp".to_string(),
            timestamp_tolerance_seconds: 300,
            secret: None,
            extra_known_events: Vec::new(),
        }
    }
}

impl WebhookConfig {
    /// Timestamp tolerance as a duration.
    pub fn timestamp_tolerance(&self) -> Duration {
        Duration::from_secs(self.timestamp_tolerance_seconds.max(0) as u64)
    }

    fn validate(&self, environment: Environment) -> Result<(), ConfigError> {
        if !self.endpoint_path.starts_with('/') {
            return Err(invalid("webhooks.endpoint_path", "must start with '/'"));
        }
        if self.timestamp_tolerance_seconds <= 0 {
            return Err(invalid(
                "webhooks.timestamp_tolerance_seconds",
                "must be greater than 0",
            ));
        }

        match &self.secret {
            None if environment.is_production_like() => Err(ConfigError::Missing {
                key: "webhooks.secret".to_string(),
            }),
            Some(WebhookSecretConfig::Literal { value }) if value.is_empty() => {
                Err(invalid("webhooks.secret.value", "must not be empty"))
            }
            Some(WebhookSecretConfig::Env { name }) if name.is_empty() => {
                Err(invalid("webhooks.secret.name", "must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Circuit breaker settings for one dependency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u32,
    /// Per-attempt timeout; none when absent
    pub operation_timeout_ms: Option<u64>,
    pub half_open_max_requests: u32,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            success_threshold: 2,
            operation_timeout_ms: Some(10_000),
            half_open_max_requests: 3,
        }
    }
}

impl CircuitSettings {
    /// Convert to the core breaker configuration.
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
            success_threshold: self.success_threshold,
            operation_timeout: self.operation_timeout_ms.map(Duration::from_millis),
            half_open_max_requests: self.half_open_max_requests,
        }
    }

    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid(&format!("{}.failure_threshold", prefix), "must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(invalid(&format!("{}.success_threshold", prefix), "must be greater than 0"));
        }
        if self.half_open_max_requests == 0 {
            return Err(invalid(
                &format!("{}.half_open_max_requests", prefix),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Retry and circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,

    /// Breaker settings for every dependency without an override
    pub circuit: CircuitSettings,

    /// Per-dependency breaker settings, keyed by dependency name
    pub circuit_overrides: BTreeMap<String, CircuitSettings>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            circuit: CircuitSettings::default(),
            circuit_overrides: BTreeMap::new(),
        }
    }
}

impl ResilienceConfig {
    /// Retry policy described by this section.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier);
        if self.jitter {
            policy
        } else {
            policy.without_jitter()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_multiplier < 1.0 {
            return Err(invalid("resilience.backoff_multiplier", "must be at least 1.0"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(
                "resilience.base_delay_ms",
                "must not exceed resilience.max_delay_ms",
            ));
        }
        self.circuit.validate("resilience.circuit")?;
        for (name, settings) in &self.circuit_overrides {
            settings.validate(&format!("resilience.circuit_overrides.{}", name))?;
        }
        Ok(())
    }
}

/// Backing store for dead-letter jobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeadLetterStoreConfig {
    /// Jobs are lost on restart
    Memory,

    /// One JSON document per job under `path`
    Filesystem { path: PathBuf },
}

impl Default for DeadLetterStoreConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/dead-letter"),
        }
    }
}

/// Dead-letter queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    pub store: DeadLetterStoreConfig,

    /// Interval between background sweeps; 0 disables the sweeper
    pub sweep_interval_seconds: u64,

    pub batch_size: usize,
    pub default_max_retries: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    pub backoff_multiplier: f64,

    /// Jobs left `processing` longer than this are returned to `pending`
    pub stale_processing_seconds: u64,

    /// Recovered jobs older than this are purged; kept forever when absent
    pub recovered_retention_hours: Option<u64>,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            store: DeadLetterStoreConfig::default(),
            sweep_interval_seconds: 30,
            batch_size: 10,
            default_max_retries: 5,
            backoff_base_seconds: 60,
            backoff_max_seconds: 3600,
            backoff_multiplier: 2.0,
            stale_processing_seconds: 600,
            recovered_retention_hours: Some(168),
        }
    }
}

impl DeadLetterConfig {
    /// Queue configuration described by this section.
    pub fn queue_config(&self) -> DeadLetterQueueConfig {
        DeadLetterQueueConfig {
            backoff: BackoffSchedule {
                base_delay: Duration::from_secs(self.backoff_base_seconds),
                max_delay: Duration::from_secs(self.backoff_max_seconds),
                multiplier: self.backoff_multiplier,
                jitter: false,
            },
            default_max_retries: self.default_max_retries,
            batch_size: self.batch_size,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("dead_letter.batch_size", "must be greater than 0"));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(invalid(
                "dead_letter.sweep_interval_seconds",
                "must be greater than 0",
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(invalid("dead_letter.backoff_multiplier", "must be at least 1.0"));
        }
        if self.backoff_base_seconds > self.backoff_max_seconds {
            return Err(invalid(
                "dead_letter.backoff_base_seconds",
                "must not exceed dead_letter.backoff_max_seconds",
            ));
        }
        if let DeadLetterStoreConfig::Filesystem { path } = &self.store {
            if path.as_os_str().is_empty() {
                return Err(invalid("dead_letter.store.path", "must not be empty"));
            }
        }
        Ok(())
    }
}

/// Outbound platform API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformApiConfig {
    /// Base URL every request path is appended to
    pub base_url: String,

    /// Name of an environment variable holding the API key
    pub api_key_env: String,

    /// Timeout for one HTTP request
    pub request_timeout_seconds: u64,
}

impl Default for PlatformApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.whop.com/api/v5".to_string(),
            api_key_env: "WHOP_API_KEY".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

impl PlatformApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(invalid("platform.base_url", "must be an http(s) URL"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(invalid(
                "platform.request_timeout_seconds",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "recovery_keeper_service=info,recovery_keeper_api=info,recovery_keeper_core=info,tower_http=debug".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

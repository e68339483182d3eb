//! Outbound platform API client.
//!
//! Every call runs under the `whop_api` circuit breaker with the configured
//! retry policy. HTTP and transport failures are classified into
//! [`OperationError`] so the resilience layer can decide whether to retry.

use recovery_keeper_api::PlatformApiConfig;
use recovery_keeper_core::{
    EnhancedRecoveryOrchestrator, EnqueueOptions, FailureCategory, OperationError,
    RecoveryOptions, RecoveryResult, ResilienceEngine,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Dependency name for the platform API circuit.
pub const PLATFORM_SERVICE: &str = "whop_api";

/// Job type prefix for dead-lettered platform calls.
pub const PLATFORM_JOB_PREFIX: &str = "platform_api.";

/// HTTP method of a platform call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One platform API request.
///
/// Serialized as the job data of dead-lettered calls so it can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformCall {
    pub method: HttpMethod,

    /// Path relative to the configured base URL, e.g. `/memberships/mem_1`
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl PlatformCall {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Errors building the client
#[derive(Debug, thiserror::Error)]
pub enum PlatformClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Platform API client
pub struct PlatformApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
    engine: ResilienceEngine,
}

impl PlatformApiClient {
    /// Create client sending calls through `engine`.
    pub fn new(
        config: &PlatformApiConfig,
        api_key: Option<String>,
        engine: ResilienceEngine,
    ) -> Result<Self, PlatformClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("recovery-keeper/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;

        if api_key.is_none() {
            warn!(
                variable = %config.api_key_env,
                "No platform API key available; outbound calls are unauthenticated"
            );
        }

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            request_timeout: config.request_timeout(),
            engine,
        })
    }

    pub fn engine(&self) -> &ResilienceEngine {
        &self.engine
    }

    /// Execute `call` with retry and circuit-breaker protection.
    #[instrument(skip(self, call), fields(method = ?call.method, path = %call.path))]
    pub async fn call(&self, operation: &str, call: &PlatformCall) -> Result<Value, OperationError> {
        self.engine
            .execute(operation, || self.send_once(call))
            .await
    }

    /// Execute `call` through `orchestrator`, dead-lettering it as
    /// `platform_api.<operation>` if it finally fails.
    pub async fn call_with_recovery(
        &self,
        orchestrator: &EnhancedRecoveryOrchestrator,
        operation: &str,
        call: PlatformCall,
        options: EnqueueOptions,
    ) -> RecoveryResult<Value> {
        let job_data = serde_json::to_value(&call).unwrap_or(Value::Null);
        let recovery = RecoveryOptions::new(operation, PLATFORM_SERVICE)
            .with_retry_policy(self.engine.policy())
            .with_dead_letter(
                format!("{}{}", PLATFORM_JOB_PREFIX, operation),
                format!("{}:{}", operation, call.path),
                job_data,
                options,
            );

        orchestrator
            .execute_with_recovery(recovery, || self.send_once(&call))
            .await
    }

    /// Send `call` once, without retry or circuit protection.
    pub async fn send_once(&self, call: &PlatformCall) -> Result<Value, OperationError> {
        let url = format!("{}{}", self.base_url, call.path);

        let mut request = self
            .http
            .request(call.method.as_reqwest(), &url)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            debug!(status = status.as_u16(), path = %call.path, "Platform API returned an error status");
            return Err(OperationError::from_status(
                status.as_u16(),
                format!("Platform API returned {}: {}", status, error_text),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.classify_transport_error(&e))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            OperationError::non_retryable(
                FailureCategory::Unknown,
                format!("Failed to parse platform API response: {}", e),
            )
        })
    }

    fn classify_transport_error(&self, error: &reqwest::Error) -> OperationError {
        if error.is_timeout() {
            OperationError::Timeout {
                timeout_ms: self.request_timeout.as_millis() as u64,
            }
        } else if error.is_connect() || error.is_request() || error.is_body() {
            OperationError::retryable(
                FailureCategory::Network,
                format!("Platform API request failed: {}", error),
            )
        } else {
            OperationError::from_message(format!("Platform API request failed: {}", error))
        }
    }
}

impl std::fmt::Debug for PlatformApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .field("service", &self.engine.service())
            .finish()
    }
}

#[cfg(test)]
#[path = "outbound_tests.rs"]
mod tests;

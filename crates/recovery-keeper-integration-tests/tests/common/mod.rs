//! Common test utilities for recovery-keeper integration tests
//!
//! This module provides:
//! - A recording telemetry collector
//! - A webhook event handler whose failures can be switched on and off
//! - Builders for a fully wired application and signed webhook requests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use recovery_keeper_api::{create_router, ServiceConfig, WebhookConfig, WebhookSecretConfig};
use recovery_keeper_core::{
    CircuitState, Environment, EventEnvelope, FailureCategory, OperationError, RequestContext,
    SignatureFormat, SignatureVerifier, TelemetryCollector, Timestamp, WebhookEventHandler,
    WebhookSecret,
};
use recovery_keeper_service::{build_application, Application};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const SECRET: &str = "whsec_integration";
pub const WEBHOOK_PATH: &str = "/webhooks/whop";

// ============================================================================
// Recording Telemetry
// ============================================================================

/// Collector that keeps retry and circuit-transition events.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    retries: Mutex<Vec<(u32, Duration)>>,
    transitions: Mutex<Vec<(String, CircuitState, CircuitState)>>,
}

impl RecordingTelemetry {
    pub fn retries(&self) -> Vec<(u32, Duration)> {
        self.retries.lock().unwrap().clone()
    }

    pub fn transitions(&self) -> Vec<(String, CircuitState, CircuitState)> {
        self.transitions.lock().unwrap().clone()
    }
}

impl TelemetryCollector for RecordingTelemetry {
    fn record_retry_attempt(
        &self,
        _ctx: &RequestContext,
        attempt: u32,
        delay: Duration,
        _error: &OperationError,
    ) {
        self.retries.lock().unwrap().push((attempt, delay));
    }

    fn record_circuit_transition(&self, service: &str, from: CircuitState, to: CircuitState) {
        self.transitions
            .lock()
            .unwrap()
            .push((service.to_string(), from, to));
    }
}

// ============================================================================
// Switchable Event Handler
// ============================================================================

/// Handler that fails with a network error while `failing` is set.
#[derive(Debug, Default)]
pub struct SwitchableHandler {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl SwitchableHandler {
    pub fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookEventHandler for SwitchableHandler {
    async fn handle_event(&self, event: &EventEnvelope) -> Result<Value, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(OperationError::retryable(
                FailureCategory::Network,
                "Network timeout while provisioning access",
            ))
        } else {
            Ok(json!({ "handled": event.id }))
        }
    }
}

// ============================================================================
// Application Builders
// ============================================================================

/// Development configuration with fast retries and immediately due jobs.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig {
        environment: Environment::Development,
        webhooks: WebhookConfig {
            secret: Some(WebhookSecretConfig::Literal {
                value: SECRET.to_string(),
            }),
            ..WebhookConfig::default()
        },
        ..ServiceConfig::default()
    };
    config.resilience.max_retries = 1;
    config.resilience.base_delay_ms = 5;
    config.resilience.max_delay_ms = 20;
    config.resilience.jitter = false;
    config.dead_letter.backoff_base_seconds = 0;
    config.dead_letter.backoff_max_seconds = 0;
    config
}

pub async fn build_app(config: ServiceConfig, handler: Arc<SwitchableHandler>) -> (Application, Router) {
    let application = build_application(config, handler)
        .await
        .expect("application should assemble");
    let router = create_router(application.state.clone());
    (application, router)
}

// ============================================================================
// Requests
// ============================================================================

pub fn event_body(event_type: &str, company_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_int_1",
        "type": event_type,
        "data": { "id": "mem_1", "company_id": company_id },
        "created_at": Timestamp::now().to_rfc3339(),
    }))
    .unwrap()
}

pub fn sign(body: &[u8]) -> String {
    SignatureVerifier::new(Some(WebhookSecret::new(SECRET)))
        .sign(body, SignatureFormat::Sha256Prefixed)
        .unwrap()
}

pub fn webhook_request(body: Vec<u8>, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .header("x-whop-signature", signature)
        .header("x-whop-timestamp", Timestamp::now().unix_seconds().to_string())
        .body(Body::from(body))
        .unwrap()
}

pub fn signed_request(body: Vec<u8>) -> Request<Body> {
    let signature = sign(&body);
    webhook_request(body, &signature)
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn post(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

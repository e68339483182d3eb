//! # Recovery-Keeper HTTP Service
//!
//! HTTP surface for the Recovery-Keeper integration layer.
//!
//! This service provides:
//! - Platform webhook endpoint with signature, replay and schema validation
//! - Health endpoint reporting circuit and dead-letter state
//! - Operator endpoints for the dead-letter queue and circuit breakers
//! - Prometheus metrics

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::{
    CircuitSettings, DeadLetterConfig, DeadLetterStoreConfig, LoggingConfig, PlatformApiConfig,
    ResilienceConfig, ServerConfig, ServiceConfig, WebhookConfig, WebhookSecretConfig,
};
pub use errors::{AdminError, ConfigError, ErrorBody, ServiceError, WebhookHandlerError};
pub use metrics::PrometheusTelemetryCollector;
pub use responses::{
    CircuitListResponse, CircuitResetResponse, DeadLetterHealth, HealthResponse, JobListParams,
    JobListResponse, ProcessParams, WebhookResponse,
};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header::CONTENT_LENGTH, HeaderMap},
    response::Json,
    routing::{get, post},
    Router,
};
use recovery_keeper_core::{
    circuit_breaker::CircuitState,
    telemetry::isolate,
    webhook::KNOWN_EVENT_TYPES,
    BatchSummary, DeadLetterJob, DeadLetterQueue, DeadLetterStats, EnhancedRecoveryOrchestrator,
    EnqueueOptions, EventEnvelope, EventSchemaValidator, JobId, RecoveryOptions, RecoveryResult,
    TelemetryCollector, Timestamp, WebhookDelivery, WebhookEventHandler, WebhookSecret,
    WebhookValidator, WebhookValidatorConfig,
};
use serde_json::Value;
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tokio_util::task::TaskTracker;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, instrument, warn};

/// Dependency name under which webhook business handlers are protected.
pub const WEBHOOK_HANDLER_SERVICE: &str = "webhook_handler";

/// Job type prefix for dead-lettered webhook events.
pub const WEBHOOK_JOB_PREFIX: &str = "webhook.";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<ServiceConfig>,

    /// Validator for inbound deliveries
    pub validator: Arc<WebhookValidator>,

    /// Recovery façade used to dispatch accepted events
    pub orchestrator: Arc<EnhancedRecoveryOrchestrator>,

    /// Dead-letter queue exposed to operators
    pub dead_letter: Arc<DeadLetterQueue>,

    /// Business logic for accepted events
    pub event_handler: Arc<dyn WebhookEventHandler>,

    /// Sink for webhook verdicts
    pub telemetry: Arc<dyn TelemetryCollector>,

    /// Prometheus registry rendered on `/metrics`
    pub metrics: Arc<PrometheusTelemetryCollector>,

    /// Event dispatches still running after their 200 was sent
    pub dispatches: TaskTracker,
}

impl AppState {
    /// Create new application state
    ///
    /// Verdicts go to `metrics` until [`AppState::with_telemetry`] replaces
    /// the sink.
    pub fn new(
        config: ServiceConfig,
        validator: WebhookValidator,
        orchestrator: Arc<EnhancedRecoveryOrchestrator>,
        dead_letter: Arc<DeadLetterQueue>,
        event_handler: Arc<dyn WebhookEventHandler>,
        metrics: Arc<PrometheusTelemetryCollector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            validator: Arc::new(validator),
            orchestrator,
            dead_letter,
            event_handler,
            telemetry: metrics.clone(),
            metrics,
            dispatches: TaskTracker::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Stop accepting dispatches and wait up to `grace` for running ones.
    ///
    /// Returns `false` if some were still running when `grace` elapsed.
    pub async fn drain_dispatches(&self, grace: Duration) -> bool {
        self.dispatches.close();
        let pending = self.dispatches.len();
        if pending > 0 {
            info!(pending, "Waiting for in-flight event dispatches");
        }
        tokio::time::timeout(grace, self.dispatches.wait())
            .await
            .is_ok()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

/// Build the webhook validator described by `config`.
///
/// `secret` is resolved by the caller; configuration only names its source.
pub fn build_validator(config: &ServiceConfig, secret: Option<WebhookSecret>) -> WebhookValidator {
    let known_events = KNOWN_EVENT_TYPES
        .iter()
        .map(|event| event.to_string())
        .chain(config.webhooks.extra_known_events.iter().cloned());

    WebhookValidator::new(WebhookValidatorConfig {
        secret,
        timestamp_tolerance: config.webhooks.timestamp_tolerance(),
        environment: config.environment,
    })
    .with_schema(EventSchemaValidator::with_known_events(known_events))
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route(&state.config.webhooks.endpoint_path, post(handle_webhook))
        .layer(DefaultBodyLimit::disable());

    let health_routes = Router::new().route("/health", get(handle_health_check));

    let dead_letter_routes = Router::new()
        .route("/admin/dead-letter/stats", get(get_dead_letter_stats))
        .route("/admin/dead-letter/jobs", get(list_dead_letter_jobs))
        .route("/admin/dead-letter/jobs/{job_id}", get(get_dead_letter_job))
        .route(
            "/admin/dead-letter/jobs/{job_id}/requeue",
            post(requeue_dead_letter_job),
        )
        .route("/admin/dead-letter/process", post(process_dead_letter_jobs));

    let circuit_routes = Router::new()
        .route("/admin/circuits", get(list_circuits))
        .route("/admin/circuits/{name}/reset", post(reset_circuit));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let server = &state.config.server;
    let mut router = Router::new()
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(dead_letter_routes)
        .merge(circuit_routes)
        .merge(observability_routes);

    if server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    if server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server and run until `shutdown` resolves.
pub async fn start_server<S>(state: AppState, shutdown: S) -> Result<(), ServiceError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let server = state.config.server.clone();
    let address = format!("{}:{}", server.host, server.port);
    let addr: SocketAddr = address.parse().map_err(|e: std::net::AddrParseError| {
        ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        }
    })?;

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    info!("Starting HTTP server on {}", addr);

    // In-flight requests complete after the signal; new connections are refused.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// A signal handler that cannot be installed is logged and never resolves,
/// leaving the other signal in charge.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Handle platform webhook requests
///
/// Validation happens inline; the business handler runs on a spawned task
/// through the orchestrator so the sender gets its response immediately.
#[instrument(skip(state, headers, body))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<WebhookResponse>, WebhookHandlerError> {
    let max_size = state.config.server.max_body_size;

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_size) {
        return Err(WebhookHandlerError::PayloadTooLarge { max_size });
    }

    let body = axum::body::to_bytes(body, max_size)
        .await
        .map_err(|_| WebhookHandlerError::PayloadTooLarge { max_size })?;

    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let delivery = WebhookDelivery::new(
        body,
        header_value(&state.config.webhooks.signature_header),
        header_value(&state.config.webhooks.timestamp_header),
    );

    if delivery.envelope.is_none() {
        return Err(WebhookHandlerError::InvalidJson {
            message: "body is not a JSON document".to_string(),
        });
    }

    let verdict = state.validator.validate(&delivery);
    isolate("record_webhook_verdict", || {
        state.telemetry.record_webhook_verdict(&verdict)
    });

    if let Some(category) = verdict.rejection_category() {
        warn!(
            category = category,
            event_id = ?verdict.event_id,
            event_type = ?verdict.event_type,
            "Rejected webhook delivery"
        );
        return Err(WebhookHandlerError::ValidationFailed {
            category,
            errors: verdict.errors,
        });
    }

    let envelope = delivery
        .envelope
        .as_ref()
        .map(EventEnvelope::from_value)
        .transpose()
        .map_err(|e| WebhookHandlerError::ValidationFailed {
            category: "schema",
            errors: vec![e.to_string()],
        })?
        .ok_or_else(|| WebhookHandlerError::InternalError {
            message: "validated delivery lost its envelope".to_string(),
        })?;

    info!(
        event_id = %envelope.id,
        event_type = %envelope.event_type,
        known = verdict.is_known_event,
        "Accepted webhook delivery"
    );

    let response = WebhookResponse {
        received: true,
        event_id: envelope.id.clone(),
        event_type: envelope.event_type.clone(),
        warnings: verdict.warnings,
    };

    let orchestrator = state.orchestrator.clone();
    let handler = state.event_handler.clone();
    state.dispatches.spawn(async move {
        dispatch_event(&orchestrator, handler, envelope).await;
    });

    Ok(Json(response))
}

/// Run the business handler for `envelope` with recovery.
///
/// A final failure is dead-lettered as `webhook.<event type>` keyed by the
/// event id, carrying the envelope so it can be replayed.
pub async fn dispatch_event(
    orchestrator: &EnhancedRecoveryOrchestrator,
    handler: Arc<dyn WebhookEventHandler>,
    envelope: EventEnvelope,
) -> RecoveryResult<Value> {
    let mut enqueue = EnqueueOptions::default();
    if let Some(company) = envelope.data.get("company_id").and_then(Value::as_str) {
        enqueue = enqueue.with_company(company);
    }

    let job_data = serde_json::to_value(&envelope).unwrap_or(Value::Null);
    let options = RecoveryOptions::new(
        format!("handle_{}", envelope.event_type),
        WEBHOOK_HANDLER_SERVICE,
    )
    .with_dead_letter(
        format!("{}{}", WEBHOOK_JOB_PREFIX, envelope.event_type),
        envelope.id.clone(),
        job_data,
        enqueue,
    );

    let result = orchestrator
        .execute_with_recovery(options, || {
            let handler = handler.clone();
            let envelope = envelope.clone();
            async move { handler.handle_event(&envelope).await }
        })
        .await;

    if result.success {
        debug!(
            event_id = %envelope.id,
            attempts = result.attempts,
            "Webhook event handled"
        );
    } else {
        warn!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            attempts = result.attempts,
            dead_letter_queued = result.dead_letter_queued,
            error = ?result.error,
            "Webhook event handling failed"
        );
    }

    result
}

// ============================================================================
// Health
// ============================================================================

async fn handle_health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let circuits: std::collections::BTreeMap<String, CircuitState> = state
        .orchestrator
        .registry()
        .snapshot()
        .into_iter()
        .map(|(name, metrics)| (name, metrics.state))
        .collect();

    let dead_letter = match state.dead_letter.get_stats().await {
        Ok(stats) => DeadLetterHealth {
            pending: stats.pending,
            failed: stats.failed,
        },
        Err(e) => {
            warn!(error = %e, "Dead-letter stats unavailable for health check");
            DeadLetterHealth {
                pending: 0,
                failed: 0,
            }
        }
    };

    let degraded = circuits.values().any(|s| *s != CircuitState::Closed);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Timestamp::now(),
        circuits,
        dead_letter,
    })
}

// ============================================================================
// Dead-letter administration
// ============================================================================

async fn get_dead_letter_stats(
    State(state): State<AppState>,
) -> Result<Json<DeadLetterStats>, AdminError> {
    let stats = state.dead_letter.get_stats().await?;
    state.metrics.update_dead_letter_depth(&stats);
    Ok(Json(stats))
}

async fn list_dead_letter_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> Result<Json<JobListResponse>, AdminError> {
    let filter = params.to_filter()?;
    let jobs = state.dead_letter.list_jobs(&filter).await?;
    Ok(Json(JobListResponse {
        count: jobs.len(),
        jobs,
    }))
}

fn parse_job_id(raw: &str) -> Result<JobId, AdminError> {
    raw.parse::<JobId>().map_err(AdminError::from)
}

async fn get_dead_letter_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<DeadLetterJob>, AdminError> {
    let id = parse_job_id(&job_id)?;
    state
        .dead_letter
        .get_job(&id)
        .await?
        .map(Json)
        .ok_or(AdminError::NotFound {
            resource: format!("Dead-letter job {}", job_id),
        })
}

#[instrument(skip(state))]
async fn requeue_dead_letter_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<DeadLetterJob>, AdminError> {
    let id = parse_job_id(&job_id)?;
    let job = state.dead_letter.requeue(&id).await?;
    info!(job_id = %job.id, job_type = %job.job_type, "Dead-letter job requeued by operator");
    Ok(Json(job))
}

#[instrument(skip(state))]
async fn process_dead_letter_jobs(
    State(state): State<AppState>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<BatchSummary>, AdminError> {
    let batch_size = params
        .batch_size
        .unwrap_or(state.config.dead_letter.batch_size);
    if batch_size == 0 {
        return Err(AdminError::InvalidRequest {
            message: "batch_size must be greater than 0".to_string(),
        });
    }

    let summary = state.dead_letter.process_jobs(batch_size).await?;
    if let Ok(stats) = state.dead_letter.get_stats().await {
        state.metrics.update_dead_letter_depth(&stats);
    }
    Ok(Json(summary))
}

// ============================================================================
// Circuit administration
// ============================================================================

async fn list_circuits(State(state): State<AppState>) -> Json<CircuitListResponse> {
    Json(CircuitListResponse {
        circuits: state.orchestrator.registry().snapshot(),
    })
}

#[instrument(skip(state))]
async fn reset_circuit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CircuitResetResponse>, AdminError> {
    if !state.orchestrator.registry().reset(&name) {
        return Err(AdminError::NotFound {
            resource: format!("Circuit '{}'", name),
        });
    }

    info!(circuit = %name, "Circuit reset by operator");
    Ok(Json(CircuitResetResponse {
        name,
        state: CircuitState::Closed,
    }))
}

// ============================================================================
// Observability
// ============================================================================

async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, WebhookHandlerError> {
    if let Ok(stats) = state.dead_letter.get_stats().await {
        state.metrics.update_dead_letter_depth(&stats);
    }

    state
        .metrics
        .render()
        .map_err(|e| WebhookHandlerError::InternalError {
            message: format!("Failed to render metrics: {}", e),
        })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

//! # Recovery-Keeper Service
//!
//! Wiring for the Recovery-Keeper HTTP service.
//!
//! This crate:
//! - Loads layered configuration and initialises logging
//! - Resolves the webhook secret and builds the validator
//! - Builds the dead-letter store, queue and recovery strategies
//! - Builds the outbound platform API client
//! - Runs the HTTP server alongside the background dead-letter sweeper

pub mod handler;
pub mod logging;
pub mod outbound;
pub mod secrets;
pub mod settings;
pub mod strategies;

use recovery_keeper_api::{
    build_validator, shutdown_signal, start_server, AppState, DeadLetterStoreConfig,
    PrometheusTelemetryCollector, ServiceConfig, ServiceError,
};
use recovery_keeper_core::{
    circuit_breaker::platform_api_circuit_breaker_config, CircuitBreakerRegistry,
    CompositeTelemetryCollector, DeadLetterError, DeadLetterQueue, DeadLetterStore,
    EnhancedRecoveryOrchestrator, FilesystemDeadLetterStore, InMemoryDeadLetterStore,
    MemoryPressureGuard, ProcMemoryProbe, ResilienceEngine, TelemetryCollector,
    TracingTelemetryCollector, WebhookEventHandler,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use outbound::{PlatformApiClient, PlatformClientError, PLATFORM_SERVICE};
use secrets::SecretError;
use strategies::{PlatformCallRecoveryStrategy, WebhookReplayStrategy};

pub use handler::LoggingEventHandler;

/// Errors raised while assembling or running the service
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Webhook secret unavailable: {0}")]
    Secret(#[from] SecretError),

    #[error("Dead-letter store unavailable: {0}")]
    Storage(#[from] DeadLetterError),

    #[error("Platform API client unavailable: {0}")]
    PlatformClient(#[from] PlatformClientError),
}

impl StartupError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Service(ServiceError::BindFailed { .. }) => 1,
            Self::Service(ServiceError::ServerFailed { .. }) => 2,
            Self::Service(ServiceError::Configuration(_)) | Self::Secret(_) => 3,
            Self::Service(ServiceError::Metrics(_))
            | Self::Storage(_)
            | Self::PlatformClient(_) => 4,
        }
    }
}

/// Assembled service components
#[derive(Debug)]
pub struct Application {
    pub state: AppState,
    pub dead_letter: Arc<DeadLetterQueue>,
    pub platform: Arc<PlatformApiClient>,
}

/// Build every component from `config`.
///
/// `event_handler` receives accepted webhook events and replayed
/// dead-lettered ones.
pub async fn build_application(
    config: ServiceConfig,
    event_handler: Arc<dyn WebhookEventHandler>,
) -> Result<Application, StartupError> {
    let metrics = Arc::new(PrometheusTelemetryCollector::new().map_err(ServiceError::from)?);
    let sinks: Vec<Arc<dyn TelemetryCollector>> = vec![
        metrics.clone() as Arc<dyn TelemetryCollector>,
        Arc::new(TracingTelemetryCollector),
    ];
    let telemetry: Arc<dyn TelemetryCollector> = Arc::new(CompositeTelemetryCollector::new(sinks));

    // Circuit breakers: configured default, tuned platform default, then
    // explicit per-dependency overrides.
    let mut registry =
        CircuitBreakerRegistry::new(config.resilience.circuit.to_breaker_config())
            .with_telemetry(telemetry.clone());
    if !config.resilience.circuit_overrides.contains_key(PLATFORM_SERVICE) {
        registry = registry.with_override(PLATFORM_SERVICE, platform_api_circuit_breaker_config());
    }
    for (name, settings) in &config.resilience.circuit_overrides {
        registry = registry.with_override(name.clone(), settings.to_breaker_config());
    }
    let registry = Arc::new(registry);

    let store = build_store(&config.dead_letter.store).await?;

    let secret = secrets::resolve_webhook_secret(&config.webhooks, config.environment)?;
    let validator = build_validator(&config, secret);

    let api_key = std::env::var(&config.platform.api_key_env)
        .ok()
        .filter(|key| !key.is_empty());
    let engine = ResilienceEngine::for_service(
        &registry,
        PLATFORM_SERVICE,
        config.resilience.retry_policy(),
    )
    .with_telemetry(telemetry.clone());
    let platform = Arc::new(PlatformApiClient::new(&config.platform, api_key, engine)?);

    let dead_letter = Arc::new(
        DeadLetterQueue::new(store, config.dead_letter.queue_config())
            .with_telemetry(telemetry.clone())
            .with_strategy(Arc::new(PlatformCallRecoveryStrategy::new(platform.clone())))
            .with_strategy(Arc::new(WebhookReplayStrategy::new(event_handler.clone()))),
    );

    let memory_guard = MemoryPressureGuard::new(Arc::new(ProcMemoryProbe), config.memory)
        .with_telemetry(telemetry.clone());

    let orchestrator = Arc::new(
        EnhancedRecoveryOrchestrator::new(registry)
            .with_default_policy(config.resilience.retry_policy())
            .with_dead_letter_queue(dead_letter.clone())
            .with_memory_guard(memory_guard)
            .with_telemetry(telemetry.clone()),
    );

    info!(
        environment = %config.environment,
        strategies = ?dead_letter.strategy_names(),
        "Service components assembled"
    );

    let state = AppState::new(
        config,
        validator,
        orchestrator,
        dead_letter.clone(),
        event_handler,
        metrics,
    )
    .with_telemetry(telemetry);

    Ok(Application {
        state,
        dead_letter,
        platform,
    })
}

async fn build_store(config: &DeadLetterStoreConfig) -> Result<Arc<dyn DeadLetterStore>, StartupError> {
    Ok(match config {
        DeadLetterStoreConfig::Memory => {
            warn!("Dead-letter jobs are kept in memory and lost on restart");
            Arc::new(InMemoryDeadLetterStore::new())
        }
        DeadLetterStoreConfig::Filesystem { path } => {
            info!(path = %path.display(), "Using filesystem dead-letter store");
            Arc::new(FilesystemDeadLetterStore::new(path.clone()).await?)
        }
    })
}

/// Return crashed `processing` jobs to `pending` and purge old recovered jobs.
pub async fn housekeeping(dead_letter: &DeadLetterQueue, config: &ServiceConfig) {
    let stale_after = Duration::from_secs(config.dead_letter.stale_processing_seconds);
    match dead_letter.recover_stale_processing(stale_after).await {
        Ok(0) => {}
        Ok(count) => info!(count, "Returned stale processing jobs to pending"),
        Err(e) => error!(error = %e, "Failed to recover stale processing jobs"),
    }

    if let Some(hours) = config.dead_letter.recovered_retention_hours {
        match dead_letter
            .purge_recovered(Duration::from_secs(hours.saturating_mul(3600)))
            .await
        {
            Ok(0) => {}
            Ok(count) => info!(count, "Purged recovered dead-letter jobs"),
            Err(e) => error!(error = %e, "Failed to purge recovered dead-letter jobs"),
        }
    }
}

/// Run [`housekeeping`] every `stale_processing_seconds` until `shutdown`
/// flips to `true`, so jobs left in `processing` by a failed write are
/// returned without a restart.
pub fn spawn_housekeeping(
    dead_letter: Arc<DeadLetterQueue>,
    config: Arc<ServiceConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = Duration::from_secs(config.dead_letter.stale_processing_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => housekeeping(&dead_letter, &config).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Dead-letter housekeeping stopped");
                        break;
                    }
                }
            }
        }
    })
}

/// Run the service until `shutdown` resolves.
pub async fn run_until<S>(application: Application, shutdown: S) -> Result<(), StartupError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let config = application.state.config.clone();
    housekeeping(&application.dead_letter, &config).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = application.dead_letter.clone().spawn_processor(
        Duration::from_secs(config.dead_letter.sweep_interval_seconds),
        config.dead_letter.batch_size,
        shutdown_rx.clone(),
    );
    let janitor = spawn_housekeeping(application.dead_letter.clone(), config.clone(), shutdown_rx);

    info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting HTTP server"
    );
    let served = start_server(application.state.clone(), shutdown).await;

    // Accepted events keep running after the server stops so a failure can
    // still be dead-lettered.
    let grace = Duration::from_secs(config.server.shutdown_timeout_seconds);
    if !application.state.drain_dispatches(grace).await {
        warn!(
            timeout_seconds = grace.as_secs(),
            remaining = application.state.dispatches.len(),
            "Event dispatches did not finish within the shutdown timeout"
        );
    }

    let _ = shutdown_tx.send(true);
    let background = async {
        let _ = sweeper.await;
        let _ = janitor.await;
    };
    if tokio::time::timeout(grace, background).await.is_err() {
        warn!(
            timeout_seconds = grace.as_secs(),
            "Dead-letter background tasks did not stop within the shutdown timeout"
        );
    }

    served.map_err(StartupError::from)
}

/// Run the service until Ctrl+C or SIGTERM.
pub async fn run(application: Application) -> Result<(), StartupError> {
    run_until(application, shutdown_signal()).await
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

//! # Recovery-Keeper Service
//!
//! Binary entry point for the Recovery-Keeper HTTP service.
//!
//! This executable:
//! - Loads configuration from files and `RK__`-prefixed environment variables
//! - Initializes logging
//! - Assembles the validator, resilience engine, dead-letter queue and orchestrator
//! - Runs the HTTP server and the dead-letter sweeper until shutdown

use recovery_keeper_api::LoggingConfig;
use recovery_keeper_service::{
    build_application, logging::init_tracing, run, settings, LoggingEventHandler,
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match settings::load_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = init_tracing(&LoggingConfig::default());
            error!(error = %e, "Failed to load configuration; aborting");
            std::process::exit(3);
        }
    };

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Starting Recovery-Keeper Service"
    );

    if let Err(e) = config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    let application = match build_application(config, Arc::new(LoggingEventHandler)).await {
        Ok(application) => application,
        Err(e) => {
            error!(error = %e, "Failed to assemble service; aborting");
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = run(application).await {
        error!(error = %e, "Service terminated with an error");
        std::process::exit(e.exit_code());
    }

    info!("Recovery-Keeper Service stopped");
}

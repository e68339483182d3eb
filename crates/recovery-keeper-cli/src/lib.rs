//! # Recovery-Keeper CLI
//!
//! Command-line interface for Recovery-Keeper operators.
//!
//! This module provides CLI commands for:
//! - Signing a payload the way the webhook sender does
//! - Verifying a payload, signature and timestamp against a secret
//! - Inspecting and requeueing jobs in a filesystem dead-letter store
//! - Generating shell completions

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use recovery_keeper_core::{
    webhook::KNOWN_EVENT_TYPES, DeadLetterError, DeadLetterFilter, DeadLetterJob,
    DeadLetterQueue, DeadLetterQueueConfig, DeadLetterStatus, Environment, EventSchemaValidator,
    FilesystemDeadLetterStore, JobId, SignatureFormat, SignatureVerifier, WebhookSecret,
    WebhookValidator, WebhookValidatorConfig,
};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable holding the default dead-letter store directory.
pub const STORE_ENV: &str = "RK_DLQ_STORE";

// ============================================================================
// CLI Structure
// ============================================================================

/// Recovery-Keeper CLI - operator tooling for resilient webhook processing
#[derive(Parser)]
#[command(name = "recovery-keeper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator tooling for Recovery-Keeper")]
#[command(
    long_about = "Sign and verify webhook payloads, and inspect or requeue dead-lettered jobs"
)]
pub struct Cli {
    /// Logging level (logs go to stderr)
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Compute the signature header for a payload file
    Sign {
        /// Webhook signing secret
        #[arg(short, long, env = "RK_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,

        /// Header format to produce
        #[arg(short, long, value_enum, default_value = "sha256")]
        format: SignatureFormatArg,

        /// Payload file; `-` reads stdin
        file: PathBuf,
    },

    /// Validate a payload file as the service would
    Verify {
        /// Webhook signing secret
        #[arg(short, long, env = "RK_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,

        /// Signature header value
        #[arg(long)]
        signature: String,

        /// Timestamp header value (unix seconds)
        #[arg(short, long)]
        timestamp: Option<String>,

        /// Environment whose timestamp rules apply
        #[arg(short, long, default_value = "development")]
        environment: Environment,

        /// Accepted clock skew in seconds
        #[arg(long, default_value = "300")]
        tolerance_seconds: u64,

        /// Extra event types to treat as known
        #[arg(long = "known-event")]
        known_events: Vec<String>,

        /// Payload file; `-` reads stdin
        file: PathBuf,
    },

    /// Dead-letter store commands
    Dlq {
        #[command(subcommand)]
        action: DlqCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Signature header formats
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum SignatureFormatArg {
    /// `sha256=<hex>`
    Sha256,
    /// `v1,<hex>`
    V1,
    /// `<hex>`
    Hex,
}

impl From<SignatureFormatArg> for SignatureFormat {
    fn from(arg: SignatureFormatArg) -> Self {
        match arg {
            SignatureFormatArg::Sha256 => SignatureFormat::Sha256Prefixed,
            SignatureFormatArg::V1 => SignatureFormat::Versioned,
            SignatureFormatArg::Hex => SignatureFormat::BareHex,
        }
    }
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// Dead-Letter Commands
// ============================================================================

/// Dead-letter store subcommands
#[derive(Subcommand)]
pub enum DlqCommands {
    /// Show queue statistics
    Stats {
        /// Store directory
        #[arg(long, env = STORE_ENV)]
        store: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List jobs
    List {
        /// Store directory
        #[arg(long, env = STORE_ENV)]
        store: Option<PathBuf>,

        /// Only jobs in this status
        #[arg(long)]
        status: Option<DeadLetterStatus>,

        /// Only jobs of this type
        #[arg(long)]
        job_type: Option<String>,

        /// Only jobs of this company
        #[arg(long)]
        company: Option<String>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one job in full
    Show {
        /// Store directory
        #[arg(long, env = STORE_ENV)]
        store: Option<PathBuf>,

        /// Job ID
        job_id: String,
    },

    /// Return a failed job to the pending queue
    Requeue {
        /// Store directory
        #[arg(long, env = STORE_ENV)]
        store: Option<PathBuf>,

        /// Job ID
        job_id: String,
    },
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dead-letter store error: {0}")]
    DeadLetter(#[from] DeadLetterError),

    #[error("Output encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload failed validation: {reason}")]
    VerificationFailed { reason: String },

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },
}

impl CliError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::VerificationFailed { .. } => 1,
            Self::InvalidArgument { .. } => 2,
            Self::Io(_) | Self::Json(_) | Self::Logging { .. } => 3,
            Self::DeadLetter(DeadLetterError::NotFound { .. }) => 4,
            Self::DeadLetter(_) => 5,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(cli.command, &mut out).await
}

/// Execute one command, writing its output to `out`.
pub async fn execute(command: Commands, out: &mut dyn Write) -> Result<(), CliError> {
    match command {
        Commands::Sign {
            secret,
            format,
            file,
        } => execute_sign_command(&secret, format, &file, out).await,
        Commands::Verify {
            secret,
            signature,
            timestamp,
            environment,
            tolerance_seconds,
            known_events,
            file,
        } => {
            let options = VerifyOptions {
                signature,
                timestamp,
                environment,
                tolerance: Duration::from_secs(tolerance_seconds),
                known_events,
            };
            execute_verify_command(&secret, options, &file, out).await
        }
        Commands::Dlq { action } => execute_dlq_command(action, out).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "recovery-keeper", out);
            Ok(())
        }
    }
}

/// Initialize logging based on CLI arguments
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

// ============================================================================
// Signing and Verification
// ============================================================================

async fn read_payload(file: &Path) -> Result<Vec<u8>, CliError> {
    if file.as_os_str() == "-" {
        use tokio::io::AsyncReadExt;
        let mut body = Vec::new();
        tokio::io::stdin().read_to_end(&mut body).await?;
        Ok(body)
    } else {
        Ok(tokio::fs::read(file).await?)
    }
}

fn require_secret(secret: &str) -> Result<WebhookSecret, CliError> {
    if secret.is_empty() {
        return Err(CliError::InvalidArgument {
            arg: "secret".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(WebhookSecret::new(secret))
}

async fn execute_sign_command(
    secret: &str,
    format: SignatureFormatArg,
    file: &Path,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let body = read_payload(file).await?;
    let verifier = SignatureVerifier::new(Some(require_secret(secret)?));
    let header = verifier
        .sign(&body, format.into())
        .map_err(|e| CliError::InvalidArgument {
            arg: "secret".to_string(),
            message: e.to_string(),
        })?;

    debug!(bytes = body.len(), format = ?format, "Signed payload");
    writeln!(out, "{}", header)?;
    Ok(())
}

/// Header values and rules for `verify`.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub signature: String,
    pub timestamp: Option<String>,
    pub environment: Environment,
    pub tolerance: Duration,
    pub known_events: Vec<String>,
}

async fn execute_verify_command(
    secret: &str,
    options: VerifyOptions,
    file: &Path,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let body = read_payload(file).await?;
    let envelope: Option<Value> = serde_json::from_slice(&body).ok();

    let schema = EventSchemaValidator::with_known_events(
        KNOWN_EVENT_TYPES
            .iter()
            .map(|event| event.to_string())
            .chain(options.known_events),
    );
    let validator = WebhookValidator::new(WebhookValidatorConfig {
        secret: Some(require_secret(secret)?),
        timestamp_tolerance: options.tolerance,
        environment: options.environment,
    })
    .with_schema(schema);

    let verdict = validator.validate_parts(
        &body,
        Some(options.signature.as_str()),
        options.timestamp.as_deref(),
        envelope.as_ref(),
    );

    writeln!(out, "{}", serde_json::to_string_pretty(&verdict)?)?;

    match verdict.rejection_category() {
        None => Ok(()),
        Some(category) => Err(CliError::VerificationFailed {
            reason: category.to_string(),
        }),
    }
}

// ============================================================================
// Dead-Letter Store Commands
// ============================================================================

/// Default store location under the user's data directory.
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("recovery-keeper").join("dead-letter"))
}

async fn open_queue(store: Option<PathBuf>) -> Result<DeadLetterQueue, CliError> {
    let path = store
        .or_else(default_store_path)
        .ok_or_else(|| CliError::InvalidArgument {
            arg: "store".to_string(),
            message: format!("no store directory given and {} is not set", STORE_ENV),
        })?;
    if !path.is_dir() {
        return Err(CliError::InvalidArgument {
            arg: "store".to_string(),
            message: format!("{} is not a directory", path.display()),
        });
    }

    debug!(path = %path.display(), "Opening dead-letter store");
    let store = FilesystemDeadLetterStore::new(path).await?;
    Ok(DeadLetterQueue::new(
        Arc::new(store),
        DeadLetterQueueConfig::default(),
    ))
}

fn parse_job_id(raw: &str) -> Result<JobId, CliError> {
    raw.parse().map_err(|_| CliError::InvalidArgument {
        arg: "job_id".to_string(),
        message: format!("'{}' is not a valid job ID", raw),
    })
}

/// Human-readable age, e.g. `3d 4h`, `12m`.
pub fn format_age(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}

fn job_line(job: &DeadLetterJob) -> String {
    let age = Utc::now()
        .signed_duration_since(*job.first_failed_at.as_datetime())
        .num_seconds();
    format!(
        "{}  {:<10}  {:<36}  retries {}/{}  {:<14}  age {}",
        job.id,
        job.status,
        job.job_type,
        job.retry_count,
        job.max_retries,
        job.failure_reason,
        format_age(age)
    )
}

async fn execute_dlq_command(action: DlqCommands, out: &mut dyn Write) -> Result<(), CliError> {
    match action {
        DlqCommands::Stats { store, format } => {
            let queue = open_queue(store).await?;
            let stats = queue.get_stats().await?;
            match format {
                OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?,
                OutputFormat::Text => {
                    writeln!(out, "total:      {}", stats.total)?;
                    writeln!(out, "pending:    {}", stats.pending)?;
                    writeln!(out, "processing: {}", stats.processing)?;
                    writeln!(out, "recovered:  {}", stats.recovered)?;
                    writeln!(out, "failed:     {}", stats.failed)?;
                    writeln!(out, "avg retries: {:.2}", stats.average_retry_count)?;
                    if let Some(age) = stats.oldest_job_age_seconds {
                        writeln!(out, "oldest:     {}", format_age(age as i64))?;
                    }
                    for (job_type, count) in &stats.by_job_type {
                        writeln!(out, "  {:<36} {}", job_type, count)?;
                    }
                }
            }
            Ok(())
        }
        DlqCommands::List {
            store,
            status,
            job_type,
            company,
            limit,
            format,
        } => {
            let queue = open_queue(store).await?;
            let filter = DeadLetterFilter {
                status,
                job_type,
                company_id: company,
                limit: Some(limit),
            };
            let jobs = queue.list_jobs(&filter).await?;
            match format {
                OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&jobs)?)?,
                OutputFormat::Text => {
                    if jobs.is_empty() {
                        writeln!(out, "No jobs found")?;
                    }
                    for job in &jobs {
                        writeln!(out, "{}", job_line(job))?;
                    }
                }
            }
            Ok(())
        }
        DlqCommands::Show { store, job_id } => {
            let job_id = parse_job_id(&job_id)?;
            let queue = open_queue(store).await?;
            let job = queue
                .get_job(&job_id)
                .await?
                .ok_or(DeadLetterError::NotFound { job_id })?;
            writeln!(out, "{}", serde_json::to_string_pretty(&job)?)?;
            Ok(())
        }
        DlqCommands::Requeue { store, job_id } => {
            let job_id = parse_job_id(&job_id)?;
            let queue = open_queue(store).await?;
            let job = queue.requeue(&job_id).await?;
            info!(job_id = %job.id, "Job requeued");
            writeln!(
                out,
                "Requeued {} ({}), next attempt at {}",
                job.id,
                job.job_type,
                job.next_retry_at.to_rfc3339()
            )?;
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

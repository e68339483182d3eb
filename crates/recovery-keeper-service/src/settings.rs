//! Layered configuration loading.
//!
//! Sources, applied in order (later sources override earlier ones):
//!  1. `/etc/recovery-keeper/service.yaml`: system-wide defaults
//!  2. `./config/service.yaml`: deployment-local override
//!  3. path given by `RK_CONFIG_FILE`: operator-specified file (must exist)
//!  4. environment variables prefixed `RK__` with `__` as separator,
//!     e.g. `RK__SERVER__PORT=9090` sets `server.port`
//!
//! Absent files are fine because every field carries a serde default. A
//! malformed file or an environment value of the wrong type is an error.

use recovery_keeper_api::{ConfigError, ServiceConfig};
use std::path::{Path, PathBuf};
use tracing::info;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "RK";

/// Variable naming an explicit configuration file.
pub const CONFIG_FILE_ENV: &str = "RK_CONFIG_FILE";

/// Optional configuration files consulted before the explicit one.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["/etc/recovery-keeper/service", "config/service"];

/// Load configuration from the default sources.
pub fn load_config() -> Result<ServiceConfig, ConfigError> {
    let explicit = std::env::var(CONFIG_FILE_ENV)
        .ok()
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);

    load_config_from(DEFAULT_CONFIG_FILES, explicit.as_deref())
}

/// Load configuration from `defaults` (optional, YAML, extension implied),
/// then `explicit` (required), then the environment.
pub fn load_config_from(
    defaults: &[&str],
    explicit: Option<&Path>,
) -> Result<ServiceConfig, ConfigError> {
    let mut builder = config::Config::builder();

    for name in defaults {
        builder = builder.add_source(
            config::File::with_name(name)
                .required(false)
                .format(config::FileFormat::Yaml),
        );
    }

    if let Some(path) = explicit {
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(
            config::File::from(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    let settings = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })?;

    settings
        .try_deserialize::<ServiceConfig>()
        .map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;

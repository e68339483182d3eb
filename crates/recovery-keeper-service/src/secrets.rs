//! Webhook secret resolution.

use recovery_keeper_api::{WebhookConfig, WebhookSecretConfig};
use recovery_keeper_core::{Environment, WebhookSecret};
use tracing::{info, warn};

/// Errors resolving the configured secret
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Environment variable '{name}' holding the webhook secret is not set")]
    MissingVariable { name: String },

    #[error("Webhook secret from '{source_name}' is empty")]
    Empty { source_name: String },
}

/// Resolve the webhook secret from the process environment.
pub fn resolve_webhook_secret(
    config: &WebhookConfig,
    environment: Environment,
) -> Result<Option<WebhookSecret>, SecretError> {
    resolve_with(config, environment, |name| std::env::var(name).ok())
}

/// Resolve the webhook secret using `lookup` for environment variables.
pub fn resolve_with<F>(
    config: &WebhookConfig,
    environment: Environment,
    lookup: F,
) -> Result<Option<WebhookSecret>, SecretError>
where
    F: Fn(&str) -> Option<String>,
{
    let secret = match &config.secret {
        None => {
            warn!(
                environment = %environment,
                "No webhook secret configured; signature verification will fail closed"
            );
            return Ok(None);
        }
        Some(WebhookSecretConfig::Literal { value }) => {
            if environment.is_production_like() {
                warn!(
                    environment = %environment,
                    "Webhook secret is configured inline; use an environment variable outside development"
                );
            }
            if value.is_empty() {
                return Err(SecretError::Empty {
                    source_name: "literal".to_string(),
                });
            }
            WebhookSecret::new(value.clone())
        }
        Some(WebhookSecretConfig::Env { name }) => {
            let value = lookup(name).ok_or_else(|| SecretError::MissingVariable {
                name: name.clone(),
            })?;
            if value.is_empty() {
                return Err(SecretError::Empty {
                    source_name: name.clone(),
                });
            }
            info!(variable = %name, "Loaded webhook secret from environment");
            WebhookSecret::new(value)
        }
    };

    Ok(Some(secret))
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;

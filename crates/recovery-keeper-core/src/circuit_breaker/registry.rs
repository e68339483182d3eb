//! Process-wide lookup of circuit breakers by dependency name.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitHooks, CircuitMetrics};
use crate::telemetry::{NoOpTelemetryCollector, TelemetryCollector};

/// Hands out one shared [`CircuitBreaker`] per dependency name.
///
/// Breakers are created lazily on first lookup. Every caller asking for the
/// same name receives the same instance, so all of them observe the same
/// health signal.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    hooks: CircuitHooks,
    telemetry: Arc<dyn TelemetryCollector>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
            hooks: CircuitHooks::default(),
            telemetry: Arc::new(NoOpTelemetryCollector),
        }
    }

    /// Use `config` instead of the default for the named dependency.
    pub fn with_override(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Telemetry sink handed to every breaker created from now on.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Transition hooks handed to every breaker created from now on.
    pub fn with_hooks(mut self, hooks: CircuitHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Configuration a breaker for `name` is (or will be) created with.
    pub fn config_for(&self, name: &str) -> &CircuitBreakerConfig {
        self.overrides.get(name).unwrap_or(&self.default_config)
    }

    /// Fetch the breaker for `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        // Another caller may have created it between the two locks
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(service = name, "Creating circuit breaker");
                Arc::new(
                    CircuitBreaker::new(name, self.config_for(name).clone())
                        .with_hooks(self.hooks.clone())
                        .with_telemetry(self.telemetry.clone()),
                )
            })
            .clone()
    }

    /// Existing breaker for `name`, if one was created.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Sorted names of all created breakers.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Metrics for every created breaker, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, CircuitMetrics> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.metrics()))
            .collect()
    }

    /// Reset one breaker. Returns `false` if no breaker has that name.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every breaker.
    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        info!(count = breakers.len(), "Resetting all circuit breakers");
        for breaker in breakers {
            breaker.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("default_config", &self.default_config)
            .field("breakers", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

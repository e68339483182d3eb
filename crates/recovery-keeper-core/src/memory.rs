//! # Memory Pressure
//!
//! Samples process memory and decides whether an operation may start.
//!
//! In `Advisory` mode pressure is recorded and the task yields before the
//! operation still runs. In `Enforce` mode the operation is rejected with
//! [`OperationError::MemoryPressure`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::OperationError;
use crate::telemetry::{isolate, NoOpTelemetryCollector, TelemetryCollector};

/// One memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Resident memory of this process.
    pub used_bytes: u64,
    /// Memory available to the host.
    pub total_bytes: u64,
}

impl MemorySample {
    /// Fraction of total memory in use, 0.0 when the total is unknown.
    pub fn usage_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Source of memory readings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemoryProbe: Send + Sync {
    /// Current reading, or `None` when the platform offers none.
    async fn sample(&self) -> Option<MemorySample>;
}

// ============================================================================
// Probes
// ============================================================================

/// Reads `/proc/self/status` and `/proc/meminfo`. Reports nothing elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMemoryProbe;

impl ProcMemoryProbe {
    /// Extract a `kB` value for `key` from a `/proc` document, in bytes.
    pub(crate) fn parse_kib(document: &str, key: &str) -> Option<u64> {
        document.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
            kib.checked_mul(1024)
        })
    }
}

#[async_trait]
impl MemoryProbe for ProcMemoryProbe {
    async fn sample(&self) -> Option<MemorySample> {
        let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
        let meminfo = tokio::fs::read_to_string("/proc/meminfo").await.ok()?;

        Some(MemorySample {
            used_bytes: Self::parse_kib(&status, "VmRSS")?,
            total_bytes: Self::parse_kib(&meminfo, "MemTotal")?,
        })
    }
}

/// Probe returning a fixed reading.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub MemorySample);

impl FixedMemoryProbe {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        Self(MemorySample {
            used_bytes,
            total_bytes,
        })
    }
}

#[async_trait]
impl MemoryProbe for FixedMemoryProbe {
    async fn sample(&self) -> Option<MemorySample> {
        Some(self.0)
    }
}

// ============================================================================
// Guard
// ============================================================================

/// What the guard does when usage is over the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryGuardMode {
    /// Record, yield, and still run the operation.
    #[default]
    Advisory,
    /// Reject the operation.
    Enforce,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPressureConfig {
    /// Usage ratio above which memory is under pressure, in (0, 1].
    pub threshold_ratio: f64,
    pub mode: MemoryGuardMode,
}

impl Default for MemoryPressureConfig {
    fn default() -> Self {
        Self {
            threshold_ratio: 0.9,
            mode: MemoryGuardMode::Advisory,
        }
    }
}

/// Result of one guard assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryCheck {
    /// Reading taken, if the probe produced one.
    pub sample: Option<MemorySample>,
    pub under_pressure: bool,
    /// Set when the guard enforces and usage is over the threshold.
    pub rejection: Option<OperationError>,
}

/// Gate consulted before starting an operation.
pub struct MemoryPressureGuard {
    probe: Arc<dyn MemoryProbe>,
    config: MemoryPressureConfig,
    telemetry: Arc<dyn TelemetryCollector>,
}

impl MemoryPressureGuard {
    pub fn new(probe: Arc<dyn MemoryProbe>, config: MemoryPressureConfig) -> Self {
        Self {
            probe,
            config,
            telemetry: Arc::new(NoOpTelemetryCollector),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &MemoryPressureConfig {
        &self.config
    }

    /// Sample memory and apply the configured mode.
    ///
    /// # Errors
    ///
    /// `MemoryPressure` when over the threshold in `Enforce` mode.
    pub async fn check(&self) -> Result<MemoryCheck, OperationError> {
        let check = self.assess().await;
        match check.rejection.clone() {
            Some(error) => Err(error),
            None => Ok(check),
        }
    }

    /// Sample memory and apply the configured mode, keeping the sample even
    /// when the operation is rejected.
    pub async fn assess(&self) -> MemoryCheck {
        let Some(sample) = self.probe.sample().await else {
            debug!("Memory probe returned no sample");
            return MemoryCheck {
                sample: None,
                under_pressure: false,
                rejection: None,
            };
        };

        if sample.usage_ratio() <= self.config.threshold_ratio {
            return MemoryCheck {
                sample: Some(sample),
                under_pressure: false,
                rejection: None,
            };
        }

        isolate("memory_pressure", || self.telemetry.record_memory_pressure(&sample));

        let rejection = match self.config.mode {
            MemoryGuardMode::Advisory => {
                warn!(
                    used_bytes = sample.used_bytes,
                    usage_ratio = sample.usage_ratio(),
                    threshold = self.config.threshold_ratio,
                    "Memory pressure; deferring before operation"
                );
                // Let other tasks run and release memory before we start
                tokio::task::yield_now().await;
                None
            }
            MemoryGuardMode::Enforce => {
                warn!(
                    used_bytes = sample.used_bytes,
                    usage_ratio = sample.usage_ratio(),
                    threshold = self.config.threshold_ratio,
                    "Memory pressure; rejecting operation"
                );
                Some(OperationError::MemoryPressure {
                    used_bytes: sample.used_bytes,
                    limit_bytes: (sample.total_bytes as f64 * self.config.threshold_ratio) as u64,
                })
            }
        };

        MemoryCheck {
            sample: Some(sample),
            under_pressure: true,
            rejection,
        }
    }
}

impl std::fmt::Debug for MemoryPressureGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPressureGuard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

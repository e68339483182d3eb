//! Timestamp-window validation for inbound deliveries.

use crate::{Environment, Timestamp};
use std::time::Duration;

/// Default tolerance between the delivery timestamp and local time.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Timestamp validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    #[error("Missing timestamp header")]
    Missing,

    #[error("Malformed timestamp header: '{value}'")]
    Malformed { value: String },

    #[error("Timestamp is outside allowed window ({skew_seconds}s skew exceeds {tolerance_seconds}s)")]
    OutsideWindow {
        skew_seconds: u64,
        tolerance_seconds: u64,
    },
}

/// Outcome of a timestamp check that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampCheck {
    /// Header present and inside the window.
    Verified(Timestamp),
    /// Header absent in an environment that permits it.
    NotProvided,
}

/// Rejects stale or replayed deliveries by their timestamp header.
///
/// A missing header is only tolerated in development and test environments.
#[derive(Debug, Clone)]
pub struct ReplayGuard {
    tolerance: Duration,
    environment: Environment,
}

impl ReplayGuard {
    /// Create a guard with the given tolerance window.
    pub fn new(tolerance: Duration, environment: Environment) -> Self {
        Self {
            tolerance,
            environment,
        }
    }

    /// Tolerance window in use.
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Check the header against the current time.
    pub fn check(&self, header: Option<&str>) -> Result<TimestampCheck, TimestampError> {
        self.check_at(header, Timestamp::now())
    }

    /// Check the header against an explicit reference time.
    pub fn check_at(
        &self,
        header: Option<&str>,
        now: Timestamp,
    ) -> Result<TimestampCheck, TimestampError> {
        let Some(raw) = header.map(str::trim).filter(|h| !h.is_empty()) else {
            return if self.environment.requires_timestamp() {
                Err(TimestampError::Missing)
            } else {
                Ok(TimestampCheck::NotProvided)
            };
        };

        let seconds = parse_unix_seconds(raw)?;
        let delivered = Timestamp::from_unix_seconds(seconds).map_err(|_| {
            TimestampError::Malformed {
                value: raw.to_string(),
            }
        })?;

        let skew = now.unix_seconds().abs_diff(seconds);
        if skew > self.tolerance.as_secs() {
            return Err(TimestampError::OutsideWindow {
                skew_seconds: skew,
                tolerance_seconds: self.tolerance.as_secs(),
            });
        }

        Ok(TimestampCheck::Verified(delivered))
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE, Environment::default())
    }
}

fn parse_unix_seconds(raw: &str) -> Result<i64, TimestampError> {
    // Only plain non-negative integers; "+5", "-5" and "1.5" are malformed.
    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(TimestampError::Malformed {
            value: raw.to_string(),
        });
    }

    raw.parse::<i64>().map_err(|_| TimestampError::Malformed {
        value: raw.to_string(),
    })
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;

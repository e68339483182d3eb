//! Request context threaded through one logical unit of work.

use crate::{RequestId, Timestamp};
use std::time::{Duration, Instant};

/// Context for one logical call and all of its retry attempts.
///
/// Owned by the in-flight call; never shared across tasks or persisted.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation: String,
    pub service: String,
    pub request_id: RequestId,
    pub started_at: Timestamp,
    started: Instant,
    /// Attempts made so far, including the one in flight.
    pub attempts: u32,
    /// Retries scheduled so far (attempts after the first).
    pub retries: u32,
}

impl RequestContext {
    /// Create context for a new unit of work.
    pub fn new(operation: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            service: service.into(),
            request_id: RequestId::new(),
            started_at: Timestamp::now(),
            started: Instant::now(),
            attempts: 0,
            retries: 0,
        }
    }

    /// Use a caller-supplied request id.
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record the start of a new attempt.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        if self.attempts > 1 {
            self.retries += 1;
        }
        self.attempts
    }
}

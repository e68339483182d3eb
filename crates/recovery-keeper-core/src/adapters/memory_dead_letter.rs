//! # In-Memory Dead-Letter Store
//!
//! Process-local store for tests and single-instance development setups.

use crate::dead_letter::{
    due_order, filter_jobs, DeadLetterError, DeadLetterFilter, DeadLetterJob, DeadLetterStatus,
    DeadLetterStore,
};
use crate::{JobId, Timestamp};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Dead-letter store backed by a map behind one async mutex.
///
/// Holding the mutex for the whole of `claim_due` makes the claim atomic.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    jobs: Mutex<HashMap<JobId, DeadLetterJob>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn insert(&self, job: &DeadLetterJob) -> Result<(), DeadLetterError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(DeadLetterError::AlreadyExists { job_id: job.id });
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<DeadLetterJob>, DeadLetterError> {
        Ok(self.jobs.lock().await.get(job_id).cloned())
    }

    async fn update(&self, job: &DeadLetterJob) -> Result<(), DeadLetterError> {
        match self.jobs.lock().await.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(DeadLetterError::NotFound { job_id: job.id }),
        }
    }

    async fn claim_due(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<DeadLetterJob>, DeadLetterError> {
        let mut jobs = self.jobs.lock().await;

        let mut due: Vec<&DeadLetterJob> = jobs.values().filter(|j| j.is_due(now)).collect();
        due.sort_by(|a, b| due_order(a, b));
        let ids: Vec<JobId> = due.into_iter().take(limit).map(|j| j.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = DeadLetterStatus::Processing;
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterJob>, DeadLetterError> {
        let jobs = self.jobs.lock().await;
        Ok(filter_jobs(jobs.values().cloned(), filter))
    }

    async fn delete(&self, job_id: &JobId) -> Result<bool, DeadLetterError> {
        Ok(self.jobs.lock().await.remove(job_id).is_some())
    }
}

#[cfg(test)]
#[path = "memory_dead_letter_tests.rs"]
mod tests;

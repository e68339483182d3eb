//! # Filesystem Dead-Letter Store
//!
//! Local filesystem implementation of the DeadLetterStore trait for
//! single-node deployments and operator tooling.

use crate::dead_letter::{
    due_order, filter_jobs, DeadLetterError, DeadLetterFilter, DeadLetterJob, DeadLetterStatus,
    DeadLetterStore,
};
use crate::{JobId, Timestamp};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Filesystem-based dead-letter store
///
/// Stores each job as `<base>/<job_id>.json`. Writes go to a temporary file
/// that is then renamed over the target. A store-wide async lock serialises
/// every operation in this process, which makes `claim_due` atomic.
///
/// # Examples
///
/// ```no_run
/// use recovery_keeper_core::adapters::FilesystemDeadLetterStore;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FilesystemDeadLetterStore::new(PathBuf::from("./data/dead-letter")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FilesystemDeadLetterStore {
    base_path: PathBuf,
    lock: Mutex<()>,
}

impl FilesystemDeadLetterStore {
    /// Create new filesystem store
    ///
    /// # Errors
    ///
    /// Returns error if base path cannot be created or accessed.
    pub async fn new(base_path: PathBuf) -> Result<Self, DeadLetterError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to create base directory: {}", e),
            })?;

        Ok(Self {
            base_path,
            lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn job_path(&self, job_id: &JobId) -> PathBuf {
        self.base_path.join(format!("{}.json", job_id))
    }

    async fn read_job(&self, path: &Path) -> Result<Option<DeadLetterJob>, DeadLetterError> {
        let json = match fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DeadLetterError::Storage {
                    message: format!("Failed to read job file: {}", e),
                })
            }
        };

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| DeadLetterError::SerializationFailed {
                message: format!("Failed to deserialize job {}: {}", path.display(), e),
            })
    }

    async fn write_job(&self, job: &DeadLetterJob) -> Result<(), DeadLetterError> {
        let json = serde_json::to_string_pretty(job).map_err(|e| {
            DeadLetterError::SerializationFailed {
                message: format!("Failed to serialize job: {}", e),
            }
        })?;

        let path = self.job_path(&job.id);
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to create temp file: {}", e),
            })?;

        file.write_all(json.as_bytes())
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to write job: {}", e),
            })?;

        file.sync_all()
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to flush job file: {}", e),
            })?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to rename temp file: {}", e),
            })
    }

    /// Load every stored job. Unreadable documents are skipped with a warning.
    async fn read_all(&self) -> Result<Vec<DeadLetterJob>, DeadLetterError> {
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to read store directory: {}", e),
            })?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DeadLetterError::Storage {
                message: format!("Failed to read directory entry: {}", e),
            })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_job(&path).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job file"),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl DeadLetterStore for FilesystemDeadLetterStore {
    async fn insert(&self, job: &DeadLetterJob) -> Result<(), DeadLetterError> {
        let _lock = self.lock.lock().await;
        if fs::try_exists(self.job_path(&job.id)).await.unwrap_or(false) {
            return Err(DeadLetterError::AlreadyExists { job_id: job.id });
        }
        self.write_job(job).await
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<DeadLetterJob>, DeadLetterError> {
        let _lock = self.lock.lock().await;
        self.read_job(&self.job_path(job_id)).await
    }

    async fn update(&self, job: &DeadLetterJob) -> Result<(), DeadLetterError> {
        let _lock = self.lock.lock().await;
        if !fs::try_exists(self.job_path(&job.id)).await.unwrap_or(false) {
            return Err(DeadLetterError::NotFound { job_id: job.id });
        }
        self.write_job(job).await
    }

    async fn claim_due(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<DeadLetterJob>, DeadLetterError> {
        let _lock = self.lock.lock().await;

        let mut due: Vec<DeadLetterJob> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|j| j.is_due(now))
            .collect();
        due.sort_by(due_order);
        due.truncate(limit);

        for job in &mut due {
            job.status = DeadLetterStatus::Processing;
            job.updated_at = now;
            self.write_job(job).await?;
        }
        Ok(due)
    }

    async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterJob>, DeadLetterError> {
        let _lock = self.lock.lock().await;
        Ok(filter_jobs(self.read_all().await?, filter))
    }

    async fn delete(&self, job_id: &JobId) -> Result<bool, DeadLetterError> {
        let _lock = self.lock.lock().await;
        match fs::remove_file(self.job_path(job_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DeadLetterError::Storage {
                message: format!("Failed to delete job file: {}", e),
            }),
        }
    }
}

#[cfg(test)]
#[path = "filesystem_dead_letter_tests.rs"]
mod tests;

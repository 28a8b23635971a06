//! Dead-letter storage.
//!
//! [`DeadLetterStore`] is the persistence seam: dead-letter records are the
//! one piece of state meant to outlive a process restart, so deployments
//! back this trait with a durable store. [`MemoryDeadLetterStore`] is the
//! in-process implementation used by tests and single-node setups.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::dead_letter::types::{ArchivedJob, DeadLetterJob, ProcessOptions};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Dead-letter record not found: {id}")]
    NotFound { id: String },

    #[error("Dead-letter store backend error: {message}")]
    Backend { message: String },
}

/// Active and archived dead-letter record storage.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn insert(&self, job: DeadLetterJob) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<DeadLetterJob>, StoreError>;

    /// Replace an existing active record.
    async fn update(&self, job: DeadLetterJob) -> Result<(), StoreError>;

    /// Remove an active record, returning it. Used on successful recovery.
    async fn remove(&self, id: &str) -> Result<Option<DeadLetterJob>, StoreError>;

    /// Active records matching the filters, oldest first, up to
    /// `options.limit`.
    async fn list(&self, options: &ProcessOptions) -> Result<Vec<DeadLetterJob>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Move an active record to the archive with a reason.
    async fn archive(&self, id: &str, reason: &str) -> Result<ArchivedJob, StoreError>;

    async fn archived_count(&self) -> Result<usize, StoreError>;

    async fn get_archived(&self, id: &str) -> Result<Option<ArchivedJob>, StoreError>;
}

/// In-process store over two maps guarded by one lock. Sufficient for the
/// engine's single-writer access pattern; swap for a durable backend in
/// multi-node deployments.
#[derive(Default)]
pub struct MemoryDeadLetterStore {
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    active: HashMap<String, DeadLetterJob>,
    archived: HashMap<String, ArchivedJob>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn insert(&self, job: DeadLetterJob) -> Result<(), StoreError> {
        self.inner.write().active.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeadLetterJob>, StoreError> {
        Ok(self.inner.read().active.get(id).cloned())
    }

    async fn update(&self, job: DeadLetterJob) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.active.contains_key(&job.id) {
            return Err(StoreError::NotFound { id: job.id });
        }
        inner.active.insert(job.id.clone(), job);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<Option<DeadLetterJob>, StoreError> {
        Ok(self.inner.write().active.remove(id))
    }

    async fn list(&self, options: &ProcessOptions) -> Result<Vec<DeadLetterJob>, StoreError> {
        let inner = self.inner.read();
        let mut jobs: Vec<DeadLetterJob> = inner
            .active
            .values()
            .filter(|job| {
                options
                    .queue
                    .as_ref()
                    .map(|q| &job.original_queue_name == q)
                    .unwrap_or(true)
            })
            .filter(|job| {
                options
                    .priority
                    .map(|p| job.priority == p)
                    .unwrap_or(true)
            })
            .filter(|job| {
                options
                    .older_than
                    .map(|cutoff| job.first_failed_at < cutoff)
                    .unwrap_or(true)
            })
            .filter(|job| {
                options
                    .strategy
                    .as_ref()
                    .map(|s| job.retry_strategies.contains(s))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.first_failed_at);
        if options.limit > 0 {
            jobs.truncate(options.limit);
        }
        Ok(jobs)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().active.len())
    }

    async fn archive(&self, id: &str, reason: &str) -> Result<ArchivedJob, StoreError> {
        let mut inner = self.inner.write();
        let job = inner
            .active
            .remove(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let archived = ArchivedJob {
            job,
            archived_at: Utc::now(),
            archive_reason: reason.to_string(),
        };
        inner.archived.insert(id.to_string(), archived.clone());
        Ok(archived)
    }

    async fn archived_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().archived.len())
    }

    async fn get_archived(&self, id: &str) -> Result<Option<ArchivedJob>, StoreError> {
        Ok(self.inner.read().archived.get(id).cloned())
    }
}

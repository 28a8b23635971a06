//! Dead-letter data model: the dead-letter job record, recovery metadata,
//! processing options/outcomes, and recovery errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatcher::types::{AttemptFailure, JobPriority, TerminalFailure};

/// A job whose queue-level retry budget is exhausted, held for
/// classification and possible automated recovery.
///
/// Created exactly once per exhaustion. `failure_history` is immutable from
/// this point on; only `metadata` accumulates recovery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub id: String,
    pub original_queue_name: String,
    pub job_name: String,
    pub data: Value,
    pub failure_reason: String,
    pub failure_history: Vec<AttemptFailure>,
    pub total_attempts: u32,
    pub max_attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub priority: JobPriority,
    pub delay_ms: u64,
    /// Names of registered strategies whose condition matched, in registry
    /// order. Computed once at insertion.
    pub retry_strategies: Vec<String>,
    pub metadata: RecoveryMetadata,
    pub tags: Vec<String>,
}

impl DeadLetterJob {
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.first_failed_at).num_days()
    }
}

/// Recovery bookkeeping accumulated on an active dead-letter record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryMetadata {
    pub recovery_attempts: u32,
    pub recovery_job_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_recovery_at: Option<DateTime<Utc>>,
}

/// An archived dead-letter record, moved out of the active store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedJob {
    pub job: DeadLetterJob,
    pub archived_at: DateTime<Utc>,
    pub archive_reason: String,
}

/// Filters for a processing pass over the active store
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub limit: usize,
    pub strategy: Option<String>,
    pub older_than: Option<DateTime<Utc>>,
    pub queue: Option<String>,
    pub priority: Option<JobPriority>,
}

impl ProcessOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

/// Outcome for one dead-letter job in a processing pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Recovered { new_job_id: String, strategy: String },
    Archived { reason: String },
    Failed { reason: String },
}

/// Aggregate report for one processing pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub recovered: usize,
    pub archived: usize,
    pub failed: usize,
    pub outcomes: Vec<(String, RecoveryOutcome)>,
}

/// Engine-level counters for the metrics surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub active_jobs: usize,
    pub archived_jobs: usize,
    pub recoveries_succeeded: u64,
    pub recoveries_failed: u64,
    pub alerts_raised: u64,
}

/// Recovery failures, surfaced per attempt
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Unknown dead-letter job: {id}")]
    UnknownJob { id: String },

    #[error("Dead-letter job {id} reached the recovery cap ({attempts} attempts)")]
    RecoveryCapReached { id: String, attempts: u32 },

    #[error("Strategy '{strategy}' for job {id} requires manual intervention")]
    ManualOnly { id: String, strategy: String },

    #[error("No applicable retry strategy for dead-letter job {id}")]
    NoApplicableStrategy { id: String },

    #[error("Strategy '{strategy}' retry budget exhausted for job {id}")]
    StrategyBudgetExhausted { id: String, strategy: String },

    #[error("Resubmission failed for job {id}: {message}")]
    ResubmissionFailed { id: String, message: String },

    #[error("Dead-letter store error: {0}")]
    Store(String),
}

impl From<TerminalFailure> for DeadLetterJob {
    /// Bare record from a terminal failure; strategies and tags are filled
    /// in by the recovery engine at insertion.
    fn from(failure: TerminalFailure) -> Self {
        let now = Utc::now();
        let first_failed_at = failure
            .failure_history
            .first()
            .map(|f| f.failed_at)
            .unwrap_or(now);
        let last_failed_at = failure
            .failure_history
            .last()
            .map(|f| f.failed_at)
            .unwrap_or(now);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            original_queue_name: failure.queue,
            job_name: failure.job_name,
            data: failure.payload,
            failure_reason: failure.failure_reason,
            failure_history: failure.failure_history,
            total_attempts: failure.total_attempts,
            max_attempts: failure.max_attempts,
            first_failed_at,
            last_failed_at,
            priority: failure.priority,
            delay_ms: 0,
            retry_strategies: Vec::new(),
            metadata: RecoveryMetadata::default(),
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_failure_conversion_keeps_history() {
        let failure = TerminalFailure {
            queue: "email".to_string(),
            job_name: "send-welcome".to_string(),
            payload: json!({"to": "user@example.com"}),
            priority: JobPriority::High,
            failure_reason: "ETIMEDOUT".to_string(),
            failure_history: vec![
                AttemptFailure {
                    attempt: 1,
                    failed_at: Utc::now() - chrono::Duration::minutes(5),
                    error: "ETIMEDOUT".to_string(),
                    processing_duration_ms: Some(3000),
                },
                AttemptFailure {
                    attempt: 2,
                    failed_at: Utc::now(),
                    error: "ETIMEDOUT".to_string(),
                    processing_duration_ms: Some(2800),
                },
            ],
            total_attempts: 2,
            max_attempts: 2,
        };

        let job = DeadLetterJob::from(failure);
        assert_eq!(job.original_queue_name, "email");
        assert_eq!(job.failure_history.len(), 2);
        assert!(job.first_failed_at < job.last_failed_at);
        assert_eq!(job.metadata.recovery_attempts, 0);
        // The exhausted job's priority survives into the record.
        assert_eq!(job.priority, JobPriority::High);
    }
}

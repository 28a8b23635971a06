//! Batch engine data model: jobs, per-item state, progress aggregates,
//! results, and the processing-strategy configuration bundle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::dispatcher::types::{BackoffKind, JobPriority};

/// Batch lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

/// Per-item lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemState {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

/// Lifecycle record for one input element. Owned exclusively by the batch
/// engine; item index is stable, completion order is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemStatus {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: BatchItemState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub processing_time_ms: u64,
}

impl BatchItemStatus {
    pub fn pending(index: usize) -> Self {
        Self {
            index,
            id: None,
            status: BatchItemState::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            processing_time_ms: 0,
        }
    }
}

/// Aggregate progress, mutated by the engine as items complete.
///
/// Invariant: `completed_items + failed_items + skipped_items <= total_items`
/// at every observation point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    pub current_item: usize,
    pub progress_pct: f64,
    /// Items per second over the batch so far
    pub current_throughput: f64,
    pub status: BatchStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

impl BatchProgress {
    pub fn queued(total_items: usize) -> Self {
        Self {
            total_items,
            completed_items: 0,
            failed_items: 0,
            skipped_items: 0,
            current_item: 0,
            progress_pct: 0.0,
            current_throughput: 0.0,
            status: BatchStatus::Queued,
            started_at: None,
            last_activity_at: Utc::now(),
        }
    }

    pub fn processed_items(&self) -> usize {
        self.completed_items + self.failed_items + self.skipped_items
    }

    pub fn recompute_pct(&mut self) {
        if self.total_items > 0 {
            self.progress_pct = 100.0 * self.processed_items() as f64 / self.total_items as f64;
        }
    }
}

/// Immutable description of one submitted batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub name: String,
    pub batch_type: String,
    pub priority: JobPriority,
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry_attempts: u32,
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Value>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Returned synchronously from a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub batch_id: String,
    /// Rough estimate based on item count and strategy concurrency
    pub estimated_duration_ms: u64,
    /// Batches already queued or running ahead of this one
    pub queue_position: usize,
}

/// One item-level error captured into the batch result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemError {
    pub item_index: usize,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Processing-time and memory metrics for a finished batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub avg_processing_time_ms: f64,
    pub max_processing_time_ms: u64,
    pub min_processing_time_ms: u64,
    pub memory_usage_bytes: Option<u64>,
}

/// Final aggregate for a finished (or cancelled) batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total_items: usize,
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub throughput_items_per_sec: f64,
    pub errors: Vec<BatchItemError>,
    pub warnings: Vec<String>,
    pub metrics: BatchMetrics,
}

/// Item retry policy inside one batch, independent of queue-level retries
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ItemRetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
    pub kind: BackoffKind,
}

impl ItemRetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay_ms: 0,
            kind: BackoffKind::Fixed,
        }
    }

    /// Delay before the given retry (1-based retry number).
    pub fn delay_for_retry(&self, retry: u32) -> std::time::Duration {
        let ms = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Linear => self.delay_ms.saturating_mul(u64::from(retry.max(1))),
            BackoffKind::Exponential => self
                .delay_ms
                .saturating_mul(2u64.saturating_pow(retry.saturating_sub(1).min(16))),
        };
        std::time::Duration::from_millis(ms)
    }
}

/// Named, immutable configuration bundle selected by batch type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStrategy {
    pub name: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry: ItemRetryPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_bytes: Option<u64>,
    pub timeout_ms: u64,
    pub pause_on_error: bool,
    pub skip_on_error: bool,
}

/// Per-call overrides merged over the named strategy; `None` keeps the
/// strategy value.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub name: Option<String>,
    pub priority: Option<JobPriority>,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub retry: Option<ItemRetryPolicy>,
    pub skip_on_error: Option<bool>,
    pub pause_on_error: Option<bool>,
    pub memory_limit_bytes: Option<u64>,
    pub metadata: HashMap<String, Value>,
    pub tags: Vec<String>,
}

/// Batch submission failures, surfaced synchronously
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Batch contains no items")]
    EmptyBatch,

    #[error("Batch of {size} items exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Unknown batch: {batch_id}")]
    UnknownBatch { batch_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_pct_tracks_processed() {
        let mut progress = BatchProgress::queued(200);
        progress.completed_items = 40;
        progress.failed_items = 8;
        progress.skipped_items = 2;
        progress.recompute_pct();
        assert_eq!(progress.processed_items(), 50);
        assert!((progress.progress_pct - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_terminal_states() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(!BatchStatus::Running.is_terminal());
        assert!(!BatchStatus::Paused.is_terminal());
    }

    #[test]
    fn test_item_retry_delay_kinds() {
        let linear = ItemRetryPolicy {
            attempts: 3,
            delay_ms: 100,
            kind: BackoffKind::Linear,
        };
        assert_eq!(linear.delay_for_retry(2).as_millis(), 200);

        let exponential = ItemRetryPolicy {
            attempts: 3,
            delay_ms: 100,
            kind: BackoffKind::Exponential,
        };
        assert_eq!(exponential.delay_for_retry(3).as_millis(), 400);
    }
}

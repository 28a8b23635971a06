//! # System Constants
//!
//! Core constants and enums that define the operational boundaries of the
//! job orchestration subsystem: well-known queue names, lifecycle event
//! names, health indicators, and hard ceilings.

use serde::{Deserialize, Serialize};

/// Well-known queue names owned by the multi-queue dispatcher.
///
/// Every queue here has a declared concurrency, retry default, and retention
/// policy (see [`crate::config::QueueConfig::platform_defaults`]). Producers
/// submit through the typed dispatcher helpers rather than raw strings.
pub mod queues {
    pub const EMAIL: &str = "email";
    pub const MEDIA: &str = "media";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const MODERATION: &str = "moderation";
    pub const ANALYTICS: &str = "analytics";
    pub const BULK: &str = "bulk";

    /// All platform queues, in the order they are registered at startup.
    pub const ALL: [&str; 6] = [EMAIL, MEDIA, NOTIFICATIONS, MODERATION, ANALYTICS, BULK];
}

/// Lifecycle events published through the subsystem event channel
pub mod events {
    // Dispatcher lifecycle
    pub const JOB_SUBMITTED: &str = "job.submitted";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_RETRYING: &str = "job.retrying";
    pub const JOB_EXHAUSTED: &str = "job.exhausted";

    // Dead-letter lifecycle
    pub const DEAD_LETTER_ADDED: &str = "dead_letter.added";
    pub const DEAD_LETTER_RECOVERED: &str = "dead_letter.recovered";
    pub const DEAD_LETTER_RECOVERY_FAILED: &str = "dead_letter.recovery_failed";
    pub const DEAD_LETTER_ARCHIVED: &str = "dead_letter.archived";
    pub const DEAD_LETTER_ALERT: &str = "dead_letter.alert";

    // Batch lifecycle
    pub const BATCH_SUBMITTED: &str = "batch.submitted";
    pub const BATCH_COMPLETED: &str = "batch.completed";
    pub const BATCH_PAUSED: &str = "batch.paused";
    pub const BATCH_CANCELLED: &str = "batch.cancelled";
}

/// Aggregate health indicators surfaced by the dispatcher health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        }
    }

    /// Combine two statuses, keeping the more severe one.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::{Error, Warning};
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Warning, _) | (_, Warning) => Warning,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Waiting-job backlog at which a queue degrades the aggregate health status
pub const DEFAULT_WARNING_BACKLOG: u64 = 1000;

/// Hard ceiling on batch size accepted by the batch execution engine
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// How long terminal batch state is retained before the sweep purges it
pub const BATCH_STATE_RETENTION_HOURS: i64 = 24;

/// Pause applied between chunks when process memory exceeds the threshold
pub const MEMORY_BACKPRESSURE_PAUSE_MS: u64 = 5_000;

/// Default interval for the dead-letter sweep loop
pub const DEAD_LETTER_SWEEP_INTERVAL_SECS: u64 = 300;

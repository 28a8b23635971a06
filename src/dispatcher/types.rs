//! Core job submission types shared by the dispatcher and the queue broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::HealthStatus;

/// Cap applied to every computed backoff delay
const MAX_BACKOFF_MS: u64 = 900_000; // 15 minutes

/// Four-level job priority, mapped to the broker's numeric ordering.
///
/// Lower numeric value is served first: urgent=1, high=2, normal=3, low=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Numeric priority used for broker ordering. Injective and total.
    pub fn as_value(&self) -> u8 {
        match self {
            JobPriority::Urgent => 1,
            JobPriority::High => 2,
            JobPriority::Normal => 3,
            JobPriority::Low => 4,
        }
    }

    /// Inverse of [`Self::as_value`]. Unknown values default to `Normal`.
    pub fn from_value(value: u8) -> Self {
        match value {
            1 => JobPriority::Urgent,
            2 => JobPriority::High,
            4 => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }

    /// Parse a priority label. Unknown values default to `Normal`.
    pub fn parse(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "urgent" => JobPriority::Urgent,
            "high" => JobPriority::High,
            "low" => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Urgent => "urgent",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }
}

/// Delay growth curve applied between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

/// Retry backoff policy for one job: kind plus base delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub base_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn fixed(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms,
        }
    }

    pub fn linear(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Linear,
            base_delay_ms,
        }
    }

    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms,
        }
    }

    /// Delay before the given retry attempt (1-based), with a small jitter
    /// on the exponential curve to avoid thundering-herd retries.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw_ms = match self.kind {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt)),
            BackoffKind::Exponential => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(20));
                let base = self.base_delay_ms.saturating_mul(factor);
                let jitter = 1.0 + fastrand::f64() * 0.1;
                (base as f64 * jitter) as u64
            }
        };
        Duration::from_millis(raw_ms.min(MAX_BACKOFF_MS))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(1_000)
    }
}

/// Caller-supplied submission options, merged over the queue defaults.
///
/// Every field is optional; `None` means "use the queue's configured default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    pub priority: Option<JobPriority>,
    pub delay_ms: Option<u64>,
    pub attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// Handle returned from a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub queue: String,
    pub job_name: String,
    pub submitted_at: DateTime<Utc>,
}

/// Point-in-time counts for one queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Per-queue portion of the health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    pub status: HealthStatus,
    pub reachable: bool,
    pub waiting: u64,
    pub active: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregate health report across all registered queues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub queues: HashMap<String, QueueHealth>,
    pub checked_at: DateTime<Utc>,
}

/// Terminal failure handed from a worker pool to the dead-letter engine
/// once a job's retry budget is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalFailure {
    pub queue: String,
    pub job_name: String,
    pub payload: Value,
    pub priority: JobPriority,
    pub failure_reason: String,
    pub failure_history: Vec<AttemptFailure>,
    pub total_attempts: u32,
    pub max_attempts: u32,
}

/// One failed processing attempt, recorded in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub failed_at: DateTime<Utc>,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_duration_ms: Option<u64>,
}

/// Dispatcher-level failures surfaced synchronously at submission time
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown queue: {queue}")]
    UnknownQueue { queue: String },

    #[error("Dispatcher is shutting down; new submissions are refused")]
    ShuttingDown,

    #[error("Broker operation failed: {message}")]
    Broker { message: String },
}

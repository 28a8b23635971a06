//! # Configuration
//!
//! Serde-backed configuration for the orchestration subsystem, loaded through
//! the `config` crate from optional files plus `JOBFLOW_*` environment
//! overrides. Every section carries defaults so the subsystem boots with no
//! configuration present; queue configuration is immutable after
//! initialization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::{self, queues};
use crate::dispatcher::types::BackoffPolicy;
use crate::error::{JobFlowError, Result};

/// Root configuration for the subsystem
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JobFlowConfig {
    pub dispatcher: DispatcherConfig,
    pub batch: BatchEngineConfig,
    pub dead_letter: DeadLetterConfig,
    /// Named queues owned by the dispatcher; defaults to the platform set
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub queues: HashMap<String, QueueConfig>,
}

impl JobFlowConfig {
    /// Load configuration: optional `config/jobflow.toml` (plus an
    /// environment-specific override file), then `JOBFLOW_*` variables.
    pub fn load() -> Result<Self> {
        let environment =
            std::env::var("JOBFLOW_ENV").unwrap_or_else(|_| "development".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/jobflow").required(false))
            .add_source(
                config::File::with_name(&format!("config/jobflow.{environment}")).required(false),
            )
            .add_source(config::Environment::with_prefix("JOBFLOW").separator("__"))
            .build()
            .map_err(|e| JobFlowError::ConfigurationError(e.to_string()))?;

        let mut parsed: JobFlowConfig = settings
            .try_deserialize()
            .map_err(|e| JobFlowError::ConfigurationError(e.to_string()))?;

        if parsed.queues.is_empty() {
            parsed.queues = QueueConfig::platform_defaults();
        }
        parsed.validate()?;
        Ok(parsed)
    }

    /// Default configuration with the full platform queue set.
    pub fn with_platform_queues() -> Self {
        Self {
            queues: QueueConfig::platform_defaults(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(JobFlowError::ConfigurationError(
                "at least one queue must be configured".to_string(),
            ));
        }
        for (name, queue) in &self.queues {
            if queue.concurrency == 0 {
                return Err(JobFlowError::ConfigurationError(format!(
                    "queue {name} must have concurrency > 0"
                )));
            }
            if queue.attempts == 0 {
                return Err(JobFlowError::ConfigurationError(format!(
                    "queue {name} must allow at least one attempt"
                )));
            }
        }
        if self.batch.max_batch_size == 0 {
            return Err(JobFlowError::ConfigurationError(
                "batch.max_batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-queue configuration: worker concurrency, retry defaults, retention.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Long-lived worker tasks pulling from this queue
    pub concurrency: usize,
    /// Default processing attempts before a job is dead-lettered
    pub attempts: u32,
    /// Default backoff between failed attempts
    pub backoff: BackoffPolicy,
    /// Retained completed/failed job records on brokers that store them
    pub retention: RetentionPolicy,
}

/// Record-retention caps for durable broker backends. The in-process
/// broker keeps bare counters, so it has nothing to trim; a backend that
/// stores finished job records applies these when a queue is declared.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RetentionPolicy {
    pub completed: u32,
    pub failed: u32,
}

impl QueueConfig {
    fn new(concurrency: usize, attempts: u32, base_delay_ms: u64, retention: (u32, u32)) -> Self {
        Self {
            concurrency,
            attempts,
            backoff: BackoffPolicy::exponential(base_delay_ms),
            retention: RetentionPolicy {
                completed: retention.0,
                failed: retention.1,
            },
        }
    }

    /// The queue set the rest of the platform relies on.
    pub fn platform_defaults() -> HashMap<String, QueueConfig> {
        HashMap::from([
            (queues::EMAIL.to_string(), Self::new(10, 3, 2_000, (100, 50))),
            (queues::MEDIA.to_string(), Self::new(5, 2, 5_000, (50, 25))),
            (
                queues::NOTIFICATIONS.to_string(),
                Self::new(15, 5, 1_000, (200, 100)),
            ),
            (
                queues::MODERATION.to_string(),
                Self::new(8, 2, 3_000, (100, 50)),
            ),
            (
                queues::ANALYTICS.to_string(),
                Self::new(12, 3, 1_500, (500, 100)),
            ),
            (queues::BULK.to_string(), Self::new(3, 5, 10_000, (100, 50))),
        ])
    }
}

/// Dispatcher-wide tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Waiting backlog at which a queue degrades aggregate health to warning
    pub warning_backlog: u64,
    /// Deadline for draining in-flight workers on shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            warning_backlog: constants::DEFAULT_WARNING_BACKLOG,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Batch execution engine tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchEngineConfig {
    /// Hard ceiling on accepted batch sizes
    pub max_batch_size: usize,
    /// Completed batch results retained before oldest-first eviction
    pub max_retained_results: usize,
    /// Process memory ceiling that triggers inter-chunk backpressure
    pub memory_threshold_bytes: u64,
    /// Pause applied when the memory ceiling is exceeded
    pub backpressure_pause_ms: u64,
    /// Interval for the terminal-state retention sweep
    pub sweep_interval_secs: u64,
}

impl Default for BatchEngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: constants::DEFAULT_MAX_BATCH_SIZE,
            max_retained_results: 100,
            memory_threshold_bytes: 512 * 1024 * 1024,
            backpressure_pause_ms: constants::MEMORY_BACKPRESSURE_PAUSE_MS,
            sweep_interval_secs: 3_600,
        }
    }
}

/// Dead-letter recovery engine tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Automated recoveries allowed per dead-letter job
    pub max_recovery_attempts: u32,
    /// Age past which active records are archived instead of retried
    pub archive_after_days: i64,
    /// Interval for the autonomous sweep
    pub sweep_interval_secs: u64,
    /// Records pulled per sweep pass
    pub sweep_batch_size: usize,
    pub alert_thresholds: AlertThresholds,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
            archive_after_days: 7,
            sweep_interval_secs: constants::DEAD_LETTER_SWEEP_INTERVAL_SECS,
            sweep_batch_size: 50,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

/// Thresholds at which dead-letter growth raises an alert event
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Total active dead-letter records
    pub job_count: usize,
    /// Rolling failure rate (failures per minute) over the alert window
    pub failure_rate: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            job_count: 100,
            failure_rate: 10.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::types::BackoffKind;

    #[test]
    fn test_platform_queue_defaults_match_contract() {
        let queues = QueueConfig::platform_defaults();
        assert_eq!(queues.len(), 6);

        let notifications = &queues[queues::NOTIFICATIONS];
        assert_eq!(notifications.concurrency, 15);
        assert_eq!(notifications.attempts, 5);
        assert_eq!(notifications.backoff.kind, BackoffKind::Exponential);
        assert_eq!(notifications.backoff.base_delay_ms, 1_000);
        assert_eq!(notifications.retention.completed, 200);

        let bulk = &queues[queues::BULK];
        assert_eq!(bulk.concurrency, 3);
        assert_eq!(bulk.attempts, 5);
        assert_eq!(bulk.backoff.base_delay_ms, 10_000);
    }

    #[test]
    fn test_default_config_validates() {
        let config = JobFlowConfig::with_platform_queues();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = JobFlowConfig::with_platform_queues();
        config.queues.get_mut(queues::EMAIL).unwrap().concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_queue_set_rejected() {
        let config = JobFlowConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = JobFlowConfig::with_platform_queues();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: JobFlowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.queues.len(), 6);
        assert_eq!(
            parsed.dead_letter.sweep_interval_secs,
            config.dead_letter.sweep_interval_secs
        );
    }
}

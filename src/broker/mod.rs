//! # Queue Broker Interface
//!
//! The durable queue broker is an external collaborator: this module only
//! defines the boundary the orchestration layer consumes — enqueue with
//! priority/delay, blocking dequeue, acknowledge/fail, and per-queue counts.
//! The broker owns at-least-once delivery and per-attempt backoff scheduling;
//! everything above it (dispatch, batching, dead-letter recovery) is ours.
//!
//! [`MemoryBroker`] is the in-process implementation used by the local
//! runtime and the test suite.

pub mod memory;

pub use memory::MemoryBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::dispatcher::types::{AttemptFailure, BackoffPolicy};

/// Fully-resolved enqueue options. The dispatcher merges caller options over
/// queue defaults before anything reaches the broker, so nothing here is
/// optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Numeric priority; lower values are served first
    pub priority: u8,
    /// Initial visibility delay in milliseconds (0 = immediately visible)
    pub delay_ms: u64,
    /// Total processing attempts allowed before the job is exhausted
    pub attempts: u32,
    /// Backoff policy applied between failed attempts
    pub backoff: BackoffPolicy,
}

/// One job delivery handed to a worker. The same logical job may be
/// delivered multiple times with an increasing attempt number.
#[derive(Debug, Clone)]
pub struct DeliveredJob {
    pub job_id: String,
    pub queue: String,
    pub job_name: String,
    pub payload: Value,
    /// 1-based attempt number for this delivery
    pub attempt: u32,
    pub max_attempts: u32,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
}

/// Per-queue job counts as reported by the broker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Outcome of failing a delivery back to the broker
#[derive(Debug, Clone)]
pub enum FailDisposition {
    /// The broker re-queued the job with the given visibility delay
    Retrying { next_attempt: u32, delay: Duration },
    /// The retry budget is exhausted; the job left the queue for good and
    /// its accumulated failure history is handed back to the caller
    Exhausted { failure_history: Vec<AttemptFailure> },
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Unknown queue: {queue}")]
    UnknownQueue { queue: String },

    #[error("Queue {queue} is closed")]
    QueueClosed { queue: String },

    #[error("Delivery {job_id} is not active on queue {queue}")]
    UnknownDelivery { job_id: String, queue: String },

    #[error("Broker failure: {message}")]
    Internal { message: String },
}

/// Minimal broker contract the orchestration layer is written against.
///
/// Implementations must provide at-least-once delivery: a failed delivery is
/// either re-queued (after the job's backoff delay) or reported exhausted,
/// never silently dropped. Acknowledged deliveries are removed exactly once.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Declare a queue. Idempotent.
    async fn create_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Enqueue a job, returning its broker-assigned id.
    async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<String, BrokerError>;

    /// Block until a job is available or the queue is closed.
    ///
    /// `None` is returned once the queue is closed; jobs still waiting at
    /// that point stay queued for a later restart rather than being handed
    /// out. In-flight (active) deliveries are unaffected.
    async fn dequeue(&self, queue: &str) -> Result<Option<DeliveredJob>, BrokerError>;

    /// Acknowledge a successful delivery, removing the job.
    async fn ack(&self, job: &DeliveredJob) -> Result<(), BrokerError>;

    /// Report a failed delivery. The broker records the failure and either
    /// schedules a retry per the job's backoff policy or declares the job
    /// exhausted.
    async fn fail(&self, job: &DeliveredJob, error: &str) -> Result<FailDisposition, BrokerError>;

    /// Current per-queue counts.
    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError>;

    /// Close all queues: pending dequeues return `None` and further
    /// enqueues are refused. Active deliveries remain active so a durable
    /// broker can redeliver them.
    async fn close(&self);
}

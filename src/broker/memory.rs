//! In-process queue broker with priority ordering, delayed visibility, and
//! at-least-once redelivery semantics.
//!
//! Used by the local runtime and the test suite. A durable broker (e.g. a
//! Postgres-backed queue) drops in behind the same [`QueueBroker`] trait.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    BrokerError, DeliveredJob, EnqueueOptions, FailDisposition, QueueBroker, QueueCounts,
};
use crate::dispatcher::types::{AttemptFailure, BackoffPolicy};

/// One logical job held by the broker across its delivery attempts
struct JobRecord {
    job_id: String,
    job_name: String,
    payload: Value,
    priority: u8,
    max_attempts: u32,
    backoff: BackoffPolicy,
    /// Deliveries handed out so far
    attempt: u32,
    failure_history: Vec<AttemptFailure>,
    enqueued_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
struct QueueState {
    /// Immediately dispatchable jobs, ordered by (priority, arrival sequence)
    ready: BTreeMap<(u8, u64), JobRecord>,
    /// Jobs waiting out a visibility or backoff delay, ordered by due time
    delayed: BTreeMap<(Instant, u64), JobRecord>,
    /// Deliveries currently held by workers, by job id
    active: HashMap<String, JobRecord>,
    completed: u64,
    failed: u64,
    closed: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// In-memory [`QueueBroker`] implementation.
pub struct MemoryBroker {
    queues: RwLock<HashMap<String, Arc<QueueInner>>>,
    sequence: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn queue(&self, queue: &str) -> Result<Arc<QueueInner>, BrokerError> {
        self.queues
            .read()
            .get(queue)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue {
                queue: queue.to_string(),
            })
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Move every due delayed job into the ready set. Caller holds the lock.
    fn promote_due(state: &mut QueueState, now: Instant, seq: &AtomicU64) {
        while let Some((&(due_at, _), _)) = state.delayed.first_key_value() {
            if due_at > now {
                break;
            }
            if let Some(((_, _), record)) = state.delayed.pop_first() {
                let key = (record.priority, seq.fetch_add(1, Ordering::Relaxed));
                state.ready.insert(key, record);
            }
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QueueBroker for MemoryBroker {
    async fn create_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut queues = self.queues.write();
        queues.entry(queue.to_string()).or_insert_with(|| {
            debug!(queue = %queue, "Queue created");
            Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            })
        });
        Ok(())
    }

    async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<String, BrokerError> {
        let inner = self.queue(queue)?;
        let job_id = Uuid::new_v4().to_string();
        let record = JobRecord {
            job_id: job_id.clone(),
            job_name: job_name.to_string(),
            payload,
            priority: options.priority,
            max_attempts: options.attempts.max(1),
            backoff: options.backoff,
            attempt: 0,
            failure_history: Vec::new(),
            enqueued_at: Utc::now(),
        };

        {
            let mut state = inner.state.lock();
            if state.closed {
                return Err(BrokerError::QueueClosed {
                    queue: queue.to_string(),
                });
            }
            let seq = self.next_seq();
            if options.delay_ms > 0 {
                let due_at = Instant::now() + std::time::Duration::from_millis(options.delay_ms);
                state.delayed.insert((due_at, seq), record);
            } else {
                state.ready.insert((options.priority, seq), record);
            }
        }

        inner.notify.notify_one();
        debug!(queue = %queue, job_name = %job_name, job_id = %job_id, "Job enqueued");
        Ok(job_id)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<DeliveredJob>, BrokerError> {
        let inner = self.queue(queue)?;

        loop {
            enum Wait {
                Until(Instant),
                Indefinite,
            }

            let wait = {
                let mut state = inner.state.lock();
                if state.closed {
                    // Waiting work stays queued for a durable broker to
                    // redeliver; this process just stops handing it out.
                    return Ok(None);
                }

                Self::promote_due(&mut state, Instant::now(), &self.sequence);

                if let Some(((_, _), mut record)) = state.ready.pop_first() {
                    record.attempt += 1;
                    let job = DeliveredJob {
                        job_id: record.job_id.clone(),
                        queue: queue.to_string(),
                        job_name: record.job_name.clone(),
                        payload: record.payload.clone(),
                        attempt: record.attempt,
                        max_attempts: record.max_attempts,
                        priority: record.priority,
                        enqueued_at: record.enqueued_at,
                    };
                    state.active.insert(record.job_id.clone(), record);
                    return Ok(Some(job));
                }

                match state.delayed.first_key_value() {
                    Some((&(due_at, _), _)) => Wait::Until(due_at),
                    None => Wait::Indefinite,
                }
            };

            match wait {
                Wait::Until(due_at) => {
                    tokio::select! {
                        _ = inner.notify.notified() => {}
                        _ = tokio::time::sleep_until(due_at) => {}
                    }
                }
                Wait::Indefinite => inner.notify.notified().await,
            }
        }
    }

    async fn ack(&self, job: &DeliveredJob) -> Result<(), BrokerError> {
        let inner = self.queue(&job.queue)?;
        let mut state = inner.state.lock();
        match state.active.remove(&job.job_id) {
            Some(_) => {
                state.completed += 1;
                Ok(())
            }
            None => Err(BrokerError::UnknownDelivery {
                job_id: job.job_id.clone(),
                queue: job.queue.clone(),
            }),
        }
    }

    async fn fail(&self, job: &DeliveredJob, error: &str) -> Result<FailDisposition, BrokerError> {
        let inner = self.queue(&job.queue)?;
        let disposition = {
            let mut state = inner.state.lock();
            let mut record = state.active.remove(&job.job_id).ok_or_else(|| {
                BrokerError::UnknownDelivery {
                    job_id: job.job_id.clone(),
                    queue: job.queue.clone(),
                }
            })?;

            record.failure_history.push(AttemptFailure {
                attempt: record.attempt,
                failed_at: Utc::now(),
                error: error.to_string(),
                processing_duration_ms: None,
            });

            if record.attempt >= record.max_attempts {
                state.failed += 1;
                FailDisposition::Exhausted {
                    failure_history: record.failure_history,
                }
            } else {
                let delay = record.backoff.delay_for_attempt(record.attempt);
                let due_at = Instant::now() + delay;
                let next_attempt = record.attempt + 1;
                state.delayed.insert((due_at, self.next_seq()), record);
                FailDisposition::Retrying {
                    next_attempt,
                    delay,
                }
            }
        };

        match &disposition {
            FailDisposition::Retrying { delay, .. } => {
                inner.notify.notify_one();
                debug!(
                    queue = %job.queue,
                    job_id = %job.job_id,
                    delay_ms = delay.as_millis() as u64,
                    "Delivery failed; retry scheduled"
                );
            }
            FailDisposition::Exhausted { failure_history } => {
                warn!(
                    queue = %job.queue,
                    job_id = %job.job_id,
                    attempts = failure_history.len(),
                    "Delivery failed; retry budget exhausted"
                );
            }
        }
        Ok(disposition)
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, BrokerError> {
        let inner = self.queue(queue)?;
        let state = inner.state.lock();
        Ok(QueueCounts {
            waiting: state.ready.len() as u64,
            active: state.active.len() as u64,
            completed: state.completed,
            failed: state.failed,
            delayed: state.delayed.len() as u64,
        })
    }

    async fn close(&self) {
        let queues: Vec<Arc<QueueInner>> = self.queues.read().values().cloned().collect();
        for inner in queues {
            inner.state.lock().closed = true;
            inner.notify.notify_waiters();
        }
    }
}

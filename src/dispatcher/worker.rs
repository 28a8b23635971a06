//! Per-queue worker pools.
//!
//! Each queue gets a pool of exactly `concurrency` long-lived tokio tasks
//! pulling from the broker. A failing processor never crashes its worker:
//! failures (including panics) are caught, logged with structured context,
//! and reported to the broker, which either schedules a retry or declares
//! the job exhausted. Exhausted jobs are forwarded to the dead-letter engine.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{DeliveredJob, FailDisposition, QueueBroker};
use crate::constants::events;
use crate::dispatcher::processor::JobProcessor;
use crate::dispatcher::types::{JobPriority, TerminalFailure};
use crate::events::EventPublisher;

/// Pause before re-polling after a broker error, so a flapping broker does
/// not spin the worker loop.
const BROKER_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A pool of worker tasks bound to one queue.
pub struct QueueWorkerPool {
    queue: String,
    handles: Vec<JoinHandle<()>>,
}

impl QueueWorkerPool {
    /// Spawn `concurrency` workers for the queue.
    pub fn spawn(
        queue: &str,
        concurrency: usize,
        broker: Arc<dyn QueueBroker>,
        processor: Arc<dyn JobProcessor>,
        shutdown: watch::Receiver<bool>,
        failures: mpsc::UnboundedSender<TerminalFailure>,
        publisher: EventPublisher,
    ) -> Self {
        let handles = (0..concurrency)
            .map(|worker_index| {
                let context = WorkerContext {
                    queue: queue.to_string(),
                    worker_index,
                    broker: broker.clone(),
                    processor: processor.clone(),
                    shutdown: shutdown.clone(),
                    failures: failures.clone(),
                    publisher: publisher.clone(),
                };
                tokio::spawn(context.run())
            })
            .collect();

        info!(queue = %queue, concurrency, "Worker pool started");
        Self {
            queue: queue.to_string(),
            handles,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for every worker to finish, up to the deadline. Workers that do
    /// not finish in time are left running; their in-flight jobs stay active
    /// on the broker for redelivery.
    pub async fn join(self, deadline: Duration) -> bool {
        let drained = tokio::time::timeout(deadline, futures::future::join_all(self.handles))
            .await
            .is_ok();
        if drained {
            info!(queue = %self.queue, "Worker pool drained");
        } else {
            warn!(queue = %self.queue, "Worker pool did not drain before deadline");
        }
        drained
    }
}

struct WorkerContext {
    queue: String,
    worker_index: usize,
    broker: Arc<dyn QueueBroker>,
    processor: Arc<dyn JobProcessor>,
    shutdown: watch::Receiver<bool>,
    failures: mpsc::UnboundedSender<TerminalFailure>,
    publisher: EventPublisher,
}

impl WorkerContext {
    async fn run(mut self) {
        debug!(queue = %self.queue, worker = self.worker_index, "Worker started");
        loop {
            let job = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                dequeued = self.broker.dequeue(&self.queue) => match dequeued {
                    Ok(Some(job)) => job,
                    // Queue closed: the pool is shutting down.
                    Ok(None) => break,
                    Err(e) => {
                        error!(queue = %self.queue, error = %e, "Dequeue failed");
                        tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            self.process_delivery(job).await;
        }
        debug!(queue = %self.queue, worker = self.worker_index, "Worker stopped");
    }

    async fn process_delivery(&self, job: DeliveredJob) {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.processor.process(&job))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let error_message = match outcome {
            Ok(Ok(_result)) => {
                debug!(
                    queue = %self.queue,
                    job_id = %job.job_id,
                    job_name = %job.job_name,
                    attempt = job.attempt,
                    duration_ms,
                    "Job completed"
                );
                if let Err(e) = self.broker.ack(&job).await {
                    error!(queue = %self.queue, job_id = %job.job_id, error = %e, "Ack failed");
                }
                self.publisher.publish(
                    events::JOB_COMPLETED,
                    serde_json::json!({
                        "queue": self.queue,
                        "job_id": job.job_id,
                        "job_name": job.job_name,
                        "attempt": job.attempt,
                        "duration_ms": duration_ms,
                    }),
                );
                return;
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("processor panicked: {detail}")
            }
        };

        warn!(
            queue = %self.queue,
            job_id = %job.job_id,
            job_name = %job.job_name,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            duration_ms,
            error = %error_message,
            "Job attempt failed"
        );

        match self.broker.fail(&job, &error_message).await {
            Ok(FailDisposition::Retrying {
                next_attempt,
                delay,
            }) => {
                self.publisher.publish(
                    events::JOB_RETRYING,
                    serde_json::json!({
                        "queue": self.queue,
                        "job_id": job.job_id,
                        "job_name": job.job_name,
                        "next_attempt": next_attempt,
                        "delay_ms": delay.as_millis() as u64,
                    }),
                );
            }
            Ok(FailDisposition::Exhausted {
                mut failure_history,
            }) => {
                // The broker does not observe processing time; stamp the
                // final attempt with the duration measured here.
                if let Some(last) = failure_history.last_mut() {
                    last.processing_duration_ms = Some(duration_ms);
                }
                let failure = TerminalFailure {
                    queue: self.queue.clone(),
                    job_name: job.job_name.clone(),
                    payload: job.payload.clone(),
                    priority: JobPriority::from_value(job.priority),
                    failure_reason: error_message.clone(),
                    total_attempts: job.attempt,
                    max_attempts: job.max_attempts,
                    failure_history,
                };
                self.publisher.publish(
                    events::JOB_EXHAUSTED,
                    serde_json::json!({
                        "queue": self.queue,
                        "job_id": job.job_id,
                        "job_name": job.job_name,
                        "attempts": job.attempt,
                        "error": error_message,
                    }),
                );
                if self.failures.send(failure).is_err() {
                    error!(
                        queue = %self.queue,
                        job_id = %job.job_id,
                        "Dead-letter channel closed; terminal failure dropped from handoff"
                    );
                }
            }
            Err(e) => {
                error!(queue = %self.queue, job_id = %job.job_id, error = %e, "Fail report rejected by broker");
            }
        }
    }
}

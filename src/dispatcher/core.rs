//! The dispatcher itself: queue registration, typed submission, stats,
//! health, and graceful shutdown.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::broker::{EnqueueOptions, QueueBroker};
use crate::config::{DispatcherConfig, QueueConfig};
use crate::constants::{events, queues, HealthStatus};
use crate::dispatcher::processor::JobProcessor;
use crate::dispatcher::types::{
    DispatchError, HealthReport, JobHandle, JobOptions, QueueHealth, QueueStats, TerminalFailure,
};
use crate::dispatcher::worker::QueueWorkerPool;
use crate::events::EventPublisher;

/// Routes typed job submissions onto named queues and owns their worker
/// pools. Queue configuration is immutable after construction.
pub struct MultiQueueDispatcher {
    broker: Arc<dyn QueueBroker>,
    queues: HashMap<String, QueueConfig>,
    config: DispatcherConfig,
    publisher: EventPublisher,
    accepting: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    failure_tx: mpsc::UnboundedSender<TerminalFailure>,
    failure_rx: Mutex<Option<mpsc::UnboundedReceiver<TerminalFailure>>>,
    pools: Mutex<Vec<QueueWorkerPool>>,
}

impl MultiQueueDispatcher {
    /// Create the dispatcher and declare every configured queue on the
    /// broker.
    pub async fn new(
        broker: Arc<dyn QueueBroker>,
        queues: HashMap<String, QueueConfig>,
        config: DispatcherConfig,
        publisher: EventPublisher,
    ) -> Result<Arc<Self>, DispatchError> {
        for queue in queues.keys() {
            broker
                .create_queue(queue)
                .await
                .map_err(|e| DispatchError::Broker {
                    message: e.to_string(),
                })?;
        }

        let (shutdown_tx, _) = watch::channel(false);
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        info!(queue_count = queues.len(), "Multi-queue dispatcher initialized");
        Ok(Arc::new(Self {
            broker,
            queues,
            config,
            publisher,
            accepting: AtomicBool::new(true),
            shutdown_tx,
            failure_tx,
            failure_rx: Mutex::new(Some(failure_rx)),
            pools: Mutex::new(Vec::new()),
        }))
    }

    /// Take the terminal-failure stream. Consumed once, by the dead-letter
    /// recovery engine.
    pub fn take_failure_stream(&self) -> Option<mpsc::UnboundedReceiver<TerminalFailure>> {
        self.failure_rx.lock().take()
    }

    /// Start a worker pool for each queue that has a registered processor.
    /// Queues without a processor remain submission-only.
    pub fn start_workers(&self, processors: HashMap<String, Arc<dyn JobProcessor>>) {
        let mut pools = self.pools.lock();
        for (queue, processor) in processors {
            let Some(queue_config) = self.queues.get(&queue) else {
                warn!(queue = %queue, "Processor registered for unknown queue; ignored");
                continue;
            };
            pools.push(QueueWorkerPool::spawn(
                &queue,
                queue_config.concurrency,
                self.broker.clone(),
                processor,
                self.shutdown_tx.subscribe(),
                self.failure_tx.clone(),
                self.publisher.clone(),
            ));
        }
    }

    /// Submit a job. Caller options are merged over the queue defaults;
    /// caller values win.
    pub async fn submit(
        &self,
        queue: &str,
        job_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, DispatchError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }
        let queue_config = self
            .queues
            .get(queue)
            .ok_or_else(|| DispatchError::UnknownQueue {
                queue: queue.to_string(),
            })?;

        let enqueue_options = EnqueueOptions {
            priority: options.priority.unwrap_or_default().as_value(),
            delay_ms: options.delay_ms.unwrap_or(0),
            attempts: options.attempts.unwrap_or(queue_config.attempts),
            backoff: options.backoff.unwrap_or(queue_config.backoff),
        };

        let job_id = self
            .broker
            .enqueue(queue, job_name, payload, enqueue_options)
            .await
            .map_err(|e| DispatchError::Broker {
                message: e.to_string(),
            })?;

        self.publisher.publish(
            events::JOB_SUBMITTED,
            serde_json::json!({
                "queue": queue,
                "job_id": job_id,
                "job_name": job_name,
            }),
        );

        Ok(JobHandle {
            job_id,
            queue: queue.to_string(),
            job_name: job_name.to_string(),
            submitted_at: Utc::now(),
        })
    }

    /// Re-submit a recovered dead-letter payload into its original queue.
    /// Same path as `submit`, named separately so recovery shows up
    /// distinctly in logs.
    pub async fn resubmit_recovered(
        &self,
        queue: &str,
        job_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, DispatchError> {
        let handle = self.submit(queue, job_name, payload, options).await?;
        info!(
            queue = %queue,
            job_id = %handle.job_id,
            job_name = %job_name,
            "Recovered job re-submitted"
        );
        Ok(handle)
    }

    pub async fn submit_email_job(
        &self,
        job_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, DispatchError> {
        self.submit(queues::EMAIL, job_name, payload, options).await
    }

    pub async fn submit_media_job(
        &self,
        job_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, DispatchError> {
        self.submit(queues::MEDIA, job_name, payload, options).await
    }

    pub async fn submit_notification_job(
        &self,
        job_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, DispatchError> {
        self.submit(queues::NOTIFICATIONS, job_name, payload, options)
            .await
    }

    pub async fn submit_moderation_job(
        &self,
        job_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, DispatchError> {
        self.submit(queues::MODERATION, job_name, payload, options)
            .await
    }

    pub async fn submit_analytics_job(
        &self,
        job_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, DispatchError> {
        self.submit(queues::ANALYTICS, job_name, payload, options)
            .await
    }

    pub async fn submit_bulk_job(
        &self,
        job_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobHandle, DispatchError> {
        self.submit(queues::BULK, job_name, payload, options).await
    }

    /// Point-in-time stats for one queue.
    pub async fn queue_stats(&self, queue: &str) -> Result<QueueStats, DispatchError> {
        if !self.queues.contains_key(queue) {
            return Err(DispatchError::UnknownQueue {
                queue: queue.to_string(),
            });
        }
        let counts = self
            .broker
            .counts(queue)
            .await
            .map_err(|e| DispatchError::Broker {
                message: e.to_string(),
            })?;
        Ok(QueueStats {
            queue: queue.to_string(),
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            delayed: counts.delayed,
        })
    }

    /// Aggregate health across every registered queue. Never fails: an
    /// unreachable queue degrades the report instead of raising.
    pub async fn health_check(&self) -> HealthReport {
        let mut aggregate = HealthStatus::Healthy;
        let mut queue_reports = HashMap::new();

        for queue in self.queues.keys() {
            let health = match self.broker.counts(queue).await {
                Ok(counts) => {
                    let status = if counts.waiting > self.config.warning_backlog {
                        HealthStatus::Warning
                    } else {
                        HealthStatus::Healthy
                    };
                    QueueHealth {
                        status,
                        reachable: true,
                        waiting: counts.waiting,
                        active: counts.active,
                        failed: counts.failed,
                        detail: None,
                    }
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Queue unreachable during health check");
                    QueueHealth {
                        status: HealthStatus::Error,
                        reachable: false,
                        waiting: 0,
                        active: 0,
                        failed: 0,
                        detail: Some(e.to_string()),
                    }
                }
            };
            aggregate = aggregate.worst(health.status);
            queue_reports.insert(queue.clone(), health);
        }

        HealthReport {
            status: aggregate,
            queues: queue_reports,
            checked_at: Utc::now(),
        }
    }

    /// Graceful shutdown: refuse new submissions, unblock and drain worker
    /// pools, and close the broker. Completes within the configured
    /// deadline; in-flight jobs that miss it stay active on the broker.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Dispatcher shutdown started");

        let _ = self.shutdown_tx.send(true);
        self.broker.close().await;

        let pools: Vec<QueueWorkerPool> = std::mem::take(&mut *self.pools.lock());
        let deadline = Duration::from_millis(self.config.shutdown_timeout_ms);
        for pool in pools {
            pool.join(deadline).await;
        }
        info!("Dispatcher shutdown complete");
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn queue_names(&self) -> impl Iterator<Item = &String> {
        self.queues.keys()
    }
}

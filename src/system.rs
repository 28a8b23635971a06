//! System bootstrap: wires the broker, dispatcher, batch engine, and
//! dead-letter recovery engine into one runnable unit with an ordered
//! shutdown.
//!
//! Startup order: broker queues are created by the dispatcher, the
//! dead-letter engine takes ownership of the terminal-failure stream, then
//! background loops (dead-letter intake, dead-letter sweep, batch state
//! sweep) start. Shutdown reverses it: stop accepting, drain workers,
//! signal the background loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::batch::{BatchEngineStats, BatchExecutionEngine};
use crate::broker::memory::MemoryBroker;
use crate::broker::QueueBroker;
use crate::config::JobFlowConfig;
use crate::dead_letter::{
    DeadLetterRecoveryEngine, DeadLetterStats, DeadLetterStore, MemoryDeadLetterStore,
};
use crate::dispatcher::processor::JobProcessor;
use crate::dispatcher::types::{DispatchError, HealthReport};
use crate::dispatcher::MultiQueueDispatcher;
use crate::error::{JobFlowError, Result};
use crate::events::EventPublisher;

/// Aggregate metrics for the subsystem's metrics surface
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub dead_letter: DeadLetterStats,
    #[serde(skip)]
    pub batch: BatchEngineStats,
    pub queue_waiting_total: u64,
    pub queue_active_total: u64,
    pub queue_failed_total: u64,
}

/// The assembled job orchestration subsystem.
pub struct JobOrchestrationSystem {
    config: JobFlowConfig,
    dispatcher: Arc<MultiQueueDispatcher>,
    batch_engine: Arc<BatchExecutionEngine>,
    dead_letter: Arc<DeadLetterRecoveryEngine>,
    publisher: EventPublisher,
    background_shutdown: watch::Sender<bool>,
    background_tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl JobOrchestrationSystem {
    /// Assemble the subsystem over the in-process broker and store.
    pub async fn bootstrap(config: JobFlowConfig) -> Result<Arc<Self>> {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(MemoryDeadLetterStore::new());
        Self::bootstrap_with(config, broker, store).await
    }

    /// Assemble the subsystem over injected broker and store
    /// implementations.
    pub async fn bootstrap_with(
        config: JobFlowConfig,
        broker: Arc<dyn QueueBroker>,
        store: Arc<dyn DeadLetterStore>,
    ) -> Result<Arc<Self>> {
        let publisher = EventPublisher::default();

        let dispatcher = MultiQueueDispatcher::new(
            broker,
            config.queues.clone(),
            config.dispatcher.clone(),
            publisher.clone(),
        )
        .await
        .map_err(|e| JobFlowError::DispatchError(e.to_string()))?;

        let batch_engine =
            BatchExecutionEngine::new(config.batch.clone(), publisher.clone());

        let dead_letter = DeadLetterRecoveryEngine::new(
            config.dead_letter.clone(),
            store,
            dispatcher.clone(),
            publisher.clone(),
        );

        let failures = dispatcher
            .take_failure_stream()
            .ok_or_else(|| {
                JobFlowError::ConfigurationError(
                    "terminal-failure stream already consumed".to_string(),
                )
            })?;

        let (background_shutdown, shutdown_rx) = watch::channel(false);
        let mut background_tasks = Vec::new();

        background_tasks.push(tokio::spawn(
            dead_letter.clone().run(failures, shutdown_rx.clone()),
        ));
        background_tasks.push(dead_letter.start_sweeper(shutdown_rx.clone()));
        background_tasks.push(Self::start_batch_sweeper(
            batch_engine.clone(),
            config.batch.sweep_interval_secs,
            shutdown_rx,
        ));

        info!(
            queues = config.queues.len(),
            "Job orchestration system bootstrapped"
        );

        Ok(Arc::new(Self {
            config,
            dispatcher,
            batch_engine,
            dead_letter,
            publisher,
            background_shutdown,
            background_tasks: parking_lot::Mutex::new(background_tasks),
        }))
    }

    fn start_batch_sweeper(
        engine: Arc<BatchExecutionEngine>,
        interval_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.purge_stale_batches();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Register processors and start the per-queue worker pools.
    pub fn start_workers(&self, processors: HashMap<String, Arc<dyn JobProcessor>>) {
        self.dispatcher.start_workers(processors);
    }

    pub fn dispatcher(&self) -> &Arc<MultiQueueDispatcher> {
        &self.dispatcher
    }

    pub fn batch_engine(&self) -> &Arc<BatchExecutionEngine> {
        &self.batch_engine
    }

    pub fn dead_letter(&self) -> &Arc<DeadLetterRecoveryEngine> {
        &self.dead_letter
    }

    pub fn events(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn config(&self) -> &JobFlowConfig {
        &self.config
    }

    /// Health surface: worst-of across queues, never fails.
    pub async fn health_check(&self) -> HealthReport {
        self.dispatcher.health_check().await
    }

    /// Metrics surface: dead-letter counters, batch counters, and queue
    /// totals.
    pub async fn metrics(&self) -> SystemMetrics {
        let mut waiting = 0u64;
        let mut active = 0u64;
        let mut failed = 0u64;
        for queue in self.dispatcher.queue_names() {
            match self.dispatcher.queue_stats(queue).await {
                Ok(stats) => {
                    waiting += stats.waiting;
                    active += stats.active;
                    failed += stats.failed;
                }
                Err(DispatchError::Broker { message }) => {
                    warn!(queue = %queue, error = %message, "Queue counts unavailable");
                }
                Err(_) => {}
            }
        }
        SystemMetrics {
            dead_letter: self.dead_letter.stats().await,
            batch: self.batch_engine.stats(),
            queue_waiting_total: waiting,
            queue_active_total: active,
            queue_failed_total: failed,
        }
    }

    /// Ordered shutdown: refuse new submissions, drain worker pools within
    /// the configured grace period, then stop the background loops.
    pub async fn shutdown(&self) {
        info!("Job orchestration system shutting down");
        self.dispatcher.shutdown().await;
        let _ = self.background_shutdown.send(true);
        let tasks: Vec<_> = self.background_tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        info!("Job orchestration system stopped");
    }
}

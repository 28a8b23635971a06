//! Batch execution engine.
//!
//! Executes an in-memory item list through a caller-supplied async item
//! processor under a named [`ProcessingStrategy`]: chunks run strictly in
//! submission order, items within a chunk run concurrently under an explicit
//! ceiling, every item call races a timeout, and the engine self-throttles
//! between chunks when process memory exceeds the configured limit.
//!
//! Batch bookkeeping (`batches`, `items`, `results`) lives in concurrent
//! maps; all mutation for one batch funnels through the engine task that
//! owns that batch id.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::strategies::StrategyRegistry;
use crate::batch::types::{
    BatchError, BatchItemError, BatchItemState, BatchItemStatus, BatchJob, BatchMetrics,
    BatchOptions, BatchProgress, BatchResult, BatchStatus, BatchSubmission, ProcessingStrategy,
};
use crate::config::BatchEngineConfig;
use crate::constants::{events, BATCH_STATE_RETENTION_HOURS};
use crate::events::EventPublisher;

/// Heuristic per-item cost used for the submission-time duration estimate
const ESTIMATED_ITEM_COST_MS: u64 = 50;

/// Outcome of processing one batch item
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Completed(Value),
    Skipped { reason: String },
}

/// Caller-supplied async item processor. Invoked once per attempt; must be
/// safe to re-invoke for the same index under the at-least-once model.
#[async_trait]
pub trait BatchItemProcessor: Send + Sync {
    async fn process_item(&self, index: usize, item: Value) -> anyhow::Result<ItemOutcome>;
}

struct FnItemProcessor<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> BatchItemProcessor for FnItemProcessor<F>
where
    F: Fn(usize, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ItemOutcome>> + Send,
{
    async fn process_item(&self, index: usize, item: Value) -> anyhow::Result<ItemOutcome> {
        (self.handler)(index, item).await
    }
}

/// Wrap an async closure as a [`BatchItemProcessor`].
pub fn item_processor_fn<F, Fut>(handler: F) -> Arc<dyn BatchItemProcessor>
where
    F: Fn(usize, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ItemOutcome>> + Send + 'static,
{
    Arc::new(FnItemProcessor { handler })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchControl {
    Run,
    Pause,
    Cancel,
}

struct BatchEntry {
    job: BatchJob,
    progress: Arc<Mutex<BatchProgress>>,
    control: watch::Sender<BatchControl>,
}

/// Point-in-time engine counters
#[derive(Debug, Clone)]
pub struct BatchEngineStats {
    pub active_batches: usize,
    pub retained_results: usize,
    pub backpressure_pauses: u64,
}

type MemoryProbe = Box<dyn Fn() -> Option<u64> + Send + Sync>;

/// Samples resident memory of the current process for backpressure checks.
struct MemoryMonitor {
    system: Mutex<sysinfo::System>,
    probe: Option<MemoryProbe>,
}

impl MemoryMonitor {
    fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
            probe: None,
        }
    }

    fn with_probe(probe: MemoryProbe) -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
            probe: Some(probe),
        }
    }

    fn sample(&self) -> Option<u64> {
        if let Some(probe) = &self.probe {
            return probe();
        }
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system.process(pid).map(|process| process.memory())
    }
}

/// The batch execution engine. Cheap to clone behind an `Arc`; all state
/// lives in concurrent maps keyed by batch id.
pub struct BatchExecutionEngine {
    config: BatchEngineConfig,
    strategies: StrategyRegistry,
    batches: DashMap<String, Arc<BatchEntry>>,
    items: DashMap<String, Arc<Mutex<Vec<BatchItemStatus>>>>,
    results: DashMap<String, BatchResult>,
    publisher: EventPublisher,
    memory: MemoryMonitor,
    backpressure_pauses: AtomicU64,
}

impl BatchExecutionEngine {
    pub fn new(config: BatchEngineConfig, publisher: EventPublisher) -> Arc<Self> {
        Arc::new(Self {
            config,
            strategies: StrategyRegistry::builtin(),
            batches: DashMap::new(),
            items: DashMap::new(),
            results: DashMap::new(),
            publisher,
            memory: MemoryMonitor::new(),
            backpressure_pauses: AtomicU64::new(0),
        })
    }

    /// Engine with an injected memory probe instead of sysinfo sampling.
    pub fn with_memory_probe(
        config: BatchEngineConfig,
        publisher: EventPublisher,
        probe: MemoryProbe,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            strategies: StrategyRegistry::builtin(),
            batches: DashMap::new(),
            items: DashMap::new(),
            results: DashMap::new(),
            publisher,
            memory: MemoryMonitor::with_probe(probe),
            backpressure_pauses: AtomicU64::new(0),
        })
    }

    /// Submit a batch for execution under the strategy registered for
    /// `batch_type`, with per-call overrides applied on top.
    pub fn submit_batch(
        self: &Arc<Self>,
        batch_type: &str,
        items: Vec<Value>,
        processor: Arc<dyn BatchItemProcessor>,
        options: BatchOptions,
    ) -> Result<BatchSubmission, BatchError> {
        if items.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        if items.len() > self.config.max_batch_size {
            return Err(BatchError::BatchTooLarge {
                size: items.len(),
                max: self.config.max_batch_size,
            });
        }

        let strategy = self.strategies.resolve_with_overrides(batch_type, &options);
        let batch_id = Uuid::new_v4().to_string();
        let total_items = items.len();

        let queue_position = self
            .batches
            .iter()
            .filter(|entry| !entry.progress.lock().status.is_terminal())
            .count();
        let estimated_duration_ms = (total_items as u64 * ESTIMATED_ITEM_COST_MS)
            / strategy.concurrency.max(1) as u64;

        let job = BatchJob {
            id: batch_id.clone(),
            name: options
                .name
                .clone()
                .unwrap_or_else(|| format!("{batch_type}-{}", &batch_id[..8])),
            batch_type: batch_type.to_string(),
            priority: options.priority.unwrap_or_default(),
            batch_size: strategy.batch_size,
            concurrency: strategy.concurrency,
            retry_attempts: strategy.retry.attempts,
            timeout_ms: strategy.timeout_ms,
            scheduled_at: None,
            metadata: options.metadata.clone(),
            tags: options.tags.clone(),
            created_at: Utc::now(),
        };

        let (control_tx, control_rx) = watch::channel(BatchControl::Run);
        let entry = Arc::new(BatchEntry {
            job,
            progress: Arc::new(Mutex::new(BatchProgress::queued(total_items))),
            control: control_tx,
        });
        let item_statuses = Arc::new(Mutex::new(
            (0..total_items).map(BatchItemStatus::pending).collect(),
        ));

        self.batches.insert(batch_id.clone(), entry.clone());
        self.items.insert(batch_id.clone(), item_statuses.clone());

        info!(
            batch_id = %batch_id,
            batch_type = %batch_type,
            total_items,
            strategy = %strategy.name,
            "Batch submitted"
        );
        self.publisher.publish(
            events::BATCH_SUBMITTED,
            serde_json::json!({
                "batch_id": batch_id,
                "batch_type": batch_type,
                "total_items": total_items,
                "strategy": strategy.name,
            }),
        );

        let engine = self.clone();
        let run_id = batch_id.clone();
        tokio::spawn(async move {
            engine
                .run_batch(run_id, items, processor, strategy, entry, item_statuses, control_rx)
                .await;
        });

        Ok(BatchSubmission {
            batch_id,
            estimated_duration_ms,
            queue_position,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        self: Arc<Self>,
        batch_id: String,
        items: Vec<Value>,
        processor: Arc<dyn BatchItemProcessor>,
        strategy: ProcessingStrategy,
        entry: Arc<BatchEntry>,
        item_statuses: Arc<Mutex<Vec<BatchItemStatus>>>,
        mut control: watch::Receiver<BatchControl>,
    ) {
        let started_at = Utc::now();
        {
            let mut progress = entry.progress.lock();
            progress.status = BatchStatus::Running;
            progress.started_at = Some(started_at);
        }

        let total_items = items.len();
        let strategy = Arc::new(strategy);
        let mut errors: Vec<BatchItemError> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let chunk_starts: Vec<usize> = (0..total_items).step_by(strategy.batch_size).collect();
        'chunks: for chunk_start in chunk_starts {
            if !self.wait_until_runnable(&entry, &mut control).await {
                break 'chunks;
            }

            let chunk_end = (chunk_start + strategy.batch_size).min(total_items);
            debug!(
                batch_id = %batch_id,
                chunk_start,
                chunk_end,
                "Processing chunk"
            );

            let chunk_failures: Vec<BatchItemError> = stream::iter(chunk_start..chunk_end)
                .map(|index| {
                    let item = items[index].clone();
                    let engine = self.clone();
                    let processor = processor.clone();
                    let strategy = strategy.clone();
                    let entry = entry.clone();
                    let item_statuses = item_statuses.clone();
                    let control = control.clone();
                    async move {
                        engine
                            .process_item(
                                index,
                                item,
                                processor,
                                &strategy,
                                &entry,
                                &item_statuses,
                                control,
                            )
                            .await
                    }
                })
                .buffer_unordered(strategy.concurrency)
                .filter_map(|failure| async move { failure })
                .collect()
                .await;

            let chunk_had_failures = !chunk_failures.is_empty();
            errors.extend(chunk_failures);

            if chunk_had_failures && !strategy.skip_on_error && strategy.pause_on_error {
                let paused = {
                    let mut progress = entry.progress.lock();
                    if progress.status == BatchStatus::Running {
                        progress.status = BatchStatus::Paused;
                        true
                    } else {
                        false
                    }
                };
                if paused {
                    let _ = entry.control.send(BatchControl::Pause);
                    warn!(batch_id = %batch_id, "Batch paused on item failure");
                    self.publisher.publish(
                        events::BATCH_PAUSED,
                        serde_json::json!({"batch_id": batch_id, "reason": "pause_on_error"}),
                    );
                }
            }

            self.apply_backpressure(&batch_id, &strategy, &mut warnings)
                .await;
        }

        self.finalize_batch(&batch_id, &entry, &item_statuses, started_at, errors, warnings);
    }

    /// Block while the batch is paused. Returns `false` once the batch is
    /// cancelled (or the control channel is gone).
    async fn wait_until_runnable(
        &self,
        entry: &BatchEntry,
        control: &mut watch::Receiver<BatchControl>,
    ) -> bool {
        loop {
            // Copy the state out so the watch ref is released before the
            // mutable `changed()` wait below.
            let state = *control.borrow();
            match state {
                BatchControl::Run => return true,
                BatchControl::Cancel => return false,
                BatchControl::Pause => {
                    if control.changed().await.is_err() {
                        return false;
                    }
                }
            }
            // Re-check the externally visible status too: a resume updates
            // both the watch channel and the progress record.
            if entry.progress.lock().status == BatchStatus::Cancelled {
                return false;
            }
        }
    }

    /// Process one item with retries and a per-attempt timeout. Returns the
    /// final error if the item failed.
    #[allow(clippy::too_many_arguments)]
    async fn process_item(
        &self,
        index: usize,
        item: Value,
        processor: Arc<dyn BatchItemProcessor>,
        strategy: &ProcessingStrategy,
        entry: &BatchEntry,
        item_statuses: &Mutex<Vec<BatchItemStatus>>,
        control: watch::Receiver<BatchControl>,
    ) -> Option<BatchItemError> {
        // A cancel that lands before this item starts leaves it untouched.
        if *control.borrow() == BatchControl::Cancel {
            return None;
        }

        let started = tokio::time::Instant::now();
        {
            let mut statuses = item_statuses.lock();
            statuses[index].status = BatchItemState::Processing;
            statuses[index].started_at = Some(Utc::now());
        }

        let timeout = Duration::from_millis(strategy.timeout_ms);
        let max_attempts = strategy.retry.attempts.max(1);
        let mut retry_count = 0u32;

        let outcome = loop {
            let attempt_result =
                tokio::time::timeout(timeout, processor.process_item(index, item.clone())).await;

            let error = match attempt_result {
                Ok(Ok(outcome)) => break Ok(outcome),
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => format!("item timed out after {}ms", strategy.timeout_ms),
            };

            if retry_count + 1 >= max_attempts {
                break Err(error);
            }
            retry_count += 1;
            {
                let mut statuses = item_statuses.lock();
                statuses[index].retry_count = retry_count;
            }
            tokio::time::sleep(strategy.retry.delay_for_retry(retry_count)).await;
        };

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let completed_at = Utc::now();

        let (item_state, error) = match outcome {
            Ok(ItemOutcome::Completed(_)) => (BatchItemState::Completed, None),
            Ok(ItemOutcome::Skipped { reason }) => (BatchItemState::Skipped, Some(reason)),
            Err(error) => (BatchItemState::Failed, Some(error)),
        };

        {
            let mut statuses = item_statuses.lock();
            let status = &mut statuses[index];
            status.status = item_state;
            status.completed_at = Some(completed_at);
            status.processing_time_ms = processing_time_ms;
            status.retry_count = retry_count;
            status.error = if item_state == BatchItemState::Failed {
                error.clone()
            } else {
                None
            };
        }

        // Once the batch is terminal, finished items stop contributing to
        // progress; the item record above still reflects what happened.
        {
            let mut progress = entry.progress.lock();
            if !progress.status.is_terminal() {
                match item_state {
                    BatchItemState::Completed => progress.completed_items += 1,
                    BatchItemState::Failed => progress.failed_items += 1,
                    BatchItemState::Skipped => progress.skipped_items += 1,
                    _ => {}
                }
                progress.current_item = index;
                progress.last_activity_at = completed_at;
                progress.recompute_pct();
                if let Some(started_at) = progress.started_at {
                    let elapsed = (completed_at - started_at).num_milliseconds().max(1) as f64;
                    progress.current_throughput =
                        progress.processed_items() as f64 / (elapsed / 1000.0);
                }
            }
        }

        if item_state == BatchItemState::Failed {
            Some(BatchItemError {
                item_index: index,
                error: error.unwrap_or_default(),
                occurred_at: completed_at,
            })
        } else {
            None
        }
    }

    /// Inter-chunk memory check: over the limit, log and pause before the
    /// next chunk. The only built-in throttle beyond chunk concurrency.
    async fn apply_backpressure(
        &self,
        batch_id: &str,
        strategy: &ProcessingStrategy,
        warnings: &mut Vec<String>,
    ) {
        let limit = strategy
            .memory_limit_bytes
            .unwrap_or(self.config.memory_threshold_bytes);
        let Some(used) = self.memory.sample() else {
            return;
        };
        if used <= limit {
            return;
        }

        self.backpressure_pauses.fetch_add(1, Ordering::Relaxed);
        warn!(
            batch_id = %batch_id,
            used_bytes = used,
            limit_bytes = limit,
            pause_ms = self.config.backpressure_pause_ms,
            "Memory above threshold; pausing between chunks"
        );
        warnings.push(format!(
            "memory backpressure applied ({used} bytes > {limit} bytes limit)"
        ));
        tokio::time::sleep(Duration::from_millis(self.config.backpressure_pause_ms)).await;
    }

    fn finalize_batch(
        &self,
        batch_id: &str,
        entry: &BatchEntry,
        item_statuses: &Mutex<Vec<BatchItemStatus>>,
        started_at: chrono::DateTime<Utc>,
        errors: Vec<BatchItemError>,
        warnings: Vec<String>,
    ) {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        let (status, completed, failed, skipped) = {
            let mut progress = entry.progress.lock();
            if !progress.status.is_terminal() {
                progress.status = if progress.completed_items == 0 && progress.failed_items > 0 {
                    BatchStatus::Failed
                } else {
                    BatchStatus::Completed
                };
                progress.last_activity_at = completed_at;
            }
            (
                progress.status,
                progress.completed_items,
                progress.failed_items,
                progress.skipped_items,
            )
        };

        let metrics = {
            let statuses = item_statuses.lock();
            let times: Vec<u64> = statuses
                .iter()
                .filter(|s| {
                    matches!(
                        s.status,
                        BatchItemState::Completed | BatchItemState::Failed | BatchItemState::Skipped
                    )
                })
                .map(|s| s.processing_time_ms)
                .collect();
            BatchMetrics {
                avg_processing_time_ms: if times.is_empty() {
                    0.0
                } else {
                    times.iter().sum::<u64>() as f64 / times.len() as f64
                },
                max_processing_time_ms: times.iter().copied().max().unwrap_or(0),
                min_processing_time_ms: times.iter().copied().min().unwrap_or(0),
                memory_usage_bytes: self.memory.sample(),
            }
        };

        let processed = completed + failed + skipped;
        let result = BatchResult {
            batch_id: batch_id.to_string(),
            status,
            total_items: entry.progress.lock().total_items,
            processed_items: processed,
            successful_items: completed,
            failed_items: failed,
            skipped_items: skipped,
            started_at,
            completed_at,
            duration_ms,
            throughput_items_per_sec: processed as f64 / (duration_ms.max(1) as f64 / 1000.0),
            errors,
            warnings,
            metrics,
        };

        info!(
            batch_id = %batch_id,
            status = ?status,
            processed,
            failed,
            duration_ms,
            "Batch finished"
        );
        self.publisher.publish(
            events::BATCH_COMPLETED,
            serde_json::json!({
                "batch_id": batch_id,
                "status": status,
                "processed_items": processed,
                "failed_items": failed,
                "duration_ms": duration_ms,
            }),
        );

        self.results.insert(batch_id.to_string(), result);
        self.enforce_result_retention();
    }

    /// Oldest-by-start-time results are evicted once the cap is exceeded.
    fn enforce_result_retention(&self) {
        while self.results.len() > self.config.max_retained_results {
            let oldest = self
                .results
                .iter()
                .min_by_key(|entry| entry.started_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(batch_id) => {
                    self.results.remove(&batch_id);
                    debug!(batch_id = %batch_id, "Evicted retained batch result");
                }
                None => break,
            }
        }
    }

    /// Pause a running batch. Idempotent: returns `false` from any state
    /// other than `Running`.
    pub fn pause_batch(&self, batch_id: &str) -> bool {
        let Some(entry) = self.batches.get(batch_id) else {
            return false;
        };
        let mut progress = entry.progress.lock();
        if progress.status != BatchStatus::Running {
            return false;
        }
        progress.status = BatchStatus::Paused;
        drop(progress);
        let _ = entry.control.send(BatchControl::Pause);
        self.publisher.publish(
            events::BATCH_PAUSED,
            serde_json::json!({"batch_id": batch_id, "reason": "requested"}),
        );
        true
    }

    /// Resume a paused batch. Returns `false` from any state other than
    /// `Paused`.
    pub fn resume_batch(&self, batch_id: &str) -> bool {
        let Some(entry) = self.batches.get(batch_id) else {
            return false;
        };
        let mut progress = entry.progress.lock();
        if progress.status != BatchStatus::Paused {
            return false;
        }
        progress.status = BatchStatus::Running;
        drop(progress);
        let _ = entry.control.send(BatchControl::Run);
        true
    }

    /// Cancel a batch from any non-terminal state. Cooperative: dispatched
    /// item processors finish but stop contributing to progress.
    pub fn cancel_batch(&self, batch_id: &str) -> bool {
        let Some(entry) = self.batches.get(batch_id) else {
            return false;
        };
        let mut progress = entry.progress.lock();
        if progress.status.is_terminal() {
            return false;
        }
        progress.status = BatchStatus::Cancelled;
        progress.last_activity_at = Utc::now();
        drop(progress);
        let _ = entry.control.send(BatchControl::Cancel);
        self.publisher.publish(
            events::BATCH_CANCELLED,
            serde_json::json!({"batch_id": batch_id}),
        );
        true
    }

    pub fn batch_progress(&self, batch_id: &str) -> Option<BatchProgress> {
        self.batches
            .get(batch_id)
            .map(|entry| entry.progress.lock().clone())
    }

    pub fn batch_result(&self, batch_id: &str) -> Option<BatchResult> {
        self.results.get(batch_id).map(|result| result.clone())
    }

    pub fn batch_job(&self, batch_id: &str) -> Option<BatchJob> {
        self.batches.get(batch_id).map(|entry| entry.job.clone())
    }

    /// Paginated item-level state (1-based page) without materializing the
    /// full set for the caller.
    pub fn batch_item_statuses(
        &self,
        batch_id: &str,
        page: usize,
        limit: usize,
    ) -> Result<Vec<BatchItemStatus>, BatchError> {
        let statuses = self
            .items
            .get(batch_id)
            .ok_or_else(|| BatchError::UnknownBatch {
                batch_id: batch_id.to_string(),
            })?;
        let statuses = statuses.lock();
        let start = page.saturating_sub(1).saturating_mul(limit);
        Ok(statuses.iter().skip(start).take(limit).cloned().collect())
    }

    /// Purge terminal batch state past the retention window.
    pub fn purge_stale_batches(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(BATCH_STATE_RETENTION_HOURS);
        let stale: Vec<String> = self
            .batches
            .iter()
            .filter(|entry| {
                let progress = entry.progress.lock();
                progress.status.is_terminal() && progress.last_activity_at < cutoff
            })
            .map(|entry| entry.key().clone())
            .collect();

        for batch_id in &stale {
            self.batches.remove(batch_id);
            self.items.remove(batch_id);
            self.results.remove(batch_id);
        }
        if !stale.is_empty() {
            info!(purged = stale.len(), "Purged stale batch state");
        }
        stale.len()
    }

    pub fn stats(&self) -> BatchEngineStats {
        BatchEngineStats {
            active_batches: self
                .batches
                .iter()
                .filter(|entry| !entry.progress.lock().status.is_terminal())
                .count(),
            retained_results: self.results.len(),
            backpressure_pauses: self.backpressure_pauses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Semaphore;

    fn engine() -> Arc<BatchExecutionEngine> {
        BatchExecutionEngine::new(BatchEngineConfig::default(), EventPublisher::default())
    }

    fn counting_items(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "n": i })).collect()
    }

    async fn wait_for_result(
        engine: &Arc<BatchExecutionEngine>,
        batch_id: &str,
    ) -> BatchResult {
        for _ in 0..2_000 {
            if let Some(result) = engine.batch_result(batch_id) {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("batch {batch_id} did not finish");
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_on_error_batch_of_250_with_two_failures() {
        let engine = engine();
        let processor = item_processor_fn(|index, item| async move {
            if index == 10 || index == 200 {
                anyhow::bail!("injected failure at {index}");
            }
            Ok(ItemOutcome::Completed(item))
        });

        let submission = engine
            .submit_batch(
                "bulk-upload",
                counting_items(250),
                processor,
                BatchOptions {
                    batch_size: Some(50),
                    concurrency: Some(5),
                    skip_on_error: Some(true),
                    retry: Some(crate::batch::types::ItemRetryPolicy::none()),
                    ..BatchOptions::default()
                },
            )
            .unwrap();

        let result = wait_for_result(&engine, &submission.batch_id).await;
        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.total_items, 250);
        assert_eq!(result.processed_items, 250);
        assert_eq!(result.successful_items, 248);
        assert_eq!(result.failed_items, 2);
        assert_eq!(result.errors.len(), 2);
        let mut failed_indexes: Vec<usize> =
            result.errors.iter().map(|e| e.item_index).collect();
        failed_indexes.sort_unstable();
        assert_eq!(failed_indexes, vec![10, 200]);

        let progress = engine.batch_progress(&submission.batch_id).unwrap();
        assert!((progress.progress_pct - 100.0).abs() < 0.01);
        assert!(
            progress.completed_items + progress.failed_items + progress.skipped_items
                <= progress.total_items
        );
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let engine = engine();
        let processor =
            item_processor_fn(|_, item| async move { Ok(ItemOutcome::Completed(item)) });
        let err = engine
            .submit_batch("default", vec![], processor, BatchOptions::default())
            .unwrap_err();
        assert!(matches!(err, BatchError::EmptyBatch));
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let engine = BatchExecutionEngine::new(
            BatchEngineConfig {
                max_batch_size: 10,
                ..BatchEngineConfig::default()
            },
            EventPublisher::default(),
        );
        let processor =
            item_processor_fn(|_, item| async move { Ok(ItemOutcome::Completed(item)) });
        let err = engine
            .submit_batch(
                "default",
                counting_items(11),
                processor,
                BatchOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BatchError::BatchTooLarge { size: 11, max: 10 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_timeout_counts_as_failure_not_batch_fatal() {
        let engine = engine();
        let processor = item_processor_fn(|index, item| async move {
            if index == 1 {
                std::future::pending::<()>().await;
            }
            Ok(ItemOutcome::Completed(item))
        });

        let submission = engine
            .submit_batch(
                "default",
                counting_items(3),
                processor,
                BatchOptions {
                    timeout_ms: Some(100),
                    ..BatchOptions::default()
                },
            )
            .unwrap();

        let result = wait_for_result(&engine, &submission.batch_id).await;
        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.successful_items, 2);
        assert_eq!(result.failed_items, 1);
        assert!(result.errors[0].error.contains("timed out after 100ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_retries_before_failing() {
        let attempts = Arc::new(AtomicU64::new(0));
        let engine = engine();
        let seen = attempts.clone();
        let processor = item_processor_fn(move |_, _| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("still broken")
            }
        });

        let submission = engine
            .submit_batch(
                "default",
                counting_items(1),
                processor,
                BatchOptions {
                    retry: Some(crate::batch::types::ItemRetryPolicy {
                        attempts: 3,
                        delay_ms: 10,
                        kind: crate::dispatcher::types::BackoffKind::Fixed,
                    }),
                    ..BatchOptions::default()
                },
            )
            .unwrap();

        let result = wait_for_result(&engine, &submission.batch_id).await;
        assert_eq!(result.status, BatchStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let statuses = engine
            .batch_item_statuses(&submission.batch_id, 1, 10)
            .unwrap();
        assert_eq!(statuses[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_pause_resume_idempotency() {
        let engine = engine();
        let gate = Arc::new(Semaphore::new(0));
        let permit_gate = gate.clone();
        let processor = item_processor_fn(move |_, item| {
            let gate = permit_gate.clone();
            async move {
                let _permit = gate.acquire().await;
                Ok(ItemOutcome::Completed(item))
            }
        });

        let submission = engine
            .submit_batch(
                "default",
                counting_items(2),
                processor,
                BatchOptions {
                    batch_size: Some(1),
                    concurrency: Some(1),
                    ..BatchOptions::default()
                },
            )
            .unwrap();
        let batch_id = submission.batch_id;

        // Wait until the first item is in flight.
        for _ in 0..200 {
            if matches!(
                engine.batch_progress(&batch_id).map(|p| p.status),
                Some(BatchStatus::Running)
            ) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(engine.pause_batch(&batch_id));
        assert!(!engine.pause_batch(&batch_id), "second pause must be a no-op");
        assert!(!engine.resume_batch("missing-batch"));

        assert!(engine.resume_batch(&batch_id));
        assert!(!engine.resume_batch(&batch_id), "second resume must be a no-op");

        gate.add_permits(4);
        let result = wait_for_result(&engine, &batch_id).await;
        assert_eq!(result.status, BatchStatus::Completed);
        assert!(!engine.pause_batch(&batch_id), "terminal batch cannot pause");
    }

    #[tokio::test]
    async fn test_cancel_while_paused_unblocks_chunk_wait() {
        let engine = engine();
        let gate = Arc::new(Semaphore::new(0));
        let permit_gate = gate.clone();
        let processor = item_processor_fn(move |_, item| {
            let gate = permit_gate.clone();
            async move {
                gate.acquire().await.unwrap().forget();
                Ok(ItemOutcome::Completed(item))
            }
        });

        let submission = engine
            .submit_batch(
                "default",
                counting_items(3),
                processor,
                BatchOptions {
                    batch_size: Some(1),
                    concurrency: Some(1),
                    ..BatchOptions::default()
                },
            )
            .unwrap();
        let batch_id = submission.batch_id;

        for _ in 0..200 {
            if matches!(
                engine.batch_progress(&batch_id).map(|p| p.status),
                Some(BatchStatus::Running)
            ) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Pause with the first item still in flight, then let it finish so
        // the run loop parks waiting for a resume before the next chunk.
        assert!(engine.pause_batch(&batch_id));
        gate.add_permits(1);
        for _ in 0..200 {
            if engine
                .batch_progress(&batch_id)
                .map(|p| p.completed_items == 1)
                .unwrap_or(false)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Cancelling the paused batch must wake the parked run loop and
        // finalize without touching the remaining items.
        assert!(engine.cancel_batch(&batch_id));
        let result = wait_for_result(&engine, &batch_id).await;
        assert_eq!(result.status, BatchStatus::Cancelled);
        assert_eq!(result.successful_items, 1);

        let statuses = engine.batch_item_statuses(&batch_id, 1, 10).unwrap();
        assert_eq!(statuses[1].status, BatchItemState::Pending);
        assert_eq!(statuses[2].status, BatchItemState::Pending);
    }

    #[tokio::test]
    async fn test_cancel_mid_chunk_stops_progress() {
        let engine = engine();
        let gate = Arc::new(Semaphore::new(0));
        let permit_gate = gate.clone();
        let processor = item_processor_fn(move |_, item| {
            let gate = permit_gate.clone();
            async move {
                // Consume the permit for good so one permit releases one item.
                gate.acquire().await.unwrap().forget();
                Ok(ItemOutcome::Completed(item))
            }
        });

        let submission = engine
            .submit_batch(
                "default",
                counting_items(4),
                processor,
                BatchOptions {
                    batch_size: Some(2),
                    concurrency: Some(1),
                    ..BatchOptions::default()
                },
            )
            .unwrap();
        let batch_id = submission.batch_id;

        // Let exactly one item through, then cancel.
        gate.add_permits(1);
        for _ in 0..200 {
            if engine
                .batch_progress(&batch_id)
                .map(|p| p.completed_items == 1)
                .unwrap_or(false)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(engine.cancel_batch(&batch_id));
        assert!(!engine.cancel_batch(&batch_id), "cancel is idempotent");

        gate.add_permits(8);
        let result = wait_for_result(&engine, &batch_id).await;
        assert_eq!(result.status, BatchStatus::Cancelled);
        assert_eq!(result.successful_items, 1, "post-cancel items must not count");

        let progress = engine.batch_progress(&batch_id).unwrap();
        assert_eq!(progress.status, BatchStatus::Cancelled);
        assert_eq!(progress.completed_items, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_on_error_strategy_pauses_batch() {
        let engine = engine();
        let processor = item_processor_fn(|index, item| async move {
            if index == 0 {
                anyhow::bail!("bad row");
            }
            Ok(ItemOutcome::Completed(item))
        });

        let submission = engine
            .submit_batch(
                "default",
                counting_items(4),
                processor,
                BatchOptions {
                    batch_size: Some(2),
                    concurrency: Some(1),
                    skip_on_error: Some(false),
                    pause_on_error: Some(true),
                    retry: Some(crate::batch::types::ItemRetryPolicy::none()),
                    ..BatchOptions::default()
                },
            )
            .unwrap();
        let batch_id = submission.batch_id;

        for _ in 0..500 {
            if matches!(
                engine.batch_progress(&batch_id).map(|p| p.status),
                Some(BatchStatus::Paused)
            ) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            engine.batch_progress(&batch_id).unwrap().status,
            BatchStatus::Paused
        );

        assert!(engine.resume_batch(&batch_id));
        let result = wait_for_result(&engine, &batch_id).await;
        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.failed_items, 1);
        assert_eq!(result.successful_items, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_backpressure_pauses_between_chunks() {
        let engine = BatchExecutionEngine::with_memory_probe(
            BatchEngineConfig {
                memory_threshold_bytes: 1_000,
                backpressure_pause_ms: 100,
                ..BatchEngineConfig::default()
            },
            EventPublisher::default(),
            Box::new(|| Some(10_000)),
        );
        let processor =
            item_processor_fn(|_, item| async move { Ok(ItemOutcome::Completed(item)) });

        let submission = engine
            .submit_batch(
                "default",
                counting_items(6),
                processor,
                BatchOptions {
                    batch_size: Some(2),
                    concurrency: Some(2),
                    ..BatchOptions::default()
                },
            )
            .unwrap();

        let result = wait_for_result(&engine, &submission.batch_id).await;
        assert_eq!(result.status, BatchStatus::Completed);
        assert!(engine.stats().backpressure_pauses >= 3);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("memory backpressure")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_status_pagination() {
        let engine = engine();
        let processor =
            item_processor_fn(|_, item| async move { Ok(ItemOutcome::Completed(item)) });
        let submission = engine
            .submit_batch(
                "default",
                counting_items(25),
                processor,
                BatchOptions::default(),
            )
            .unwrap();
        wait_for_result(&engine, &submission.batch_id).await;

        let page = engine
            .batch_item_statuses(&submission.batch_id, 2, 10)
            .unwrap();
        assert_eq!(page.len(), 10);
        assert_eq!(page[0].index, 10);
        assert_eq!(page[9].index, 19);

        let tail = engine
            .batch_item_statuses(&submission.batch_id, 3, 10)
            .unwrap();
        assert_eq!(tail.len(), 5);

        assert!(engine.batch_item_statuses("missing", 1, 10).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_retention_evicts_oldest() {
        let engine = BatchExecutionEngine::new(
            BatchEngineConfig {
                max_retained_results: 2,
                ..BatchEngineConfig::default()
            },
            EventPublisher::default(),
        );
        let processor =
            item_processor_fn(|_, item| async move { Ok(ItemOutcome::Completed(item)) });

        let mut batch_ids = Vec::new();
        for _ in 0..3 {
            let submission = engine
                .submit_batch(
                    "default",
                    counting_items(1),
                    processor.clone(),
                    BatchOptions::default(),
                )
                .unwrap();
            wait_for_result(&engine, &submission.batch_id).await;
            batch_ids.push(submission.batch_id);
            // Distinct start times so eviction order is well-defined.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(engine.stats().retained_results, 2);
        assert!(engine.batch_result(&batch_ids[0]).is_none());
        assert!(engine.batch_result(&batch_ids[2]).is_some());
    }
}

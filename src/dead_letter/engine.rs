//! Dead-letter recovery engine.
//!
//! Owns the lifecycle of jobs that exhausted their queue-level retry
//! budget: classify the failure against the strategy registry, attempt
//! automated recovery by resubmitting through the dispatcher, or archive
//! records past the age limit. A periodic sweep is the engine's only
//! autonomous action; everything else happens on insertion or on explicit
//! request.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::DeadLetterConfig;
use crate::constants::events;
use crate::dead_letter::store::DeadLetterStore;
use crate::dead_letter::strategies::{classification_tags, RetryStrategy, RetryStrategyRegistry};
use crate::dead_letter::types::{
    DeadLetterJob, DeadLetterStats, ProcessOptions, ProcessReport, RecoveryError, RecoveryOutcome,
};
use crate::dispatcher::core::MultiQueueDispatcher;
use crate::dispatcher::types::{JobOptions, TerminalFailure};
use crate::events::EventPublisher;

/// Window over which the rolling insertion rate is measured
const ALERT_RATE_WINDOW_SECS: i64 = 300;

pub struct DeadLetterRecoveryEngine {
    config: DeadLetterConfig,
    store: Arc<dyn DeadLetterStore>,
    strategies: RetryStrategyRegistry,
    dispatcher: Arc<MultiQueueDispatcher>,
    publisher: EventPublisher,
    recoveries_succeeded: AtomicU64,
    recoveries_failed: AtomicU64,
    alerts_raised: AtomicU64,
    /// Insertion timestamps inside the rolling alert window
    recent_insertions: Mutex<VecDeque<chrono::DateTime<Utc>>>,
}

impl DeadLetterRecoveryEngine {
    pub fn new(
        config: DeadLetterConfig,
        store: Arc<dyn DeadLetterStore>,
        dispatcher: Arc<MultiQueueDispatcher>,
        publisher: EventPublisher,
    ) -> Arc<Self> {
        Self::with_strategies(
            config,
            store,
            dispatcher,
            publisher,
            RetryStrategyRegistry::builtin(),
        )
    }

    /// Engine with a custom strategy registry (built-ins plus
    /// deployment-specific registrations).
    pub fn with_strategies(
        config: DeadLetterConfig,
        store: Arc<dyn DeadLetterStore>,
        dispatcher: Arc<MultiQueueDispatcher>,
        publisher: EventPublisher,
        strategies: RetryStrategyRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            strategies,
            dispatcher,
            publisher,
            recoveries_succeeded: AtomicU64::new(0),
            recoveries_failed: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            recent_insertions: Mutex::new(VecDeque::new()),
        })
    }

    /// Consume the dispatcher's terminal-failure stream until it closes or
    /// shutdown is signalled. Run as a dedicated task.
    pub async fn run(
        self: Arc<Self>,
        mut failures: mpsc::UnboundedReceiver<TerminalFailure>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                maybe_failure = failures.recv() => {
                    match maybe_failure {
                        Some(failure) => {
                            if let Err(e) = self.add_to_dead_letter_queue(failure).await {
                                error!(error = %e, "Failed to record dead-letter job");
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Dead-letter intake stopped");
    }

    /// Create a dead-letter record from a terminal failure: classify it
    /// against every registered strategy, tag it, persist it, and evaluate
    /// the alert thresholds.
    pub async fn add_to_dead_letter_queue(
        &self,
        failure: TerminalFailure,
    ) -> Result<DeadLetterJob, RecoveryError> {
        let mut job = DeadLetterJob::from(failure);
        job.retry_strategies = self
            .strategies
            .identify(&job.failure_reason, &job.failure_history);
        job.tags = classification_tags(
            &job.original_queue_name,
            &job.retry_strategies,
            &self.strategies,
        );

        warn!(
            dead_letter_id = %job.id,
            queue = %job.original_queue_name,
            job_name = %job.job_name,
            failure_reason = %job.failure_reason,
            strategies = ?job.retry_strategies,
            "Job moved to dead-letter queue"
        );

        self.store
            .insert(job.clone())
            .await
            .map_err(|e| RecoveryError::Store(e.to_string()))?;

        self.publisher.publish(
            events::DEAD_LETTER_ADDED,
            serde_json::json!({
                "dead_letter_id": job.id,
                "queue": job.original_queue_name,
                "job_name": job.job_name,
                "strategies": job.retry_strategies,
                "tags": job.tags,
            }),
        );

        self.evaluate_alerts().await;
        Ok(job)
    }

    /// Attempt automated recovery for one dead-letter job.
    ///
    /// Refuses when the recovery cap is reached, when no applicable
    /// strategy exists, or when the selected strategy is manual-only. On
    /// success the record is removed from the active store; on resubmission
    /// failure the attempt is still counted so repeated failures eventually
    /// hit the cap.
    pub async fn attempt_job_recovery(
        &self,
        id: &str,
        preferred_strategy: Option<&str>,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let mut job = self
            .store
            .get(id)
            .await
            .map_err(|e| RecoveryError::Store(e.to_string()))?
            .ok_or_else(|| RecoveryError::UnknownJob { id: id.to_string() })?;

        if job.metadata.recovery_attempts >= self.config.max_recovery_attempts {
            return Err(RecoveryError::RecoveryCapReached {
                id: id.to_string(),
                attempts: job.metadata.recovery_attempts,
            });
        }

        let strategy = self.select_strategy(&job, preferred_strategy)?;
        if strategy.is_manual_only() {
            return Err(RecoveryError::ManualOnly {
                id: id.to_string(),
                strategy: strategy.name.clone(),
            });
        }
        if job.metadata.recovery_attempts >= strategy.max_retries {
            return Err(RecoveryError::StrategyBudgetExhausted {
                id: id.to_string(),
                strategy: strategy.name.clone(),
            });
        }

        let data = match &strategy.transform {
            Some(transform) => transform(&job.data),
            None => job.data.clone(),
        };
        let options = JobOptions::default()
            .with_priority(strategy.priority)
            .with_delay_ms(strategy.delay_ms)
            .with_attempts(strategy.max_retries);

        let submission = self
            .dispatcher
            .resubmit_recovered(&job.original_queue_name, &job.job_name, data, options)
            .await;

        job.metadata.recovery_attempts += 1;
        job.metadata.last_recovery_at = Some(Utc::now());

        match submission {
            Ok(handle) => {
                job.metadata.recovery_job_ids.push(handle.job_id.clone());
                // Recovered: the active record is destroyed. A renewed
                // exhaustion produces a fresh record.
                self.store
                    .remove(id)
                    .await
                    .map_err(|e| RecoveryError::Store(e.to_string()))?;
                self.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);

                info!(
                    dead_letter_id = %id,
                    new_job_id = %handle.job_id,
                    strategy = %strategy.name,
                    queue = %job.original_queue_name,
                    "Dead-letter job recovered"
                );
                self.publisher.publish(
                    events::DEAD_LETTER_RECOVERED,
                    serde_json::json!({
                        "dead_letter_id": id,
                        "new_job_id": handle.job_id,
                        "strategy": strategy.name,
                        "queue": job.original_queue_name,
                    }),
                );
                Ok(RecoveryOutcome::Recovered {
                    new_job_id: handle.job_id,
                    strategy: strategy.name.clone(),
                })
            }
            Err(e) => {
                // Failed recovery: keep the record with the incremented
                // attempt count.
                self.store
                    .update(job)
                    .await
                    .map_err(|se| RecoveryError::Store(se.to_string()))?;
                self.recoveries_failed.fetch_add(1, Ordering::Relaxed);

                warn!(dead_letter_id = %id, error = %e, "Dead-letter recovery failed");
                self.publisher.publish(
                    events::DEAD_LETTER_RECOVERY_FAILED,
                    serde_json::json!({"dead_letter_id": id, "error": e.to_string()}),
                );
                Err(RecoveryError::ResubmissionFailed {
                    id: id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn select_strategy<'a>(
        &'a self,
        job: &DeadLetterJob,
        preferred: Option<&str>,
    ) -> Result<&'a RetryStrategy, RecoveryError> {
        if let Some(name) = preferred {
            return self
                .strategies
                .get(name)
                .ok_or_else(|| RecoveryError::NoApplicableStrategy { id: job.id.clone() });
        }
        // First matched strategy; a match set that is exclusively
        // manual-only surfaces as ManualOnly rather than NoApplicable.
        match self.strategies.first_applicable(job) {
            Some(strategy) => Ok(strategy),
            None => {
                let manual = job
                    .retry_strategies
                    .iter()
                    .filter_map(|name| self.strategies.get(name))
                    .find(|s| s.is_manual_only());
                match manual {
                    Some(strategy) => Ok(strategy),
                    None => Err(RecoveryError::NoApplicableStrategy { id: job.id.clone() }),
                }
            }
        }
    }

    /// One processing pass over the active store: archive records past the
    /// age limit, attempt recovery for the rest. Individual failures never
    /// abort the pass.
    pub async fn process_dead_letter_jobs(
        &self,
        options: ProcessOptions,
    ) -> Result<ProcessReport, RecoveryError> {
        let jobs = self
            .store
            .list(&options)
            .await
            .map_err(|e| RecoveryError::Store(e.to_string()))?;

        let now = Utc::now();
        let mut report = ProcessReport::default();
        for job in jobs {
            report.processed += 1;
            let outcome = if job.age_days(now) > self.config.archive_after_days {
                self.archive_job(&job.id, "age limit exceeded").await
            } else {
                match self
                    .attempt_job_recovery(&job.id, options.strategy.as_deref())
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => RecoveryOutcome::Failed {
                        reason: e.to_string(),
                    },
                }
            };
            match &outcome {
                RecoveryOutcome::Recovered { .. } => report.recovered += 1,
                RecoveryOutcome::Archived { .. } => report.archived += 1,
                RecoveryOutcome::Failed { .. } => report.failed += 1,
            }
            report.outcomes.push((job.id, outcome));
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                recovered = report.recovered,
                archived = report.archived,
                failed = report.failed,
                "Dead-letter processing pass finished"
            );
        }
        Ok(report)
    }

    async fn archive_job(&self, id: &str, reason: &str) -> RecoveryOutcome {
        match self.store.archive(id, reason).await {
            Ok(archived) => {
                info!(dead_letter_id = %id, reason = %reason, "Dead-letter job archived");
                self.publisher.publish(
                    events::DEAD_LETTER_ARCHIVED,
                    serde_json::json!({
                        "dead_letter_id": id,
                        "reason": reason,
                        "queue": archived.job.original_queue_name,
                    }),
                );
                RecoveryOutcome::Archived {
                    reason: reason.to_string(),
                }
            }
            Err(e) => RecoveryOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Spawn the periodic sweep. Runs until shutdown is signalled.
    pub fn start_sweeper(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let interval = Duration::from_secs(engine.config.sweep_interval_secs);
        let batch_size = engine.config.sweep_batch_size;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the sweep starts
            // one full interval after boot.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine
                            .process_dead_letter_jobs(ProcessOptions::with_limit(batch_size))
                            .await
                        {
                            error!(error = %e, "Dead-letter sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Dead-letter sweeper stopped");
        })
    }

    /// Alert when the active count or the rolling insertion rate crosses
    /// its threshold. Delivery is a subscriber concern; this engine only
    /// decides when.
    async fn evaluate_alerts(&self) {
        let now = Utc::now();
        let rate_per_minute = {
            let mut recent = self.recent_insertions.lock();
            recent.push_back(now);
            let cutoff = now - chrono::Duration::seconds(ALERT_RATE_WINDOW_SECS);
            while recent.front().map(|t| *t < cutoff).unwrap_or(false) {
                recent.pop_front();
            }
            recent.len() as f64 / (ALERT_RATE_WINDOW_SECS as f64 / 60.0)
        };

        let active = match self.store.count().await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "Dead-letter count unavailable for alert evaluation");
                return;
            }
        };

        let thresholds = &self.config.alert_thresholds;
        let over_count = active >= thresholds.job_count;
        let over_rate = rate_per_minute >= thresholds.failure_rate;
        if !over_count && !over_rate {
            return;
        }

        self.alerts_raised.fetch_add(1, Ordering::Relaxed);
        warn!(
            active_jobs = active,
            rate_per_minute,
            job_count_threshold = thresholds.job_count,
            failure_rate_threshold = thresholds.failure_rate,
            "Dead-letter alert threshold crossed"
        );
        self.publisher.publish(
            events::DEAD_LETTER_ALERT,
            serde_json::json!({
                "active_jobs": active,
                "rate_per_minute": rate_per_minute,
                "over_count_threshold": over_count,
                "over_rate_threshold": over_rate,
            }),
        );
    }

    pub async fn stats(&self) -> DeadLetterStats {
        DeadLetterStats {
            active_jobs: self.store.count().await.unwrap_or(0),
            archived_jobs: self.store.archived_count().await.unwrap_or(0),
            recoveries_succeeded: self.recoveries_succeeded.load(Ordering::Relaxed),
            recoveries_failed: self.recoveries_failed.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
        }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::broker::QueueBroker;
    use crate::config::{DispatcherConfig, QueueConfig};
    use crate::constants::queues;
    use crate::dead_letter::store::MemoryDeadLetterStore;
    use crate::dispatcher::types::{AttemptFailure, JobPriority};
    use serde_json::json;

    async fn dispatcher() -> Arc<MultiQueueDispatcher> {
        let broker = Arc::new(MemoryBroker::new());
        MultiQueueDispatcher::new(
            broker,
            QueueConfig::platform_defaults(),
            DispatcherConfig::default(),
            EventPublisher::default(),
        )
        .await
        .unwrap()
    }

    fn engine_with(
        dispatcher: Arc<MultiQueueDispatcher>,
        config: DeadLetterConfig,
    ) -> (Arc<DeadLetterRecoveryEngine>, Arc<MemoryDeadLetterStore>) {
        let store = Arc::new(MemoryDeadLetterStore::new());
        let engine = DeadLetterRecoveryEngine::new(
            config,
            store.clone(),
            dispatcher,
            EventPublisher::default(),
        );
        (engine, store)
    }

    fn timeout_failure(queue: &str) -> TerminalFailure {
        TerminalFailure {
            queue: queue.to_string(),
            job_name: "send-email".to_string(),
            payload: json!({"to": "user@example.com"}),
            priority: JobPriority::default(),
            failure_reason: "connect ETIMEDOUT 10.0.0.1:443".to_string(),
            failure_history: vec![AttemptFailure {
                attempt: 1,
                failed_at: Utc::now(),
                error: "connect ETIMEDOUT 10.0.0.1:443".to_string(),
                processing_duration_ms: Some(3000),
            }],
            total_attempts: 3,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_timeout_failure_recovers_via_network_strategy() {
        let dispatcher = dispatcher().await;
        let (engine, store) = engine_with(dispatcher.clone(), DeadLetterConfig::default());

        let job = engine
            .add_to_dead_letter_queue(timeout_failure(queues::EMAIL))
            .await
            .unwrap();
        assert_eq!(job.retry_strategies, vec!["network-retry"]);
        assert!(job.tags.contains(&"queue:email".to_string()));

        let outcome = engine.attempt_job_recovery(&job.id, None).await.unwrap();
        match outcome {
            RecoveryOutcome::Recovered { strategy, .. } => {
                assert_eq!(strategy, "network-retry");
            }
            other => panic!("expected recovery, got {other:?}"),
        }

        // Recovered records are destroyed.
        assert!(store.get(&job.id).await.unwrap().is_none());

        // Resubmission lands in the original queue, delayed 30s at high
        // priority.
        let stats = dispatcher.queue_stats(queues::EMAIL).await.unwrap();
        assert_eq!(stats.delayed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resubmits_with_strategy_attempt_budget() {
        let broker = Arc::new(MemoryBroker::new());
        let dispatcher = MultiQueueDispatcher::new(
            broker.clone(),
            QueueConfig::platform_defaults(),
            DispatcherConfig::default(),
            EventPublisher::default(),
        )
        .await
        .unwrap();
        let (engine, _store) = engine_with(dispatcher, DeadLetterConfig::default());

        // Media queue defaults to 2 attempts; network-retry grants 3.
        let job = engine
            .add_to_dead_letter_queue(timeout_failure(queues::MEDIA))
            .await
            .unwrap();
        engine.attempt_job_recovery(&job.id, None).await.unwrap();

        // Skip past the strategy's 30s resubmission delay, then take the
        // redelivery straight off the broker.
        tokio::time::sleep(Duration::from_secs(31)).await;
        let delivered = broker.dequeue(queues::MEDIA).await.unwrap().unwrap();
        assert_eq!(delivered.max_attempts, 3);
        assert_eq!(delivered.priority, JobPriority::High.as_value());
    }

    #[tokio::test]
    async fn test_priority_filter_matches_dead_lettered_urgent_jobs() {
        let dispatcher = dispatcher().await;
        let (engine, store) = engine_with(dispatcher, DeadLetterConfig::default());

        let mut urgent = timeout_failure(queues::EMAIL);
        urgent.priority = JobPriority::Urgent;
        let urgent_record = engine.add_to_dead_letter_queue(urgent).await.unwrap();
        assert_eq!(urgent_record.priority, JobPriority::Urgent);

        engine
            .add_to_dead_letter_queue(timeout_failure(queues::EMAIL))
            .await
            .unwrap();

        let options = ProcessOptions {
            limit: 10,
            priority: Some(JobPriority::Urgent),
            ..ProcessOptions::default()
        };
        let listed = store.list(&options).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, urgent_record.id);
    }

    #[tokio::test]
    async fn test_auth_failure_refuses_automated_recovery() {
        let dispatcher = dispatcher().await;
        let (engine, store) = engine_with(dispatcher, DeadLetterConfig::default());

        let mut failure = timeout_failure(queues::MEDIA);
        failure.failure_reason = "403 Forbidden".to_string();
        failure.failure_history[0].error = "403 Forbidden".to_string();

        let job = engine.add_to_dead_letter_queue(failure).await.unwrap();
        assert_eq!(job.retry_strategies, vec!["auth-manual"]);

        let err = engine.attempt_job_recovery(&job.id, None).await.unwrap_err();
        assert!(matches!(err, RecoveryError::ManualOnly { .. }));
        assert!(err.to_string().contains("manual intervention"));

        // The record stays active, untouched.
        let kept = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(kept.metadata.recovery_attempts, 0);
    }

    #[tokio::test]
    async fn test_recovery_cap_enforced_across_failed_attempts() {
        let dispatcher = dispatcher().await;
        let (engine, store) = engine_with(
            dispatcher.clone(),
            DeadLetterConfig {
                max_recovery_attempts: 2,
                ..DeadLetterConfig::default()
            },
        );

        let job = engine
            .add_to_dead_letter_queue(timeout_failure(queues::EMAIL))
            .await
            .unwrap();

        // Shut the dispatcher down so resubmission fails and the record
        // survives with its attempt count incremented.
        dispatcher.shutdown().await;

        for expected_attempts in 1..=2u32 {
            let err = engine.attempt_job_recovery(&job.id, None).await.unwrap_err();
            assert!(matches!(err, RecoveryError::ResubmissionFailed { .. }));
            let kept = store.get(&job.id).await.unwrap().unwrap();
            assert_eq!(kept.metadata.recovery_attempts, expected_attempts);
            // The original failure history is never mutated.
            assert_eq!(kept.failure_history.len(), 1);
        }

        let err = engine.attempt_job_recovery(&job.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::RecoveryCapReached { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_processing_pass_archives_old_jobs() {
        let dispatcher = dispatcher().await;
        let (engine, store) = engine_with(dispatcher, DeadLetterConfig::default());

        let recent = engine
            .add_to_dead_letter_queue(timeout_failure(queues::EMAIL))
            .await
            .unwrap();

        let mut old = engine
            .add_to_dead_letter_queue(timeout_failure(queues::MEDIA))
            .await
            .unwrap();
        old.first_failed_at = Utc::now() - chrono::Duration::days(10);
        store.update(old.clone()).await.unwrap();

        let report = engine
            .process_dead_letter_jobs(ProcessOptions::with_limit(10))
            .await
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.archived, 1);
        assert_eq!(report.recovered, 1);

        assert!(store.get(&old.id).await.unwrap().is_none());
        assert!(store.get_archived(&old.id).await.unwrap().is_some());
        // Archived jobs are never retried again.
        assert!(matches!(
            engine.attempt_job_recovery(&old.id, None).await,
            Err(RecoveryError::UnknownJob { .. })
        ));
        assert!(store.get(&recent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_failures_resubmit_cleaned_payload() {
        let dispatcher = dispatcher().await;
        let (engine, _store) = engine_with(dispatcher.clone(), DeadLetterConfig::default());

        let mut failure = timeout_failure(queues::EMAIL);
        failure.failure_reason = "validation failed: bad address".to_string();
        failure.failure_history[0].error = failure.failure_reason.clone();
        failure.payload = json!({"to": "  user@example.com  ", "cc": null});

        let job = engine.add_to_dead_letter_queue(failure).await.unwrap();
        assert_eq!(job.retry_strategies, vec!["validation-retry"]);

        let outcome = engine.attempt_job_recovery(&job.id, None).await.unwrap();
        assert!(matches!(outcome, RecoveryOutcome::Recovered { .. }));
        // Transform applies to the resubmitted copy; original record data
        // is untouched (and the record itself is now gone).
        assert_eq!(job.data["cc"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_alert_raised_on_job_count_threshold() {
        let dispatcher = dispatcher().await;
        let (engine, _store) = engine_with(
            dispatcher,
            DeadLetterConfig {
                alert_thresholds: crate::config::AlertThresholds {
                    job_count: 2,
                    failure_rate: f64::MAX,
                },
                ..DeadLetterConfig::default()
            },
        );

        engine
            .add_to_dead_letter_queue(timeout_failure(queues::EMAIL))
            .await
            .unwrap();
        assert_eq!(engine.stats().await.alerts_raised, 0);

        engine
            .add_to_dead_letter_queue(timeout_failure(queues::EMAIL))
            .await
            .unwrap();
        assert_eq!(engine.stats().await.alerts_raised, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_processes_on_interval() {
        let dispatcher = dispatcher().await;
        let (engine, store) = engine_with(
            dispatcher,
            DeadLetterConfig {
                sweep_interval_secs: 60,
                ..DeadLetterConfig::default()
            },
        );

        engine
            .add_to_dead_letter_queue(timeout_failure(queues::EMAIL))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = engine.start_sweeper(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..100 {
            if store.count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.count().await.unwrap(), 0);

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }
}

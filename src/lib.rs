#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # JobFlow Core
//!
//! Job orchestration and reliability subsystem: multi-queue dispatch with
//! priority scheduling and retry/backoff, chunked batch execution under
//! memory backpressure, and a dead-letter recovery pipeline with
//! failure-aware retry strategies.
//!
//! ## Architecture
//!
//! Producers submit jobs through the [`dispatcher`]'s typed API. Jobs land
//! in named queues owned by a [`broker`]; per-queue worker pools pull
//! deliveries and invoke the registered
//! [`JobProcessor`](dispatcher::processor::JobProcessor). Failures retry
//! per queue backoff policy; jobs that exhaust their attempt budget flow to
//! the [`dead_letter`] recovery engine, which classifies the failure,
//! attempts automated recovery through the dispatcher, or archives the
//! record. Large bulk operations bypass queue-level retries entirely and go
//! through the [`batch`] execution engine, which manages its own chunking,
//! concurrency bounds, and backpressure.
//!
//! ## Module Organization
//!
//! - [`system`] - Bootstrap wiring and the health/metrics surface
//! - [`dispatcher`] - Multi-queue dispatch, worker pools, typed submission
//! - [`broker`] - Queue broker trait and the in-process implementation
//! - [`batch`] - Chunked batch execution with pause/resume/cancel
//! - [`dead_letter`] - Dead-letter classification, recovery, archival
//! - [`config`] - Layered configuration (files + environment)
//! - [`events`] - Best-effort broadcast of lifecycle events
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use jobflow_core::config::JobFlowConfig;
//! use jobflow_core::dispatcher::processor::{processor_fn, JobProcessor};
//! use jobflow_core::dispatcher::types::JobOptions;
//! use jobflow_core::system::JobOrchestrationSystem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let system = JobOrchestrationSystem::bootstrap(
//!     JobFlowConfig::with_platform_queues(),
//! )
//! .await?;
//!
//! let mut processors: HashMap<String, Arc<dyn JobProcessor>> = HashMap::new();
//! processors.insert(
//!     "email".to_string(),
//!     processor_fn(|job| async move {
//!         // deliver the email described by job.payload
//!         Ok(serde_json::json!({"delivered": true}))
//!     }),
//! );
//! system.start_workers(processors);
//!
//! system
//!     .dispatcher()
//!     .submit_email_job(
//!         "send-welcome",
//!         serde_json::json!({"to": "user@example.com"}),
//!         JobOptions::default(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod broker;
pub mod config;
pub mod constants;
pub mod dead_letter;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod system;

pub use batch::{
    BatchExecutionEngine, BatchItemProcessor, BatchOptions, BatchProgress, BatchResult,
    BatchStatus, BatchSubmission, ProcessingStrategy,
};
pub use broker::{DeliveredJob, QueueBroker};
pub use config::JobFlowConfig;
pub use constants::{queues, HealthStatus};
// Re-export constants events with a distinct name to avoid clashing with
// the events module.
pub use constants::events as system_events;
pub use dead_letter::{
    DeadLetterJob, DeadLetterRecoveryEngine, DeadLetterStore, RecoveryOutcome, RetryStrategy,
};
pub use dispatcher::types::{JobHandle, JobOptions, JobPriority, TerminalFailure};
pub use dispatcher::MultiQueueDispatcher;
pub use error::{JobFlowError, Result};
pub use events::EventPublisher;
pub use system::JobOrchestrationSystem;

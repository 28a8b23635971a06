//! # Multi-Queue Dispatcher
//!
//! Owns the fixed set of named queues, each backed by a worker pool of
//! declared concurrency, and provides the typed submission API the rest of
//! the platform produces jobs through.
//!
//! The dispatcher's job is configuration and routing, not scheduling: the
//! broker enforces priority ordering and retry backoff, the per-queue worker
//! pools enforce concurrency, and jobs that exhaust their retry budget are
//! handed to the dead-letter recovery engine as [`types::TerminalFailure`]
//! events.

pub mod core;
pub mod processor;
pub mod types;
pub mod worker;

pub use self::core::MultiQueueDispatcher;
pub use processor::{processor_fn, JobProcessor};
pub use types::{
    BackoffKind, BackoffPolicy, DispatchError, HealthReport, JobHandle, JobOptions, JobPriority,
    QueueHealth, QueueStats, TerminalFailure,
};
pub use worker::QueueWorkerPool;

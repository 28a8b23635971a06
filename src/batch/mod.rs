//! Batch execution: chunked, concurrency-bounded processing of large item
//! sets with per-item retry/timeout handling, pause/resume/cancel controls,
//! and memory-aware backpressure.
//!
//! Key components:
//! - [`BatchExecutionEngine`]: owns batch lifecycle state and the per-batch
//!   execution tasks
//! - [`StrategyRegistry`]: named [`ProcessingStrategy`] bundles selected by
//!   batch type at submission time
//! - [`BatchItemProcessor`]: the caller-supplied async seam invoked once per
//!   item attempt

pub mod engine;
pub mod strategies;
pub mod types;

pub use engine::{
    item_processor_fn, BatchEngineStats, BatchExecutionEngine, BatchItemProcessor, ItemOutcome,
};
pub use strategies::{StrategyRegistry, DEFAULT_STRATEGY};
pub use types::{
    BatchError, BatchItemError, BatchItemState, BatchItemStatus, BatchJob, BatchMetrics,
    BatchOptions, BatchProgress, BatchResult, BatchStatus, BatchSubmission, ItemRetryPolicy,
    ProcessingStrategy,
};

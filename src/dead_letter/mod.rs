//! Dead-letter recovery: classification, automated recovery, and archival
//! of jobs that exhausted their queue-level retry budget.
//!
//! Key components:
//! - [`DeadLetterRecoveryEngine`]: consumes the dispatcher's
//!   terminal-failure stream, owns the record lifecycle, and runs the
//!   periodic sweep
//! - [`RetryStrategyRegistry`]: failure classifiers paired with recovery
//!   policies, read-only after startup
//! - [`DeadLetterStore`]: the persistence seam; dead-letter records are the
//!   only state expected to survive restarts

pub mod engine;
pub mod store;
pub mod strategies;
pub mod types;

pub use engine::DeadLetterRecoveryEngine;
pub use store::{DeadLetterStore, MemoryDeadLetterStore, StoreError};
pub use strategies::{classification_tags, PayloadTransform, RetryStrategy, RetryStrategyRegistry};
pub use types::{
    ArchivedJob, DeadLetterJob, DeadLetterStats, ProcessOptions, ProcessReport, RecoveryError,
    RecoveryMetadata, RecoveryOutcome,
};

//! Lifecycle event channel for the orchestration subsystem.
//!
//! Terminal job failures, dead-letter transitions, batch completions, and
//! alert triggers are published here; delivery (notification channels,
//! dashboards) is an external subscriber's concern.

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};

//! Named processing strategies.
//!
//! One strategy per job-type category, registered once at startup and
//! immutable afterwards. Selection happens at submission time by batch
//! type; callers can override individual fields per call.

use std::collections::HashMap;

use crate::batch::types::{BatchOptions, ItemRetryPolicy, ProcessingStrategy};
use crate::dispatcher::types::BackoffKind;

/// Fallback strategy applied when a batch type has no dedicated entry
pub const DEFAULT_STRATEGY: &str = "default";

/// Read-only registry of named processing strategies.
pub struct StrategyRegistry {
    strategies: HashMap<String, ProcessingStrategy>,
}

impl StrategyRegistry {
    /// Registry with the built-in platform strategies.
    pub fn builtin() -> Self {
        let mut strategies = HashMap::new();
        for strategy in builtin_strategies() {
            strategies.insert(strategy.name.clone(), strategy);
        }
        Self { strategies }
    }

    /// Resolve a batch type to its strategy, falling back to `default`.
    pub fn resolve(&self, batch_type: &str) -> ProcessingStrategy {
        self.strategies
            .get(batch_type)
            .or_else(|| self.strategies.get(DEFAULT_STRATEGY))
            .cloned()
            .unwrap_or_else(default_strategy)
    }

    /// Resolve and apply per-call overrides; caller values win.
    pub fn resolve_with_overrides(
        &self,
        batch_type: &str,
        options: &BatchOptions,
    ) -> ProcessingStrategy {
        let mut strategy = self.resolve(batch_type);
        if let Some(batch_size) = options.batch_size {
            strategy.batch_size = batch_size.max(1);
        }
        if let Some(concurrency) = options.concurrency {
            strategy.concurrency = concurrency.max(1);
        }
        if let Some(timeout_ms) = options.timeout_ms {
            strategy.timeout_ms = timeout_ms;
        }
        if let Some(retry) = options.retry {
            strategy.retry = retry;
        }
        if let Some(skip_on_error) = options.skip_on_error {
            strategy.skip_on_error = skip_on_error;
        }
        if let Some(pause_on_error) = options.pause_on_error {
            strategy.pause_on_error = pause_on_error;
        }
        if let Some(limit) = options.memory_limit_bytes {
            strategy.memory_limit_bytes = Some(limit);
        }
        strategy
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn default_strategy() -> ProcessingStrategy {
    ProcessingStrategy {
        name: DEFAULT_STRATEGY.to_string(),
        batch_size: 100,
        concurrency: 10,
        retry: ItemRetryPolicy::none(),
        memory_limit_bytes: None,
        timeout_ms: 30_000,
        pause_on_error: false,
        skip_on_error: true,
    }
}

fn builtin_strategies() -> Vec<ProcessingStrategy> {
    vec![
        default_strategy(),
        ProcessingStrategy {
            name: "bulk-upload".to_string(),
            batch_size: 50,
            concurrency: 5,
            retry: ItemRetryPolicy {
                attempts: 2,
                delay_ms: 1_000,
                kind: BackoffKind::Exponential,
            },
            memory_limit_bytes: Some(256 * 1024 * 1024),
            timeout_ms: 60_000,
            pause_on_error: false,
            skip_on_error: true,
        },
        ProcessingStrategy {
            name: "analytics-export".to_string(),
            batch_size: 500,
            concurrency: 10,
            retry: ItemRetryPolicy::none(),
            memory_limit_bytes: Some(512 * 1024 * 1024),
            timeout_ms: 30_000,
            pause_on_error: false,
            skip_on_error: true,
        },
        ProcessingStrategy {
            name: "email-blast".to_string(),
            batch_size: 100,
            concurrency: 15,
            retry: ItemRetryPolicy {
                attempts: 2,
                delay_ms: 2_000,
                kind: BackoffKind::Fixed,
            },
            memory_limit_bytes: None,
            timeout_ms: 15_000,
            pause_on_error: false,
            skip_on_error: true,
        },
        ProcessingStrategy {
            name: "migration".to_string(),
            batch_size: 25,
            concurrency: 2,
            retry: ItemRetryPolicy {
                attempts: 3,
                delay_ms: 5_000,
                kind: BackoffKind::Exponential,
            },
            memory_limit_bytes: Some(256 * 1024 * 1024),
            timeout_ms: 120_000,
            pause_on_error: true,
            skip_on_error: false,
        },
        ProcessingStrategy {
            name: "bulk-moderation".to_string(),
            batch_size: 40,
            concurrency: 8,
            retry: ItemRetryPolicy::none(),
            memory_limit_bytes: None,
            timeout_ms: 45_000,
            pause_on_error: false,
            skip_on_error: true,
        },
    ]
}

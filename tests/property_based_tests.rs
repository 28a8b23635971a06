//! Property-based coverage for the pure pieces of the subsystem: failure
//! classification, backoff arithmetic, priority parsing, and batch progress
//! accounting.

use proptest::prelude::*;

use jobflow_core::batch::types::BatchProgress;
use jobflow_core::dead_letter::RetryStrategyRegistry;
use jobflow_core::dispatcher::types::{BackoffPolicy, JobPriority};

/// Failure-reason fragments that exercise every built-in classifier plus
/// unmatched noise.
fn failure_fragment() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "connect ECONNREFUSED 10.0.0.1:443",
        "connect ETIMEDOUT",
        "socket hang up",
        "rate limit exceeded",
        "HTTP 429 Too Many Requests",
        "upstream returned 502",
        "503 Service Unavailable",
        "gateway timeout 504",
        "401 Unauthorized",
        "403 Forbidden",
        "validation failed on field email",
        "invalid data in payload",
        "disk full",
        "unknown error",
    ])
}

proptest! {
    #[test]
    fn classification_is_deterministic(
        fragments in prop::collection::vec(failure_fragment(), 1..4)
    ) {
        let registry = RetryStrategyRegistry::builtin();
        let reason = fragments.join("; ");

        let first = registry.identify(&reason, &[]);
        let second = registry.identify(&reason, &[]);
        prop_assert_eq!(&first, &second);

        // Every matched name resolves, ordering follows the registry, and
        // there are no duplicates.
        let names = registry.names();
        let mut last_position = None;
        for name in &first {
            let position = names.iter().position(|n| n == name);
            prop_assert!(position.is_some());
            if let Some(last) = last_position {
                prop_assert!(position > Some(last));
            }
            last_position = position;
        }
    }

    #[test]
    fn classification_is_case_insensitive(fragment in failure_fragment()) {
        let registry = RetryStrategyRegistry::builtin();
        let upper = fragment.to_uppercase();
        let lower = fragment.to_lowercase();
        prop_assert_eq!(
            registry.identify(&upper, &[]),
            registry.identify(&lower, &[])
        );
    }

    #[test]
    fn backoff_never_exceeds_cap(
        base in 1u64..100_000,
        attempt in 1u32..64
    ) {
        for policy in [
            BackoffPolicy::fixed(base),
            BackoffPolicy::linear(base),
            BackoffPolicy::exponential(base),
        ] {
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay.as_millis() <= 900_000);
        }
    }

    #[test]
    fn linear_backoff_is_monotone(base in 1u64..10_000, attempt in 1u32..50) {
        let policy = BackoffPolicy::linear(base);
        prop_assert!(
            policy.delay_for_attempt(attempt) <= policy.delay_for_attempt(attempt + 1)
        );
    }

    #[test]
    fn priority_parse_is_total(label in "\\PC*") {
        // Any string maps to some priority; garbage maps to Normal.
        let priority = JobPriority::parse(&label);
        prop_assert!(priority.as_value() >= 1 && priority.as_value() <= 4);
    }

    #[test]
    fn priority_labels_round_trip(priority in prop::sample::select(vec![
        JobPriority::Urgent,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ])) {
        prop_assert_eq!(JobPriority::parse(priority.as_str()), priority);
    }

    #[test]
    fn batch_progress_accounting_stays_in_bounds(
        total in 1usize..10_000,
        completed_fraction in 0.0f64..1.0,
        failed_fraction in 0.0f64..1.0,
    ) {
        let completed = (total as f64 * completed_fraction) as usize;
        let remaining = total - completed;
        let failed = (remaining as f64 * failed_fraction) as usize;

        let mut progress = BatchProgress::queued(total);
        progress.completed_items = completed;
        progress.failed_items = failed;
        progress.recompute_pct();

        prop_assert!(progress.processed_items() <= progress.total_items);
        prop_assert!(progress.progress_pct >= 0.0);
        prop_assert!(progress.progress_pct <= 100.0);
    }
}

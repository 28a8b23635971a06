//! Retry strategy registry.
//!
//! Each strategy pairs a failure classifier (case-insensitive substring
//! match over the failure reason and attempt history) with a recovery
//! policy: resubmission delay, retry budget, priority, and an optional
//! payload transform. The registry is populated at startup and read-only
//! afterwards; classification order follows registration order, so
//! `identify` is deterministic for a given failure.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::dead_letter::types::DeadLetterJob;
use crate::dispatcher::types::{AttemptFailure, JobPriority};

pub type PayloadTransform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// One registered recovery strategy
#[derive(Clone)]
pub struct RetryStrategy {
    pub name: String,
    pub description: String,
    /// Lowercase substrings matched against failure text
    pub matchers: Vec<String>,
    pub delay_ms: u64,
    /// `0` marks the strategy manual-only: it classifies but never
    /// auto-retries.
    pub max_retries: u32,
    pub priority: JobPriority,
    pub transform: Option<PayloadTransform>,
}

impl fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStrategy")
            .field("name", &self.name)
            .field("matchers", &self.matchers)
            .field("delay_ms", &self.delay_ms)
            .field("max_retries", &self.max_retries)
            .field("priority", &self.priority)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

impl RetryStrategy {
    pub fn is_manual_only(&self) -> bool {
        self.max_retries == 0
    }

    /// Case-insensitive substring classification over the failure reason
    /// and every recorded attempt error.
    pub fn matches(&self, failure_reason: &str, history: &[AttemptFailure]) -> bool {
        let reason = failure_reason.to_lowercase();
        if self.matchers.iter().any(|m| reason.contains(m.as_str())) {
            return true;
        }
        history.iter().any(|attempt| {
            let error = attempt.error.to_lowercase();
            self.matchers.iter().any(|m| error.contains(m.as_str()))
        })
    }
}

/// Ordered, read-only-after-startup registry of retry strategies.
pub struct RetryStrategyRegistry {
    ordered: Vec<RetryStrategy>,
}

impl RetryStrategyRegistry {
    /// Registry seeded with the built-in strategies.
    pub fn builtin() -> Self {
        Self {
            ordered: builtin_strategies(),
        }
    }

    /// Append a custom strategy. Later registrations classify after the
    /// built-ins.
    pub fn register(&mut self, strategy: RetryStrategy) {
        self.ordered.push(strategy);
    }

    pub fn get(&self, name: &str) -> Option<&RetryStrategy> {
        self.ordered.iter().find(|s| s.name == name)
    }

    /// Names of all strategies whose condition matches, in registration
    /// order.
    pub fn identify(&self, failure_reason: &str, history: &[AttemptFailure]) -> Vec<String> {
        self.ordered
            .iter()
            .filter(|s| s.matches(failure_reason, history))
            .map(|s| s.name.clone())
            .collect()
    }

    /// First matched strategy usable for automated recovery.
    pub fn first_applicable(&self, job: &DeadLetterJob) -> Option<&RetryStrategy> {
        job.retry_strategies
            .iter()
            .filter_map(|name| self.get(name))
            .find(|s| !s.is_manual_only())
    }

    pub fn names(&self) -> Vec<&str> {
        self.ordered.iter().map(|s| s.name.as_str()).collect()
    }
}

impl Default for RetryStrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Descriptive tags for a freshly inserted dead-letter record: its origin
/// queue, each matched failure category, and a manual-review flag when any
/// matched strategy refuses auto-retry.
pub fn classification_tags(
    queue: &str,
    matched: &[String],
    registry: &RetryStrategyRegistry,
) -> Vec<String> {
    let mut tags = vec![format!("queue:{queue}")];
    for name in matched {
        if let Some(category) = name.strip_suffix("-retry").or(name.strip_suffix("-manual")) {
            tags.push(format!("failure:{category}"));
        }
    }
    if matched
        .iter()
        .filter_map(|name| registry.get(name))
        .any(RetryStrategy::is_manual_only)
    {
        tags.push("manual-review".to_string());
    }
    if matched.is_empty() {
        tags.push("failure:unclassified".to_string());
    }
    tags
}

/// Strips leading/trailing whitespace from string fields and drops nulls
/// from objects, recursively. Applied before resubmitting validation
/// failures.
fn payload_cleanup(data: &Value) -> Value {
    match data {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(payload_cleanup).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), payload_cleanup(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn builtin_strategies() -> Vec<RetryStrategy> {
    vec![
        RetryStrategy {
            name: "network-retry".to_string(),
            description: "Transient network failures; retry quickly at high priority".to_string(),
            matchers: vec![
                "econnrefused".to_string(),
                "etimedout".to_string(),
                "socket hang up".to_string(),
            ],
            delay_ms: 30_000,
            max_retries: 3,
            priority: JobPriority::High,
            transform: None,
        },
        RetryStrategy {
            name: "rate-limit-retry".to_string(),
            description: "Upstream rate limiting; back off well clear of the window".to_string(),
            matchers: vec!["rate limit".to_string(), "429".to_string()],
            delay_ms: 300_000,
            max_retries: 2,
            priority: JobPriority::Normal,
            transform: None,
        },
        RetryStrategy {
            name: "service-unavailable-retry".to_string(),
            description: "Upstream outage; retry patiently".to_string(),
            matchers: vec!["502".to_string(), "503".to_string(), "504".to_string()],
            delay_ms: 60_000,
            max_retries: 5,
            priority: JobPriority::Normal,
            transform: None,
        },
        RetryStrategy {
            name: "auth-manual".to_string(),
            description: "Credential or permission failure; never auto-retry".to_string(),
            matchers: vec![
                "401".to_string(),
                "403".to_string(),
                "unauthorized".to_string(),
            ],
            delay_ms: 0,
            max_retries: 0,
            priority: JobPriority::Normal,
            transform: None,
        },
        RetryStrategy {
            name: "validation-retry".to_string(),
            description: "Malformed payload; clean it up and retry once".to_string(),
            matchers: vec!["validation".to_string(), "invalid data".to_string()],
            delay_ms: 5_000,
            max_retries: 1,
            priority: JobPriority::Normal,
            transform: Some(Arc::new(payload_cleanup)),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_network_errors_classify_to_network_retry() {
        let registry = RetryStrategyRegistry::builtin();
        let matched = registry.identify("connect ETIMEDOUT 10.0.0.1:443", &[]);
        assert_eq!(matched, vec!["network-retry"]);

        let strategy = registry.get("network-retry").unwrap();
        assert_eq!(strategy.delay_ms, 30_000);
        assert_eq!(strategy.priority, JobPriority::High);
    }

    #[test]
    fn test_classification_is_case_insensitive_and_checks_history() {
        let registry = RetryStrategyRegistry::builtin();
        let history = vec![AttemptFailure {
            attempt: 1,
            failed_at: chrono::Utc::now(),
            error: "upstream said Rate Limit exceeded".to_string(),
            processing_duration_ms: None,
        }];
        let matched = registry.identify("job failed", &history);
        assert_eq!(matched, vec!["rate-limit-retry"]);
    }

    #[test]
    fn test_identification_order_is_deterministic() {
        let registry = RetryStrategyRegistry::builtin();
        // Matches both network and service-unavailable matchers; registry
        // order decides.
        let matched = registry.identify("ETIMEDOUT after 503 from gateway", &[]);
        assert_eq!(matched, vec!["network-retry", "service-unavailable-retry"]);
    }

    #[test]
    fn test_auth_failures_are_manual_only() {
        let registry = RetryStrategyRegistry::builtin();
        let matched = registry.identify("403 Forbidden", &[]);
        assert_eq!(matched, vec!["auth-manual"]);
        assert!(registry.get("auth-manual").unwrap().is_manual_only());
    }

    #[test]
    fn test_payload_cleanup_trims_and_drops_nulls() {
        let cleaned = payload_cleanup(&json!({
            "name": "  padded  ",
            "empty": null,
            "nested": { "keep": 1, "drop": null, "list": ["  a  "] }
        }));
        assert_eq!(
            cleaned,
            json!({
                "name": "padded",
                "nested": { "keep": 1, "list": ["a"] }
            })
        );
    }

    #[test]
    fn test_tags_include_queue_category_and_manual_flag() {
        let registry = RetryStrategyRegistry::builtin();
        let matched = registry.identify("401 Unauthorized", &[]);
        let tags = classification_tags("media", &matched, &registry);
        assert!(tags.contains(&"queue:media".to_string()));
        assert!(tags.contains(&"failure:auth".to_string()));
        assert!(tags.contains(&"manual-review".to_string()));

        let tags = classification_tags("email", &[], &registry);
        assert!(tags.contains(&"failure:unclassified".to_string()));
    }
}

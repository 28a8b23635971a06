//! Job processor seam.
//!
//! Business logic executed inside a job (sending an email, transcoding a
//! video, running a moderation model) is opaque to the orchestration layer:
//! one [`JobProcessor`] is registered per queue, and the worker pool invokes
//! it for every delivery.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::broker::DeliveredJob;

/// Opaque per-queue job handler.
///
/// Returning `Err` drives the broker's retry machinery; after the job's
/// attempt budget is exhausted the failure escalates to the dead-letter
/// recovery engine. Idempotency under at-least-once delivery is the
/// handler's responsibility.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &DeliveredJob) -> anyhow::Result<Value>;
}

struct FnProcessor<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> JobProcessor for FnProcessor<F>
where
    F: Fn(DeliveredJob) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn process(&self, job: &DeliveredJob) -> anyhow::Result<Value> {
        (self.handler)(job.clone()).await
    }
}

/// Wrap an async closure as a [`JobProcessor`].
pub fn processor_fn<F, Fut>(handler: F) -> Arc<dyn JobProcessor>
where
    F: Fn(DeliveredJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnProcessor { handler })
}

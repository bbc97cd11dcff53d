// Per-instance orchestration context
//
// Sequence numbers are taken when `call_activity` is called, not when the
// returned future is first polled, so a fan-out replays in the same order
// no matter how the futures are scheduled.

use futures::future::{try_join_all, BoxFuture};
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{InstanceStore, OrchestrationError, Registry};
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    instance_id: String,
    next_seq: AtomicU64,
    history: HashMap<u64, (String, Value)>,
    store: InstanceStore,
    registry: Arc<Registry>,
    activity_limiter: Arc<Semaphore>,
    cancel: CancellationToken,
    metrics: Metrics,
}

impl OrchestrationContext {
    pub(crate) fn new(
        instance_id: String,
        history: HashMap<u64, (String, Value)>,
        store: InstanceStore,
        registry: Arc<Registry>,
        activity_limiter: Arc<Semaphore>,
        cancel: CancellationToken,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                instance_id,
                next_seq: AtomicU64::new(0),
                history,
                store,
                registry,
                activity_limiter,
                cancel,
                metrics,
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Schedule an activity. Replays the recorded output when history has one.
    pub fn call_activity(
        &self,
        name: &str,
        input: Value,
    ) -> BoxFuture<'static, Result<Value, OrchestrationError>> {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        async move { inner.run_activity(seq, name, input).await }.boxed()
    }

    /// Await every future concurrently; results keep input order, first error wins
    pub async fn task_all<I, F, T>(&self, tasks: I) -> Result<Vec<T>, OrchestrationError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, OrchestrationError>>,
    {
        try_join_all(tasks).await
    }

    /// Like `task_all`, with at most `limit` futures in flight
    pub async fn task_all_limited<I, F, T>(
        &self,
        tasks: I,
        limit: usize,
    ) -> Result<Vec<T>, OrchestrationError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, OrchestrationError>>,
    {
        stream::iter(tasks)
            .buffered(limit.max(1))
            .try_collect()
            .await
    }

    /// Publish progress; surfaces as `customStatus` in the status payload
    pub async fn set_custom_status(&self, value: Value) -> Result<(), OrchestrationError> {
        self.inner
            .store
            .set_custom_status(&self.inner.instance_id, &value)
            .await
    }
}

impl ContextInner {
    async fn run_activity(
        &self,
        seq: u64,
        name: String,
        input: Value,
    ) -> Result<Value, OrchestrationError> {
        if self.cancel.is_cancelled() {
            return Err(OrchestrationError::Terminated(self.instance_id.clone()));
        }

        if let Some((recorded, output)) = self.history.get(&seq) {
            if *recorded != name {
                return Err(OrchestrationError::HistoryMismatch {
                    seq,
                    recorded: recorded.clone(),
                    called: name,
                });
            }
            tracing::debug!(instance = %self.instance_id, seq, activity = %name, "Replayed activity from history");
            return Ok(output.clone());
        }

        let activity = self
            .registry
            .activity(&name)
            .ok_or_else(|| OrchestrationError::UnknownActivity(name.clone()))?;

        let _permit = tokio::select! {
            permit = self.activity_limiter.acquire() => permit.map_err(|_| {
                OrchestrationError::Terminated(self.instance_id.clone())
            })?,
            _ = self.cancel.cancelled() => {
                return Err(OrchestrationError::Terminated(self.instance_id.clone()));
            }
        };

        let started = Instant::now();
        let result = tokio::select! {
            result = activity(input) => result,
            _ = self.cancel.cancelled() => {
                return Err(OrchestrationError::Terminated(self.instance_id.clone()));
            }
        };
        self.metrics
            .activity_duration
            .with_label_values(&[name.as_str()])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(output) => {
                self.store
                    .append_history(&self.instance_id, seq, &name, &output)
                    .await?;
                tracing::debug!(instance = %self.instance_id, seq, activity = %name, "Activity completed");
                Ok(output)
            }
            Err(e) => {
                tracing::warn!(instance = %self.instance_id, seq, activity = %name, "Activity failed: {:#}", e);
                Err(OrchestrationError::Activity {
                    name,
                    message: format!("{:#}", e),
                })
            }
        }
    }
}

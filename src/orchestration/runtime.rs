// Durable runtime: starts, tracks, terminates and resumes instances

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{
    InstanceRecord, InstanceStore, OrchestrationContext, OrchestrationError, Registry,
    RuntimeStatus,
};
use crate::metrics::Metrics;

/// Shared runtime handle; clone freely (it's an Arc inside)
#[derive(Clone)]
pub struct DurableRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    registry: Arc<Registry>,
    store: InstanceStore,
    activity_limiter: Arc<Semaphore>,
    /// Instances currently executing in this process, tagged with a run number
    running: DashMap<String, (u64, CancellationToken)>,
    next_run: AtomicU64,
    metrics: Metrics,
    /// Process shutdown; stops execution without changing persisted status
    shutdown: CancellationToken,
}

impl DurableRuntime {
    pub fn new(
        registry: Registry,
        store: InstanceStore,
        max_concurrent_activities: usize,
        metrics: Metrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                registry: Arc::new(registry),
                store,
                activity_limiter: Arc::new(Semaphore::new(max_concurrent_activities.max(1))),
                running: DashMap::new(),
                next_run: AtomicU64::new(0),
                metrics,
                shutdown,
            }),
        }
    }

    /// Create an instance and schedule it. Returns the instance id.
    pub async fn start_new(
        &self,
        name: &str,
        instance_id: Option<String>,
        input: Value,
    ) -> Result<String, OrchestrationError> {
        if !self.inner.registry.has_orchestrator(name) {
            return Err(OrchestrationError::UnknownOrchestrator(name.to_string()));
        }

        let id = instance_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        if let Some(existing) = self.inner.store.get(&id).await? {
            if !existing.status.is_terminal() {
                return Err(OrchestrationError::AlreadyExists(id));
            }
            self.inner.store.purge(&id).await?;
        }

        let record = self.inner.store.create(&id, name, &input).await?;
        self.inner
            .metrics
            .orchestrations_started
            .with_label_values(&[name])
            .inc();
        tracing::info!(instance = %id, orchestrator = %name, "Started orchestration");

        self.schedule(record);
        Ok(id)
    }

    pub async fn status(&self, id: &str) -> Result<InstanceRecord, OrchestrationError> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| OrchestrationError::InstanceNotFound(id.to_string()))
    }

    /// Stop a Pending or Running instance; `reason` becomes its output
    pub async fn terminate(&self, id: &str, reason: &str) -> Result<(), OrchestrationError> {
        let record = self.status(id).await?;
        if record.status.is_terminal() {
            return Err(OrchestrationError::NotRunning {
                id: id.to_string(),
                status: record.status,
            });
        }

        let finished = self
            .inner
            .store
            .finish(id, RuntimeStatus::Terminated, &Value::String(reason.to_string()))
            .await?;
        if let Some(entry) = self.inner.running.get(id) {
            entry.1.cancel();
        }

        if !finished {
            // Finished on its own between the read and the write
            let current = self.status(id).await?;
            return Err(OrchestrationError::NotRunning {
                id: id.to_string(),
                status: current.status,
            });
        }

        self.record_finished(&record.name, RuntimeStatus::Terminated);
        tracing::info!(instance = %id, reason, "Terminated orchestration");
        Ok(())
    }

    /// Record an external event against a live instance
    pub async fn raise_event(
        &self,
        id: &str,
        event: &str,
        data: Value,
    ) -> Result<(), OrchestrationError> {
        let record = self.status(id).await?;
        if record.status.is_terminal() {
            return Err(OrchestrationError::NotRunning {
                id: id.to_string(),
                status: record.status,
            });
        }
        self.inner.store.add_event(id, event, &data).await?;
        tracing::info!(instance = %id, event, "Raised event");
        Ok(())
    }

    /// Remove a finished instance and its history
    pub async fn purge(&self, id: &str) -> Result<(), OrchestrationError> {
        let record = self.status(id).await?;
        if !record.status.is_terminal() {
            return Err(OrchestrationError::NotRunning {
                id: id.to_string(),
                status: record.status,
            });
        }
        self.inner.store.purge(id).await?;
        tracing::info!(instance = %id, "Purged orchestration history");
        Ok(())
    }

    /// Re-schedule Pending and Running instances left over from a previous process
    pub async fn resume_incomplete(&self) -> Result<usize, OrchestrationError> {
        let incomplete = self.inner.store.list_incomplete().await?;
        let mut resumed = 0;
        for record in incomplete {
            if self.inner.running.contains_key(&record.id) {
                continue;
            }
            if !self.inner.registry.has_orchestrator(&record.name) {
                tracing::warn!(instance = %record.id, orchestrator = %record.name, "Cannot resume: orchestrator no longer registered");
                let message = Value::String(format!("unknown orchestrator: {}", record.name));
                self.inner
                    .store
                    .finish(&record.id, RuntimeStatus::Failed, &message)
                    .await?;
                continue;
            }
            tracing::info!(instance = %record.id, orchestrator = %record.name, "Resuming orchestration");
            self.schedule(record);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Poll until the instance reaches a terminal status or `timeout` elapses.
    /// Returns the last observed record either way.
    pub async fn wait_for_completion(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<InstanceRecord, OrchestrationError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let record = self.status(id).await?;
            if record.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(record);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn record_finished(&self, name: &str, status: RuntimeStatus) {
        self.inner
            .metrics
            .orchestrations_finished
            .with_label_values(&[name, status.as_str()])
            .inc();
    }

    fn schedule(&self, record: InstanceRecord) {
        let token = CancellationToken::new();
        let run = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        self.inner
            .running
            .insert(record.id.clone(), (run, token.clone()));

        let runtime = self.clone();
        tokio::spawn(async move {
            let id = record.id.clone();
            if let Err(e) = runtime.execute(record, token).await {
                tracing::error!(instance = %id, "Orchestration bookkeeping failed: {}", e);
            }
            // A restarted instance with the same id owns a newer entry
            runtime
                .inner
                .running
                .remove_if(&id, |_, (owner, _)| *owner == run);
        });
    }

    async fn execute(
        &self,
        record: InstanceRecord,
        token: CancellationToken,
    ) -> Result<(), OrchestrationError> {
        let Some(orchestrator) = self.inner.registry.orchestrator(&record.name) else {
            return Err(OrchestrationError::UnknownOrchestrator(record.name));
        };

        let history = self.inner.store.load_history(&record.id).await?;
        if !self.inner.store.mark_running(&record.id).await? {
            // Terminated before it got going
            return Ok(());
        }
        if !history.is_empty() {
            tracing::debug!(instance = %record.id, recorded = history.len(), "Replaying from history");
        }

        let ctx = OrchestrationContext::new(
            record.id.clone(),
            history,
            self.inner.store.clone(),
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.activity_limiter),
            token.clone(),
            self.inner.metrics.clone(),
        );

        let outcome = tokio::select! {
            result = orchestrator(ctx, record.input.clone()) => result,
            _ = token.cancelled() => return Ok(()),
            _ = self.inner.shutdown.cancelled() => {
                tracing::info!(instance = %record.id, "Shutdown: leaving orchestration for resume");
                return Ok(());
            }
        };

        let (status, output) = match outcome {
            Ok(output) => (RuntimeStatus::Completed, output),
            Err(e) => {
                tracing::warn!(instance = %record.id, orchestrator = %record.name, "Orchestration failed: {:#}", e);
                (RuntimeStatus::Failed, Value::String(format!("{:#}", e)))
            }
        };

        if self.inner.store.finish(&record.id, status, &output).await? {
            self.record_finished(&record.name, status);
            tracing::info!(instance = %record.id, orchestrator = %record.name, status = %status, "Orchestration finished");
        }
        Ok(())
    }
}

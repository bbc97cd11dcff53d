// Directory ingestion watcher
//
// Polls a drop directory, validates each file, and hands accepted files to
// the embeddings orchestrator. Files are deleted once handled; files that
// hit a transient error stay put and are retried on the next scan.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::constants::EMBEDDINGS_ORCHESTRATOR;
use crate::config::IngestionSettings;
use crate::metrics::Metrics;
use crate::orchestration::DurableRuntime;
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestOutcome {
    Started,
    Oversized,
    Unsupported,
    Empty,
    Error,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Oversized => "oversized",
            Self::Unsupported => "unsupported",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    /// Path relative to the ingestion directory, `/`-separated
    pub path: String,
    pub outcome: IngestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub files: Vec<FileReport>,
}

impl IngestionReport {
    pub fn count(&self, outcome: IngestOutcome) -> usize {
        self.files.iter().filter(|f| f.outcome == outcome).count()
    }

    pub fn started_instances(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter_map(|f| f.instance_id.as_deref())
            .collect()
    }

    pub fn outcome_of(&self, path: &str) -> Option<IngestOutcome> {
        self.files.iter().find(|f| f.path == path).map(|f| f.outcome)
    }
}

pub struct Ingestor {
    settings: IngestionSettings,
    runtime: DurableRuntime,
    metrics: Metrics,
    retry: RetryPolicy,
}

fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl Ingestor {
    pub fn new(settings: IngestionSettings, runtime: DurableRuntime, metrics: Metrics) -> Self {
        Self {
            settings,
            runtime,
            metrics,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn is_allowed(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.settings
            .allowed_extensions
            .iter()
            .any(|ext| lowered.ends_with(&ext.to_lowercase()))
    }

    fn max_bytes(&self) -> u64 {
        self.settings.max_blob_mb.saturating_mul(1024 * 1024)
    }

    /// Process every file currently in the directory
    pub async fn scan_once(&self) -> Result<IngestionReport> {
        let root = self.settings.container_dir.clone();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create ingestion directory: {}", root.display()))?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            match entry {
                Ok(e) if e.file_type().is_file() => paths.push(e.into_path()),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable entry: {}", e),
            }
        }

        let mut report = IngestionReport::default();
        for path in paths {
            let file_report = self.process_file(&root, &path).await;
            self.metrics
                .ingested_files
                .with_label_values(&[file_report.outcome.as_str()])
                .inc();
            report.files.push(file_report);
        }

        if !report.files.is_empty() {
            tracing::info!(
                files = report.files.len(),
                started = report.count(IngestOutcome::Started),
                errors = report.count(IngestOutcome::Error),
                "Ingestion scan complete"
            );
        }
        Ok(report)
    }

    async fn process_file(&self, root: &Path, path: &Path) -> FileReport {
        let name = relative_name(root, path);
        let report = |outcome, instance_id: Option<String>, detail: Option<String>| FileReport {
            path: name.clone(),
            outcome,
            instance_id,
            detail,
        };

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::error!(file = %name, "Failed to stat file, keeping for next cycle: {}", e);
                return report(IngestOutcome::Error, None, Some(e.to_string()));
            }
        };

        if size > self.max_bytes() {
            tracing::warn!(
                file = %name,
                "Skipping file: size {:.2}MB > limit {}MB",
                size as f64 / (1024.0 * 1024.0),
                self.settings.max_blob_mb
            );
            self.remove(path, &name).await;
            return report(IngestOutcome::Oversized, None, None);
        }

        if !self.is_allowed(&name) {
            tracing::info!(file = %name, "Skipping unsupported file type");
            self.remove(path, &name).await;
            return report(IngestOutcome::Unsupported, None, None);
        }

        let content = match tokio::fs::read(path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(file = %name, "Failed to read file, keeping for next cycle: {}", e);
                return report(IngestOutcome::Error, None, Some(e.to_string()));
            }
        };

        let text = match String::from_utf8(content) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(file = %name, "Invalid UTF-8, decoding lossily");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        if text.trim().is_empty() {
            tracing::warn!(file = %name, "Skipping empty file");
            self.remove(path, &name).await;
            return report(IngestOutcome::Empty, None, None);
        }

        let payload = json!({
            "projectId": self.settings.default_project,
            "snippets": [{"name": name, "code": text}],
        });

        let started = with_retry(self.retry, "orchestration start", || {
            let payload = payload.clone();
            async move {
                self.runtime
                    .start_new(EMBEDDINGS_ORCHESTRATOR, None, payload)
                    .await
                    .map_err(anyhow::Error::from)
            }
        })
        .await;

        match started {
            Ok(instance_id) => {
                tracing::info!(file = %name, instance = %instance_id, "Ingestion started orchestration");
                self.remove(path, &name).await;
                report(IngestOutcome::Started, Some(instance_id), None)
            }
            Err(e) => {
                tracing::error!(file = %name, "Processing failed, keeping for next cycle: {:#}", e);
                report(IngestOutcome::Error, None, Some(format!("{:#}", e)))
            }
        }
    }

    async fn remove(&self, path: &Path, name: &str) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(file = %name, "Failed to delete ingested file: {}", e);
        }
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let period = Duration::from_secs(self.settings.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(dir = %self.settings.container_dir.display(), every = ?period, "Ingestion watcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.scan_once().await {
                        tracing::error!("Ingestion scan failed: {:#}", e);
                    }
                }
            }
        }

        tracing::info!("Ingestion watcher stopped");
    }
}

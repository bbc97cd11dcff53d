// Prometheus metrics
//
// One registry per process (owned by the app state, so tests get their own).
// Exposed in text format at GET /api/metrics.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub orchestrations_started: IntCounterVec,
    pub orchestrations_finished: IntCounterVec,
    pub activity_duration: HistogramVec,
    pub ingested_files: IntCounterVec,
    pub snippets_saved: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("snippy_http_requests_total", "HTTP requests by route and status"),
            &["route", "status"],
        )?;
        let orchestrations_started = IntCounterVec::new(
            Opts::new(
                "snippy_orchestrations_started_total",
                "Orchestration instances scheduled",
            ),
            &["name"],
        )?;
        let orchestrations_finished = IntCounterVec::new(
            Opts::new(
                "snippy_orchestrations_finished_total",
                "Orchestration instances reaching a terminal status",
            ),
            &["name", "status"],
        )?;
        let activity_duration = HistogramVec::new(
            HistogramOpts::new(
                "snippy_activity_duration_seconds",
                "Wall time of executed (non-replayed) activities",
            ),
            &["activity"],
        )?;
        let ingested_files = IntCounterVec::new(
            Opts::new("snippy_ingested_files_total", "Files seen by the ingestion watcher"),
            &["outcome"],
        )?;
        let snippets_saved = IntCounter::new("snippy_snippets_saved_total", "Snippet upserts")?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(orchestrations_started.clone()))?;
        registry.register(Box::new(orchestrations_finished.clone()))?;
        registry.register(Box::new(activity_duration.clone()))?;
        registry.register(Box::new(ingested_files.clone()))?;
        registry.register(Box::new(snippets_saved.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            orchestrations_started,
            orchestrations_finished,
            activity_duration,
            ingested_files,
            snippets_saved,
        })
    }

    /// Render all metric families in Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_families() {
        let metrics = Metrics::new().unwrap();
        metrics.snippets_saved.inc();
        metrics
            .ingested_files
            .with_label_values(&["started"])
            .inc_by(2);

        let text = metrics.render().unwrap();
        assert!(text.contains("snippy_snippets_saved_total 1"));
        assert!(text.contains("snippy_ingested_files_total{outcome=\"started\"} 2"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.snippets_saved.inc();
        assert_eq!(a.snippets_saved.get(), 1);
        assert_eq!(b.snippets_saved.get(), 0);
    }
}

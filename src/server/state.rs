// Shared application state
//
// Built once per process (or per test) and cloned into every handler.
// Everything inside is an Arc or a cheap handle.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::middleware::RateLimiter;
use crate::agents::AgentTeam;
use crate::config::Settings;
use crate::embeddings;
use crate::ingestion::Ingestor;
use crate::mcp::{McpServer, McpTools};
use crate::metrics::Metrics;
use crate::orchestration::{DurableRuntime, InstanceStore, Registry};
use crate::providers::{self, ChatProvider};
use crate::storage::{open_database, open_in_memory, SnippetService, SqliteSnippetStore};
use crate::workflows::{self, WorkflowDeps};

/// `storage.db_path` value that keeps everything in memory
pub const IN_MEMORY_DB: &str = ":memory:";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub snippets: SnippetService,
    pub chat: Arc<dyn ChatProvider>,
    pub runtime: DurableRuntime,
    pub mcp: McpServer,
    pub metrics: Metrics,
    pub limiter: RateLimiter,
    /// SHA-256 digests of the accepted function keys
    pub key_digests: Arc<Vec<[u8; 32]>>,
    pub shutdown: CancellationToken,
}

pub fn key_digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

impl AppState {
    /// Open storage, pick providers, register workflows and wire the runtime
    pub fn build(settings: Settings, shutdown: CancellationToken) -> Result<Self> {
        let metrics = Metrics::new().context("Failed to register metrics")?;

        let db_path = settings.storage.db_path.clone();
        let (db, location) = if db_path == Path::new(IN_MEMORY_DB) {
            (open_in_memory()?, IN_MEMORY_DB.to_string())
        } else {
            (open_database(&db_path)?, db_path.display().to_string())
        };
        tracing::info!(db = %location, "Opened snippet store");

        let store = Arc::new(SqliteSnippetStore::new(db.clone(), location));
        let embedder = embeddings::build(&settings)?;
        let snippets = SnippetService::new(
            store,
            embedder,
            settings.retrieval.chunk_size,
            metrics.clone(),
        );

        let chat = providers::build(&settings)?;
        let agents = AgentTeam::new(Arc::clone(&chat), settings.llm.mock, settings.llm.temperature);

        let mut registry = Registry::new();
        workflows::register_all(
            &mut registry,
            WorkflowDeps {
                snippets: snippets.clone(),
                agents,
            },
            &settings,
        );
        tracing::debug!(orchestrators = ?registry.orchestrator_names(), "Registered workflows");

        let runtime = DurableRuntime::new(
            registry,
            InstanceStore::new(db),
            settings.orchestration.max_concurrent_activities,
            metrics.clone(),
            shutdown.clone(),
        );

        let mcp = McpServer::new(McpTools::new(snippets.clone(), settings.retrieval.top_k));
        let limiter = RateLimiter::new(&settings.security);
        let key_digests = settings
            .security
            .function_keys
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| key_digest(k))
            .collect();

        Ok(Self {
            settings: Arc::new(settings),
            snippets,
            chat,
            runtime,
            mcp,
            metrics,
            limiter,
            key_digests: Arc::new(key_digests),
            shutdown,
        })
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.settings.ingestion.clone(),
            self.runtime.clone(),
            self.metrics.clone(),
        )
    }

    pub fn auth_enabled(&self) -> bool {
        !self.key_digests.is_empty()
    }
}

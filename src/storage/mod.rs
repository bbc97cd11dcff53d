// Snippet storage
//
// - SQLite with WAL mode, one connection shared behind a tokio Mutex
// - The same database file also holds orchestration state
// - Embeddings stored as JSON arrays; vector search is a cosine scan
//   scoped to one project

mod service;
mod sqlite;

pub use service::{SavedSnippet, SnippetService};
pub use sqlite::SqliteSnippetStore;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedConnection = Arc<Mutex<Connection>>;

/// Storage errors surfaced to callers that need to branch on them
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stored snippet document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub code: String,
    pub embedding: Vec<f32>,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub content_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for an upsert; `id` is the name
#[derive(Debug, Clone)]
pub struct NewSnippet {
    pub name: String,
    pub project_id: String,
    pub code: String,
    pub embedding: Vec<f32>,
}

/// Listing row, without code or embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetSummary {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub content_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Vector search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub code: String,
    pub score: f32,
}

/// Result of a storage access probe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub location: String,
    pub snippet_count: u64,
}

/// Trait for snippet stores
#[async_trait]
pub trait SnippetStore: Send + Sync {
    /// Insert or replace by name; keeps `createdAt` on replace
    async fn upsert(&self, snippet: NewSnippet) -> Result<Snippet, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Snippet>, StoreError>;

    /// Most recently updated first; `None` lists every project
    async fn list(&self, project: Option<&str>) -> Result<Vec<SnippetSummary>, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Top `k` snippets of `project` by cosine similarity to `query`
    async fn vector_search(
        &self,
        project: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Cheap read proving the store is reachable
    async fn probe(&self) -> Result<StoreInfo, StoreError>;
}

/// SHA-256 hex of the snippet body
pub fn content_hash(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// RFC 3339 UTC timestamp with millisecond precision
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Open (or create) the database file, enable WAL and apply the schema
pub fn open_database(path: &Path) -> Result<SharedConnection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;

    // Enable WAL mode for concurrency
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_schema(&conn)?;

    tracing::info!("Database initialized: {}", path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Private in-memory database (tests, `--db :memory:`)
pub fn open_in_memory() -> Result<SharedConnection> {
    let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn init_schema(conn: &Connection) -> Result<()> {
    let schema = include_str!("schema.sql");
    conn.execute_batch(schema)
        .context("Failed to apply database schema")?;
    Ok(())
}

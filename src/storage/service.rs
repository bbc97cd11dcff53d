// Snippet operations shared by the HTTP API, MCP tools, RAG and activities

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use super::{NewSnippet, SearchHit, Snippet, SnippetStore, SnippetSummary, StoreInfo};
use crate::embeddings::{embed_chunked, EmbeddingEngine};
use crate::metrics::Metrics;

/// A saved snippet as returned to clients: no embedding, just its size
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSnippet {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub code: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub content_hash: String,
    pub created_at: String,
    pub updated_at: String,
    pub embedding_dimensions: usize,
}

impl From<Snippet> for SavedSnippet {
    fn from(s: Snippet) -> Self {
        Self {
            embedding_dimensions: s.embedding.len(),
            id: s.id,
            name: s.name,
            project_id: s.project_id,
            code: s.code,
            doc_type: s.doc_type,
            content_hash: s.content_hash,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct SnippetService {
    store: Arc<dyn SnippetStore>,
    embedder: Arc<dyn EmbeddingEngine>,
    chunk_size: usize,
    metrics: Metrics,
}

impl SnippetService {
    pub fn new(
        store: Arc<dyn SnippetStore>,
        embedder: Arc<dyn EmbeddingEngine>,
        chunk_size: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            embedder,
            chunk_size,
            metrics,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingEngine> {
        &self.embedder
    }

    /// Chunk, embed, average and upsert in one call
    pub async fn save(&self, name: &str, code: &str, project_id: &str) -> Result<SavedSnippet> {
        let embedding = embed_chunked(self.embedder.as_ref(), code, self.chunk_size)
            .await
            .with_context(|| format!("Failed to embed snippet '{}'", name))?;

        let snippet = self
            .persist(NewSnippet {
                name: name.to_string(),
                project_id: project_id.to_string(),
                code: code.to_string(),
                embedding,
            })
            .await?;

        Ok(snippet.into())
    }

    /// Upsert a snippet whose embedding is already computed
    pub async fn persist(&self, snippet: NewSnippet) -> Result<Snippet> {
        let name = snippet.name.clone();
        let saved = self
            .store
            .upsert(snippet)
            .await
            .with_context(|| format!("Failed to save snippet '{}'", name))?;
        self.metrics.snippets_saved.inc();
        tracing::info!(id = %saved.id, project = %saved.project_id, dims = saved.embedding.len(), "Saved snippet");
        Ok(saved)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Snippet>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, project: Option<&str>) -> Result<Vec<SnippetSummary>> {
        Ok(self.store.list(project).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.store.delete(id).await?)
    }

    /// Embed `query` and return the nearest snippets of `project`
    pub async fn search(&self, query: &str, project: &str, k: usize) -> Result<Vec<SearchHit>> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;
        let hits = self
            .store
            .vector_search(project, &vector, k)
            .await
            .context("Vector search failed")?;
        Ok(hits)
    }

    pub async fn probe(&self) -> Result<StoreInfo> {
        Ok(self.store.probe().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedding;
    use crate::storage::{open_in_memory, SqliteSnippetStore};

    fn service() -> SnippetService {
        let store = SqliteSnippetStore::new(open_in_memory().unwrap(), ":memory:");
        SnippetService::new(
            Arc::new(store),
            Arc::new(HashingEmbedding::new()),
            800,
            Metrics::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_save_reports_dimensions_and_counts() {
        let svc = service();
        let saved = svc.save("hello", "print('hello')", "p1").await.unwrap();

        assert_eq!(saved.embedding_dimensions, 384);
        assert_eq!(saved.project_id, "p1");
        assert_eq!(svc.metrics.snippets_saved.get(), 1);

        let value = serde_json::to_value(&saved).unwrap();
        assert!(value.get("embedding").is_none());
        assert_eq!(value["embeddingDimensions"], 384);
    }

    #[tokio::test]
    async fn test_search_finds_related_snippet_first() {
        let svc = service();
        svc.save("fetch", "async def fetch(url): async with aiohttp.ClientSession() as session", "p1")
            .await
            .unwrap();
        svc.save("counter", "const [count, setCount] = useState(0);", "p1")
            .await
            .unwrap();

        let hits = svc.search("aiohttp async fetch", "p1", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "fetch");

        assert!(svc.search("aiohttp", "other-project", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_empty_code_stores_empty_embedding() {
        let svc = service();
        let saved = svc.save("blank", "", "p1").await.unwrap();
        assert_eq!(saved.embedding_dimensions, 0);
    }
}

// SQLite-backed snippet store

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::{
    content_hash, now_timestamp, NewSnippet, SearchHit, SharedConnection, Snippet, SnippetStore,
    SnippetSummary, StoreError, StoreInfo,
};
use crate::config::constants::SNIPPET_DOC_TYPE;
use crate::embeddings::cosine_similarity;

pub struct SqliteSnippetStore {
    db: SharedConnection,
    location: String,
}

impl SqliteSnippetStore {
    /// `location` is what probes report (the db path, or ":memory:")
    pub fn new(db: SharedConnection, location: impl Into<String>) -> Self {
        Self {
            db,
            location: location.into(),
        }
    }
}

fn snippet_from_row(row: &Row<'_>) -> rusqlite::Result<(Snippet, String)> {
    let embedding_json: String = row.get(4)?;
    Ok((
        Snippet {
            id: row.get(0)?,
            name: row.get(1)?,
            project_id: row.get(2)?,
            code: row.get(3)?,
            embedding: Vec::new(),
            doc_type: SNIPPET_DOC_TYPE.to_string(),
            content_hash: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        },
        embedding_json,
    ))
}

const SNIPPET_COLUMNS: &str =
    "id, name, project_id, code, embedding, content_hash, created_at, updated_at";

#[async_trait]
impl SnippetStore for SqliteSnippetStore {
    async fn upsert(&self, snippet: NewSnippet) -> Result<Snippet, StoreError> {
        let now = now_timestamp();
        let hash = content_hash(&snippet.code);
        let embedding_json = serde_json::to_string(&snippet.embedding)?;

        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO snippets (id, name, project_id, code, embedding, content_hash, created_at, updated_at)
             VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                code = excluded.code,
                embedding = excluded.embedding,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at",
            params![&snippet.name, &snippet.project_id, &snippet.code, &embedding_json, &hash, &now],
        )?;

        let created_at: String = conn.query_row(
            "SELECT created_at FROM snippets WHERE id = ?1",
            params![&snippet.name],
            |row| row.get(0),
        )?;

        tracing::debug!(id = %snippet.name, project = %snippet.project_id, "Upserted snippet");

        Ok(Snippet {
            id: snippet.name.clone(),
            name: snippet.name,
            project_id: snippet.project_id,
            code: snippet.code,
            embedding: snippet.embedding,
            doc_type: SNIPPET_DOC_TYPE.to_string(),
            content_hash: hash,
            created_at,
            updated_at: now,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Snippet>, StoreError> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM snippets WHERE id = ?1", SNIPPET_COLUMNS),
                params![id],
                snippet_from_row,
            )
            .optional()?;

        match row {
            Some((mut snippet, embedding_json)) => {
                snippet.embedding = serde_json::from_str(&embedding_json)?;
                Ok(Some(snippet))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, project: Option<&str>) -> Result<Vec<SnippetSummary>, StoreError> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, project_id, content_hash, created_at, updated_at
             FROM snippets
             WHERE ?1 IS NULL OR project_id = ?1
             ORDER BY updated_at DESC, id ASC",
        )?;

        let summaries = stmt
            .query_map(params![project], |row| {
                Ok(SnippetSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    project_id: row.get(2)?,
                    content_hash: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.db.lock().await;
        let affected = conn.execute("DELETE FROM snippets WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    async fn vector_search(
        &self,
        project: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = {
            let conn = self.db.lock().await;
            let mut stmt = conn.prepare(
                "SELECT id, name, project_id, code, embedding FROM snippets WHERE project_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![project], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut hits = Vec::new();
        for (id, name, project_id, code, embedding_json) in rows {
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
            if embedding.is_empty() || embedding.len() != query.len() {
                continue;
            }
            let score = cosine_similarity(query, &embedding);
            hits.push(SearchHit {
                id,
                name,
                project_id,
                code,
                score,
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);

        tracing::debug!(project, hits = hits.len(), "Vector search complete");

        Ok(hits)
    }

    async fn probe(&self) -> Result<StoreInfo, StoreError> {
        let conn = self.db.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM snippets", [], |row| row.get(0))?;
        Ok(StoreInfo {
            location: self.location.clone(),
            snippet_count: count.max(0) as u64,
        })
    }
}

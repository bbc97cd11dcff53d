// Embeddings workflow: chunk -> fan-out embed -> mean -> persist

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

use super::WorkflowDeps;
use crate::config::constants::{DEFAULT_PROJECT, DEFAULT_SNIPPET_NAME};
use crate::embeddings::{chunk_text, mean_embedding};
use crate::orchestration::{OrchestrationContext, OrchestrationError};
use crate::storage::NewSnippet;

pub const EMBED_CHUNK_ACTIVITY: &str = "embed_chunk_activity";
pub const PERSIST_SNIPPET_ACTIVITY: &str = "persist_snippet_activity";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingsInput {
    project_id: Option<String>,
    name: Option<String>,
    text: Option<String>,
    snippets: Option<Vec<BatchItem>>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchItem {
    name: Option<String>,
    id: Option<String>,
    code: Option<String>,
    text: Option<String>,
}

struct Job {
    name: String,
    text: String,
}

/// Issue one embed call per chunk; futures are created (and numbered) now
fn schedule_chunks(
    ctx: &OrchestrationContext,
    text: &str,
    chunk_size: usize,
) -> Vec<futures::future::BoxFuture<'static, Result<Value, OrchestrationError>>> {
    chunk_text(text, chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            ctx.call_activity(
                EMBED_CHUNK_ACTIVITY,
                json!({"chunkIndex": index, "text": chunk}),
            )
        })
        .collect()
}

fn mean_of(results: Vec<Value>) -> Result<Vec<f32>> {
    let vectors: Vec<Vec<f32>> = results
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .collect();
    mean_embedding(&vectors)
}

pub async fn embeddings_orchestrator(
    ctx: OrchestrationContext,
    input: Value,
    chunk_size: usize,
) -> Result<Value> {
    let input: EmbeddingsInput = serde_json::from_value(input).unwrap_or_else(|e| {
        tracing::warn!(instance = %ctx.instance_id(), "Unexpected embeddings input shape: {}", e);
        EmbeddingsInput::default()
    });
    let project_id = input
        .project_id
        .unwrap_or_else(|| DEFAULT_PROJECT.to_string());

    let (jobs, batch) = match input.snippets {
        Some(items) => (
            items
                .into_iter()
                .map(|item| Job {
                    name: item
                        .name
                        .or(item.id)
                        .unwrap_or_else(|| DEFAULT_SNIPPET_NAME.to_string()),
                    text: item.code.or(item.text).unwrap_or_default(),
                })
                .collect::<Vec<_>>(),
            true,
        ),
        None => (
            vec![Job {
                name: input
                    .name
                    .unwrap_or_else(|| DEFAULT_SNIPPET_NAME.to_string()),
                text: input.text.unwrap_or_default(),
            }],
            false,
        ),
    };

    tracing::info!(instance = %ctx.instance_id(), project = %project_id, snippets = jobs.len(), "Embeddings orchestration start");

    // Phase 1: every chunk of every snippet, in snippet order
    let mut chunk_counts = Vec::with_capacity(jobs.len());
    let mut embed_calls = Vec::new();
    for job in &jobs {
        let calls = schedule_chunks(&ctx, &job.text, chunk_size);
        chunk_counts.push(calls.len());
        embed_calls.extend(calls);
    }
    let mut embedded = ctx.task_all(embed_calls).await?.into_iter();

    // Phase 2: one persist per snippet, in snippet order
    let mut persist_calls = Vec::with_capacity(jobs.len());
    for (job, count) in jobs.iter().zip(chunk_counts) {
        let vectors: Vec<Value> = embedded.by_ref().take(count).collect();
        let embedding = mean_of(vectors)?;
        persist_calls.push(ctx.call_activity(
            PERSIST_SNIPPET_ACTIVITY,
            json!({
                "projectId": project_id,
                "name": job.name,
                "code": job.text,
                "embedding": embedding,
            }),
        ));
    }
    let mut results = ctx.task_all(persist_calls).await?;

    if !batch {
        return Ok(results.pop().unwrap_or_else(|| json!({"ok": false})));
    }

    let ok = results
        .iter()
        .all(|r| r.get("ok").and_then(Value::as_bool) == Some(true));
    Ok(json!({"ok": ok, "results": results}))
}

/// Embed one chunk. Failures are logged and produce `[]`, which the mean skips.
pub async fn embed_chunk_activity(deps: WorkflowDeps, input: Value) -> Result<Value> {
    let text = input.get("text").and_then(Value::as_str).unwrap_or("");
    let index = input.get("chunkIndex").and_then(Value::as_u64).unwrap_or(0);

    if text.is_empty() {
        return Ok(json!([]));
    }

    match deps.snippets.embedder().embed(text).await {
        Ok(vector) => Ok(json!(vector)),
        Err(e) => {
            tracing::error!(chunk = index, "Embedding failed: {:#}", e);
            Ok(json!([]))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistInput {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    code: String,
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Upsert a snippet with its precomputed embedding
pub async fn persist_snippet_activity(deps: WorkflowDeps, input: Value) -> Result<Value> {
    let input: PersistInput = match serde_json::from_value(input) {
        Ok(i) => i,
        Err(e) => return Ok(json!({"ok": false, "error": format!("invalid input: {}", e)})),
    };

    let snippet = NewSnippet {
        name: input
            .name
            .unwrap_or_else(|| DEFAULT_SNIPPET_NAME.to_string()),
        project_id: input
            .project_id
            .unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
        code: input.code,
        embedding: input.embedding,
    };

    match deps.snippets.persist(snippet).await {
        Ok(saved) => Ok(json!({"ok": true, "id": saved.id})),
        Err(e) => {
            tracing::error!("persist_snippet failed: {:#}", e);
            Ok(json!({"ok": false, "error": format!("{:#}", e)}))
        }
    }
}

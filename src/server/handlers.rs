// Snippet, query, health, security and MCP handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::config::constants::{DEFAULT_PROJECT, MAX_TOP_K};
use crate::rag::{RagEngine, RagError};
use crate::storage::SavedSnippet;

/// Parse a request body as JSON, mapping syntax errors to 400
pub(super) fn parse_body(body: &Bytes) -> ApiResult<Value> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

fn str_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

/// Accept `5` or `"5"`
fn usize_field(body: &Value, key: &str) -> Option<usize> {
    body.get(key).and_then(|v| {
        v.as_u64()
            .map(|n| n as usize)
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    })
}

fn not_found(name: &str) -> ApiError {
    ApiError::NotFound(format!("Snippet '{}' not found", name))
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn health_extended(State(state): State<AppState>) -> Response {
    let dir = &state.settings.ingestion.container_dir;
    let storage = match tokio::fs::create_dir_all(dir).await {
        Ok(()) => tokio::fs::read_dir(dir).await.map(|_| ()),
        Err(e) => Err(e),
    };
    if let Err(e) = storage {
        tracing::error!(dir = %dir.display(), "Ingestion directory check failed: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "storage": format!("error: {}", e), "cosmos": "skipped"})),
        )
            .into_response();
    }

    if let Err(e) = state.snippets.probe().await {
        tracing::error!("Store probe failed: {:#}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "storage": "ok", "cosmos": format!("error: {:#}", e)})),
        )
            .into_response();
    }

    Json(json!({"status": "OK", "storage": "ok", "cosmos": "ok"})).into_response()
}

pub async fn rbac_check(State(state): State<AppState>) -> Response {
    match state.snippets.probe().await {
        Ok(info) => Json(json!({"ok": true, "container": info.location})).into_response(),
        Err(e) => {
            tracing::error!("RBAC check failed: {:#}", e);
            (
                StatusCode::FORBIDDEN,
                Json(json!({"ok": false, "error": format!("{:#}", e)})),
            )
                .into_response()
        }
    }
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let text = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}

pub async fn save_snippet(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<SavedSnippet>> {
    let body = parse_body(&body)?;
    let name = str_field(&body, "name").filter(|s| !s.is_empty());
    let code = str_field(&body, "code").filter(|s| !s.is_empty());
    let (name, code) = match (name, code) {
        (None, _) => return Err(ApiError::BadRequest("Missing required field: name".into())),
        (_, None) => return Err(ApiError::BadRequest("Missing required field: code".into())),
        (Some(n), Some(c)) => (n, c),
    };
    let project = str_field(&body, "projectId")
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PROJECT);

    let saved = state.snippets.save(name, code, project).await?;
    Ok(Json(saved))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
}

pub async fn list_snippets(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let project = params.project_id.as_deref().filter(|p| !p.is_empty());
    let summaries = state.snippets.list(project).await?;
    Ok(Json(json!(summaries)))
}

pub async fn get_snippet(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SavedSnippet>> {
    match state.snippets.get(&name).await? {
        Some(snippet) => Ok(Json(SavedSnippet::from(snippet))),
        None => Err(not_found(&name)),
    }
}

pub async fn delete_snippet(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.snippets.delete(&name).await? {
        Ok(Json(json!({"deleted": true})))
    } else {
        Err(not_found(&name))
    }
}

pub async fn query(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let body = parse_body(&body)?;
    let question = str_field(&body, "question")
        .or_else(|| str_field(&body, "query"))
        .unwrap_or("");
    let project = str_field(&body, "projectId")
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PROJECT);
    let k = usize_field(&body, "top_k")
        .or_else(|| usize_field(&body, "maxResults"))
        .unwrap_or(state.settings.retrieval.top_k)
        .clamp(1, MAX_TOP_K);

    let engine = RagEngine {
        snippets: &state.snippets,
        chat: state.chat.as_ref(),
        temperature: state.settings.llm.temperature,
        timeout: Duration::from_secs(state.settings.server.request_timeout_secs.max(1)),
    };

    match engine.answer(question, project, k).await {
        Ok(answer) => Ok(Json(answer).into_response()),
        Err(RagError::EmptyQuestion) => Err(ApiError::BadRequest("question is required".into())),
        Err(e @ RagError::Retrieval(_)) => Err(ApiError::BadGateway(e.to_string())),
    }
}

/// JSON-RPC over POST; notifications are acknowledged with 202 and no body
pub async fn mcp(State(state): State<AppState>, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body);
    match state.mcp.handle(&text).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usize_field_accepts_strings() {
        let body = json!({"top_k": "7", "maxResults": 3, "bad": "x"});
        assert_eq!(usize_field(&body, "top_k"), Some(7));
        assert_eq!(usize_field(&body, "maxResults"), Some(3));
        assert_eq!(usize_field(&body, "bad"), None);
        assert_eq!(usize_field(&body, "missing"), None);
    }

    #[test]
    fn test_parse_body_rejects_garbage() {
        let err = parse_body(&Bytes::from_static(b"{nope")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}

// Orchestration starters and the durable instance management API

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::handlers::parse_body;
use super::state::AppState;
use crate::config::constants::{EMBEDDINGS_ORCHESTRATOR, MULTI_AGENT_ORCHESTRATOR};
use crate::orchestration::{InstanceRecord, OrchestrationError};

pub const INSTANCES_PATH: &str = "/runtime/webhooks/durabletask/instances";

/// Scheme and host used in check-status links
fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = state
        .settings
        .server
        .public_base_url
        .as_deref()
        .filter(|b| !b.is_empty())
    {
        return base.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or(&state.settings.server.bind_address);
    format!("http://{}", host)
}

pub fn check_status_payload(base: &str, id: &str) -> Value {
    let instance = format!("{}{}/{}", base, INSTANCES_PATH, id);
    json!({
        "id": id,
        "statusQueryGetUri": instance,
        "sendEventPostUri": format!("{}/raiseEvent/{{eventName}}", instance),
        "terminatePostUri": format!("{}/terminate?reason={{text}}", instance),
        "purgeHistoryDeleteUri": instance,
    })
}

async fn start(
    state: &AppState,
    headers: &HeaderMap,
    orchestrator: &str,
    body: &Bytes,
) -> ApiResult<Response> {
    let input = parse_body(body)?;
    let id = state.runtime.start_new(orchestrator, None, input).await?;

    let payload = check_status_payload(&base_url(state, headers), &id);
    let location = payload["statusQueryGetUri"].as_str().unwrap_or_default().to_string();
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, location)],
        Json(payload),
    )
        .into_response())
}

pub async fn start_embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    start(&state, &headers, EMBEDDINGS_ORCHESTRATOR, &body).await
}

pub async fn start_multi_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    start(&state, &headers, MULTI_AGENT_ORCHESTRATOR, &body).await
}

fn status_body(record: &InstanceRecord) -> Value {
    json!({
        "name": record.name,
        "instanceId": record.id,
        "runtimeStatus": record.status,
        "input": record.input,
        "customStatus": record.custom_status,
        "output": record.output,
        "createdTime": record.created_at,
        "lastUpdatedTime": record.updated_at,
    })
}

/// 200 once terminal, 202 while Pending or Running
pub async fn get_status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let record = state.runtime.status(&id).await?;
    let code = if record.status.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((code, Json(status_body(&record))).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TerminateParams {
    pub reason: Option<String>,
}

pub async fn terminate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TerminateParams>,
) -> ApiResult<StatusCode> {
    let reason = params.reason.unwrap_or_default();
    state.runtime.terminate(&id, &reason).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Empty body records `null` as the event data
pub async fn raise_event(
    State(state): State<AppState>,
    Path((id, event)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let data = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        parse_body(&body)?
    };
    state.runtime.raise_event(&id, &event, data).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Purging a live instance is a conflict rather than gone
pub async fn purge(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    match state.runtime.purge(&id).await {
        Ok(()) => Ok(Json(json!({"instancesDeleted": 1}))),
        Err(e @ OrchestrationError::NotRunning { .. }) => Err(ApiError::Conflict(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status_links() {
        let payload = check_status_payload("http://localhost:7071", "abc");
        assert_eq!(payload["id"], "abc");
        assert_eq!(
            payload["statusQueryGetUri"],
            "http://localhost:7071/runtime/webhooks/durabletask/instances/abc"
        );
        assert!(payload["sendEventPostUri"]
            .as_str()
            .unwrap()
            .ends_with("/abc/raiseEvent/{eventName}"));
        assert!(payload["terminatePostUri"]
            .as_str()
            .unwrap()
            .ends_with("/abc/terminate?reason={text}"));
        assert_eq!(payload["purgeHistoryDeleteUri"], payload["statusQueryGetUri"]);
    }
}

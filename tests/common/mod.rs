// Shared helpers for integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use snippy::config::Settings;
use snippy::server::{create_router, AppState, IN_MEMORY_DB};

/// Mock providers, in-memory store, ingestion under `dir`, generous rate limits
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.llm.mock = true;
    settings.storage.db_path = PathBuf::from(IN_MEMORY_DB);
    settings.ingestion.enabled = false;
    settings.ingestion.container_dir = dir.join("ingestion");
    settings.security.rate_limit_per_second = 1000.0;
    settings.security.rate_limit_burst = 1000.0;
    settings.server.public_base_url = Some("http://localhost:7071".to_string());
    settings
}

pub fn build_state(settings: Settings) -> AppState {
    AppState::build(settings, CancellationToken::new()).unwrap()
}

pub fn app(settings: Settings) -> (AppState, Router) {
    let state = build_state(settings);
    let router = create_router(state.clone());
    (state, router)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    post_raw(uri, body.to_string())
}

pub fn post_raw(uri: &str, body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

/// Send one request; an empty body comes back as `Value::Null`
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, body)
}

/// Poll the status endpoint until it answers 200
pub async fn wait_for_instance(app: &Router, id: &str) -> Value {
    let uri = format!("/runtime/webhooks/durabletask/instances/{}", id);
    for _ in 0..200 {
        let (status, _, body) = send(app, get(&uri)).await;
        if status == StatusCode::OK {
            return body;
        }
        assert_eq!(status, StatusCode::ACCEPTED, "unexpected status body: {}", body);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("instance {} did not finish", id);
}

// HTTP host
//
// One axum router for the snippet API, query, durable orchestration
// management, MCP and health. Background tasks (ingestion, rate-limit
// bucket purge) share the process shutdown token.

mod durable;
mod error;
mod handlers;
mod middleware;
mod state;

pub use durable::{check_status_payload, INSTANCES_PATH};
pub use error::{ApiError, ApiResult};
pub use middleware::{RateLimiter, FUNCTION_KEY_HEADER};
pub use state::{AppState, IN_MEMORY_DB};

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Settings;

const BUCKET_PURGE_INTERVAL: Duration = Duration::from_secs(60);
const BUCKET_IDLE: Duration = Duration::from_secs(300);

/// Build the router with auth, rate limiting, metrics and tracing applied
pub fn create_router(state: AppState) -> Router {
    let instance = format!("{}/:id", INSTANCES_PATH);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/health_extended", get(handlers::health_extended))
        .route("/api/security/rbac-check", get(handlers::rbac_check))
        .route("/api/metrics", get(handlers::metrics))
        .route(
            "/api/snippets",
            post(handlers::save_snippet).get(handlers::list_snippets),
        )
        .route(
            "/api/snippets/:name",
            get(handlers::get_snippet).delete(handlers::delete_snippet),
        )
        .route("/api/query", post(handlers::query))
        .route("/api/orchestrators/embeddings", post(durable::start_embeddings))
        .route(
            "/api/orchestrators/multi-agent-review",
            post(durable::start_multi_agent),
        )
        .route(&instance, get(durable::get_status).delete(durable::purge))
        .route(&format!("{}/terminate", instance), post(durable::terminate))
        .route(
            &format!("{}/raiseEvent/:event", instance),
            post(durable::raise_event),
        )
        .route("/runtime/webhooks/mcp", post(handlers::mcp))
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), middleware::track_requests))
        .layer(DefaultBodyLimit::max(state.settings.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn purge_buckets(limiter: RateLimiter, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(BUCKET_PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let dropped = limiter.forget_idle(BUCKET_IDLE);
                if dropped > 0 {
                    tracing::debug!(dropped, remaining = limiter.client_count(), "Forgot idle rate-limit clients");
                }
            }
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

/// Run the HTTP host until Ctrl-C
pub async fn serve(settings: Settings) -> Result<()> {
    let addr: SocketAddr = settings
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", settings.server.bind_address))?;

    let shutdown = CancellationToken::new();
    let state = AppState::build(settings, shutdown.clone())?;

    let resumed = state
        .runtime
        .resume_incomplete()
        .await
        .context("Failed to resume orchestrations")?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed incomplete orchestrations");
    }

    let mut tasks = Vec::new();
    if state.settings.ingestion.enabled {
        tasks.push(tokio::spawn(state.ingestor().run(shutdown.clone())));
    }
    tasks.push(tokio::spawn(purge_buckets(
        state.limiter.clone(),
        shutdown.clone(),
    )));

    if !state.auth_enabled() {
        tracing::warn!("Function-key auth disabled");
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Snippy listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .context("HTTP server error")?;

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

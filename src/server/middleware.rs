// Middleware: function-key auth, per-client rate limiting, request metrics

use axum::{
    extract::{ConnectInfo, MatchedPath, Query, Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use super::state::{key_digest, AppState};
use crate::config::SecuritySettings;

pub const FUNCTION_KEY_HEADER: &str = "x-functions-key";

/// Routes reachable without a function key
fn is_anonymous(method: &Method, path: &str) -> bool {
    method == Method::GET && path == "/api/health"
}

fn digests_equal(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Compare against every configured key without short-circuiting
fn key_accepted(accepted: &[[u8; 32]], presented: &str) -> bool {
    let digest = key_digest(presented);
    accepted
        .iter()
        .fold(false, |found, key| found | digests_equal(key, &digest))
}

fn presented_key(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(FUNCTION_KEY_HEADER) {
        if let Ok(key) = value.to_str() {
            return Some(key.to_string());
        }
    }
    Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove("code"))
}

/// Reject requests without a valid function key. No configured keys means open.
pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.auth_enabled() || is_anonymous(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    match presented_key(&request) {
        Some(key) if key_accepted(&state.key_digests, &key) => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected request without a valid function key");
            ApiError::Unauthorized("unauthorized".into()).into_response()
        }
    }
}

/// Remaining allowance for one client address
struct Allowance {
    available: f64,
    updated: Instant,
}

/// Per-client token buckets keyed on the resolved client address.
///
/// The socket peer is the client unless it is a configured proxy, in which
/// case the nearest untrusted `X-Forwarded-For` hop is used instead.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    clients: DashMap<IpAddr, Allowance>,
    burst: f64,
    per_second: f64,
    trusted_proxies: Vec<IpAddr>,
}

impl RateLimiter {
    pub fn new(security: &SecuritySettings) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                clients: DashMap::new(),
                burst: security.rate_limit_burst.max(1.0),
                per_second: security.rate_limit_per_second.max(0.0),
                trusted_proxies: security.trusted_proxies.clone(),
            }),
        }
    }

    fn is_trusted(&self, addr: &IpAddr) -> bool {
        self.inner.trusted_proxies.contains(addr)
    }

    /// Address to charge for a request from `peer` carrying `forwarded`
    pub fn resolve_client(&self, peer: IpAddr, forwarded: Option<&str>) -> IpAddr {
        if !self.is_trusted(&peer) {
            return peer;
        }
        let Some(chain) = forwarded else {
            return peer;
        };

        // Walk back from the hop that reached the proxy
        let mut client = peer;
        for hop in chain.rsplit(',') {
            match hop.trim().parse::<IpAddr>() {
                Ok(addr) => {
                    client = addr;
                    if !self.is_trusted(&addr) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        client
    }

    /// Take one request from `client`'s allowance; false once it is spent
    pub fn admit(&self, client: IpAddr) -> bool {
        let now = Instant::now();
        let burst = self.inner.burst;
        let mut allowance = self.inner.clients.entry(client).or_insert_with(|| Allowance {
            available: burst,
            updated: now,
        });

        let refill = now.duration_since(allowance.updated).as_secs_f64() * self.inner.per_second;
        allowance.available = (allowance.available + refill).min(burst);
        allowance.updated = now;

        if allowance.available < 1.0 {
            return false;
        }
        allowance.available -= 1.0;
        true
    }

    /// Forget clients quiet for longer than `idle`; returns how many were dropped
    pub fn forget_idle(&self, idle: Duration) -> usize {
        let before = self.inner.clients.len();
        let now = Instant::now();
        self.inner
            .clients
            .retain(|_, allowance| now.duration_since(allowance.updated) < idle);
        before.saturating_sub(self.inner.clients.len())
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }
}

/// Socket peer; in-process callers without connect info count as loopback
fn peer_addr(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let client = state.limiter.resolve_client(peer_addr(&request), forwarded);

    if state.limiter.admit(client) {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, "Rate limit exceeded");
        ApiError::TooManyRequests("rate limit exceeded".into()).into_response()
    }
}

/// Count every response by matched route and status
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    state
        .metrics
        .http_requests
        .with_label_values(&[route.as_str(), response.status().as_str()])
        .inc();
    response
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

const WINDOW: Duration = Duration::from_secs(1);
const MAX_TRACKED_CLIENTS: usize = 10_000;

#[derive(Debug)]
struct WindowState {
    start: Instant,
    count: u32,
}

/// Fixed one-second window per client address.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    rps: u32,
    policy: ClientIpPolicy,
    windows: Arc<Mutex<HashMap<String, WindowState>>>,
}

impl RateLimiter {
    pub fn new(rps: u32, policy: ClientIpPolicy) -> Self {
        Self {
            rps: rps.max(1),
            policy,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if windows.len() >= MAX_TRACKED_CLIENTS {
            windows.retain(|_, w| now.duration_since(w.start) < WINDOW);
        }
        let window = windows.entry(client.to_string()).or_insert(WindowState {
            start: now,
            count: 0,
        });
        if now.duration_since(window.start) >= WINDOW {
            window.start = now;
            window.count = 0;
        }
        if window.count < self.rps {
            window.count += 1;
            true
        } else {
            false
        }
    }
}

/// Decides where the client address of a request comes from.
///
/// `X-Forwarded-For` is client-controlled unless a proxy in front of us
/// rewrites it, so it is read only when `trust_forwarded_for` is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientIpPolicy {
    pub trust_forwarded_for: bool,
}

impl ClientIpPolicy {
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
        if self.trust_forwarded_for {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return Some(ip.to_string());
            }
        }
        peer.map(|addr| addr.ip().to_string())
    }
}

pub async fn rps_middleware(
    State(state): State<RateLimiter>,
    peer: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = state
        .policy
        .resolve(req.headers(), peer.map(|ConnectInfo(addr)| addr))
        .unwrap_or_else(|| "unknown".to_string());
    if !state.allow(&client) {
        tracing::warn!(client = %client, "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"success": false, "error": "Too many requests", "code": "rate_limit_exceeded"})),
        )
            .into_response();
    }
    next.run(req).await
}

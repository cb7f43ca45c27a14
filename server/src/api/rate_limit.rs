use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::db::models::normalize_email;
use crate::error::{Result, StatsError};

/// Login bodies are a single email; anything larger is refused unread.
const MAX_LOGIN_BODY: usize = 16 * 1024;

struct Attempts {
    by_client: HashMap<String, VecDeque<Instant>>,
    last_pruned: Instant,
}

/// Sliding-window attempt log per client key.
#[derive(Clone)]
pub struct RateLimiter {
    attempts: Arc<Mutex<Attempts>>,
    max_requests: usize,
    window: Duration,
    trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(Attempts {
                by_client: HashMap::new(),
                last_pruned: Instant::now(),
            })),
            max_requests,
            window,
            trusted_proxies: Arc::from(Vec::new()),
        }
    }

    /// Peers whose forwarding headers are believed.
    pub fn with_trusted_proxies(mut self, proxies: &[IpAddr]) -> Self {
        self.trusted_proxies = Arc::from(proxies);
        self
    }

    /// Records an attempt from `client`. Over the limit, nothing is recorded
    /// and the error carries how long until the oldest attempt leaves the window.
    pub async fn check_request(&self, client: &str) -> Result<(), Duration> {
        let mut attempts = self.attempts.lock().await;
        let now = Instant::now();

        // Idle clients are forgotten at most once per window
        if now.duration_since(attempts.last_pruned) >= self.window {
            let window = self.window;
            attempts
                .by_client
                .retain(|_, log| log.back().is_some_and(|t| now.duration_since(*t) < window));
            attempts.last_pruned = now;
        }

        let log = attempts.by_client.entry(client.to_string()).or_default();
        while log.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            log.pop_front();
        }

        if log.len() < self.max_requests {
            log.push_back(now);
            return Ok(());
        }

        let wait = log
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.window);
        warn!("Rate limit exceeded for {}", client);
        Err(wait)
    }

    /// Address of the client behind `peer`. Forwarding headers only count
    /// when `peer` is a trusted proxy; the nearest untrusted hop wins.
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let Some(peer) = peer.map(|addr| addr.ip()) else {
            return "unknown".to_string();
        };
        if !self.trusted_proxies.contains(&peer) {
            return peer.to_string();
        }

        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let forwarded = header("x-forwarded-for").and_then(|chain| {
            chain
                .rsplit(',')
                .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
                .find(|hop| !self.trusted_proxies.contains(hop))
        });
        let real_ip = || header("x-real-ip").and_then(|v| v.trim().parse::<IpAddr>().ok());

        forwarded.or_else(real_ip).unwrap_or(peer).to_string()
    }
}

#[derive(Deserialize)]
struct LoginAttempt {
    email: String,
}

/// Limiter key for a login body: the normalized email at the client
/// address, or the address alone when the body names no valid email.
fn login_key(body: &[u8], client: &str) -> String {
    serde_json::from_slice::<LoginAttempt>(body)
        .ok()
        .and_then(|attempt| normalize_email(&attempt.email).ok())
        .map_or_else(|| client.to_string(), |email| format!("{}|{}", email, client))
}

/// Limits login attempts per account and client address. The body is
/// buffered to read the email and handed on unchanged.
pub async fn login_rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = limiter.client_ip(request.headers(), peer);

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_LOGIN_BODY)
        .await
        .map_err(|_| StatsError::Validation("login body is too large".to_string()))?;

    limiter
        .check_request(&login_key(&body, &client))
        .await
        .map_err(|wait| StatsError::RateLimited {
            retry_after_secs: wait.as_secs().max(1),
        })?;

    Ok(next.run(Request::from_parts(parts, Body::from(body))).await)
}

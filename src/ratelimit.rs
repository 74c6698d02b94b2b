//! Fixed-window rate limiting per source address.
//!
//! One window entry per address, swept once per window so the table stays
//! bounded. The health path never reaches this layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::auth::source_addr;
use crate::http::HttpState;

pub const WINDOW: Duration = Duration::from_secs(60);

struct WindowEntry {
    window_start: Instant,
    count: u32,
}

/// Outcome of one admission check.
pub enum Decision {
    Allowed { remaining: u32, reset_secs: u64 },
    Limited { retry_after_secs: u64 },
}

pub struct RateLimiter {
    budget: u32,
    entries: DashMap<String, WindowEntry>,
}

impl RateLimiter {
    pub fn new(budget: u32) -> Self {
        Self { budget, entries: DashMap::new() }
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Admit or reject one request from `source`.
    pub fn check(&self, source: &str) -> Decision {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(source.to_string())
            .or_insert_with(|| WindowEntry { window_start: now, count: 0 });

        if now.duration_since(entry.window_start) >= WINDOW {
            entry.window_start = now;
            entry.count = 0;
        }

        let elapsed = now.duration_since(entry.window_start);
        let reset_secs = WINDOW.saturating_sub(elapsed).as_secs().max(1);

        if entry.count >= self.budget {
            return Decision::Limited { retry_after_secs: reset_secs };
        }
        entry.count += 1;
        Decision::Allowed { remaining: self.budget - entry.count, reset_secs }
    }

    /// Drop entries whose window has fully expired.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now.duration_since(entry.window_start) < WINDOW);
        let swept = before - self.entries.len();
        if swept > 0 {
            debug!(swept, remaining = self.entries.len(), "Swept expired rate-limit windows");
        }
    }
}

/// Background sweeper, once per window.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(WINDOW);
        interval.tick().await;
        loop {
            interval.tick().await;
            limiter.sweep();
        }
    })
}

/// Admission middleware for the MCP router.
pub async fn enforce(
    State(state): State<HttpState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let source = source_addr(request.headers(), &request);

    match state.limiter.check(&source) {
        Decision::Allowed { remaining, reset_secs } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", header_num(state.limiter.budget() as u64));
            headers.insert("x-ratelimit-remaining", header_num(remaining as u64));
            headers.insert("x-ratelimit-reset", header_num(reset_secs));
            Ok(response)
        }
        Decision::Limited { retry_after_secs } => {
            warn!(
                source = source.as_str(),
                path = request.uri().path(),
                "Rate limit exceeded"
            );
            let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
            let headers = response.headers_mut();
            headers.insert("retry-after", header_num(retry_after_secs));
            headers.insert("x-ratelimit-limit", header_num(state.limiter.budget() as u64));
            headers.insert("x-ratelimit-remaining", header_num(0));
            headers.insert("x-ratelimit-reset", header_num(retry_after_secs));
            Err(response)
        }
    }
}

fn header_num(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

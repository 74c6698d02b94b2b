//! Streamable HTTP transport: `/health` plus the `/mcp` endpoint with
//! session management, bearer auth, and per-address rate limiting.
//!
//! Sessions are created on `initialize` and echoed back via the
//! `Mcp-Session-Id` header; later requests must present it. `DELETE /mcp`
//! closes the session and releases its state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth;
use crate::ratelimit::{self, RateLimiter};
use crate::tools::{dispatch_jsonrpc, negotiate_version, ServiceContext};

const SESSION_HEADER: &str = "mcp-session-id";

/// Idle sessions older than this are pruned.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Per-session transport state.
pub struct McpSession {
    pub protocol_version: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub tool_calls: u64,
}

impl McpSession {
    fn new(protocol_version: String) -> Self {
        let now = Instant::now();
        Self { protocol_version, created_at: now, last_activity: now, tool_calls: 0 }
    }
}

/// Axum state for the HTTP transport.
#[derive(Clone)]
pub struct HttpState {
    pub ctx: Arc<ServiceContext>,
    pub sessions: Arc<DashMap<String, McpSession>>,
    pub limiter: Arc<RateLimiter>,
    pub auth_token: Arc<String>,
}

impl HttpState {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        let limiter = Arc::new(RateLimiter::new(ctx.config.rate_limit));
        let auth_token = Arc::new(ctx.config.auth_token.clone().unwrap_or_default());
        Self { ctx, sessions: Arc::new(DashMap::new()), limiter, auth_token }
    }
}

/// Build the full router. `/health` sits outside the auth and rate-limit
/// layers; everything under `/mcp` is behind both.
pub fn build_router(state: HttpState) -> Router {
    let cors = match state.ctx.config.allowed_origin.as_deref() {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new().allow_origin(value),
            Err(_) => CorsLayer::new().allow_origin(Any),
        },
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
    .allow_headers(Any)
    .expose_headers([SESSION_HEADER.parse::<axum::http::HeaderName>().unwrap()]);

    let mcp_routes = Router::new()
        .route("/mcp", post(handle_mcp_post).get(handle_mcp_get).delete(handle_mcp_delete))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer))
        .layer(middleware::from_fn_with_state(state.clone(), ratelimit::enforce));

    Router::new()
        .route("/health", get(handle_health))
        .merge(mcp_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Prune idle sessions periodically. Returns the sweeper handle.
pub fn spawn_session_sweeper(
    sessions: Arc<DashMap<String, McpSession>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let cutoff = Instant::now() - SESSION_IDLE_TIMEOUT;
            let before = sessions.len();
            sessions.retain(|_, session| session.last_activity > cutoff);
            let pruned = before - sessions.len();
            if pruned > 0 {
                debug!(pruned, remaining = sessions.len(), "Pruned idle MCP sessions");
            }
        }
    })
}

// ---------------------------------------------------------------------------
// GET /health — never authenticated
// ---------------------------------------------------------------------------

async fn handle_health(State(state): State<HttpState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "transport": "http",
        "uptime": state.ctx.started_at.elapsed().as_secs(),
        "activeSessions": state.sessions.len(),
    }))
}

// ---------------------------------------------------------------------------
// POST /mcp — JSON-RPC dispatch with session management
// ---------------------------------------------------------------------------

async fn handle_mcp_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, Response> {
    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(_) => {
            let err = json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": -32700, "message": "Parse error" }
            });
            return Ok(json_response(StatusCode::BAD_REQUEST, &err));
        }
    };

    let is_batch = parsed.is_array();
    let requests: Vec<serde_json::Value> =
        if is_batch { parsed.as_array().cloned().unwrap_or_default() } else { vec![parsed] };

    let has_initialize =
        requests.iter().any(|r| r["method"].as_str() == Some("initialize"));

    let session_id =
        headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(String::from);

    // Session validation for non-initialize requests: a missing header is a
    // caller mistake (400), an unknown session id is a stale session (404).
    if !has_initialize {
        match session_id.as_deref() {
            Some(sid) if state.sessions.contains_key(sid) => {}
            Some(_) => {
                return Err(error_response(
                    StatusCode::NOT_FOUND,
                    "Unknown or expired session ID",
                ));
            }
            None => {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "Missing Mcp-Session-Id header. Send 'initialize' first.",
                ));
            }
        }
    }

    let mut responses: Vec<serde_json::Value> = Vec::new();
    let mut new_session_id: Option<String> = None;

    for request in &requests {
        let method = request["method"].as_str().unwrap_or("");

        if method == "initialize" {
            let requested = request["params"]["protocolVersion"].as_str().unwrap_or("");
            let negotiated = negotiate_version(requested);

            let sid = Uuid::new_v4().to_string();
            state.sessions.insert(sid.clone(), McpSession::new(negotiated.to_string()));
            info!(session = sid.as_str(), protocol = negotiated, "Session created");
            new_session_id = Some(sid);
        } else if let Some(sid) = session_id.as_deref().or(new_session_id.as_deref()) {
            if let Some(mut session) = state.sessions.get_mut(sid) {
                session.last_activity = Instant::now();
                if method == "tools/call" {
                    session.tool_calls += 1;
                }
            }
        }

        if let Some(response) = dispatch_jsonrpc(&state.ctx, request).await {
            responses.push(response);
        }
    }

    if responses.is_empty() {
        // All notifications.
        return Ok(Response::builder().status(StatusCode::ACCEPTED).body(Body::empty()).unwrap());
    }

    let body_json = if is_batch {
        serde_json::to_string(&responses).unwrap_or_default()
    } else {
        serde_json::to_string(&responses[0]).unwrap_or_default()
    };

    let mut builder =
        Response::builder().status(StatusCode::OK).header("content-type", "application/json");
    if let Some(ref sid) = new_session_id {
        builder = builder.header(SESSION_HEADER, sid);
    }
    Ok(builder.body(Body::from(body_json)).unwrap())
}

// ---------------------------------------------------------------------------
// GET /mcp — authenticated, but no server-push channel
// ---------------------------------------------------------------------------

async fn handle_mcp_get() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

// ---------------------------------------------------------------------------
// DELETE /mcp — session termination
// ---------------------------------------------------------------------------

async fn handle_mcp_delete(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<StatusCode, Response> {
    let Some(sid) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(error_response(StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header"));
    };
    match state.sessions.remove(sid) {
        Some(_) => {
            info!(session = sid, "Session closed");
            Ok(StatusCode::OK)
        }
        None => Err(error_response(StatusCode::NOT_FOUND, "Unknown or expired session ID")),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap_or_default()))
        .unwrap()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": { "code": -32600, "message": message }
    });
    json_response(status, &body)
}

//! Bearer-token authentication for the HTTP transport.
//!
//! The expected token comes from `MCP_AUTH_TOKEN` at startup. The health
//! endpoint is mounted outside this middleware; everything else on the MCP
//! router requires `Authorization: Bearer <token>`. Every failure is audited
//! with the source address and requested path.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::http::HttpState;

const WWW_AUTHENTICATE: &str = "Bearer realm=\"mcp\"";

/// Source address for audit records and rate limiting: the first
/// comma-separated value of `X-Forwarded-For` when present, else the peer
/// address recorded by the listener.
pub fn source_addr(headers: &HeaderMap, request: &Request) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn unauthorized() -> Response {
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(WWW_AUTHENTICATE));
    response
}

/// Require a valid bearer token on every request that reaches this layer.
pub async fn require_bearer(
    State(state): State<HttpState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let source = source_addr(request.headers(), &request);
    let path = request.uri().path().to_string();
    let method = request.method().clone();

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == state.auth_token.as_str() => {
            info!(source = source.as_str(), method = %method, path = path.as_str(), "Authenticated request");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(source = source.as_str(), method = %method, path = path.as_str(), "Rejected invalid bearer token");
            Err(unauthorized())
        }
        None => {
            warn!(source = source.as_str(), method = %method, path = path.as_str(), "Rejected request without bearer token");
            Err(unauthorized())
        }
    }
}

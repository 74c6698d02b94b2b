//! Service error type with machine-readable kinds.
//!
//! Every error surfaced to a client carries a stable `kind()` string plus a
//! human-readable message. Internal paths and secrets never appear in
//! client-facing messages.

use std::path::PathBuf;

/// Errors produced by tool handlers and the transports.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Auth,

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Repo exists but has no index yet. Carries remediation guidance.
    #[error("Codebase at '{path}' is not indexed. Run index_codebase first.")]
    NotIndexed { path: String },

    /// Transient failure in an external collaborator (vector store,
    /// embedding provider, git subprocess). Retriable with backoff.
    #[error("External service error ({service}): {message}")]
    External { service: &'static str, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable machine-readable error kind, part of the client contract.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Config(_) => "configuration",
            ServiceError::Auth => "authentication",
            ServiceError::RateLimited { .. } => "rate_limit",
            ServiceError::Validation(_) => "validation",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::NotIndexed { .. } => "not_indexed",
            ServiceError::External { .. } => "external",
            ServiceError::Timeout(_) => "timeout",
            ServiceError::Io { .. } => "io",
            ServiceError::Internal(_) => "internal",
        }
    }

    /// Whether a bounded retry with backoff is worthwhile.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ServiceError::External { .. } | ServiceError::Timeout(_))
    }

    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::External { service, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ServiceError::Auth.kind(), "authentication");
        assert_eq!(ServiceError::Validation("x".into()).kind(), "validation");
        assert_eq!(ServiceError::NotIndexed { path: "/p".into() }.kind(), "not_indexed");
        assert_eq!(ServiceError::external("milvus", "503").kind(), "external");
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(ServiceError::external("embedder", "timeout").is_retriable());
        assert!(ServiceError::Timeout(std::time::Duration::from_secs(5)).is_retriable());
        assert!(!ServiceError::Validation("bad".into()).is_retriable());
        assert!(!ServiceError::NotFound("x".into()).is_retriable());
    }
}

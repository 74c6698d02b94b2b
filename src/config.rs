//! Runtime configuration, resolved once in `main` and threaded through
//! construction. Replaces any process-global state.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ServiceError};

/// Which transports to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
    Both,
}

impl Transport {
    pub fn http_enabled(self) -> bool {
        matches!(self, Transport::Http | Transport::Both)
    }

    pub fn stdio_enabled(self) -> bool {
        matches!(self, Transport::Stdio | Transport::Both)
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Transport::Stdio),
            "http" => Ok(Transport::Http),
            "both" => Ok(Transport::Both),
            other => Err(format!("unknown transport '{other}' (expected stdio|http|both)")),
        }
    }
}

/// How per-collection scores are rescaled before cross-repo merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreNormalization {
    /// Raw cosine similarity. Comparable when every collection was embedded
    /// with the same model and metric.
    #[default]
    Raw,
    /// Per-collection min-max rescale to [0, 1]. For heterogeneous
    /// collection sizes; a degenerate all-equal batch maps to all 1.
    MinMax,
}

impl ScoreNormalization {
    pub fn label(self) -> &'static str {
        match self {
            ScoreNormalization::Raw => "raw",
            ScoreNormalization::MinMax => "min_max",
        }
    }
}

/// Embedding provider connection settings. Credentials are treated opaquely.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Embedding vector dimension.
    pub dimension: usize,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Texts per embedding request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            dimension: 768,
            timeout: Duration::from_secs(60),
            batch_size: 32,
        }
    }
}

/// Vector store connection settings.
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub endpoint: String,
    pub token: Option<String>,
    /// Whether collections are created hybrid (dense + sparse) or dense-only.
    /// Chooses the `hybrid_` collection-name prefix.
    pub hybrid: bool,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:19530".to_string(),
            token: None,
            hybrid: true,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: Transport,
    pub port: u16,
    /// Bearer token for the HTTP transport. Required iff HTTP is enabled.
    pub auth_token: Option<String>,
    /// Requests per minute per source address.
    pub rate_limit: u32,
    /// Allowed CORS origin; `None` means any origin.
    pub allowed_origin: Option<String>,
    pub score_normalization: ScoreNormalization,
    /// Directory holding the snapshot and migration files.
    pub state_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    /// Interval between sync-loop reconcile passes.
    pub sync_interval: Duration,
    /// Per-collection budget inside `search_all`.
    pub collection_deadline: Duration,
    /// Global budget for one `search_all` call.
    pub search_all_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            port: 3100,
            auth_token: None,
            rate_limit: 60,
            allowed_origin: None,
            score_normalization: ScoreNormalization::default(),
            state_dir: state_dir(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            sync_interval: Duration::from_secs(300),
            collection_deadline: Duration::from_secs(5),
            search_all_deadline: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Overlay environment variables onto the config. CLI flags win over env,
    /// so this runs before flag application.
    pub fn apply_env(mut self) -> Self {
        if let Ok(token) = std::env::var("MCP_AUTH_TOKEN") {
            if !token.is_empty() {
                self.auth_token = Some(token);
            }
        }
        if let Some(limit) = env_parse::<u32>("MCP_RATE_LIMIT") {
            self.rate_limit = limit;
        }
        if let Some(port) = env_parse::<u16>("MCP_PORT") {
            self.port = port;
        }
        if let Ok(url) = std::env::var("EMBEDDING_BASE_URL") {
            self.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(dim) = env_parse::<usize>("EMBEDDING_DIMENSION") {
            self.embedding.dimension = dim;
        }
        if let Ok(endpoint) = std::env::var("VECTOR_DB_ENDPOINT") {
            self.vector_store.endpoint = endpoint;
        }
        if let Ok(token) = std::env::var("VECTOR_DB_TOKEN") {
            self.vector_store.token = Some(token);
        }
        self
    }

    /// Startup validation. A missing auth token with HTTP enabled is a
    /// configuration error (exit code 2).
    pub fn validate(&self) -> Result<()> {
        if self.transport.http_enabled() && self.auth_token.is_none() {
            return Err(ServiceError::Config(
                "HTTP transport requires MCP_AUTH_TOKEN to be set".to_string(),
            ));
        }
        if self.rate_limit == 0 {
            return Err(ServiceError::Config("MCP_RATE_LIMIT must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// `<home>/.context/` — snapshot and migration files live here.
pub fn state_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".context")
}

//! Embedding provider boundary and an OpenAI-compatible HTTP client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::error::{Result, ServiceError};
use crate::retry::{retry_with_backoff, DEFAULT_MAX_ATTEMPTS};

/// Maximum characters sent per text. Dense content can tokenize at well over
/// one token per two chars, so this keeps batches inside typical 8K-token
/// embedding contexts.
const MAX_EMBED_CHARS: usize = 3_000;

/// Boundary contract for the embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of chunk texts for indexing.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Output vector dimension.
    fn dimension(&self) -> usize;
}

/// Truncate to a char boundary at or below `max_chars`.
fn truncate_for_embedding(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ---------------------------------------------------------------------------
// OpenAI-compatible /embeddings client
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::Config(format!("embedding client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
        })
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": inputs });

        let send = || async {
            let mut request = self.client.post(&url).json(&body);
            if let Some(ref key) = self.api_key {
                request = request.bearer_auth(key);
            }
            let response = request
                .send()
                .await
                .map_err(|e| ServiceError::external("embedding", e.to_string()))?;

            let status = response.status();
            if status.is_server_error() {
                return Err(ServiceError::external("embedding", format!("{status}")));
            }
            if !status.is_success() {
                return Err(ServiceError::Internal(format!(
                    "embedding provider returned {status}"
                )));
            }
            response
                .json::<EmbeddingsResponse>()
                .await
                .map_err(|e| ServiceError::external("embedding", format!("decode: {e}")))
        };

        let response = retry_with_backoff("embeddings", DEFAULT_MAX_ATTEMPTS, send).await?;
        if response.data.len() != inputs.len() {
            return Err(ServiceError::Internal(format!(
                "embedding provider returned {} vectors for {} inputs",
                response.data.len(),
                inputs.len()
            )));
        }
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let truncated: Vec<&str> =
            texts.iter().map(|t| truncate_for_embedding(t, MAX_EMBED_CHARS)).collect();
        self.request(&truncated).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let truncated = truncate_for_embedding(text, MAX_EMBED_CHARS);
        let mut vectors = self.request(&[truncated]).await?;
        vectors
            .pop()
            .ok_or_else(|| ServiceError::Internal("embedding provider returned no vector".into()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

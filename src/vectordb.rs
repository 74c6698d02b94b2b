//! Vector store boundary: the trait the rest of the service programs
//! against, plus a REST client for a Milvus-compatible server.
//!
//! Only chunk metadata and vectors live in the store; snippet text is
//! hydrated from the working tree at query time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::VectorStoreConfig;
use crate::error::{Result, ServiceError};
use crate::retry::{retry_with_backoff, DEFAULT_MAX_ATTEMPTS};

/// Metadata stored per chunk. Source text itself stays on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    /// File extension with leading dot, e.g. `.rs`.
    pub file_extension: String,
    pub language: String,
}

/// A chunk ready for insertion.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub meta: ChunkMeta,
}

/// One hybrid-search request against a single collection.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Raw query text for the sparse leg.
    pub query_text: String,
    /// Embedded query for the dense leg.
    pub query_vector: Vec<f32>,
    pub limit: usize,
    /// Extensions (with leading dot) to restrict to, applied store-side.
    pub extension_filter: Option<Vec<String>>,
}

/// A scored hit from one collection.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub meta: ChunkMeta,
    pub score: f32,
}

/// Boundary contract for the vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Create a collection; `hybrid` requests dense + sparse legs.
    async fn create_collection(&self, name: &str, dimension: usize, hybrid: bool) -> Result<()>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    async fn rename_collection(&self, old: &str, new: &str) -> Result<()>;

    async fn insert(&self, collection: &str, chunks: Vec<ChunkRecord>) -> Result<()>;

    /// Dense + sparse retrieval with store-side filtering.
    async fn hybrid_search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Build the store-side filter expression for an extension restriction.
pub fn extension_filter_expr(extensions: &[String]) -> String {
    let quoted: Vec<String> = extensions
        .iter()
        .map(|e| {
            let normalized = if e.starts_with('.') { e.clone() } else { format!(".{e}") };
            format!("\"{normalized}\"")
        })
        .collect();
    format!("fileExtension in [{}]", quoted.join(", "))
}

// ---------------------------------------------------------------------------
// REST client (Milvus v2 HTTP API)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RestEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

pub struct RestVectorStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl RestVectorStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::Config(format!("vector store client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// One POST with the retry policy for transient failures applied.
    async fn post(&self, path: &'static str, body: serde_json::Value) -> Result<serde_json::Value> {
        retry_with_backoff(path, DEFAULT_MAX_ATTEMPTS, || self.post_once(path, &body)).await
    }

    async fn post_once(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.endpoint);
        let mut request = self.client.post(&url).json(body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::external("vector-store", e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ServiceError::external("vector-store", format!("{status} from {path}")));
        }
        if !status.is_success() {
            return Err(ServiceError::Internal(format!("vector store {path} returned {status}")));
        }

        let envelope: RestEnvelope = response
            .json()
            .await
            .map_err(|e| ServiceError::external("vector-store", format!("decode {path}: {e}")))?;
        if envelope.code != 0 {
            return Err(ServiceError::Internal(format!(
                "vector store {path} failed (code {}): {}",
                envelope.code,
                envelope.message.unwrap_or_default()
            )));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl VectorStore for RestVectorStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let data = self.post("/v2/vectordb/collections/list", json!({})).await?;
        Ok(data
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let data = self
            .post("/v2/vectordb/collections/has", json!({ "collectionName": name }))
            .await?;
        Ok(data.get("has").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn create_collection(&self, name: &str, dimension: usize, hybrid: bool) -> Result<()> {
        debug!(collection = name, dimension, hybrid, "Creating collection");
        let mut fields = vec![
            json!({ "fieldName": "id", "dataType": "VarChar", "isPrimary": true,
                    "elementTypeParams": { "max_length": 64 } }),
            json!({ "fieldName": "vector", "dataType": "FloatVector",
                    "elementTypeParams": { "dim": dimension } }),
            json!({ "fieldName": "relativePath", "dataType": "VarChar",
                    "elementTypeParams": { "max_length": 1024 } }),
            json!({ "fieldName": "startLine", "dataType": "Int64" }),
            json!({ "fieldName": "endLine", "dataType": "Int64" }),
            json!({ "fieldName": "fileExtension", "dataType": "VarChar",
                    "elementTypeParams": { "max_length": 32 } }),
            json!({ "fieldName": "language", "dataType": "VarChar",
                    "elementTypeParams": { "max_length": 64 } }),
        ];
        if hybrid {
            fields.push(json!({ "fieldName": "sparse_vector", "dataType": "SparseFloatVector" }));
        }
        self.post(
            "/v2/vectordb/collections/create",
            json!({
                "collectionName": name,
                "schema": { "fields": fields },
            }),
        )
        .await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.post("/v2/vectordb/collections/drop", json!({ "collectionName": name })).await?;
        Ok(())
    }

    async fn rename_collection(&self, old: &str, new: &str) -> Result<()> {
        self.post(
            "/v2/vectordb/collections/rename",
            json!({ "collectionName": old, "newCollectionName": new }),
        )
        .await?;
        Ok(())
    }

    async fn insert(&self, collection: &str, chunks: Vec<ChunkRecord>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let rows: Vec<serde_json::Value> = chunks
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "vector": c.vector,
                    "relativePath": c.meta.relative_path,
                    "startLine": c.meta.start_line,
                    "endLine": c.meta.end_line,
                    "fileExtension": c.meta.file_extension,
                    "language": c.meta.language,
                })
            })
            .collect();
        self.post(
            "/v2/vectordb/entities/insert",
            json!({ "collectionName": collection, "data": rows }),
        )
        .await?;
        Ok(())
    }

    async fn hybrid_search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> Result<Vec<ScoredChunk>> {
        let filter = request
            .extension_filter
            .as_deref()
            .filter(|exts| !exts.is_empty())
            .map(extension_filter_expr);

        let mut dense = json!({
            "data": [request.query_vector],
            "annsField": "vector",
            "limit": request.limit,
        });
        let mut sparse = json!({
            "data": [request.query_text],
            "annsField": "sparse_vector",
            "limit": request.limit,
        });
        if let Some(ref expr) = filter {
            dense["filter"] = json!(expr);
            sparse["filter"] = json!(expr);
        }

        let body = json!({
            "collectionName": collection,
            "search": [dense, sparse],
            "rerank": { "strategy": "rrf", "params": { "k": 60 } },
            "limit": request.limit,
            "outputFields": ["relativePath", "startLine", "endLine", "fileExtension", "language"],
        });

        let data = self.post("/v2/vectordb/entities/advanced_search", body).await?;
        let rows = data.as_array().cloned().unwrap_or_default();
        Ok(rows.iter().filter_map(parse_search_row).collect())
    }
}

fn parse_search_row(row: &serde_json::Value) -> Option<ScoredChunk> {
    let score = row.get("distance").or_else(|| row.get("score"))?.as_f64()? as f32;
    Some(ScoredChunk {
        meta: ChunkMeta {
            relative_path: row.get("relativePath")?.as_str()?.to_string(),
            start_line: row.get("startLine").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
            end_line: row.get("endLine").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
            file_extension: row
                .get("fileExtension")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            language: row.get("language").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        },
        score,
    })
}

//! Collection naming and the legacy-name migration layer.
//!
//! Collections were historically named by a hash of the repo's absolute path;
//! they are now named by canonical identity. Both schemes stay resolvable so
//! existing indices keep working, and a one-shot migrator renames legacy
//! collections when asked.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::vectordb::VectorStore;

const COLLECTION_PREFIX: &str = "code_chunks_";
const HYBRID_PREFIX: &str = "hybrid_";

/// The truncation lengths are a compatibility contract with existing
/// deployments and must not change.
const LEGACY_HASH_LEN: usize = 8;
const CANONICAL_HASH_LEN: usize = 12;

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Legacy name: `[hybrid_]code_chunks_<md5(absolute path)[..8]>`.
pub fn legacy_collection_name(path: &Path, hybrid: bool) -> String {
    let hash = md5_hex(&path.display().to_string());
    let prefix = if hybrid { HYBRID_PREFIX } else { "" };
    format!("{prefix}{COLLECTION_PREFIX}{}", &hash[..LEGACY_HASH_LEN])
}

/// Canonical name: `[hybrid_]code_chunks_<md5(canonical id)[..12]>`.
pub fn canonical_collection_name(canonical_id: &str, hybrid: bool) -> String {
    let hash = md5_hex(canonical_id);
    let prefix = if hybrid { HYBRID_PREFIX } else { "" };
    format!("{prefix}{COLLECTION_PREFIX}{}", &hash[..CANONICAL_HASH_LEN])
}

/// True for any name either scheme could have produced.
pub fn is_collection_name(name: &str) -> bool {
    name.strip_prefix(HYBRID_PREFIX).unwrap_or(name).starts_with(COLLECTION_PREFIX)
}

/// Outcome of collection-name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCollection {
    pub name: String,
    /// True when an existing path-hash-named collection was found.
    pub is_legacy: bool,
}

/// Resolve the collection name for a repo given the set of collections that
/// currently exist in the vector store.
///
/// A live legacy collection wins (preserving the user's existing index) and
/// is recorded for future rename; otherwise the canonical name is used,
/// whether or not it exists yet.
pub fn resolve_collection_name(
    path: &Path,
    canonical_id: &str,
    existing: &HashSet<String>,
    hybrid: bool,
) -> ResolvedCollection {
    let legacy = legacy_collection_name(path, hybrid);
    let canonical = canonical_collection_name(canonical_id, hybrid);

    if existing.contains(&legacy) {
        return ResolvedCollection { name: legacy, is_legacy: true };
    }
    ResolvedCollection { name: canonical, is_legacy: false }
}

// ---------------------------------------------------------------------------
// Migration mappings (persisted)
// ---------------------------------------------------------------------------

/// A pending or completed rename from a legacy to a canonical collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationMapping {
    pub old_name: String,
    pub new_name: String,
    pub canonical_id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub migrated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MigrationFile {
    format_version: String,
    mappings: Vec<MigrationMapping>,
}

/// Persistent store of collection migration mappings
/// (`collection-migration.json`).
pub struct MigrationStore {
    file_path: PathBuf,
    mappings: Mutex<Vec<MigrationMapping>>,
}

impl MigrationStore {
    const FORMAT_VERSION: &'static str = "v1";

    /// Load from `<state_dir>/collection-migration.json`. A missing or
    /// corrupt file starts empty.
    pub fn load(state_dir: &Path) -> Self {
        let file_path = state_dir.join("collection-migration.json");
        let mappings = match std::fs::read_to_string(&file_path) {
            Ok(raw) => match serde_json::from_str::<MigrationFile>(&raw) {
                Ok(file) => file.mappings,
                Err(e) => {
                    warn!(path = %file_path.display(), error = %e, "Corrupt migration file, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self { file_path, mappings: Mutex::new(mappings) }
    }

    async fn persist(&self, mappings: &[MigrationMapping]) -> Result<()> {
        let file = MigrationFile {
            format_version: Self::FORMAT_VERSION.to_string(),
            mappings: mappings.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| ServiceError::Internal(format!("serialize migrations: {e}")))?;
        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::Io { path: parent.to_path_buf(), source: e })?;
        }
        tokio::fs::write(&self.file_path, json)
            .await
            .map_err(|e| ServiceError::Io { path: self.file_path.clone(), source: e })
    }

    /// Record a legacy collection slated for rename. Idempotent per
    /// `old_name`.
    pub async fn record(
        &self,
        old_name: &str,
        new_name: &str,
        canonical_id: &str,
        path: &Path,
    ) -> Result<()> {
        let mut mappings = self.mappings.lock().await;
        if mappings.iter().any(|m| m.old_name == old_name) {
            return Ok(());
        }
        mappings.push(MigrationMapping {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
            canonical_id: canonical_id.to_string(),
            path: path.to_path_buf(),
            created_at: Utc::now(),
            migrated: false,
            migrated_at: None,
        });
        self.persist(&mappings).await
    }

    /// Snapshot of all mappings.
    pub async fn list(&self) -> Vec<MigrationMapping> {
        self.mappings.lock().await.clone()
    }

    /// Walk unmigrated mappings and rename their collections in the vector
    /// store. Idempotent: a source collection that no longer exists (already
    /// renamed, or dropped) is marked migrated without touching the store.
    pub async fn run_pending(&self, store: &Arc<dyn VectorStore>) -> Result<usize> {
        let mut mappings = self.mappings.lock().await;
        let mut renamed = 0usize;
        for mapping in mappings.iter_mut().filter(|m| !m.migrated) {
            if store.has_collection(&mapping.old_name).await? {
                store.rename_collection(&mapping.old_name, &mapping.new_name).await?;
                info!(
                    old = mapping.old_name.as_str(),
                    new = mapping.new_name.as_str(),
                    "Renamed legacy collection"
                );
                renamed += 1;
            }
            mapping.migrated = true;
            mapping.migrated_at = Some(Utc::now());
        }
        self.persist(&mappings).await?;
        Ok(renamed)
    }
}

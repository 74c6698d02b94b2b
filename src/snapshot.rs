//! Versioned on-disk snapshot of the repository registry.
//!
//! Three formats are accepted on read; only v3 is ever written:
//!
//! - v1: flat lists of indexed/indexing paths
//! - v2: per-path `CodebaseInfo` tagged by status
//! - v3: `RepoRecord`s keyed by canonical ID
//!
//! v1/v2 snapshots are migrated in memory on load (resolving each path's
//! identity, dropping paths that no longer exist) and written back as v3 so
//! subsequent loads are fast. A corrupt snapshot starts the service empty
//! rather than failing startup.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::identity::{self, IdentitySource};

pub const SNAPSHOT_FILE: &str = "mcp-codebase-snapshot.json";

// ---------------------------------------------------------------------------
// Record model (the v3 payload, shared with the registry)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Indexing,
    Indexed,
    Failed,
}

/// Index state of one branch of a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BranchState {
    pub status: BranchStatus,
    #[serde(default)]
    pub indexed_files: usize,
    #[serde(default)]
    pub total_chunks: usize,
    /// Present while `status == Indexing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing_percentage: Option<f32>,
    /// Present when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_indexed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

impl BranchState {
    pub fn indexing(percentage: f32) -> Self {
        Self {
            status: BranchStatus::Indexing,
            indexed_files: 0,
            total_chunks: 0,
            indexing_percentage: Some(percentage),
            error_message: None,
            last_commit: None,
            last_indexed: None,
            collection_name: None,
        }
    }

    pub fn indexed(indexed_files: usize, total_chunks: usize, collection_name: String) -> Self {
        Self {
            status: BranchStatus::Indexed,
            indexed_files,
            total_chunks,
            indexing_percentage: None,
            error_message: None,
            last_commit: None,
            last_indexed: Some(Utc::now()),
            collection_name: Some(collection_name),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: BranchStatus::Failed,
            indexed_files: 0,
            total_chunks: 0,
            indexing_percentage: None,
            error_message: Some(message.into()),
            last_commit: None,
            last_indexed: None,
            collection_name: None,
        }
    }
}

/// One registry entry: everything known about a canonical repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRecord {
    pub canonical_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub identity_source: IdentitySource,
    /// Every filesystem path that maps to this repo.
    pub known_paths: BTreeSet<PathBuf>,
    /// Subset of `known_paths` that are worktrees.
    #[serde(default)]
    pub worktrees: BTreeSet<PathBuf>,
    #[serde(default)]
    pub branches: BTreeMap<String, BranchState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_indexed: Option<DateTime<Utc>>,
}

impl RepoRecord {
    /// State of the primary branch, when any branch exists.
    pub fn primary_branch(&self) -> Option<(&str, &BranchState)> {
        if let Some(name) = self.default_branch.as_deref() {
            if let Some(state) = self.branches.get(name) {
                return Some((name, state));
            }
        }
        self.branches.iter().next().map(|(name, state)| (name.as_str(), state))
    }

    pub fn is_indexed(&self) -> bool {
        self.primary_branch().is_some_and(|(_, s)| s.status == BranchStatus::Indexed)
    }

    pub fn is_indexing(&self) -> bool {
        self.primary_branch().is_some_and(|(_, s)| s.status == BranchStatus::Indexing)
    }

    /// Collection holding this repo's chunks, when one was recorded.
    pub fn collection_name(&self) -> Option<&str> {
        self.primary_branch().and_then(|(_, s)| s.collection_name.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Legacy per-path view (v2's CodebaseInfo, still served to old callers)
// ---------------------------------------------------------------------------

/// Per-path index state, the shape v2 snapshots stored and legacy callers
/// still consume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum CodebaseInfo {
    Indexed {
        #[serde(default)]
        indexed_files: usize,
        #[serde(default)]
        total_chunks: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collection_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_indexed: Option<DateTime<Utc>>,
    },
    Indexing {
        #[serde(default)]
        indexing_percentage: f32,
    },
    #[serde(rename = "indexfailed")]
    IndexFailed {
        #[serde(default)]
        error_message: String,
    },
}

impl CodebaseInfo {
    fn from_branch(state: &BranchState) -> Self {
        match state.status {
            BranchStatus::Indexed => CodebaseInfo::Indexed {
                indexed_files: state.indexed_files,
                total_chunks: state.total_chunks,
                collection_name: state.collection_name.clone(),
                last_indexed: state.last_indexed,
            },
            BranchStatus::Indexing => CodebaseInfo::Indexing {
                indexing_percentage: state.indexing_percentage.unwrap_or(0.0),
            },
            BranchStatus::Failed => CodebaseInfo::IndexFailed {
                error_message: state.error_message.clone().unwrap_or_default(),
            },
        }
    }

    fn into_branch(self) -> BranchState {
        match self {
            CodebaseInfo::Indexed { indexed_files, total_chunks, collection_name, last_indexed } => {
                BranchState {
                    status: BranchStatus::Indexed,
                    indexed_files,
                    total_chunks,
                    indexing_percentage: None,
                    error_message: None,
                    last_commit: None,
                    last_indexed,
                    collection_name,
                }
            }
            CodebaseInfo::Indexing { indexing_percentage } => {
                BranchState::indexing(indexing_percentage)
            }
            CodebaseInfo::IndexFailed { error_message } => BranchState::failed(error_message),
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk formats
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotV3 {
    format_version: String,
    repositories: BTreeMap<String, RepoRecord>,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotV2 {
    #[allow(dead_code)]
    format_version: String,
    #[serde(default)]
    codebases: BTreeMap<PathBuf, CodebaseInfo>,
}

/// The loaded registry state plus whether a migration write-back is due.
pub struct LoadedSnapshot {
    pub repositories: BTreeMap<String, RepoRecord>,
    pub migrated: bool,
}

/// Authoritative persistence for the registry. All writes are serialized
/// through one lock and go to disk as a single temp-file + rename.
pub struct SnapshotStore {
    file_path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(state_dir: &Path) -> Self {
        Self { file_path: state_dir.join(SNAPSHOT_FILE), write_lock: Mutex::new(()) }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Load the snapshot, migrating v1/v2 content in memory.
    pub async fn load(&self) -> LoadedSnapshot {
        let raw = match std::fs::read_to_string(&self.file_path) {
            Ok(raw) => raw,
            Err(_) => return LoadedSnapshot { repositories: BTreeMap::new(), migrated: false },
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %self.file_path.display(), error = %e, "Corrupt snapshot, starting empty");
                return LoadedSnapshot { repositories: BTreeMap::new(), migrated: false };
            }
        };

        match value.get("formatVersion").and_then(|v| v.as_str()) {
            Some("v3") => match serde_json::from_value::<SnapshotV3>(value) {
                Ok(snap) => LoadedSnapshot { repositories: snap.repositories, migrated: false },
                Err(e) => {
                    warn!(error = %e, "Snapshot claims v3 but fails to parse, starting empty");
                    LoadedSnapshot { repositories: BTreeMap::new(), migrated: false }
                }
            },
            Some("v2") => match serde_json::from_value::<SnapshotV2>(value) {
                Ok(snap) => {
                    info!(codebases = snap.codebases.len(), "Migrating v2 snapshot");
                    let repositories = migrate_paths(snap.codebases).await;
                    LoadedSnapshot { repositories, migrated: true }
                }
                Err(e) => {
                    warn!(error = %e, "Snapshot claims v2 but fails to parse, starting empty");
                    LoadedSnapshot { repositories: BTreeMap::new(), migrated: false }
                }
            },
            // v1 had no formatVersion field.
            _ => {
                let codebases = parse_v1(&value);
                info!(codebases = codebases.len(), "Migrating v1 snapshot");
                let repositories = migrate_paths(codebases).await;
                LoadedSnapshot { repositories, migrated: true }
            }
        }
    }

    /// Persist the full state as v3. Single serialized write; atomic via
    /// temp file + rename.
    pub async fn save(&self, repositories: &BTreeMap<String, RepoRecord>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = SnapshotV3 {
            format_version: "v3".to_string(),
            repositories: repositories.clone(),
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ServiceError::Internal(format!("serialize snapshot: {e}")))?;

        let parent = self
            .file_path
            .parent()
            .ok_or_else(|| ServiceError::Internal("snapshot path has no parent".to_string()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ServiceError::Io { path: parent.to_path_buf(), source: e })?;

        let tmp = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| ServiceError::Io { path: tmp.clone(), source: e })?;
        tokio::fs::rename(&tmp, &self.file_path)
            .await
            .map_err(|e| ServiceError::Io { path: self.file_path.clone(), source: e })
    }
}

/// v1 layout: `{indexedCodebases: [path], indexingCodebases: [path] | {path: pct}}`.
fn parse_v1(value: &serde_json::Value) -> BTreeMap<PathBuf, CodebaseInfo> {
    let mut out = BTreeMap::new();

    if let Some(indexed) = value.get("indexedCodebases").and_then(|v| v.as_array()) {
        for path in indexed.iter().filter_map(|v| v.as_str()) {
            out.insert(
                PathBuf::from(path),
                CodebaseInfo::Indexed {
                    indexed_files: 0,
                    total_chunks: 0,
                    collection_name: None,
                    last_indexed: None,
                },
            );
        }
    }

    match value.get("indexingCodebases") {
        Some(serde_json::Value::Array(paths)) => {
            for path in paths.iter().filter_map(|v| v.as_str()) {
                out.insert(
                    PathBuf::from(path),
                    CodebaseInfo::Indexing { indexing_percentage: 0.0 },
                );
            }
        }
        Some(serde_json::Value::Object(map)) => {
            for (path, pct) in map {
                out.insert(
                    PathBuf::from(path),
                    CodebaseInfo::Indexing {
                        indexing_percentage: pct.as_f64().unwrap_or(0.0) as f32,
                    },
                );
            }
        }
        _ => {}
    }

    out
}

/// Resolve identities for legacy per-path entries and group them into
/// `RepoRecord`s. Paths that no longer exist are dropped with a warning;
/// identity failures fall back to path-hash inside the resolver.
async fn migrate_paths(
    codebases: BTreeMap<PathBuf, CodebaseInfo>,
) -> BTreeMap<String, RepoRecord> {
    let mut repositories: BTreeMap<String, RepoRecord> = BTreeMap::new();

    for (path, info) in codebases {
        if !path.exists() {
            warn!(path = %path.display(), "Dropping snapshot entry, path no longer exists");
            continue;
        }

        let ident = identity::resolve_identity(&path).await;
        let branch = crate::gitutil::current_branch(&path).await.unwrap_or_else(|| "main".into());
        let state = info.into_branch();

        let record = repositories.entry(ident.canonical_id.clone()).or_insert_with(|| RepoRecord {
            canonical_id: ident.canonical_id.clone(),
            display_name: ident.display_name.clone(),
            remote_url: ident.remote_url.clone(),
            identity_source: ident.identity_source,
            known_paths: BTreeSet::new(),
            worktrees: BTreeSet::new(),
            branches: BTreeMap::new(),
            default_branch: None,
            last_indexed: None,
        });

        record.known_paths.insert(path.clone());
        if ident.is_worktree {
            record.worktrees.insert(path.clone());
        }
        record.last_indexed = match state.last_indexed {
            Some(t) => Some(record.last_indexed.map_or(t, |prev| prev.max(t))),
            None => record.last_indexed,
        };
        record.branches.entry(branch.clone()).or_insert(state);
        record.default_branch.get_or_insert(branch);
    }

    repositories
}

// ---------------------------------------------------------------------------
// Legacy views over v3 state
// ---------------------------------------------------------------------------

/// Flat list of indexed paths, as v1 stored them.
pub fn indexed_codebases(repositories: &BTreeMap<String, RepoRecord>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = repositories
        .values()
        .filter(|r| r.is_indexed())
        .flat_map(|r| r.known_paths.iter().cloned())
        .collect();
    out.sort();
    out
}

/// Indexing paths with their progress percentage.
pub fn indexing_codebases(repositories: &BTreeMap<String, RepoRecord>) -> HashMap<PathBuf, f32> {
    let mut out = HashMap::new();
    for record in repositories.values() {
        if let Some((_, state)) = record.primary_branch() {
            if state.status == BranchStatus::Indexing {
                let pct = state.indexing_percentage.unwrap_or(0.0);
                for path in &record.known_paths {
                    out.insert(path.clone(), pct);
                }
            }
        }
    }
    out
}

/// Per-path `CodebaseInfo`, as v2 stored it.
pub fn codebase_info(
    repositories: &BTreeMap<String, RepoRecord>,
    path: &Path,
) -> Option<CodebaseInfo> {
    repositories
        .values()
        .find(|r| r.known_paths.contains(path))
        .and_then(|r| r.primary_branch())
        .map(|(_, state)| CodebaseInfo::from_branch(state))
}

//! In-memory repository registry, the authoritative index over everything
//! the service knows about.
//!
//! Keyed by canonical ID with a companion path index; rebuilt from the
//! snapshot store at startup and persisted back after every mutation. The
//! registry is the gate before indexing: a worktree or second clone of an
//! already-indexed repo registers as an alias instead of producing a new
//! collection.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::identity::{self, RepoIdentity};
use crate::snapshot::{
    self, BranchState, BranchStatus, CodebaseInfo, RepoRecord, SnapshotStore,
};

/// Result of resolving a path against the registry.
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub found: bool,
    pub record: Option<RepoRecord>,
    pub identity: RepoIdentity,
    /// True precisely when the path was unknown but its canonical ID was
    /// already registered (worktree / second clone / moved checkout).
    pub is_new_path_for_existing_repo: bool,
    /// The first-registered path of the existing record, for messaging.
    pub primary_path: Option<PathBuf>,
}

/// Optional overlays applied while registering a path.
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub collection_name: Option<String>,
    pub is_indexed: bool,
    pub indexed_files: usize,
    pub total_chunks: usize,
    pub branch: Option<String>,
}

/// Final counts recorded when an index build completes.
#[derive(Debug, Clone)]
pub struct IndexedStats {
    pub collection_name: String,
    pub indexed_files: usize,
    pub total_chunks: usize,
    pub last_commit: Option<String>,
}

struct Inner {
    repositories: BTreeMap<String, RepoRecord>,
    path_index: HashMap<PathBuf, String>,
}

impl Inner {
    fn reindex_paths(&mut self) {
        self.path_index.clear();
        for (id, record) in &self.repositories {
            for path in &record.known_paths {
                self.path_index.insert(path.clone(), id.clone());
            }
        }
    }
}

pub struct RepoRegistry {
    inner: RwLock<Inner>,
    store: SnapshotStore,
    /// One mutex per canonical ID serializes indexing on that repo.
    index_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RepoRegistry {
    /// Build the registry from the on-disk snapshot, writing back a migrated
    /// v3 snapshot when a legacy format was read.
    pub async fn load(config: &Config) -> Self {
        let store = SnapshotStore::new(&config.state_dir);
        let loaded = store.load().await;

        let mut inner = Inner { repositories: loaded.repositories, path_index: HashMap::new() };
        inner.reindex_paths();
        info!(
            repositories = inner.repositories.len(),
            paths = inner.path_index.len(),
            "Registry loaded"
        );

        let registry =
            Self { inner: RwLock::new(inner), store, index_locks: DashMap::new() };

        if loaded.migrated {
            if let Err(e) = registry.persist().await {
                warn!(error = %e, "Failed to write back migrated snapshot");
            }
        }
        registry
    }

    /// Serialize the full current state to disk.
    pub async fn persist(&self) -> Result<()> {
        let inner = self.inner.read().await;
        self.store.save(&inner.repositories).await
    }

    /// The per-repo indexing lock. Hold it for the duration of an index
    /// build so two registers of the same canonical ID serialize.
    pub fn index_lock(&self, canonical_id: &str) -> Arc<Mutex<()>> {
        self.index_locks
            .entry(canonical_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn normalize(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    }

    /// Resolve a path to its record. Fast path through the path index; a
    /// miss computes the identity and retries by canonical ID.
    pub async fn resolve(&self, path: &Path) -> ResolveOutcome {
        let abs = Self::normalize(path);

        {
            let inner = self.inner.read().await;
            if let Some(id) = inner.path_index.get(&abs) {
                let record = inner.repositories.get(id).cloned();
                let primary_path =
                    record.as_ref().and_then(|r| r.known_paths.iter().next().cloned());
                // Identity is reconstructible from the record; only the
                // worktree flag needs a filesystem peek.
                let is_worktree = crate::gitutil::detect_git_repo(&abs).is_worktree;
                let identity = record
                    .as_ref()
                    .map(|r| record_identity(r, &abs, is_worktree))
                    .unwrap_or_else(|| placeholder_identity(&abs));
                return ResolveOutcome {
                    found: record.is_some(),
                    record,
                    identity,
                    is_new_path_for_existing_repo: false,
                    primary_path,
                };
            }
        }

        let identity = identity::resolve_identity(&abs).await;
        let inner = self.inner.read().await;
        let record = inner.repositories.get(&identity.canonical_id).cloned();
        let found = record.is_some();
        let primary_path = record.as_ref().and_then(|r| r.known_paths.iter().next().cloned());
        ResolveOutcome { found, record, identity, is_new_path_for_existing_repo: found, primary_path }
    }

    /// Register a path under its canonical identity, creating the record on
    /// first sight or adding the path as an alias.
    pub async fn register(
        &self,
        path: &Path,
        identity: &RepoIdentity,
        opts: RegisterOptions,
    ) -> Result<RepoRecord> {
        let abs = Self::normalize(path);
        let branch = opts.branch.clone().unwrap_or_else(|| "main".to_string());

        let record = {
            let mut inner = self.inner.write().await;
            let record = inner
                .repositories
                .entry(identity.canonical_id.clone())
                .or_insert_with(|| RepoRecord {
                    canonical_id: identity.canonical_id.clone(),
                    display_name: identity.display_name.clone(),
                    remote_url: identity.remote_url.clone(),
                    identity_source: identity.identity_source,
                    known_paths: BTreeSet::new(),
                    worktrees: BTreeSet::new(),
                    branches: BTreeMap::new(),
                    default_branch: None,
                    last_indexed: None,
                });

            record.known_paths.insert(abs.clone());
            for detected in &identity.detected_paths {
                record.known_paths.insert(detected.clone());
            }
            if identity.is_worktree {
                record.worktrees.insert(abs.clone());
            }

            if opts.is_indexed {
                let state = BranchState::indexed(
                    opts.indexed_files,
                    opts.total_chunks,
                    opts.collection_name.clone().unwrap_or_default(),
                );
                record.last_indexed = state.last_indexed;
                record.branches.insert(branch.clone(), state);
                record.default_branch.get_or_insert(branch);
            } else if let Some(name) = opts.collection_name {
                record
                    .branches
                    .entry(branch.clone())
                    .or_insert_with(|| BranchState::indexing(0.0))
                    .collection_name = Some(name);
                record.default_branch.get_or_insert(branch);
            }

            let snapshot = record.clone();
            for p in snapshot.known_paths.iter() {
                inner.path_index.insert(p.clone(), snapshot.canonical_id.clone());
            }
            snapshot
        };

        self.persist().await?;
        Ok(record)
    }

    pub async fn is_already_indexed(&self, identity: &RepoIdentity) -> bool {
        let inner = self.inner.read().await;
        inner
            .repositories
            .get(&identity.canonical_id)
            .is_some_and(RepoRecord::is_indexed)
    }

    pub async fn is_path_already_indexed(&self, path: &Path) -> bool {
        let outcome = self.resolve(path).await;
        outcome.record.is_some_and(|r| r.is_indexed())
    }

    /// Transition a repo's branch to `indexing` with a progress percentage.
    pub async fn mark_indexing(
        &self,
        canonical_id: &str,
        branch: Option<&str>,
        percentage: f32,
    ) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            if let Some(record) = inner.repositories.get_mut(canonical_id) {
                let branch = branch
                    .map(str::to_string)
                    .or_else(|| record.default_branch.clone())
                    .unwrap_or_else(|| "main".to_string());
                let state = record
                    .branches
                    .entry(branch.clone())
                    .or_insert_with(|| BranchState::indexing(percentage));
                // Preserve the collection name across progress updates.
                let collection = state.collection_name.take();
                *state = BranchState::indexing(percentage);
                state.collection_name = collection;
                record.default_branch.get_or_insert(branch);
            }
        }
        self.persist().await
    }

    /// Transition to `indexed` with final counts.
    pub async fn mark_indexed(
        &self,
        canonical_id: &str,
        branch: Option<&str>,
        stats: IndexedStats,
    ) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            if let Some(record) = inner.repositories.get_mut(canonical_id) {
                let branch = branch
                    .map(str::to_string)
                    .or_else(|| record.default_branch.clone())
                    .unwrap_or_else(|| "main".to_string());
                let mut state = BranchState::indexed(
                    stats.indexed_files,
                    stats.total_chunks,
                    stats.collection_name,
                );
                state.last_commit = stats.last_commit;
                record.last_indexed = state.last_indexed;
                record.branches.insert(branch.clone(), state);
                record.default_branch.get_or_insert(branch);
            }
        }
        self.persist().await
    }

    /// Transition to `failed` with an operator-readable message.
    pub async fn mark_failed(
        &self,
        canonical_id: &str,
        branch: Option<&str>,
        message: &str,
    ) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            if let Some(record) = inner.repositories.get_mut(canonical_id) {
                let branch = branch
                    .map(str::to_string)
                    .or_else(|| record.default_branch.clone())
                    .unwrap_or_else(|| "main".to_string());
                record.branches.insert(branch.clone(), BranchState::failed(message));
                record.default_branch.get_or_insert(branch);
            }
        }
        self.persist().await
    }

    /// Drop all branch state, leaving the record registered but unindexed.
    pub async fn mark_not_indexed(&self, canonical_id: &str) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            if let Some(record) = inner.repositories.get_mut(canonical_id) {
                record.branches.clear();
                record.default_branch = None;
                record.last_indexed = None;
            }
        }
        self.persist().await
    }

    /// Remove one path; the record itself goes away with its last path.
    pub async fn remove_path(&self, path: &Path) -> Result<bool> {
        let abs = Self::normalize(path);
        let removed = {
            let mut inner = self.inner.write().await;
            let Some(id) = inner.path_index.remove(&abs) else {
                return Ok(false);
            };
            if let Some(record) = inner.repositories.get_mut(&id) {
                record.known_paths.remove(&abs);
                record.worktrees.remove(&abs);
                if record.known_paths.is_empty() {
                    inner.repositories.remove(&id);
                }
            }
            true
        };
        self.persist().await?;
        Ok(removed)
    }

    /// Remove a record wholesale.
    pub async fn remove_by_canonical_id(&self, canonical_id: &str) -> Result<Option<RepoRecord>> {
        let removed = {
            let mut inner = self.inner.write().await;
            let removed = inner.repositories.remove(canonical_id);
            if removed.is_some() {
                inner.reindex_paths();
            }
            removed
        };
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    pub async fn list_all(&self) -> Vec<RepoRecord> {
        self.inner.read().await.repositories.values().cloned().collect()
    }

    pub async fn list_indexed(&self) -> Vec<RepoRecord> {
        self.inner
            .read()
            .await
            .repositories
            .values()
            .filter(|r| r.is_indexed())
            .cloned()
            .collect()
    }

    pub async fn get(&self, canonical_id: &str) -> Option<RepoRecord> {
        self.inner.read().await.repositories.get(canonical_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.repositories.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // -----------------------------------------------------------------------
    // Legacy views (kept for callers of the pre-registry API shape)
    // -----------------------------------------------------------------------

    pub async fn get_indexed_codebases(&self) -> Vec<PathBuf> {
        snapshot::indexed_codebases(&self.inner.read().await.repositories)
    }

    pub async fn get_indexing_codebases(&self) -> HashMap<PathBuf, f32> {
        snapshot::indexing_codebases(&self.inner.read().await.repositories)
    }

    pub async fn get_codebase_info(&self, path: &Path) -> Option<CodebaseInfo> {
        snapshot::codebase_info(&self.inner.read().await.repositories, &Self::normalize(path))
    }
}

/// Rebuild an identity view from a registered record, for path-index hits
/// that need no git subprocess calls.
fn record_identity(record: &RepoRecord, path: &Path, is_worktree: bool) -> RepoIdentity {
    RepoIdentity {
        canonical_id: record.canonical_id.clone(),
        identity_source: record.identity_source,
        remote_url: record.remote_url.clone(),
        display_name: record.display_name.clone(),
        is_git_repo: true,
        is_worktree: is_worktree || record.worktrees.contains(path),
        repo_root: Some(path.to_path_buf()),
        main_worktree_path: None,
        detected_paths: record.known_paths.clone(),
    }
}

fn placeholder_identity(path: &Path) -> RepoIdentity {
    RepoIdentity {
        canonical_id: String::new(),
        identity_source: crate::identity::IdentitySource::PathHash,
        remote_url: None,
        display_name: path.display().to_string(),
        is_git_repo: false,
        is_worktree: false,
        repo_root: None,
        main_worktree_path: None,
        detected_paths: BTreeSet::new(),
    }
}

/// Convenience filter used by `list_repositories`.
pub fn status_label(record: &RepoRecord) -> &'static str {
    match record.primary_branch() {
        Some((_, state)) => match state.status {
            BranchStatus::Indexed => "indexed",
            BranchStatus::Indexing => "indexing",
            BranchStatus::Failed => "failed",
        },
        None => "registered",
    }
}

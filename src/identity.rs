//! Repository identity resolution.
//!
//! Collapses worktrees, clones, and SSH/HTTPS remote-URL variants of the same
//! logical repository onto one canonical identifier. Derivation order: remote
//! `origin` URL, then root-commit SHA, then a hash of the absolute path.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::gitutil;

/// How a canonical ID was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentitySource {
    RemoteUrl,
    InitialCommit,
    PathHash,
}

/// Resolved identity of a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoIdentity {
    /// Stable opaque hex identifier.
    pub canonical_id: String,
    pub identity_source: IdentitySource,
    /// Normalized `host/owner/name`, when derived from a remote.
    pub remote_url: Option<String>,
    pub display_name: String,
    pub is_git_repo: bool,
    pub is_worktree: bool,
    pub repo_root: Option<PathBuf>,
    /// For a worktree, the main working copy's root.
    pub main_worktree_path: Option<PathBuf>,
    /// Every filesystem path observed to belong to this repo, worktrees
    /// included.
    pub detected_paths: BTreeSet<PathBuf>,
}

/// Hex SHA-256 truncated to 16 chars. Inputs from different derivation
/// spaces are salted so they cannot collide.
fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub fn canonical_id_from_remote(normalized_url: &str) -> String {
    short_hash(normalized_url)
}

fn canonical_id_from_commit(sha: &str) -> String {
    short_hash(&format!("root-commit:{sha}"))
}

fn canonical_id_from_path(path: &Path) -> String {
    short_hash(&format!("path:{}", path.display()))
}

fn display_name_from_url(normalized_url: &str) -> String {
    normalized_url.rsplit('/').next().unwrap_or(normalized_url).to_string()
}

fn display_name_from_path(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Resolve the identity of the repository containing `path`.
///
/// `include_worktrees` (default in [`resolve_identity`]) enumerates the
/// repo's worktrees and unions them into `detected_paths`.
pub async fn resolve_identity_with_options(
    path: &Path,
    include_worktrees: bool,
) -> RepoIdentity {
    let abs = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => path.to_path_buf(),
    };

    let status = gitutil::detect_git_repo(&abs);
    if !status.is_git_repo {
        // Bare directories (including empty ones) are keyed on their path.
        let mut detected = BTreeSet::new();
        detected.insert(abs.clone());
        return RepoIdentity {
            canonical_id: canonical_id_from_path(&abs),
            identity_source: IdentitySource::PathHash,
            remote_url: None,
            display_name: display_name_from_path(&abs),
            is_git_repo: false,
            is_worktree: false,
            repo_root: None,
            main_worktree_path: None,
            detected_paths: detected,
        };
    }

    let repo_root = status.repo_root.clone().unwrap_or_else(|| abs.clone());
    let main_worktree_path = if status.is_worktree {
        // The common git dir lives inside the main working copy.
        status
            .main_git_dir
            .as_ref()
            .and_then(|d| d.parent())
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()))
    } else {
        None
    };

    let mut detected_paths = BTreeSet::new();
    detected_paths.insert(repo_root.clone());
    if let Some(ref main) = main_worktree_path {
        detected_paths.insert(main.clone());
    }
    if include_worktrees {
        for wt in gitutil::list_worktrees(&repo_root).await {
            detected_paths.insert(wt.canonicalize().unwrap_or(wt));
        }
    }

    // Remote origin wins; identity then survives moves and re-clones.
    if let Some(raw_url) = gitutil::remote_origin_url(&repo_root).await {
        if let Some(normalized) = gitutil::normalize_git_url(&raw_url) {
            return RepoIdentity {
                canonical_id: canonical_id_from_remote(&normalized),
                identity_source: IdentitySource::RemoteUrl,
                display_name: display_name_from_url(&normalized),
                remote_url: Some(normalized),
                is_git_repo: true,
                is_worktree: status.is_worktree,
                repo_root: Some(repo_root),
                main_worktree_path,
                detected_paths,
            };
        }
    }

    // No usable remote: key on the root commit, which all clones share.
    if let Some(sha) = gitutil::root_commit(&repo_root).await {
        return RepoIdentity {
            canonical_id: canonical_id_from_commit(&sha),
            identity_source: IdentitySource::InitialCommit,
            remote_url: None,
            display_name: display_name_from_path(&repo_root),
            is_git_repo: true,
            is_worktree: status.is_worktree,
            repo_root: Some(repo_root),
            main_worktree_path,
            detected_paths,
        };
    }

    // Zero commits: fall through to a path hash of the repo root.
    RepoIdentity {
        canonical_id: canonical_id_from_path(&repo_root),
        identity_source: IdentitySource::PathHash,
        remote_url: None,
        display_name: display_name_from_path(&repo_root),
        is_git_repo: true,
        is_worktree: status.is_worktree,
        repo_root: Some(repo_root),
        main_worktree_path,
        detected_paths,
    }
}

/// Resolve identity with worktree enumeration enabled.
pub async fn resolve_identity(path: &Path) -> RepoIdentity {
    resolve_identity_with_options(path, true).await
}

/// Resolve an identity directly from a clone URL. `None` when the URL is not
/// normalizable.
pub fn resolve_identity_from_url(url: &str) -> Option<RepoIdentity> {
    let normalized = gitutil::normalize_git_url(url)?;
    Some(RepoIdentity {
        canonical_id: canonical_id_from_remote(&normalized),
        identity_source: IdentitySource::RemoteUrl,
        display_name: display_name_from_url(&normalized),
        remote_url: Some(normalized),
        is_git_repo: true,
        is_worktree: false,
        repo_root: None,
        main_worktree_path: None,
        detected_paths: BTreeSet::new(),
    })
}

/// Whether two paths belong to the same logical repository.
pub async fn is_same_repository(a: &Path, b: &Path) -> bool {
    resolve_identity(a).await.canonical_id == resolve_identity(b).await.canonical_id
}

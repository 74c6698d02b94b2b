//! Git plumbing: a timeout-bounded subprocess runner plus pure helpers for
//! repository discovery, worktree pointer files, and remote-URL
//! normalization.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Hard ceiling on any git subprocess call.
const GIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a git subcommand in `cwd`, returning trimmed stdout on success.
///
/// Any non-zero exit, timeout, spawn failure, or non-UTF-8 output yields
/// `None` — callers treat git information as best-effort.
pub async fn run_git(cwd: &Path, args: &[&str]) -> Option<String> {
    let mut command = Command::new("git");
    command
        .args(args)
        .current_dir(cwd)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(GIT_TIMEOUT, command.output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            debug!(error = %e, args = ?args, "git spawn failed");
            return None;
        }
        Err(_) => {
            debug!(args = ?args, "git call timed out");
            return None;
        }
    };

    if !output.status.success() {
        debug!(
            args = ?args,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git exited non-zero"
        );
        return None;
    }

    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

// ---------------------------------------------------------------------------
// Repository discovery
// ---------------------------------------------------------------------------

/// Result of walking upward for a `.git` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitPath {
    /// Path to `.git` (directory for a regular repo, file for a worktree).
    pub path: PathBuf,
    /// True when `.git` is a worktree pointer file.
    pub is_file: bool,
}

/// Walk upward from `start` looking for a `.git` directory or file.
pub fn find_git_path(start: &Path) -> Option<GitPath> {
    let mut current = Some(start);
    while let Some(dir) = current {
        let candidate = dir.join(".git");
        if candidate.is_dir() {
            return Some(GitPath { path: candidate, is_file: false });
        }
        if candidate.is_file() {
            return Some(GitPath { path: candidate, is_file: true });
        }
        current = dir.parent();
    }
    None
}

/// Detected git status for a filesystem path.
#[derive(Debug, Clone, Default)]
pub struct GitStatus {
    pub is_git_repo: bool,
    /// Root of the working copy containing the path.
    pub repo_root: Option<PathBuf>,
    pub is_worktree: bool,
    /// The `.git` directory (or pointer file for worktrees).
    pub git_path: Option<PathBuf>,
    /// For worktrees, the common (main) git directory.
    pub main_git_dir: Option<PathBuf>,
}

/// True when `dir` itself is a bare repository (a git dir with no working
/// copy around it).
fn is_bare_repo(dir: &Path) -> bool {
    dir.join("HEAD").is_file() && dir.join("objects").is_dir() && dir.join("refs").is_dir()
}

/// Detect whether `path` lies inside a git working copy, resolving worktree
/// pointer files of the form `gitdir: <path>` to the common git directory.
/// Bare repositories count as regular repos keyed on their own directory.
pub fn detect_git_repo(path: &Path) -> GitStatus {
    let Some(found) = find_git_path(path) else {
        if path.is_dir() && is_bare_repo(path) {
            return GitStatus {
                is_git_repo: true,
                repo_root: Some(path.to_path_buf()),
                is_worktree: false,
                git_path: Some(path.to_path_buf()),
                main_git_dir: None,
            };
        }
        return GitStatus::default();
    };
    let repo_root = found.path.parent().map(Path::to_path_buf);

    if !found.is_file {
        return GitStatus {
            is_git_repo: true,
            repo_root,
            is_worktree: false,
            git_path: Some(found.path),
            main_git_dir: None,
        };
    }

    // Worktree pointer: `.git` is a one-line file `gitdir: <abs path>` where
    // <abs path> ends in `<common>/worktrees/<name>`.
    let main_git_dir = std::fs::read_to_string(&found.path)
        .ok()
        .and_then(|content| parse_gitdir_pointer(&content))
        .map(|gitdir| resolve_main_git_dir(&gitdir));

    GitStatus {
        is_git_repo: true,
        repo_root,
        is_worktree: true,
        git_path: Some(found.path),
        main_git_dir,
    }
}

fn parse_gitdir_pointer(content: &str) -> Option<PathBuf> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(|rest| PathBuf::from(rest.trim()))
}

/// `<common>/worktrees/<name>` → `<common>`; anything else is returned as-is.
fn resolve_main_git_dir(gitdir: &Path) -> PathBuf {
    let is_worktree_layout = gitdir
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|name| name == "worktrees");
    if is_worktree_layout {
        if let Some(common) = gitdir.parent().and_then(Path::parent) {
            return common.to_path_buf();
        }
    }
    gitdir.to_path_buf()
}

// ---------------------------------------------------------------------------
// Repository introspection (subprocess-backed)
// ---------------------------------------------------------------------------

/// URL of the `origin` remote, if configured.
pub async fn remote_origin_url(repo_root: &Path) -> Option<String> {
    run_git(repo_root, &["config", "--get", "remote.origin.url"])
        .await
        .filter(|url| !url.is_empty())
}

/// SHA of the root (parentless) commit. `None` for a repo with no commits.
pub async fn root_commit(repo_root: &Path) -> Option<String> {
    let out = run_git(repo_root, &["rev-list", "--max-parents=0", "HEAD"]).await?;
    // A repo with multiple roots (e.g. merged unrelated histories) lists one
    // per line; the last line is the oldest and is stable across merges.
    out.lines().last().map(|line| line.trim().to_string()).filter(|sha| !sha.is_empty())
}

/// Current branch name (`HEAD` when detached), if resolvable.
pub async fn current_branch(repo_root: &Path) -> Option<String> {
    run_git(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"]).await.filter(|b| !b.is_empty())
}

/// Commit SHA at HEAD.
pub async fn head_commit(repo_root: &Path) -> Option<String> {
    run_git(repo_root, &["rev-parse", "HEAD"]).await.filter(|sha| !sha.is_empty())
}

/// All worktree roots of the repository at `repo_root`, main worktree first,
/// parsed from `git worktree list --porcelain`.
pub async fn list_worktrees(repo_root: &Path) -> Vec<PathBuf> {
    let Some(out) = run_git(repo_root, &["worktree", "list", "--porcelain"]).await else {
        return Vec::new();
    };
    out.lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(|p| PathBuf::from(p.trim()))
        .collect()
}

// ---------------------------------------------------------------------------
// Remote URL normalization
// ---------------------------------------------------------------------------

/// Normalize a git remote URL to `host/owner/name`.
///
/// Accepted forms: scp-like `git@host:owner/name(.git)`, `ssh://`, `git://`,
/// and `http(s)://` (credentials stripped). `file://` and unparseable inputs
/// return `None`.
pub fn normalize_git_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() || url.starts_with("file://") {
        return None;
    }

    // Scheme forms: strip scheme, optional userinfo, then host + path.
    for scheme in ["ssh://", "git://", "https://", "http://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            return normalize_host_and_path(rest);
        }
    }

    // scp-like: user@host:path (no scheme, ':' before any '/').
    if let Some((user_host, path)) = url.split_once(':') {
        if !user_host.contains('/') && user_host.contains('@') && !path.is_empty() {
            let host = user_host.rsplit('@').next()?;
            return join_host_path(host, path);
        }
    }

    None
}

fn normalize_host_and_path(rest: &str) -> Option<String> {
    let (authority, path) = rest.split_once('/')?;
    // Drop any `user[:password]@` credential segment.
    let host = authority.rsplit('@').next()?;
    join_host_path(host, path)
}

fn join_host_path(host: &str, path: &str) -> Option<String> {
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some(format!("{host}/{path}"))
}

//! Identity resolution against real git fixtures: worktree deduplication,
//! SSH/HTTPS remote equivalence, and derivation fallbacks.

mod helpers;

use helpers::GitFixture;
use repocontext::identity::{
    is_same_repository, resolve_identity, IdentitySource,
};
use tempfile::TempDir;

#[tokio::test]
async fn worktree_shares_canonical_id_with_main_repo() {
    let fixture = GitFixture::new();
    fixture.write_file("src/lib.rs", "pub fn greet() {}\n");
    fixture.commit_all("initial");
    fixture.set_origin("git@github.com:x/y.git");

    let holder = TempDir::new().unwrap();
    let worktree = fixture.add_worktree(&holder, "feat", "f");

    let main_identity = resolve_identity(&fixture.root()).await;
    let worktree_identity = resolve_identity(&worktree).await;

    assert_eq!(main_identity.canonical_id, worktree_identity.canonical_id);
    assert_eq!(main_identity.identity_source, IdentitySource::RemoteUrl);
    assert!(!main_identity.is_worktree);
    assert!(worktree_identity.is_worktree);
    assert_eq!(
        worktree_identity.main_worktree_path.as_deref(),
        Some(fixture.root().as_path())
    );
    // Worktree enumeration sees both paths from either side.
    assert!(main_identity.detected_paths.contains(&worktree));
    assert!(worktree_identity.detected_paths.contains(&fixture.root()));

    assert!(is_same_repository(&fixture.root(), &worktree).await);
}

#[tokio::test]
async fn ssh_and_https_clones_share_canonical_id() {
    let ssh = GitFixture::new();
    ssh.write_file("a.rs", "fn a() {}\n");
    ssh.commit_all("initial");
    ssh.set_origin("git@github.com:u/r.git");

    let https = GitFixture::new();
    https.write_file("b.rs", "fn b() {}\n");
    https.commit_all("initial");
    https.set_origin("https://github.com/u/r.git");

    let ssh_identity = resolve_identity(&ssh.root()).await;
    let https_identity = resolve_identity(&https.root()).await;

    assert_eq!(ssh_identity.canonical_id, https_identity.canonical_id);
    assert_eq!(ssh_identity.remote_url.as_deref(), Some("github.com/u/r"));
    assert_eq!(https_identity.remote_url.as_deref(), Some("github.com/u/r"));
    assert_eq!(ssh_identity.display_name, "r");
}

#[tokio::test]
async fn repo_without_remote_keys_on_root_commit() {
    let fixture = GitFixture::new();
    fixture.write_file("main.rs", "fn main() {}\n");
    fixture.commit_all("initial");

    let identity = resolve_identity(&fixture.root()).await;
    assert_eq!(identity.identity_source, IdentitySource::InitialCommit);
    assert!(identity.remote_url.is_none());

    // Later commits do not move the identity.
    fixture.write_file("more.rs", "fn more() {}\n");
    fixture.commit_all("second");
    let after = resolve_identity(&fixture.root()).await;
    assert_eq!(identity.canonical_id, after.canonical_id);
}

#[tokio::test]
async fn clones_of_the_same_history_share_canonical_id() {
    let upstream = GitFixture::new();
    upstream.write_file("lib.rs", "pub fn shared() {}\n");
    upstream.commit_all("initial");

    // A clone keeps the root commit; strip its origin so both sides fall
    // through to the initial-commit derivation.
    let holder = TempDir::new().unwrap();
    let clone_path = holder.path().join("clone");
    upstream.git_in(
        holder.path(),
        &["clone", upstream.root().to_str().unwrap(), clone_path.to_str().unwrap()],
    );
    upstream.git_in(&clone_path, &["remote", "remove", "origin"]);

    let a = resolve_identity(&upstream.root()).await;
    let b = resolve_identity(&clone_path).await;
    assert_eq!(a.identity_source, IdentitySource::InitialCommit);
    assert_eq!(a.canonical_id, b.canonical_id);
}

#[tokio::test]
async fn bare_clone_shares_identity_with_its_source() {
    let source = GitFixture::new();
    source.write_file("lib.rs", "pub fn shared() {}\n");
    source.commit_all("initial");

    let holder = TempDir::new().unwrap();
    let bare = holder.path().join("repo.git");
    source.git_in(
        holder.path(),
        &["clone", "--bare", source.root().to_str().unwrap(), bare.to_str().unwrap()],
    );

    let source_identity = resolve_identity(&source.root()).await;
    let bare_identity = resolve_identity(&bare).await;

    // A local-path origin is not a normalizable URL, so both sides key on
    // the shared root commit.
    assert_eq!(source_identity.identity_source, IdentitySource::InitialCommit);
    assert!(bare_identity.is_git_repo);
    assert_eq!(source_identity.canonical_id, bare_identity.canonical_id);
}

#[tokio::test]
async fn empty_repo_falls_back_to_path_hash() {
    let fixture = GitFixture::new();
    let identity = resolve_identity(&fixture.root()).await;
    assert_eq!(identity.identity_source, IdentitySource::PathHash);
    assert!(identity.is_git_repo);
}

#[tokio::test]
async fn non_git_directory_uses_path_hash() {
    let dir = TempDir::new().unwrap();
    let identity = resolve_identity(dir.path()).await;
    assert_eq!(identity.identity_source, IdentitySource::PathHash);
    assert!(!identity.is_git_repo);
    assert_eq!(identity.detected_paths.len(), 1);

    // Distinct directories get distinct identities.
    let other = TempDir::new().unwrap();
    let other_identity = resolve_identity(other.path()).await;
    assert_ne!(identity.canonical_id, other_identity.canonical_id);
}

#[tokio::test]
async fn nested_path_resolves_to_repo_root() {
    let fixture = GitFixture::new();
    fixture.write_file("src/deep/mod.rs", "pub struct Deep;\n");
    fixture.commit_all("initial");
    fixture.set_origin("git@example.com:team/proj.git");

    let nested = fixture.root().join("src/deep");
    let identity = resolve_identity(&nested).await;
    assert_eq!(identity.repo_root.as_deref(), Some(fixture.root().as_path()));
    assert_eq!(identity.remote_url.as_deref(), Some("example.com/team/proj"));
}

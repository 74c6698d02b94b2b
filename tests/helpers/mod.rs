//! Shared test harness: git fixtures built via subprocess, in-memory
//! vector-store/embedder stubs, and a service-context builder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use repocontext::collection::MigrationStore;
use repocontext::config::Config;
use repocontext::embedding::Embedder;
use repocontext::error::{Result, ServiceError};
use repocontext::registry::RepoRegistry;
use repocontext::tools::ServiceContext;
use repocontext::vectordb::{ChunkRecord, ScoredChunk, SearchRequest, VectorStore};

// ---------------------------------------------------------------------------
// Git fixtures
// ---------------------------------------------------------------------------

/// A scratch git repository with helpers for commits, remotes, and
/// worktrees.
pub struct GitFixture {
    pub dir: TempDir,
}

impl GitFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let fixture = Self { dir };
        fixture.git(&["init", "-b", "main"]);
        fixture
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().canonicalize().expect("canonicalize fixture root")
    }

    pub fn git(&self, args: &[&str]) {
        self.git_in(self.dir.path(), args);
    }

    pub fn git_in(&self, cwd: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args([
                "-c",
                "user.email=test@test.com",
                "-c",
                "user.name=Test",
                "-c",
                "protocol.file.allow=always",
            ])
            .args(args)
            .current_dir(cwd)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed in {}", cwd.display());
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, content).expect("write fixture file");
    }

    pub fn commit_all(&self, message: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-m", message]);
    }

    pub fn set_origin(&self, url: &str) {
        self.git(&["remote", "add", "origin", url]);
    }

    /// Add a worktree under a sibling temp dir and return its path.
    pub fn add_worktree(&self, holder: &TempDir, name: &str, branch: &str) -> PathBuf {
        let target = holder.path().join(name);
        self.git(&["worktree", "add", target.to_str().unwrap(), "-b", branch]);
        target.canonicalize().expect("canonicalize worktree")
    }
}

// ---------------------------------------------------------------------------
// In-memory embedder
// ---------------------------------------------------------------------------

pub const EMBED_DIM: usize = 64;

/// Deterministic bag-of-tokens embedder: tokens hash into a fixed number of
/// buckets, so texts sharing words produce similar vectors.
pub struct MemoryEmbedder;

fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBED_DIM];
    for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let mut hash = 0usize;
        for b in token.to_lowercase().bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(b as usize);
        }
        vector[hash % EMBED_DIM] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for MemoryEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(embed_text(text))
    }

    fn dimension(&self) -> usize {
        EMBED_DIM
    }
}

// ---------------------------------------------------------------------------
// In-memory vector store
// ---------------------------------------------------------------------------

/// Cosine-scoring in-memory store, enough to exercise the full index/search
/// path without a live server.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: Mutex<HashMap<String, Vec<ChunkRecord>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn chunk_count(&self, collection: &str) -> usize {
        self.collections.lock().await.get(collection).map_or(0, Vec::len)
    }

    /// Pre-create an empty collection, e.g. a legacy-named one.
    pub async fn seed_collection(&self, name: &str) {
        self.collections.lock().await.entry(name.to_string()).or_default();
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.lock().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.lock().await.contains_key(name))
    }

    async fn create_collection(&self, name: &str, _dimension: usize, _hybrid: bool) -> Result<()> {
        self.collections.lock().await.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections.lock().await.remove(name);
        Ok(())
    }

    async fn rename_collection(&self, old: &str, new: &str) -> Result<()> {
        let mut collections = self.collections.lock().await;
        match collections.remove(old) {
            Some(chunks) => {
                collections.insert(new.to_string(), chunks);
                Ok(())
            }
            None => Err(ServiceError::NotFound(format!("collection '{old}'"))),
        }
    }

    async fn insert(&self, collection: &str, chunks: Vec<ChunkRecord>) -> Result<()> {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .extend(chunks);
        Ok(())
    }

    async fn hybrid_search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> Result<Vec<ScoredChunk>> {
        let collections = self.collections.lock().await;
        let Some(chunks) = collections.get(collection) else {
            return Err(ServiceError::NotFound(format!("collection '{collection}'")));
        };

        let mut hits: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| match request.extension_filter {
                Some(ref exts) => exts.iter().any(|e| {
                    let normalized =
                        if e.starts_with('.') { e.clone() } else { format!(".{e}") };
                    c.meta.file_extension == normalized
                }),
                None => true,
            })
            .map(|c| ScoredChunk {
                meta: c.meta.clone(),
                score: cosine(&c.vector, &request.query_vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(request.limit);
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Service context builder
// ---------------------------------------------------------------------------

/// A full service context wired to in-memory stubs, with its state dir held
/// alive by the returned guard.
pub struct TestService {
    pub ctx: Arc<ServiceContext>,
    pub state_dir: TempDir,
}

pub async fn build_service() -> TestService {
    build_service_with(Arc::new(MemoryVectorStore::new()), Config::default()).await
}

pub async fn build_service_with(
    store: Arc<dyn VectorStore>,
    mut config: Config,
) -> TestService {
    let state_dir = TempDir::new().expect("create state dir");
    config.state_dir = state_dir.path().to_path_buf();
    // Small batches exercise the progress path even on tiny fixtures.
    config.embedding.batch_size = 4;

    let registry = RepoRegistry::load(&config).await;
    let migrations = MigrationStore::load(&config.state_dir);
    let ctx = Arc::new(ServiceContext {
        config,
        registry,
        store,
        embedder: Arc::new(MemoryEmbedder),
        migrations,
        started_at: Instant::now(),
    });
    TestService { ctx, state_dir }
}

/// Poll the registry until the repo reaches `indexed`, panicking on
/// `failed` or timeout.
pub async fn wait_until_indexed(ctx: &Arc<ServiceContext>, canonical_id: &str) {
    for _ in 0..200 {
        if let Some(record) = ctx.registry.get(canonical_id).await {
            if record.is_indexed() {
                return;
            }
            if let Some((_, state)) = record.primary_branch() {
                if state.status == repocontext::snapshot::BranchStatus::Failed {
                    panic!("index build failed: {:?}", state.error_message);
                }
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("index build did not complete in time");
}

//! Indexing pipeline: walk the working tree, split files into chunks, embed
//! them in batches, and write metadata + vectors to the vector store.
//!
//! Progress is reported through the registry at batch granularity so
//! `get_indexing_status` sees live percentages.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use md5::{Digest, Md5};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::{Result, ServiceError};
use crate::registry::RepoRegistry;
use crate::splitter::{self, SplitChunk, SplitterKind, DEFAULT_EXTENSIONS};
use crate::vectordb::{ChunkMeta, ChunkRecord, VectorStore};

/// Files above this size are skipped rather than chunked.
const MAX_FILE_BYTES: u64 = 512 * 1024;

/// Parameters for one index build.
#[derive(Debug, Clone)]
pub struct IndexParams {
    pub root: PathBuf,
    pub collection: String,
    pub splitter: SplitterKind,
    /// Extensions added on top of the defaults.
    pub custom_extensions: Vec<String>,
    /// Gitignore-style patterns excluded on top of the repo's own rules.
    pub ignore_patterns: Vec<String>,
    pub hybrid: bool,
    pub embed_batch_size: usize,
}

/// Final counts for a completed build.
#[derive(Debug, Clone, Copy)]
pub struct IndexOutcome {
    pub indexed_files: usize,
    pub total_chunks: usize,
}

struct FileChunks {
    relative_path: String,
    extension: String,
    language: &'static str,
    chunks: Vec<SplitChunk>,
}

/// Walk `root` and collect the source files an index build covers.
fn scan_files(root: &Path, params: &IndexParams) -> Result<Vec<PathBuf>> {
    let mut extensions: HashSet<String> =
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    for ext in &params.custom_extensions {
        extensions.insert(ext.trim_start_matches('.').to_string());
    }

    let mut overrides = OverrideBuilder::new(root);
    for pattern in &params.ignore_patterns {
        // Override patterns whitelist; a leading '!' excludes.
        let exclude = format!("!{pattern}");
        overrides
            .add(&exclude)
            .map_err(|e| ServiceError::Validation(format!("bad ignore pattern '{pattern}': {e}")))?;
    }
    let overrides = overrides
        .build()
        .map_err(|e| ServiceError::Validation(format!("ignore patterns: {e}")))?;

    let mut files = Vec::new();
    for entry in WalkBuilder::new(root).overrides(overrides).build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !extensions.contains(ext) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            debug!(path = %path.display(), "Skipping oversized file");
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Read and split the scanned files, in parallel.
fn split_files(root: &Path, files: &[PathBuf], kind: SplitterKind) -> Vec<FileChunks> {
    files
        .par_iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            let rel = path.strip_prefix(root).unwrap_or(path);
            let relative_path = rel.to_string_lossy().replace('\\', "/");
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{e}"))
                .unwrap_or_default();
            let language = splitter::language_for_extension(&extension);

            let chunks = splitter::splitter_for(kind).split(&content);
            if chunks.is_empty() {
                return None;
            }
            Some(FileChunks { relative_path, extension, language, chunks })
        })
        .collect()
}

fn chunk_id(collection: &str, relative_path: &str, chunk: &SplitChunk) -> String {
    let input = format!("{collection}:{relative_path}:{}:{}", chunk.start_line, chunk.end_line);
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Run a full index build for one repository.
///
/// The caller holds the repo's canonical-ID lock; this function only touches
/// the registry for progress updates.
pub async fn index_repository(
    store: &Arc<dyn VectorStore>,
    embedder: &Arc<dyn Embedder>,
    registry: &RepoRegistry,
    canonical_id: &str,
    branch: Option<&str>,
    params: IndexParams,
) -> Result<IndexOutcome> {
    let files = scan_files(&params.root, &params)?;
    info!(
        root = %params.root.display(),
        files = files.len(),
        collection = params.collection.as_str(),
        "Starting index build"
    );

    let file_chunks = {
        let root = params.root.clone();
        let kind = params.splitter;
        let files = files.clone();
        tokio::task::spawn_blocking(move || split_files(&root, &files, kind))
            .await
            .map_err(|e| ServiceError::Internal(format!("split task panicked: {e}")))?
    };

    if !store.has_collection(&params.collection).await? {
        store.create_collection(&params.collection, embedder.dimension(), params.hybrid).await?;
    }

    // Flatten to (text, record) pairs, then embed and insert batch by batch.
    let mut pending: Vec<(String, ChunkRecord)> = Vec::new();
    for file in &file_chunks {
        for chunk in &file.chunks {
            pending.push((
                chunk.content.clone(),
                ChunkRecord {
                    id: chunk_id(&params.collection, &file.relative_path, chunk),
                    vector: Vec::new(),
                    meta: ChunkMeta {
                        relative_path: file.relative_path.clone(),
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        file_extension: file.extension.clone(),
                        language: file.language.to_string(),
                    },
                },
            ));
        }
    }

    let total_chunks = pending.len();
    let batch_size = params.embed_batch_size.max(1);
    let total_batches = total_chunks.div_ceil(batch_size).max(1);

    for (batch_idx, batch) in pending.chunks_mut(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|(text, _)| text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(ServiceError::Internal(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }

        let records: Vec<ChunkRecord> = batch
            .iter_mut()
            .zip(vectors)
            .map(|((_, record), vector)| {
                record.vector = vector;
                record.clone()
            })
            .collect();
        store.insert(&params.collection, records).await?;

        let pct = ((batch_idx + 1) as f32 / total_batches as f32) * 100.0;
        if let Err(e) = registry.mark_indexing(canonical_id, branch, pct).await {
            warn!(error = %e, "Failed to persist indexing progress");
        }
    }

    info!(
        files = file_chunks.len(),
        chunks = total_chunks,
        collection = params.collection.as_str(),
        "Index build complete"
    );
    Ok(IndexOutcome { indexed_files: file_chunks.len(), total_chunks })
}

/// Read the snippet text for a chunk back out of the working tree. Empty
/// when the file is gone or the range is stale.
pub fn hydrate_snippet(root: &Path, relative_path: &str, start_line: usize, end_line: usize) -> String {
    let Ok(content) = std::fs::read_to_string(root.join(relative_path)) else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || start_line == 0 || start_line > lines.len() {
        return String::new();
    }
    let end = end_line.min(lines.len());
    lines[start_line - 1..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_deterministic() {
        let chunk = SplitChunk { content: "x".into(), start_line: 1, end_line: 10 };
        assert_eq!(chunk_id("col", "src/a.rs", &chunk), chunk_id("col", "src/a.rs", &chunk));
        assert_ne!(chunk_id("col", "src/a.rs", &chunk), chunk_id("col", "src/b.rs", &chunk));
    }

    #[test]
    fn scan_respects_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("skip.bin"), "...").unwrap();
        std::fs::write(dir.path().join("custom.zig"), "pub fn x() {}").unwrap();

        let mut params = test_params(dir.path());
        let files = scan_files(dir.path(), &params).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.rs"));

        params.custom_extensions = vec!["zig".to_string()];
        let files = scan_files(dir.path(), &params).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn scan_applies_ignore_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("generated")).unwrap();
        std::fs::write(dir.path().join("generated/out.rs"), "fn g() {}").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let mut params = test_params(dir.path());
        params.ignore_patterns = vec!["generated/**".to_string()];
        let files = scan_files(dir.path(), &params).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.rs"));
    }

    #[test]
    fn snippets_hydrate_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "one\ntwo\nthree\nfour").unwrap();
        assert_eq!(hydrate_snippet(dir.path(), "a.rs", 2, 3), "two\nthree");
        assert_eq!(hydrate_snippet(dir.path(), "missing.rs", 1, 2), "");
        assert_eq!(hydrate_snippet(dir.path(), "a.rs", 99, 100), "");
    }

    fn test_params(root: &Path) -> IndexParams {
        IndexParams {
            root: root.to_path_buf(),
            collection: "code_chunks_test".to_string(),
            splitter: SplitterKind::Ast,
            custom_extensions: Vec::new(),
            ignore_patterns: Vec::new(),
            hybrid: false,
            embed_batch_size: 8,
        }
    }
}

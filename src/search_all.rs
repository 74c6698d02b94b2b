//! Cross-repository search: fan one query out to every indexed collection
//! under bounded deadlines, normalize scores, and merge with attribution.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::collection::{
    canonical_collection_name, is_collection_name, legacy_collection_name,
};
use crate::config::ScoreNormalization;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::indexer::hydrate_snippet;
use crate::registry::RepoRegistry;
use crate::vectordb::{ScoredChunk, SearchRequest, VectorStore};

/// Arguments for one `search_all` call.
#[derive(Debug, Clone)]
pub struct SearchAllParams {
    pub query: String,
    pub limit: usize,
    /// Restrict to these repos, matched by display name or canonical ID.
    pub repos: Option<Vec<String>>,
    pub extension_filter: Option<Vec<String>>,
}

/// One merged result with full repository attribution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossRepoResult {
    pub repo_display_name: String,
    pub canonical_repo_id: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub content: String,
    pub score: f32,
    pub source_collection: String,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchSummary {
    pub collections_queried: usize,
    pub collections_skipped_by_timeout: Vec<String>,
    pub collections_failed: Vec<String>,
    pub total_results: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAllResponse {
    pub results: Vec<CrossRepoResult>,
    pub summary: SearchSummary,
    /// Normalization mode applied to every score in `results`.
    pub normalization: &'static str,
}

/// Deadlines for the fan-out.
#[derive(Debug, Clone, Copy)]
pub struct SearchDeadlines {
    pub per_collection: Duration,
    pub global: Duration,
}

/// A collection selected for fan-out, with the attribution applied to its
/// results.
#[derive(Debug, Clone)]
struct Candidate {
    collection: String,
    display_name: String,
    canonical_id: String,
    /// Working-tree root used to hydrate snippet text.
    root: Option<PathBuf>,
}

/// Discover the fan-out targets: collections referenced by indexed registry
/// records merged with a live store enumeration, deduplicated by name. The
/// live listing catches repos indexed outside this process's snapshot.
async fn discover_candidates(
    registry: &RepoRegistry,
    store: &Arc<dyn VectorStore>,
) -> Vec<Candidate> {
    let records = registry.list_indexed().await;

    let mut by_collection: BTreeMap<String, Candidate> = BTreeMap::new();
    // Every name either scheme could have produced for a record, so live
    // listings attribute back to their repo.
    let mut known_names: BTreeMap<String, usize> = BTreeMap::new();

    for (idx, record) in records.iter().enumerate() {
        let root = record.known_paths.iter().next().cloned();
        if let Some(name) = record.collection_name() {
            by_collection.insert(
                name.to_string(),
                Candidate {
                    collection: name.to_string(),
                    display_name: record.display_name.clone(),
                    canonical_id: record.canonical_id.clone(),
                    root: root.clone(),
                },
            );
        }
        for hybrid in [true, false] {
            known_names.insert(canonical_collection_name(&record.canonical_id, hybrid), idx);
            for path in &record.known_paths {
                known_names.insert(legacy_collection_name(path, hybrid), idx);
            }
        }
    }

    match store.list_collections().await {
        Ok(live) => {
            for name in live.into_iter().filter(|n| is_collection_name(n)) {
                if by_collection.contains_key(&name) {
                    continue;
                }
                let candidate = match known_names.get(&name) {
                    Some(&idx) => {
                        let record = &records[idx];
                        Candidate {
                            collection: name.clone(),
                            display_name: record.display_name.clone(),
                            canonical_id: record.canonical_id.clone(),
                            root: record.known_paths.iter().next().cloned(),
                        }
                    }
                    // Indexed by another process; searchable, attributed by
                    // collection name only.
                    None => Candidate {
                        collection: name.clone(),
                        display_name: name.clone(),
                        canonical_id: String::new(),
                        root: None,
                    },
                };
                by_collection.insert(name, candidate);
            }
        }
        Err(e) => warn!(error = %e, "Live collection listing failed, using registry only"),
    }

    by_collection.into_values().collect()
}

/// Rescale one collection's batch of scores.
fn normalize_scores(hits: &mut [ScoredChunk], mode: ScoreNormalization) {
    if hits.is_empty() || mode == ScoreNormalization::Raw {
        return;
    }
    let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
    let max = hits.iter().map(|h| h.score).fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    for hit in hits.iter_mut() {
        // A degenerate all-equal batch carries no ordering signal; treat
        // every hit as a full match.
        hit.score = if range <= f32::EPSILON { 1.0 } else { (hit.score - min) / range };
    }
}

/// Run the fan-out and merge.
pub async fn search_all(
    registry: &RepoRegistry,
    store: &Arc<dyn VectorStore>,
    embedder: &Arc<dyn Embedder>,
    normalization: ScoreNormalization,
    deadlines: SearchDeadlines,
    params: SearchAllParams,
) -> Result<SearchAllResponse> {
    let mut candidates = discover_candidates(registry, store).await;

    // Repo selectors restrict the candidate set before any fan-out.
    if let Some(ref selectors) = params.repos {
        let wanted: HashSet<&str> = selectors.iter().map(String::as_str).collect();
        candidates.retain(|c| {
            wanted.contains(c.display_name.as_str()) || wanted.contains(c.canonical_id.as_str())
        });
    }

    let mut summary = SearchSummary {
        collections_queried: candidates.len(),
        ..SearchSummary::default()
    };

    if candidates.is_empty() {
        return Ok(SearchAllResponse {
            results: Vec::new(),
            summary,
            normalization: normalization.label(),
        });
    }

    let query_vector = embedder.embed_query(&params.query).await?;

    let mut set: JoinSet<(Candidate, std::result::Result<Result<Vec<ScoredChunk>>, ()>)> =
        JoinSet::new();
    for candidate in candidates.clone() {
        let store = Arc::clone(store);
        let request = SearchRequest {
            query_text: params.query.clone(),
            query_vector: query_vector.clone(),
            limit: params.limit,
            extension_filter: params.extension_filter.clone(),
        };
        let per_collection = deadlines.per_collection;
        set.spawn(async move {
            let outcome = timeout(per_collection, store.hybrid_search(&candidate.collection, request))
                .await
                .map_err(|_| ());
            (candidate, outcome)
        });
    }

    let global_deadline = Instant::now() + deadlines.global;
    let mut merged: Vec<CrossRepoResult> = Vec::new();
    let mut completed: HashSet<String> = HashSet::new();

    loop {
        let next = tokio::time::timeout_at(global_deadline, set.join_next()).await;
        match next {
            Ok(Some(Ok((candidate, outcome)))) => {
                completed.insert(candidate.collection.clone());
                match outcome {
                    Ok(Ok(mut hits)) => {
                        normalize_scores(&mut hits, normalization);
                        for hit in hits {
                            let content = candidate
                                .root
                                .as_deref()
                                .map(|root| {
                                    hydrate_snippet(
                                        root,
                                        &hit.meta.relative_path,
                                        hit.meta.start_line,
                                        hit.meta.end_line,
                                    )
                                })
                                .unwrap_or_default();
                            merged.push(CrossRepoResult {
                                repo_display_name: candidate.display_name.clone(),
                                canonical_repo_id: candidate.canonical_id.clone(),
                                relative_path: hit.meta.relative_path,
                                start_line: hit.meta.start_line,
                                end_line: hit.meta.end_line,
                                language: hit.meta.language,
                                content,
                                score: hit.score,
                                source_collection: candidate.collection.clone(),
                            });
                        }
                    }
                    Ok(Err(e)) => {
                        debug!(collection = candidate.collection.as_str(), error = %e, "Collection search failed");
                        summary.collections_failed.push(candidate.collection);
                    }
                    Err(()) => {
                        debug!(collection = candidate.collection.as_str(), "Collection search timed out");
                        summary.collections_skipped_by_timeout.push(candidate.collection);
                    }
                }
            }
            Ok(Some(Err(join_err))) => {
                warn!(error = %join_err, "Collection search task aborted");
            }
            Ok(None) => break,
            Err(_) => {
                // Global budget exhausted: cancel whatever is still running
                // and record those collections as timed out.
                set.abort_all();
                for candidate in &candidates {
                    if !completed.contains(&candidate.collection) {
                        summary.collections_skipped_by_timeout.push(candidate.collection.clone());
                    }
                }
                break;
            }
        }
    }

    // Deterministic merge: score descending, then a stable attribution
    // tiebreak.
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.repo_display_name.cmp(&b.repo_display_name))
            .then_with(|| a.relative_path.cmp(&b.relative_path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    merged.truncate(params.limit);

    summary.collections_skipped_by_timeout.sort();
    summary.collections_failed.sort();
    summary.total_results = merged.len();

    Ok(SearchAllResponse { results: merged, summary, normalization: normalization.label() })
}

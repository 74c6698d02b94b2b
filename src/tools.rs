//! Tool surface: definitions, the dispatch table, and the JSON-RPC method
//! dispatcher shared by both transports.
//!
//! Handlers are stateless: they receive parsed arguments plus the shared
//! [`ServiceContext`], never bypass the registry, and persist the snapshot
//! through it after every mutation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::collection::{resolve_collection_name, MigrationStore};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::ServiceError;
use crate::gitutil;
use crate::identity::{resolve_identity_from_url, RepoIdentity};
use crate::indexer::{self, IndexParams};
use crate::registry::{status_label, IndexedStats, RegisterOptions, RepoRegistry};
use crate::search_all::{self, SearchAllParams, SearchDeadlines};
use crate::snapshot::{BranchStatus, RepoRecord};
use crate::splitter::SplitterKind;
use crate::vectordb::VectorStore;

pub const PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Everything a handler needs, shared across transports and sessions.
pub struct ServiceContext {
    pub config: Config,
    pub registry: RepoRegistry,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub migrations: MigrationStore,
    pub started_at: Instant,
}

/// Tagged handler result. `Ok` carries the JSON payload returned to the
/// client; `Err` carries a machine-readable kind plus message.
#[derive(Debug)]
pub enum ToolOutcome {
    Ok(Value),
    Err { kind: &'static str, message: String },
}

impl From<ServiceError> for ToolOutcome {
    fn from(e: ServiceError) -> Self {
        ToolOutcome::Err { kind: e.kind(), message: e.to_string() }
    }
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Err { .. })
    }

    /// Render as MCP text content.
    pub fn into_content(self) -> (String, bool) {
        match self {
            ToolOutcome::Ok(payload) => {
                (serde_json::to_string_pretty(&payload).unwrap_or_default(), false)
            }
            ToolOutcome::Err { kind, message } => {
                let body = json!({ "error": { "kind": kind, "message": message } });
                (serde_json::to_string_pretty(&body).unwrap_or_default(), true)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

pub fn tool_definitions() -> Value {
    json!([
        {
            "name": "index_codebase",
            "description": "Index a git repository for semantic search. Accepts a local path (or a clone URL of an already-registered repo). Worktrees and additional clones of an indexed repo are registered as aliases instead of re-indexed. Indexing runs in the background; poll get_indexing_status for progress.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Absolute path to the repository (or a clone URL)" },
                    "force": { "type": "boolean", "description": "Re-index even if already indexed. Default: false" },
                    "splitter": { "type": "string", "enum": ["ast", "langchain"], "description": "Chunking strategy. Default: ast" },
                    "customExtensions": { "type": "array", "items": { "type": "string" }, "description": "Extra file extensions to include (e.g. ['zig'])" },
                    "ignorePatterns": { "type": "array", "items": { "type": "string" }, "description": "Gitignore-style patterns to exclude" },
                    "branch": { "type": "string", "description": "Branch label for the index. Default: the checked-out branch" }
                },
                "required": ["path"]
            }
        },
        {
            "name": "search_code",
            "description": "Semantic search over one indexed repository. Returns ranked code snippets with file path, line range, language, and score.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the indexed repository" },
                    "query": { "type": "string", "description": "Natural-language description of the code you want" },
                    "limit": { "type": "integer", "description": "Max results (default 10, max 50)" },
                    "extensionFilter": { "type": "array", "items": { "type": "string" }, "description": "Restrict to these file extensions (e.g. ['.rs', '.toml'])" }
                },
                "required": ["path", "query"]
            }
        },
        {
            "name": "clear_index",
            "description": "Drop a repository's index: removes its vector-store collection and registry record.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the indexed repository" }
                },
                "required": ["path"]
            }
        },
        {
            "name": "get_indexing_status",
            "description": "Report a repository's index state: indexing progress, final counts, or failure message.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the repository" }
                },
                "required": ["path"]
            }
        },
        {
            "name": "search_all",
            "description": "Semantic search across every indexed repository. Fans out in parallel with per-collection deadlines; results carry repository attribution and a fan-out summary.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Natural-language description of the code you want" },
                    "limit": { "type": "integer", "description": "Max merged results (default 10, max 50)" },
                    "repos": { "type": "array", "items": { "type": "string" }, "description": "Restrict to these repos, by display name or canonical ID" },
                    "extensionFilter": { "type": "array", "items": { "type": "string" }, "description": "Restrict to these file extensions" }
                },
                "required": ["query"]
            }
        },
        {
            "name": "list_repositories",
            "description": "List registered repositories with their paths, worktrees, and index status.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "status": { "type": "string", "enum": ["indexed", "indexing", "failed", "registered"], "description": "Only repos in this state" },
                    "nameSubstring": { "type": "string", "description": "Only repos whose display name contains this substring" }
                }
            }
        }
    ])
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ServiceError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::Validation(format!("'{key}' is required")))
}

fn limit_arg(args: &Value) -> usize {
    args.get("limit").and_then(|v| v.as_u64()).unwrap_or(10).min(50) as usize
}

fn string_array(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn record_summary(record: &RepoRecord) -> Value {
    json!({
        "canonicalId": record.canonical_id,
        "displayName": record.display_name,
        "remoteUrl": record.remote_url,
        "identitySource": record.identity_source,
        "knownPaths": record.known_paths,
        "worktrees": record.worktrees,
        "defaultBranch": record.default_branch,
        "lastIndexed": record.last_indexed,
        "status": status_label(record),
    })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Route a tool invocation to its handler.
pub async fn handle_tool_call(ctx: &Arc<ServiceContext>, name: &str, args: &Value) -> ToolOutcome {
    let outcome = match name {
        "index_codebase" => handle_index_codebase(ctx, args).await,
        "search_code" => handle_search_code(ctx, args).await,
        "clear_index" => handle_clear_index(ctx, args).await,
        "get_indexing_status" => handle_indexing_status(ctx, args).await,
        "search_all" => handle_search_all(ctx, args).await,
        "list_repositories" => handle_list_repositories(ctx, args).await,
        _ => ToolOutcome::Err { kind: "not_found", message: format!("Unknown tool: {name}") },
    };
    info!(
        tool = name,
        outcome = if outcome.is_error() { "error" } else { "ok" },
        "Tool invocation"
    );
    outcome
}

// ---------------------------------------------------------------------------
// index_codebase
// ---------------------------------------------------------------------------

async fn handle_index_codebase(ctx: &Arc<ServiceContext>, args: &Value) -> ToolOutcome {
    let target = match required_str(args, "path") {
        Ok(p) => p.to_string(),
        Err(e) => return e.into(),
    };
    let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);

    // A clone URL can only alias an already-registered repo; there is no
    // working tree to index from.
    if let Some(identity) = resolve_identity_from_url(&target) {
        if !Path::new(&target).exists() {
            return index_by_url(ctx, &target, identity).await;
        }
    }

    let path = PathBuf::from(&target);
    if !path.is_dir() {
        return ServiceError::Validation(format!("'{target}' is not a directory")).into();
    }

    let resolved = ctx.registry.resolve(&path).await;
    let identity = resolved.identity.clone();

    if let Some(ref record) = resolved.record {
        if record.is_indexed() && !force {
            // The gate: a worktree or second clone does not get a second
            // collection.
            if let Err(e) = ctx
                .registry
                .register(&path, &identity, RegisterOptions::default())
                .await
            {
                return ToolOutcome::from(e);
            }
            return ToolOutcome::Ok(json!({
                "status": "already_indexed",
                "message": "Repository is already indexed; path registered as an alias.",
                "canonicalId": record.canonical_id,
                "displayName": record.display_name,
                "isNewPathForExistingRepo": resolved.is_new_path_for_existing_repo,
                "primaryPath": resolved.primary_path,
            }));
        }
    }

    let splitter = match args.get("splitter").and_then(|v| v.as_str()) {
        Some(s) => match s.parse::<SplitterKind>() {
            Ok(kind) => kind,
            Err(e) => return ServiceError::Validation(e).into(),
        },
        None => SplitterKind::default(),
    };
    let custom_extensions = string_array(args, "customExtensions");
    let ignore_patterns = string_array(args, "ignorePatterns");
    let branch_arg = args.get("branch").and_then(|v| v.as_str()).map(String::from);

    let root = identity.repo_root.clone().unwrap_or_else(|| path.clone());
    let branch = match branch_arg {
        Some(b) => b,
        None => gitutil::current_branch(&root).await.unwrap_or_else(|| "main".to_string()),
    };

    // Register first so status polling sees the repo immediately.
    if let Err(e) = ctx
        .registry
        .register(
            &path,
            &identity,
            RegisterOptions { branch: Some(branch.clone()), ..RegisterOptions::default() },
        )
        .await
    {
        return ToolOutcome::from(e);
    }
    if let Err(e) = ctx.registry.mark_indexing(&identity.canonical_id, Some(&branch), 0.0).await {
        return ToolOutcome::from(e);
    }

    let ctx_bg = Arc::clone(ctx);
    let canonical_id = identity.canonical_id.clone();
    let branch_bg = branch.clone();
    tokio::spawn(async move {
        run_index_build(
            ctx_bg,
            canonical_id,
            branch_bg,
            root,
            splitter,
            custom_extensions,
            ignore_patterns,
            force,
        )
        .await;
    });

    ToolOutcome::Ok(json!({
        "status": "indexing_started",
        "canonicalId": identity.canonical_id,
        "displayName": identity.display_name,
        "branch": branch,
        "message": "Indexing started in the background. Poll get_indexing_status for progress.",
    }))
}

async fn index_by_url(ctx: &Arc<ServiceContext>, url: &str, identity: RepoIdentity) -> ToolOutcome {
    let existing = ctx.registry.get(&identity.canonical_id).await;
    match existing {
        Some(record) => ToolOutcome::Ok(json!({
            "status": "already_indexed",
            "message": "Repository is already registered under this remote URL.",
            "canonicalId": record.canonical_id,
            "displayName": record.display_name,
            "knownPaths": record.known_paths,
        })),
        None => ServiceError::NotFound(format!(
            "'{url}' is not registered. Clone it locally and index the checkout path."
        ))
        .into(),
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_index_build(
    ctx: Arc<ServiceContext>,
    canonical_id: String,
    branch: String,
    root: PathBuf,
    splitter: SplitterKind,
    custom_extensions: Vec<String>,
    ignore_patterns: Vec<String>,
    force: bool,
) {
    // Serializes indexing per canonical ID: a concurrent register of the
    // same repo waits here, re-checks, and backs off.
    let lock = ctx.registry.index_lock(&canonical_id);
    let _guard = lock.lock().await;

    if !force {
        if let Some(record) = ctx.registry.get(&canonical_id).await {
            if record.is_indexed() {
                return;
            }
        }
    }

    let hybrid = ctx.config.vector_store.hybrid;
    let existing: HashSet<String> = match ctx.store.list_collections().await {
        Ok(names) => names.into_iter().collect(),
        Err(e) => {
            warn!(error = %e, "Collection listing failed before indexing");
            HashSet::new()
        }
    };
    let resolved = resolve_collection_name(&root, &canonical_id, &existing, hybrid);
    if resolved.is_legacy {
        let canonical =
            crate::collection::canonical_collection_name(&canonical_id, hybrid);
        if let Err(e) =
            ctx.migrations.record(&resolved.name, &canonical, &canonical_id, &root).await
        {
            warn!(error = %e, "Failed to record collection migration mapping");
        }
    }

    if force && existing.contains(&resolved.name) {
        if let Err(e) = ctx.store.drop_collection(&resolved.name).await {
            error!(error = %e, collection = resolved.name.as_str(), "Drop before re-index failed");
            let _ = ctx
                .registry
                .mark_failed(&canonical_id, Some(&branch), &format!("drop collection: {e}"))
                .await;
            return;
        }
    }

    let params = IndexParams {
        root: root.clone(),
        collection: resolved.name.clone(),
        splitter,
        custom_extensions,
        ignore_patterns,
        hybrid,
        embed_batch_size: ctx.config.embedding.batch_size,
    };

    match indexer::index_repository(
        &ctx.store,
        &ctx.embedder,
        &ctx.registry,
        &canonical_id,
        Some(&branch),
        params,
    )
    .await
    {
        Ok(outcome) => {
            let stats = IndexedStats {
                collection_name: resolved.name,
                indexed_files: outcome.indexed_files,
                total_chunks: outcome.total_chunks,
                last_commit: gitutil::head_commit(&root).await,
            };
            if let Err(e) = ctx.registry.mark_indexed(&canonical_id, Some(&branch), stats).await {
                error!(error = %e, "Failed to record completed index");
            }
        }
        Err(e) => {
            error!(error = %e, root = %root.display(), "Index build failed");
            let _ = ctx.registry.mark_failed(&canonical_id, Some(&branch), &e.to_string()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// search_code
// ---------------------------------------------------------------------------

async fn handle_search_code(ctx: &Arc<ServiceContext>, args: &Value) -> ToolOutcome {
    let path = match required_str(args, "path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e.into(),
    };
    let query = match required_str(args, "query") {
        Ok(q) => q.to_string(),
        Err(e) => return e.into(),
    };
    let limit = limit_arg(args);
    let extension_filter = {
        let exts = string_array(args, "extensionFilter");
        if exts.is_empty() { None } else { Some(exts) }
    };

    let resolved = ctx.registry.resolve(&path).await;
    let Some(record) = resolved.record else {
        return ServiceError::NotIndexed { path: path.display().to_string() }.into();
    };
    if !record.is_indexed() {
        return ServiceError::NotIndexed { path: path.display().to_string() }.into();
    }

    let collection = match record.collection_name() {
        Some(name) => name.to_string(),
        None => {
            let existing: HashSet<String> = match ctx.store.list_collections().await {
                Ok(names) => names.into_iter().collect(),
                Err(e) => return ToolOutcome::from(e),
            };
            resolve_collection_name(
                &path,
                &record.canonical_id,
                &existing,
                ctx.config.vector_store.hybrid,
            )
            .name
        }
    };

    let query_vector = match ctx.embedder.embed_query(&query).await {
        Ok(v) => v,
        Err(e) => return ToolOutcome::from(e),
    };
    let request = crate::vectordb::SearchRequest {
        query_text: query,
        query_vector,
        limit,
        extension_filter,
    };
    let hits = match ctx.store.hybrid_search(&collection, request).await {
        Ok(hits) => hits,
        Err(e) => return ToolOutcome::from(e),
    };

    let root = record.known_paths.iter().next().cloned().unwrap_or(path);
    let results: Vec<Value> = hits
        .into_iter()
        .map(|hit| {
            let content = indexer::hydrate_snippet(
                &root,
                &hit.meta.relative_path,
                hit.meta.start_line,
                hit.meta.end_line,
            );
            json!({
                "relativePath": hit.meta.relative_path,
                "startLine": hit.meta.start_line,
                "endLine": hit.meta.end_line,
                "language": hit.meta.language,
                "score": hit.score,
                "content": content,
            })
        })
        .collect();

    ToolOutcome::Ok(json!({
        "repository": record.display_name,
        "canonicalId": record.canonical_id,
        "collection": collection,
        "totalResults": results.len(),
        "results": results,
    }))
}

// ---------------------------------------------------------------------------
// clear_index
// ---------------------------------------------------------------------------

async fn handle_clear_index(ctx: &Arc<ServiceContext>, args: &Value) -> ToolOutcome {
    let path = match required_str(args, "path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e.into(),
    };

    let resolved = ctx.registry.resolve(&path).await;
    let Some(record) = resolved.record else {
        return ServiceError::NotFound(format!("'{}' is not registered", path.display())).into();
    };

    if let Some(collection) = record.collection_name() {
        if let Err(e) = ctx.store.drop_collection(collection).await {
            // The registry entry still goes away; an orphaned collection is
            // recoverable, a stale record is not.
            warn!(error = %e, collection, "Failed to drop collection during clear");
        }
    }

    match ctx.registry.remove_by_canonical_id(&record.canonical_id).await {
        Ok(_) => ToolOutcome::Ok(json!({
            "status": "cleared",
            "canonicalId": record.canonical_id,
            "displayName": record.display_name,
            "removedPaths": record.known_paths,
        })),
        Err(e) => ToolOutcome::from(e),
    }
}

// ---------------------------------------------------------------------------
// get_indexing_status
// ---------------------------------------------------------------------------

async fn handle_indexing_status(ctx: &Arc<ServiceContext>, args: &Value) -> ToolOutcome {
    let path = match required_str(args, "path") {
        Ok(p) => PathBuf::from(p),
        Err(e) => return e.into(),
    };

    let resolved = ctx.registry.resolve(&path).await;
    let Some(record) = resolved.record else {
        return ToolOutcome::Ok(json!({
            "path": path,
            "status": "not_registered",
            "message": "Repository is not registered. Run index_codebase first.",
        }));
    };

    let mut payload = json!({
        "path": path,
        "canonicalId": record.canonical_id,
        "displayName": record.display_name,
        "status": status_label(&record),
    });
    if let Some((branch, state)) = record.primary_branch() {
        payload["branch"] = json!(branch);
        match state.status {
            BranchStatus::Indexing => {
                payload["indexingPercentage"] = json!(state.indexing_percentage.unwrap_or(0.0));
            }
            BranchStatus::Indexed => {
                payload["indexedFiles"] = json!(state.indexed_files);
                payload["totalChunks"] = json!(state.total_chunks);
                payload["lastIndexed"] = json!(state.last_indexed);
                payload["collection"] = json!(state.collection_name);
                payload["lastCommit"] = json!(state.last_commit);
            }
            BranchStatus::Failed => {
                payload["errorMessage"] = json!(state.error_message);
            }
        }
    }
    ToolOutcome::Ok(payload)
}

// ---------------------------------------------------------------------------
// search_all
// ---------------------------------------------------------------------------

async fn handle_search_all(ctx: &Arc<ServiceContext>, args: &Value) -> ToolOutcome {
    let query = match required_str(args, "query") {
        Ok(q) => q.to_string(),
        Err(e) => return e.into(),
    };
    let repos = {
        let list = string_array(args, "repos");
        if list.is_empty() { None } else { Some(list) }
    };
    let extension_filter = {
        let exts = string_array(args, "extensionFilter");
        if exts.is_empty() { None } else { Some(exts) }
    };

    let params = SearchAllParams { query, limit: limit_arg(args), repos, extension_filter };
    let deadlines = SearchDeadlines {
        per_collection: ctx.config.collection_deadline,
        global: ctx.config.search_all_deadline,
    };

    match search_all::search_all(
        &ctx.registry,
        &ctx.store,
        &ctx.embedder,
        ctx.config.score_normalization,
        deadlines,
        params,
    )
    .await
    {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(v) => ToolOutcome::Ok(v),
            Err(e) => ServiceError::Internal(format!("serialize response: {e}")).into(),
        },
        Err(e) => ToolOutcome::from(e),
    }
}

// ---------------------------------------------------------------------------
// list_repositories
// ---------------------------------------------------------------------------

async fn handle_list_repositories(ctx: &Arc<ServiceContext>, args: &Value) -> ToolOutcome {
    let status = args.get("status").and_then(|v| v.as_str());
    let name_substring = args
        .get("nameSubstring")
        .and_then(|v| v.as_str())
        .map(|s| s.to_lowercase());

    let mut records = ctx.registry.list_all().await;
    if let Some(wanted) = status {
        records.retain(|r| status_label(r) == wanted);
    }
    if let Some(ref needle) = name_substring {
        records.retain(|r| r.display_name.to_lowercase().contains(needle));
    }

    let repositories: Vec<Value> = records.iter().map(record_summary).collect();
    ToolOutcome::Ok(json!({
        "total": repositories.len(),
        "repositories": repositories,
    }))
}

// ---------------------------------------------------------------------------
// JSON-RPC dispatch (shared by stdio and HTTP transports)
// ---------------------------------------------------------------------------

/// Pick the protocol version to serve for a client's requested version.
pub fn negotiate_version(requested: &str) -> &'static str {
    PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(PROTOCOL_VERSIONS[0])
}

/// Dispatch one JSON-RPC message. Returns `None` for notifications.
pub async fn dispatch_jsonrpc(ctx: &Arc<ServiceContext>, msg: &Value) -> Option<Value> {
    let method = msg.get("method").and_then(|v| v.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();

    if method.starts_with("notifications/") {
        return None;
    }

    let response = match method {
        "initialize" => {
            let requested = msg["params"]["protocolVersion"].as_str().unwrap_or("");
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": negotiate_version(requested),
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "repocontext",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "instructions": "repocontext — semantic code search over indexed git repositories. Register a repo with index_codebase, poll get_indexing_status, then use search_code (single repo) or search_all (every indexed repo)."
                }
            })
        }
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": tool_definitions() }
        }),
        "tools/call" => {
            let tool_name = msg["params"]["name"].as_str().unwrap_or("");
            let arguments = msg["params"].get("arguments").cloned().unwrap_or_else(|| json!({}));
            let (text, is_error) = handle_tool_call(ctx, tool_name, &arguments).await.into_content();
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{ "type": "text", "text": text }],
                    "isError": is_error
                }
            })
        }
        "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "Method not found" }
        }),
    };
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_negotiation_prefers_client_match() {
        assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");
        assert_eq!(negotiate_version("1999-01-01"), PROTOCOL_VERSIONS[0]);
    }

    #[test]
    fn limits_clamp_at_fifty() {
        assert_eq!(limit_arg(&json!({ "limit": 500 })), 50);
        assert_eq!(limit_arg(&json!({ "limit": 5 })), 5);
        assert_eq!(limit_arg(&json!({})), 10);
    }

    #[test]
    fn error_outcomes_render_kind_and_message() {
        let outcome = ToolOutcome::from(ServiceError::Validation("'path' is required".into()));
        let (text, is_error) = outcome.into_content();
        assert!(is_error);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["error"]["kind"], "validation");
        assert!(parsed["error"]["message"].as_str().unwrap().contains("path"));
    }
}

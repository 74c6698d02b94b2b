//! Tool-surface integration: the full index → status → search → clear flow
//! against git fixtures and the in-memory store.

mod helpers;

use helpers::{build_service, wait_until_indexed, GitFixture, MemoryVectorStore};
use repocontext::collection::{canonical_collection_name, legacy_collection_name};
use repocontext::config::Config;
use repocontext::identity::resolve_identity;
use repocontext::tools::{handle_tool_call, ToolOutcome};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn expect_ok(outcome: ToolOutcome) -> Value {
    match outcome {
        ToolOutcome::Ok(payload) => payload,
        ToolOutcome::Err { kind, message } => panic!("expected ok, got {kind}: {message}"),
    }
}

fn expect_err(outcome: ToolOutcome) -> (String, String) {
    match outcome {
        ToolOutcome::Ok(payload) => panic!("expected error, got {payload}"),
        ToolOutcome::Err { kind, message } => (kind.to_string(), message),
    }
}

fn source_fixture() -> GitFixture {
    let fixture = GitFixture::new();
    fixture.write_file(
        "src/auth.rs",
        "pub fn verify_bearer_token(header: &str) -> bool {\n    header.starts_with(\"Bearer \")\n}\n",
    );
    fixture.write_file(
        "src/parser.rs",
        "pub fn parse_manifest(input: &str) -> Vec<String> {\n    input.lines().map(String::from).collect()\n}\n",
    );
    fixture.write_file("README.md", "# fixture\nA scratch service.\n");
    fixture.commit_all("initial");
    fixture
}

#[tokio::test]
async fn index_search_status_clear_roundtrip() {
    let service = build_service().await;
    let ctx = &service.ctx;
    let fixture = source_fixture();
    fixture.set_origin("git@github.com:acme/fixture.git");
    let root = fixture.root();

    // Index starts in the background.
    let payload = expect_ok(
        handle_tool_call(ctx, "index_codebase", &json!({ "path": root })).await,
    );
    assert_eq!(payload["status"], "indexing_started");
    let canonical_id = payload["canonicalId"].as_str().unwrap().to_string();
    assert_eq!(payload["displayName"], "fixture");

    wait_until_indexed(ctx, &canonical_id).await;

    // Status reports the final counts.
    let status = expect_ok(
        handle_tool_call(ctx, "get_indexing_status", &json!({ "path": root })).await,
    );
    assert_eq!(status["status"], "indexed");
    assert_eq!(status["indexedFiles"], 3);
    assert!(status["totalChunks"].as_u64().unwrap() >= 3);
    assert!(status["lastCommit"].is_string());
    let collection = status["collection"].as_str().unwrap().to_string();
    assert_eq!(
        collection,
        canonical_collection_name(&canonical_id, ctx.config.vector_store.hybrid)
    );

    // Search finds the auth helper by intent-adjacent words.
    let results = expect_ok(
        handle_tool_call(
            ctx,
            "search_code",
            &json!({ "path": root, "query": "verify bearer token header", "limit": 5 }),
        )
        .await,
    );
    assert_eq!(results["canonicalId"], canonical_id);
    let hits = results["results"].as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["relativePath"], "src/auth.rs");
    assert!(hits[0]["content"].as_str().unwrap().contains("verify_bearer_token"));
    assert!(hits[0]["score"].as_f64().unwrap() > 0.0);

    // Extension filter narrows store-side.
    let results = expect_ok(
        handle_tool_call(
            ctx,
            "search_code",
            &json!({
                "path": root,
                "query": "fixture scratch service",
                "extensionFilter": [".md"]
            }),
        )
        .await,
    );
    let hits = results["results"].as_array().unwrap();
    assert!(hits.iter().all(|h| h["relativePath"].as_str().unwrap().ends_with(".md")));

    // Clear drops the collection and the record.
    let cleared = expect_ok(handle_tool_call(ctx, "clear_index", &json!({ "path": root })).await);
    assert_eq!(cleared["status"], "cleared");
    assert!(!ctx.store.has_collection(&collection).await.unwrap());
    assert_eq!(ctx.registry.len().await, 0);

    let status = expect_ok(
        handle_tool_call(ctx, "get_indexing_status", &json!({ "path": root })).await,
    );
    assert_eq!(status["status"], "not_registered");
}

#[tokio::test]
async fn worktree_registers_as_alias_instead_of_reindexing() {
    let service = build_service().await;
    let ctx = &service.ctx;
    let fixture = source_fixture();
    fixture.set_origin("git@github.com:acme/dedup.git");
    let root = fixture.root();

    let payload =
        expect_ok(handle_tool_call(ctx, "index_codebase", &json!({ "path": root })).await);
    let canonical_id = payload["canonicalId"].as_str().unwrap().to_string();
    wait_until_indexed(ctx, &canonical_id).await;

    let holder = TempDir::new().unwrap();
    let worktree = fixture.add_worktree(&holder, "feat", "f");

    // Second register returns "already indexed" without a new collection.
    let payload = expect_ok(
        handle_tool_call(ctx, "index_codebase", &json!({ "path": worktree })).await,
    );
    assert_eq!(payload["status"], "already_indexed");
    assert_eq!(payload["canonicalId"], canonical_id);
    assert_eq!(payload["isNewPathForExistingRepo"], true);

    assert_eq!(ctx.registry.len().await, 1);
    let record = ctx.registry.get(&canonical_id).await.unwrap();
    assert!(record.known_paths.contains(&root));
    assert!(record.known_paths.contains(&worktree));
    assert!(record.worktrees.contains(&worktree));

    // Exactly one collection exists in the store.
    let collections = ctx.store.list_collections().await.unwrap();
    assert_eq!(collections.len(), 1);
}

#[tokio::test]
async fn force_reindex_rebuilds_the_collection() {
    let service = build_service().await;
    let ctx = &service.ctx;
    let fixture = source_fixture();
    let root = fixture.root();

    let payload =
        expect_ok(handle_tool_call(ctx, "index_codebase", &json!({ "path": root })).await);
    let canonical_id = payload["canonicalId"].as_str().unwrap().to_string();
    wait_until_indexed(ctx, &canonical_id).await;

    let collection = ctx
        .registry
        .get(&canonical_id)
        .await
        .unwrap()
        .collection_name()
        .unwrap()
        .to_string();
    let before = ctx.registry.get(&canonical_id).await.unwrap();
    let (_, before_state) = before.primary_branch().unwrap();
    let before_chunks = before_state.total_chunks;

    // Add a file, then force a re-index.
    fixture.write_file("src/extra.rs", "pub fn extra_helper_for_tests() {}\n");
    fixture.commit_all("add extra");

    let payload = expect_ok(
        handle_tool_call(ctx, "index_codebase", &json!({ "path": root, "force": true })).await,
    );
    assert_eq!(payload["status"], "indexing_started");
    wait_until_indexed(ctx, &canonical_id).await;

    let after = ctx.registry.get(&canonical_id).await.unwrap();
    let (_, after_state) = after.primary_branch().unwrap();
    assert_eq!(after_state.indexed_files, 4);
    assert!(after_state.total_chunks > before_chunks);
    assert_eq!(after_state.collection_name.as_deref(), Some(collection.as_str()));
}

#[tokio::test]
async fn search_on_unindexed_repo_guides_to_index_first() {
    let service = build_service().await;
    let ctx = &service.ctx;
    let dir = TempDir::new().unwrap();

    let (kind, message) = expect_err(
        handle_tool_call(
            ctx,
            "search_code",
            &json!({ "path": dir.path(), "query": "anything" }),
        )
        .await,
    );
    assert_eq!(kind, "not_indexed");
    assert!(message.contains("index_codebase"));
}

#[tokio::test]
async fn validation_errors_surface_structured_kinds() {
    let service = build_service().await;
    let ctx = &service.ctx;

    let (kind, _) = expect_err(handle_tool_call(ctx, "index_codebase", &json!({})).await);
    assert_eq!(kind, "validation");

    let (kind, _) = expect_err(
        handle_tool_call(ctx, "index_codebase", &json!({ "path": "/definitely/not/here" })).await,
    );
    assert_eq!(kind, "validation");

    let (kind, _) = expect_err(
        handle_tool_call(ctx, "search_code", &json!({ "path": "/tmp", "query": "" })).await,
    );
    assert_eq!(kind, "validation");

    let (kind, message) = expect_err(handle_tool_call(ctx, "no_such_tool", &json!({})).await);
    assert_eq!(kind, "not_found");
    assert!(message.contains("no_such_tool"));
}

#[tokio::test]
async fn url_register_aliases_known_repo_and_rejects_unknown() {
    let service = build_service().await;
    let ctx = &service.ctx;
    let fixture = source_fixture();
    fixture.set_origin("git@github.com:acme/urls.git");
    let root = fixture.root();

    // Unknown URL: remediation, not a crash.
    let (kind, message) = expect_err(
        handle_tool_call(
            ctx,
            "index_codebase",
            &json!({ "path": "https://github.com/acme/urls.git" }),
        )
        .await,
    );
    assert_eq!(kind, "not_found");
    assert!(message.contains("Clone"));

    let payload =
        expect_ok(handle_tool_call(ctx, "index_codebase", &json!({ "path": root })).await);
    let canonical_id = payload["canonicalId"].as_str().unwrap().to_string();
    wait_until_indexed(ctx, &canonical_id).await;

    // The HTTPS form of the same remote aliases the indexed record.
    let payload = expect_ok(
        handle_tool_call(
            ctx,
            "index_codebase",
            &json!({ "path": "https://github.com/acme/urls.git" }),
        )
        .await,
    );
    assert_eq!(payload["status"], "already_indexed");
    assert_eq!(payload["canonicalId"], canonical_id);
}

#[tokio::test]
async fn list_repositories_filters_by_status_and_name() {
    let service = build_service().await;
    let ctx = &service.ctx;

    let alpha = source_fixture();
    alpha.set_origin("git@github.com:acme/alpha-service.git");
    let payload = expect_ok(
        handle_tool_call(ctx, "index_codebase", &json!({ "path": alpha.root() })).await,
    );
    wait_until_indexed(ctx, payload["canonicalId"].as_str().unwrap()).await;

    let beta = GitFixture::new();
    beta.write_file("b.rs", "pub fn b() {}\n");
    beta.commit_all("initial");
    beta.set_origin("git@github.com:acme/beta-tool.git");
    let beta_identity = resolve_identity(&beta.root()).await;
    ctx.registry
        .register(
            &beta.root(),
            &beta_identity,
            repocontext::registry::RegisterOptions::default(),
        )
        .await
        .unwrap();

    let all = expect_ok(handle_tool_call(ctx, "list_repositories", &json!({})).await);
    assert_eq!(all["total"], 2);

    let indexed = expect_ok(
        handle_tool_call(ctx, "list_repositories", &json!({ "status": "indexed" })).await,
    );
    assert_eq!(indexed["total"], 1);
    assert_eq!(indexed["repositories"][0]["displayName"], "alpha-service");

    let named = expect_ok(
        handle_tool_call(ctx, "list_repositories", &json!({ "nameSubstring": "beta" })).await,
    );
    assert_eq!(named["total"], 1);
    assert_eq!(named["repositories"][0]["status"], "registered");
}

#[tokio::test]
async fn legacy_collection_is_reused_and_migrated_on_demand() {
    let store = Arc::new(MemoryVectorStore::new());
    let service =
        helpers::build_service_with(store.clone(), Config::default()).await;
    let ctx = &service.ctx;

    let fixture = source_fixture();
    fixture.set_origin("git@github.com:acme/legacy.git");
    let root = fixture.root();
    let identity = resolve_identity(&root).await;

    // An index from before the identity change exists under the path-hash
    // name.
    let hybrid = ctx.config.vector_store.hybrid;
    let legacy = legacy_collection_name(&root, hybrid);
    store.seed_collection(&legacy).await;

    let payload =
        expect_ok(handle_tool_call(ctx, "index_codebase", &json!({ "path": root })).await);
    wait_until_indexed(ctx, payload["canonicalId"].as_str().unwrap()).await;

    // The legacy collection was reused, not replaced.
    let record = ctx.registry.get(&identity.canonical_id).await.unwrap();
    assert_eq!(record.collection_name(), Some(legacy.as_str()));
    assert!(store.chunk_count(&legacy).await > 0);

    // A migration mapping was recorded; running it renames idempotently.
    let mappings = ctx.migrations.list().await;
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].old_name, legacy);
    assert!(!mappings[0].migrated);

    let canonical = canonical_collection_name(&identity.canonical_id, hybrid);
    let renamed = ctx.migrations.run_pending(&ctx.store).await.unwrap();
    assert_eq!(renamed, 1);
    assert!(!ctx.store.has_collection(&legacy).await.unwrap());
    assert!(ctx.store.has_collection(&canonical).await.unwrap());

    // Second pass is a no-op.
    let renamed = ctx.migrations.run_pending(&ctx.store).await.unwrap();
    assert_eq!(renamed, 0);
}

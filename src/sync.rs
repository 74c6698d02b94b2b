//! Background sync loop: periodically reconcile indexed repos against their
//! working trees and re-index the ones whose checked-out state moved.
//!
//! Best-effort by contract: every failure is logged and the loop keeps
//! going; it must never take the service down.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::gitutil;
use crate::snapshot::RepoRecord;
use crate::splitter::SplitterKind;
use crate::tools::{run_index_build, ServiceContext};

/// Boundary for working-tree change detection.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Whether the tree at `root` changed since the recorded commit.
    async fn has_changed(&self, root: &Path, last_commit: Option<&str>) -> bool;
}

/// Default detector: compares the current HEAD commit against the one
/// recorded at index time.
pub struct GitHeadDetector;

#[async_trait]
impl ChangeDetector for GitHeadDetector {
    async fn has_changed(&self, root: &Path, last_commit: Option<&str>) -> bool {
        let Some(head) = gitutil::head_commit(root).await else {
            // Unreadable HEAD: nothing actionable, leave the index alone.
            return false;
        };
        match last_commit {
            Some(recorded) => head != recorded,
            // No commit recorded (e.g. migrated snapshot): reconcile once.
            None => true,
        }
    }
}

/// Run the loop until the task is cancelled (service shutdown drops it).
pub async fn run(ctx: Arc<ServiceContext>, detector: Arc<dyn ChangeDetector>) {
    let mut interval = tokio::time::interval(ctx.config.sync_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        interval.tick().await;

        // One pass per tick, isolated so a panic in a pass cannot kill the
        // loop.
        let pass_ctx = Arc::clone(&ctx);
        let pass_detector = Arc::clone(&detector);
        let pass = tokio::spawn(async move { run_pass(pass_ctx, pass_detector).await });
        if let Err(e) = pass.await {
            warn!(error = %e, "Sync pass aborted, continuing");
        }
    }
}

async fn run_pass(ctx: Arc<ServiceContext>, detector: Arc<dyn ChangeDetector>) {
    let records = ctx.registry.list_indexed().await;
    debug!(repositories = records.len(), "Sync pass starting");

    for record in records {
        if let Err(e) = reconcile(&ctx, &detector, &record).await {
            warn!(
                repo = record.display_name.as_str(),
                error = %e,
                "Sync reconcile failed, continuing"
            );
        }
    }
}

async fn reconcile(
    ctx: &Arc<ServiceContext>,
    detector: &Arc<dyn ChangeDetector>,
    record: &RepoRecord,
) -> crate::error::Result<()> {
    let Some(root) = record.known_paths.iter().find(|p| p.exists()) else {
        warn!(repo = record.display_name.as_str(), "No existing path for indexed repo");
        return Ok(());
    };

    let (branch, last_commit) = match record.primary_branch() {
        Some((branch, state)) => (branch.to_string(), state.last_commit.clone()),
        None => return Ok(()),
    };

    if !detector.has_changed(root, last_commit.as_deref()).await {
        return Ok(());
    }

    info!(
        repo = record.display_name.as_str(),
        branch = branch.as_str(),
        "Change detected, re-indexing"
    );
    run_index_build(
        Arc::clone(ctx),
        record.canonical_id.clone(),
        branch,
        root.clone(),
        SplitterKind::default(),
        Vec::new(),
        Vec::new(),
        true,
    )
    .await;
    Ok(())
}

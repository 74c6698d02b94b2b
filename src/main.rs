//! repocontext binary — thin CLI shell over the library crate.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info, warn};

use repocontext::collection::MigrationStore;
use repocontext::config::{Config, Transport};
use repocontext::embedding::HttpEmbedder;
use repocontext::http::{build_router, spawn_session_sweeper, HttpState};
use repocontext::ratelimit::spawn_sweeper;
use repocontext::registry::RepoRegistry;
use repocontext::sync::GitHeadDetector;
use repocontext::tools::ServiceContext;
use repocontext::vectordb::RestVectorStore;

/// Semantic code-search MCP server: index git repositories into a vector
/// store and search them by intent.
#[derive(Parser)]
#[command(name = "repocontext", version, about, long_about = None)]
struct Cli {
    /// Transport(s) to serve
    #[arg(long, default_value = "stdio", value_parser = ["stdio", "http", "both"])]
    transport: String,

    /// HTTP port
    #[arg(long, env = "MCP_PORT", default_value_t = 3100)]
    port: u16,
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

/// Resolves on the first SIGINT/SIGTERM. A second signal during shutdown
/// forces an immediate exit.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
        eprintln!("Forced shutdown");
        std::process::exit(1);
    });
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Structured logging on stderr; stdout belongs to the pipe transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("repocontext=info".parse().unwrap()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::default().apply_env();
    config.transport = cli.transport.parse::<Transport>().unwrap_or(Transport::Stdio);
    config.port = cli.port;

    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(2);
    }

    let store: Arc<dyn repocontext::vectordb::VectorStore> =
        match RestVectorStore::new(&config.vector_store) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                error!("{e}");
                std::process::exit(2);
            }
        };
    let embedder: Arc<dyn repocontext::embedding::Embedder> =
        match HttpEmbedder::new(&config.embedding) {
            Ok(e) => Arc::new(e),
            Err(e) => {
                error!("{e}");
                std::process::exit(2);
            }
        };

    let registry = RepoRegistry::load(&config).await;
    let migrations = MigrationStore::load(&config.state_dir);

    let ctx = Arc::new(ServiceContext {
        config: config.clone(),
        registry,
        store,
        embedder,
        migrations,
        started_at: Instant::now(),
    });

    // One-shot legacy collection rename pass; connectivity failures here
    // must not block startup.
    match ctx.migrations.run_pending(&ctx.store).await {
        Ok(0) => {}
        Ok(renamed) => info!(renamed, "Migrated legacy collections"),
        Err(e) => warn!(error = %e, "Collection migration pass failed, will retry next start"),
    }

    // Background reconcile loop; cancelled when the runtime shuts down.
    let sync_handle = tokio::spawn(repocontext::sync::run(
        Arc::clone(&ctx),
        Arc::new(GitHeadDetector),
    ));

    let exit_code = match config.transport {
        Transport::Stdio => run_stdio(Arc::clone(&ctx)).await,
        Transport::Http => run_http(Arc::clone(&ctx), config.port).await,
        Transport::Both => {
            let stdio_ctx = Arc::clone(&ctx);
            tokio::select! {
                code = run_stdio(stdio_ctx) => code,
                code = run_http(Arc::clone(&ctx), config.port) => code,
            }
        }
    };

    sync_handle.abort();
    if let Err(e) = ctx.registry.persist().await {
        warn!(error = %e, "Final snapshot persist failed");
    }
    std::process::exit(exit_code);
}

async fn run_stdio(ctx: Arc<ServiceContext>) -> i32 {
    tokio::select! {
        _ = repocontext::stdio::run(ctx) => 0,
        _ = shutdown_signal() => 0,
    }
}

async fn run_http(ctx: Arc<ServiceContext>, port: u16) -> i32 {
    let state = HttpState::new(Arc::clone(&ctx));
    let sessions = Arc::clone(&state.sessions);
    let limiter_sweeper = spawn_sweeper(Arc::clone(&state.limiter));
    let session_sweeper = spawn_session_sweeper(Arc::clone(&sessions));

    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!(port, error = %e, "Could not bind HTTP listener");
            return 1;
        }
    };
    info!(port, "MCP HTTP transport listening");

    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    limiter_sweeper.abort();
    session_sweeper.abort();
    sessions.clear();

    match served {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "HTTP server error");
            1
        }
    }
}

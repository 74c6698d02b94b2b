//! Pipe transport: newline-delimited JSON-RPC over stdin/stdout with one
//! implicit session and no authentication.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::tools::{dispatch_jsonrpc, ServiceContext};

/// Run the stdio loop until stdin closes.
pub async fn run(ctx: Arc<ServiceContext>) {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    info!(
        repositories = ctx.registry.len().await,
        "MCP stdio transport ready"
    );

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                let err = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": "Parse error" }
                });
                let _ = write_line(&mut stdout, &err).await;
                continue;
            }
        };

        if let Some(response) = dispatch_jsonrpc(&ctx, &msg).await {
            let _ = write_line(&mut stdout, &response).await;
        }
    }

    info!("stdin closed, stdio transport stopping");
}

async fn write_line(
    stdout: &mut tokio::io::Stdout,
    value: &serde_json::Value,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(value).unwrap_or_default();
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}

//! JSON-RPC dispatch shared by both transports: initialization, tool
//! listing, tool calls, and protocol edge cases.

mod helpers;

use helpers::build_service;
use repocontext::tools::dispatch_jsonrpc;
use serde_json::json;

#[tokio::test]
async fn initialize_negotiates_and_reports_server_info() {
    let service = build_service().await;

    let response = dispatch_jsonrpc(
        &service.ctx,
        &json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2025-03-26" }
        }),
    )
    .await
    .expect("initialize gets a response");

    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(response["result"]["serverInfo"]["name"], "repocontext");
    assert!(response["result"]["capabilities"]["tools"].is_object());

    // Unknown client versions fall back to our newest.
    let response = dispatch_jsonrpc(
        &service.ctx,
        &json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "initialize",
            "params": { "protocolVersion": "1990-01-01" }
        }),
    )
    .await
    .unwrap();
    assert_eq!(response["result"]["protocolVersion"], "2025-06-18");
}

#[tokio::test]
async fn tools_list_exposes_the_six_operations() {
    let service = build_service().await;

    let response = dispatch_jsonrpc(
        &service.ctx,
        &json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/list" }),
    )
    .await
    .unwrap();

    let tools = response["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        vec![
            "index_codebase",
            "search_code",
            "clear_index",
            "get_indexing_status",
            "search_all",
            "list_repositories"
        ]
    );
    for tool in tools {
        assert!(tool["inputSchema"]["type"] == "object", "{} has a schema", tool["name"]);
        assert!(tool["description"].as_str().unwrap().len() > 20);
    }
}

#[tokio::test]
async fn tool_errors_carry_is_error_and_structured_body() {
    let service = build_service().await;

    let response = dispatch_jsonrpc(
        &service.ctx,
        &json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": { "name": "search_code", "arguments": { "path": "/nope" } }
        }),
    )
    .await
    .unwrap();

    assert_eq!(response["result"]["isError"], true);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    let body: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(body["error"]["kind"], "validation");
}

#[tokio::test]
async fn search_all_with_nothing_indexed_returns_empty_summary() {
    let service = build_service().await;

    let response = dispatch_jsonrpc(
        &service.ctx,
        &json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": { "name": "search_all", "arguments": { "query": "anything" } }
        }),
    )
    .await
    .unwrap();

    assert_eq!(response["result"]["isError"], false);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    let body: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(body["summary"]["collectionsQueried"], 0);
    assert_eq!(body["summary"]["totalResults"], 0);
    assert_eq!(body["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn ping_notifications_and_unknown_methods() {
    let service = build_service().await;

    let response = dispatch_jsonrpc(
        &service.ctx,
        &json!({ "jsonrpc": "2.0", "id": 6, "method": "ping" }),
    )
    .await
    .unwrap();
    assert!(response["result"].is_object());

    // Notifications produce no response.
    let response = dispatch_jsonrpc(
        &service.ctx,
        &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert!(response.is_none());

    let response = dispatch_jsonrpc(
        &service.ctx,
        &json!({ "jsonrpc": "2.0", "id": 7, "method": "resources/list" }),
    )
    .await
    .unwrap();
    assert_eq!(response["error"]["code"], -32601);
}

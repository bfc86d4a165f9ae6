//! End-to-end tests for tool routing, server management and tracking

mod harness;

use std::sync::Arc;

use harness::config::ConfigBuilder;
use harness::fake_upstream::FakeUpstream;
use harness::server::TestServer;
use serde_json::{Value, json};

fn echo_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "msg": { "type": "string" } },
        "required": ["msg"]
    })
}

/// Server with backend `alpha` exposing `echo`
async fn alpha_server() -> (TestServer, Arc<FakeUpstream>) {
    let upstream = FakeUpstream::new();
    upstream.add_tool("alpha", "echo", "Echo a message", echo_schema());
    upstream.reply_text("alpha", "echo", "hi");

    let config = ConfigBuilder::new().with_http_backend("alpha").build();
    let server = TestServer::start(config, upstream.clone()).await.unwrap();
    (server, upstream)
}

fn text_of(body: &Value) -> &str {
    body["content"][0]["text"].as_str().unwrap()
}

// -- Tool calls --

#[tokio::test]
async fn call_is_routed_to_backend_and_tracked() {
    let (server, upstream) = alpha_server().await;

    let (status, body) = server
        .post_json(
            "/mcp/tools/call",
            &json!({ "name": "alpha_echo", "arguments": { "msg": "hi" } }),
        )
        .await;

    assert_eq!(status, 200);
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(text_of(&body), "hi");

    let calls = upstream.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].backend, "alpha");
    assert_eq!(calls[0].tool, "echo");
    assert_eq!(Value::Object(calls[0].arguments.clone()), json!({ "msg": "hi" }));

    let (_, requests) = server.get_json("/api/requests").await;
    let requests = requests["requests"].as_array().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["server_name"], "alpha");
    assert_eq!(requests[0]["tool_name"], "echo");
    assert_eq!(requests[0]["status"], "completed");

    let (_, stats) = server.get_json("/api/statistics").await;
    assert_eq!(stats["total_requests"], 1);
    assert_eq!(stats["completed_requests"], 1);
    assert_eq!(stats["by_server"]["alpha"], 1);
    assert_eq!(stats["by_status"]["failed"], 0);
}

#[tokio::test]
async fn structured_results_are_returned_as_json_text() {
    let upstream = FakeUpstream::new();
    upstream.add_tool("alpha", "lookup", "Look up", json!({ "type": "object" }));
    let config = ConfigBuilder::new().with_http_backend("alpha").build();
    let server = TestServer::start(config, upstream).await.unwrap();

    let (status, body) = server
        .post_json(
            "/mcp/tools/call",
            &json!({ "name": "alpha_lookup", "arguments": { "a": 1 } }),
        )
        .await;

    assert_eq!(status, 200);
    let parsed: Value = serde_json::from_str(text_of(&body)).unwrap();
    assert_eq!(parsed, json!({ "a": 1 }));
}

#[tokio::test]
async fn tracker_records_client_ip_and_session() {
    let (server, _) = alpha_server().await;

    let resp = server
        .client()
        .post(server.url("/mcp/tools/call"))
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .header("mcp-session-id", "session-42")
        .json(&json!({ "name": "alpha_echo", "arguments": { "msg": "hi" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let (_, requests) = server.get_json("/api/requests").await;
    let id = requests["requests"][0]["request_id"].as_str().unwrap().to_owned();

    let (status, tracker) = server.get_json(&format!("/api/requests/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(tracker["client_ip"], "203.0.113.7");
    assert_eq!(tracker["session_id"], "session-42");
    assert!(tracker["duration_ms"].is_number());
}

#[tokio::test]
async fn invalid_arguments_are_reported_without_calling_upstream() {
    let (server, upstream) = alpha_server().await;

    let (status, body) = server
        .post_json("/mcp/tools/call", &json!({ "name": "alpha_echo", "arguments": {} }))
        .await;

    assert_eq!(status, 200);
    let error: Value = serde_json::from_str(text_of(&body)).unwrap();
    assert!(error["error"].as_str().unwrap().contains("msg"));
    assert!(upstream.calls().is_empty());

    let (_, stats) = server.get_json("/api/statistics").await;
    assert_eq!(stats["total_requests"], 0);
}

#[tokio::test]
async fn upstream_failure_becomes_error_payload_and_failed_tracker() {
    let upstream = FakeUpstream::new();
    upstream.add_tool("alpha", "echo", "Echo a message", echo_schema());
    upstream.reply_error("alpha", "echo", "connection reset");
    let config = ConfigBuilder::new().with_http_backend("alpha").build();
    let server = TestServer::start(config, upstream).await.unwrap();

    let (status, body) = server
        .post_json(
            "/mcp/tools/call",
            &json!({ "name": "alpha_echo", "arguments": { "msg": "hi" } }),
        )
        .await;

    assert_eq!(status, 200);
    let error: Value = serde_json::from_str(text_of(&body)).unwrap();
    assert!(error["error"].as_str().unwrap().contains("connection reset"));

    let (_, failed) = server.get_json("/api/requests?status=failed").await;
    let failed = failed["requests"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]["error"].as_str().unwrap().contains("connection reset"));

    let (_, stats) = server.get_json("/api/statistics").await;
    assert_eq!(stats["average_duration_ms"], 0.0);
}

#[tokio::test]
async fn unknown_tool_returns_not_found() {
    let (server, _) = alpha_server().await;

    let (status, body) = server
        .post_json("/mcp/tools/call", &json!({ "name": "alpha_missing" }))
        .await;

    assert_eq!(status, 404);
    assert_eq!(body["error"]["type"], "not_found");
}

#[tokio::test]
async fn unknown_request_id_returns_not_found() {
    let (server, _) = alpha_server().await;

    let (status, body) = server.get_json("/api/requests/does-not-exist").await;

    assert_eq!(status, 404);
    assert_eq!(body["error"]["type"], "not_found");
}

// -- Tool listing --

#[tokio::test]
async fn tools_are_listed_with_prefixed_names() {
    let (server, _) = alpha_server().await;

    let (status, body) = server.post_json("/mcp/tools/list", &json!({})).await;
    assert_eq!(status, 200);

    let tools = body["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "alpha_echo");
    assert_eq!(tools[0]["server"], "alpha");
    assert_eq!(tools[0]["description"], "[alpha] Echo a message");
    assert_eq!(tools[0]["parameters"][0]["name"], "msg");
    assert_eq!(tools[0]["parameters"][0]["required"], true);
    assert_eq!(tools[0]["parameters"][0]["kind"], "string");

    let (_, filtered) = server
        .post_json("/mcp/tools/list", &json!({ "server": "other" }))
        .await;
    assert!(filtered["tools"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_listed_but_has_no_tools() {
    let upstream = FakeUpstream::new();
    upstream.add_tool("alpha", "echo", "Echo a message", echo_schema());
    upstream.take_down("broken");
    let config = ConfigBuilder::new()
        .with_http_backend("broken")
        .with_http_backend("alpha")
        .build();
    let server = TestServer::start(config, upstream).await.unwrap();

    let (_, tools) = server.post_json("/mcp/tools/list", &json!({})).await;
    assert_eq!(tools["tools"].as_array().unwrap().len(), 1);

    let (_, servers) = server.get_json("/api/servers").await;
    let servers = servers["servers"].as_array().unwrap();
    let broken = servers.iter().find(|s| s["name"] == "broken").unwrap();
    assert_eq!(broken["connected"], false);
    assert_eq!(broken["tool_count"], 0);
}

// -- Server management --

#[tokio::test]
async fn added_server_tools_become_callable() {
    let (server, upstream) = alpha_server().await;
    upstream.add_tool("beta", "ping", "Ping", json!({ "type": "object" }));
    upstream.reply_text("beta", "ping", "pong");

    let (status, body) = server
        .post_json(
            "/api/servers/http",
            &json!({ "name": "beta", "url": "http://beta.upstream.test/mcp" }),
        )
        .await;

    assert_eq!(status, 201);
    assert_eq!(body["refresh"]["discovered"]["beta"], 1);

    let (_, reply) = server
        .post_json("/mcp/tools/call", &json!({ "name": "beta_ping" }))
        .await;
    assert_eq!(text_of(&reply), "pong");

    let (_, servers) = server.get_json("/api/servers").await;
    let servers = servers["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[1]["name"], "beta");
    assert_eq!(servers[1]["type"], "http");
    assert_eq!(servers[1]["tool_count"], 1);
}

#[tokio::test]
async fn duplicate_name_is_rejected_and_first_entry_kept() {
    let (server, _) = alpha_server().await;

    let (status, body) = server
        .post_json(
            "/api/servers/stdio",
            &json!({ "name": "alpha", "command": "node", "args": ["server.js"] }),
        )
        .await;

    assert_eq!(status, 400);
    assert_eq!(body["error"]["type"], "config_error");

    let (_, servers) = server.get_json("/api/servers").await;
    let servers = servers["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["type"], "http");
    assert_eq!(servers[0]["summary"], "http://alpha.upstream.test/mcp");
}

#[tokio::test]
async fn duplicate_service_port_is_rejected() {
    let upstream = FakeUpstream::new();
    let config = ConfigBuilder::new().build();
    let server = TestServer::start(config, upstream).await.unwrap();

    server
        .upstream()
        .registry()
        .add_service(
            "first",
            conflux_config::ServiceBackend::new("sleep", vec!["30".to_owned()], 45_123),
        )
        .await
        .unwrap();

    let (status, body) = server
        .post_json(
            "/api/servers/service",
            &json!({ "name": "second", "command": "sleep", "args": ["30"], "port": 45_123 }),
        )
        .await;

    assert_eq!(status, 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("45123"));
}

#[tokio::test]
async fn removed_server_tools_are_gone() {
    let (server, _) = alpha_server().await;

    let resp = server
        .client()
        .delete(server.url("/api/servers/alpha"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], true);

    let (status, _) = server
        .post_json(
            "/mcp/tools/call",
            &json!({ "name": "alpha_echo", "arguments": { "msg": "hi" } }),
        )
        .await;
    assert_eq!(status, 404);

    // Removing again is a no-op
    let resp = server
        .client()
        .delete(server.url("/api/servers/alpha"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], false);
}

// -- Tracking --

#[tokio::test]
async fn request_listing_is_newest_first_and_bounded() {
    let upstream = FakeUpstream::new();
    upstream.add_tool("alpha", "echo", "Echo a message", echo_schema());
    let config = ConfigBuilder::new()
        .with_http_backend("alpha")
        .with_tracking_capacity(3)
        .build();
    let server = TestServer::start(config, upstream).await.unwrap();

    for i in 0..5 {
        server
            .post_json(
                "/mcp/tools/call",
                &json!({ "name": "alpha_echo", "arguments": { "msg": format!("m{i}") } }),
            )
            .await;
    }

    let (_, all) = server.get_json("/api/requests").await;
    let all = all["requests"].as_array().unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0]["arguments"]["msg"], "m4");
    assert_eq!(all[2]["arguments"]["msg"], "m2");

    let (_, limited) = server.get_json("/api/requests?limit=1&server=alpha").await;
    assert_eq!(limited["requests"].as_array().unwrap().len(), 1);
}

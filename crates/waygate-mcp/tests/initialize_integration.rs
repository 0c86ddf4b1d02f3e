//! MCP Endpoint Integration
//!
//! End-to-end coverage of the protocol surface: initialize negotiation,
//! queued dispatch with stream delivery, batch semantics per version, verb
//! dispatch, and the discovery 401.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use waygate_mcp::config::WaygateConfig;
use waygate_mcp::registry::{RequestContext, ToolDefinition};
use waygate_mcp::server::McpServer;
use waygate_mcp::storage::{ContextRecord, MemoryStorage, Storage, TokenRecord};

const TENANT: &str = "550e8400-e29b-41d4-a716-446655440000";
const BEARER: &str = "test-access-token";

struct TestServer {
    router: Router,
    storage: Arc<MemoryStorage>,
    #[allow(dead_code)]
    server: McpServer,
}

async fn test_server() -> TestServer {
    let mut config = WaygateConfig::default();
    config.base_url = Some("https://srv".to_string());
    config.test_mode = true;

    let storage = Arc::new(MemoryStorage::new());
    storage.insert_context(ContextRecord {
        context_id: TENANT.to_string(),
        context_type: "agency".to_string(),
        name: "Test Agency".to_string(),
        active: true,
    });
    storage
        .store_access_token(TokenRecord {
            access_token: BEARER.to_string(),
            refresh_token: None,
            client_id: "test-client".to_string(),
            scope: Some("mcp:read mcp:write".to_string()),
            expires_at: Utc::now() + Duration::seconds(3600),
            revoked: false,
            user_id: Some("user-1".to_string()),
            tenant_id: Some(TENANT.to_string()),
            resource: Some(format!("https://srv/mcp/{TENANT}")),
            aud: vec![format!("https://srv/mcp/{TENANT}")],
        })
        .await
        .unwrap();

    let server = McpServer::builder(config)
        .storage(Arc::clone(&storage) as Arc<dyn Storage>)
        .build();
    server
        .tools()
        .register(
            ToolDefinition {
                name: "echo".to_string(),
                description: Some("Echo arguments".to_string()),
                input_schema: json!({"type": "object"}),
                annotations: None,
            },
            Arc::new(|params: &Value, _: &RequestContext| Ok(params.clone())),
        )
        .unwrap();

    TestServer {
        router: server.router(),
        storage,
        server,
    }
}

fn post_json(path: &str, body: &Value, extra: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::HOST, "srv");
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn initialize(ts: &TestServer, version: &str) -> String {
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {"protocolVersion": version},
            "id": 1,
        }),
        &[],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("Mcp-Session-Id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = body_json(response).await;
    assert_eq!(body["result"]["protocolVersion"], version);
    session_id
}

#[tokio::test]
async fn test_initialize_happy_path() {
    let ts = test_server().await;
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05"},
            "id": 1,
        }),
        &[("Authorization", "Bearer test-access-token")],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let session_id = response
        .headers()
        .get("Mcp-Session-Id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let (prefix, suffix) = session_id.split_once('_').unwrap();
    assert_eq!(prefix, "2024-11-05");
    assert_eq!(suffix.len(), 32);
    assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()));

    let body = body_json(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["capabilities"]["tools"]["listChanged"], true);
}

#[tokio::test]
async fn test_initialize_negotiates_down() {
    let ts = test_server().await;
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {"protocolVersion": "2026-01-01"},
            "id": 1,
        }),
        &[],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
}

#[tokio::test]
async fn test_initialize_without_version_fails() {
    let ts = test_server().await;
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &json!({"jsonrpc": "2.0", "method": "initialize", "id": 1}),
        &[],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn test_tools_list_then_stream_delivery() {
    let ts = test_server().await;
    let session_id = initialize(&ts, "2024-11-05").await;

    // Queued POST
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}),
        &[
            ("Authorization", "Bearer test-access-token"),
            ("Mcp-Session-Id", session_id.as_str()),
        ],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");

    // Stream delivery (test_mode drains once and closes)
    let request = Request::builder()
        .method("GET")
        .uri(format!("/mcp/{TENANT}/{session_id}"))
        .header(header::HOST, "srv")
        .header("Authorization", "Bearer test-access-token")
        .body(Body::empty())
        .unwrap();
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes).to_string();
    // SSE transport announces the POST endpoint first
    assert!(text.contains("event: endpoint\n"));
    assert!(text.contains(&format!("data: https://srv/mcp/{TENANT}/{session_id}")));
    // Then the queued result as a message event
    let frame = text
        .split("\n\n")
        .find(|frame| frame.starts_with("event: message"))
        .unwrap();
    let payload: Value = serde_json::from_str(frame.strip_prefix("event: message\ndata: ").unwrap())
        .unwrap();
    assert_eq!(payload["id"], 2);
    assert_eq!(payload["result"]["tools"][0]["name"], "echo");

    // At-most-once: nothing left for a second drain
    assert!(ts.storage.get_messages(&session_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_per_version() {
    let ts = test_server().await;
    let batch = json!([
        {"jsonrpc": "2.0", "method": "ping", "id": 10},
        {"jsonrpc": "2.0", "method": "ping", "id": 11},
    ]);

    // Refused on 2025-06-18
    let session = initialize(&ts, "2025-06-18").await;
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &batch,
        &[
            ("Authorization", "Bearer test-access-token"),
            ("Mcp-Session-Id", session.as_str()),
            ("MCP-Protocol-Version", "2025-06-18"),
        ],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);

    // Accepted on 2025-03-26 with inline per-element responses
    let session = initialize(&ts, "2025-03-26").await;
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &batch,
        &[
            ("Authorization", "Bearer test-access-token"),
            ("Mcp-Session-Id", session.as_str()),
        ],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["result"]["status"], "pong");
    assert_eq!(items[1]["id"], 11);
}

#[tokio::test]
async fn test_method_not_allowed() {
    let ts = test_server().await;
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/mcp/{TENANT}"))
        .header(header::HOST, "srv")
        .header("Authorization", "Bearer test-access-token")
        .body(Body::empty())
        .unwrap();
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32002);
}

#[tokio::test]
async fn test_malformed_json_is_parse_error() {
    let ts = test_server().await;
    let request = Request::builder()
        .method("POST")
        .uri(format!("/mcp/{TENANT}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::HOST, "srv")
        .header("Authorization", "Bearer test-access-token")
        .body(Body::from("{not json"))
        .unwrap();
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_missing_bearer_gets_discovery_401() {
    let ts = test_server().await;
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}),
        &[],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let www = response
        .headers()
        .get("WWW-Authenticate")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(www.starts_with(r#"Bearer realm="MCP Server""#));
    assert!(www.contains("resource_metadata="));

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    let oauth = &body["error"]["data"]["oauth"];
    assert_eq!(oauth["authorization_endpoint"], "https://srv/oauth/authorize");
    assert_eq!(oauth["token_endpoint"], "https://srv/oauth/token");
    assert_eq!(oauth["resource"], format!("https://srv/mcp/{TENANT}"));
}

#[tokio::test]
async fn test_unknown_context_rejected() {
    let ts = test_server().await;
    let request = post_json(
        "/mcp/00000000-0000-0000-0000-000000000000",
        &json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}),
        &[("Authorization", "Bearer test-access-token")],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_get_without_session_fails() {
    let ts = test_server().await;
    let request = Request::builder()
        .method("GET")
        .uri(format!("/mcp/{TENANT}"))
        .header(header::HOST, "srv")
        .header("Authorization", "Bearer test-access-token")
        .body(Body::empty())
        .unwrap();
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32001);
}

#[tokio::test]
async fn test_streamable_transport_stamps_version_header() {
    let ts = test_server().await;
    let session = initialize(&ts, "2025-06-18").await;
    let request = Request::builder()
        .method("GET")
        .uri(format!("/mcp/{TENANT}/{session}"))
        .header(header::HOST, "srv")
        .header("Authorization", "Bearer test-access-token")
        .header("MCP-Protocol-Version", "2025-06-18")
        .body(Body::empty())
        .unwrap();
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("MCP-Protocol-Version").unwrap(),
        "2025-06-18"
    );
}

#[tokio::test]
async fn test_version_header_mismatch_rejected() {
    let ts = test_server().await;
    let session = initialize(&ts, "2025-06-18").await;
    let request = post_json(
        &format!("/mcp/{TENANT}"),
        &json!({"jsonrpc": "2.0", "method": "ping", "id": 2}),
        &[
            ("Authorization", "Bearer test-access-token"),
            ("Mcp-Session-Id", session.as_str()),
            ("MCP-Protocol-Version", "2025-03-26"),
        ],
    );
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn test_dns_rebinding_guard() {
    let ts = test_server().await;
    let request = Request::builder()
        .method("POST")
        .uri(format!("/mcp/{TENANT}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::HOST, "localhost:3000")
        .header(header::ORIGIN, "https://evil.example.com")
        .header("Authorization", "Bearer test-access-token")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "method": "ping", "id": 1}).to_string(),
        ))
        .unwrap();
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn test_health_endpoint() {
    let ts = test_server().await;
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header(header::HOST, "srv")
        .body(Body::empty())
        .unwrap();
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_options_preflight() {
    let ts = test_server().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri(format!("/mcp/{TENANT}"))
        .header(header::HOST, "srv")
        .body(Body::empty())
        .unwrap();
    let response = ts.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

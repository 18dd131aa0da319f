//! End-to-end tests of the HTTP routes, driven through the axum router.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use mcp_core::registry::{FilterPattern, ToolFilter};
use mcp_core::transport::{ResponseMode, TransportOptions};
use mcp_server::config::SessionConfig;
use mcp_server::ServerConfig;
use serde_json::{json, Value};
use tokio::time::timeout;

fn sse_get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("accept", "text/event-stream")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_wrong_content_type_is_415() {
    let (server, _) = server(ServerConfig::default());
    let request = Request::builder()
        .method("POST")
        .uri("/mcp/messages")
        .header("content-type", "text/plain")
        .body(Body::from(initialize(1).to_string()))
        .unwrap();

    let response = send(&server.router(), request).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_json(response).await["error"]["code"], -32000);
}

#[tokio::test]
async fn test_unacceptable_accept_is_406() {
    let (server, _) = server(ServerConfig::default());
    let request = Request::builder()
        .method("POST")
        .uri("/mcp/messages")
        .header("content-type", "application/json")
        .header("accept", "text/html")
        .body(Body::from(initialize(1).to_string()))
        .unwrap();

    let response = send(&server.router(), request).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(body_json(response).await["error"]["code"], -32000);
}

#[tokio::test]
async fn test_missing_accept_is_406() {
    let (server, _) = server(ServerConfig::default());
    let request = Request::builder()
        .method("POST")
        .uri("/mcp/messages")
        .header("content-type", "application/json")
        .body(Body::from(initialize(1).to_string()))
        .unwrap();

    let response = send(&server.router(), request).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    assert!(server.sessions().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
    let (server, _) = server(ServerConfig::default());
    let request = Request::builder()
        .method("POST")
        .uri("/mcp/messages")
        .header("content-type", "application/json")
        .header("accept", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = send(&server.router(), request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32700);
}

#[tokio::test]
async fn test_initialize_assigns_session() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();

    let response = send(&router, post("/mcp/messages", &initialize(1), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = session_id(&response);
    let body = body_json(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(body["result"]["capabilities"]["tools"]["listChanged"], false);

    assert_eq!(server.sessions().len(), 1);
    assert!(server.sessions().session(&session).unwrap().is_initialized());
}

#[tokio::test]
async fn test_stream_mode_replies_as_events() {
    let (server, _) = server(ServerConfig {
        transport: TransportOptions {
            response_mode: ResponseMode::Stream,
            ..Default::default()
        },
        ..Default::default()
    });
    let router = server.router();

    let response = send(&router, post("/mcp/messages", &initialize(3), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("mcp-session-id"));

    let mut events = response.into_body().into_data_stream().eventsource();
    let reply = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.event, "message");
    assert_eq!(serde_json::from_str::<Value>(&reply.data).unwrap()["id"], 3);
}

#[tokio::test]
async fn test_repeated_initialize_is_rejected() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();
    let session = open_session(&router).await;

    let response = send(&router, post("/mcp/messages", &initialize(2), Some(&session))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32600);
}

#[tokio::test]
async fn test_session_header_required() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();

    let missing = send(&router, post("/mcp/messages", &request(1, "tools/list", json!({})), None)).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(missing).await["error"]["code"], -32000);

    let unknown = send(
        &router,
        post("/mcp/messages", &request(1, "tools/list", json!({})), Some("no-such-session")),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(unknown).await["error"]["code"], -32001);
}

#[tokio::test]
async fn test_sessions_disabled_is_stateless() {
    let (server, _) = server(ServerConfig {
        sessions: SessionConfig {
            enabled: false,
            max_sessions: None,
        },
        ..Default::default()
    });
    let router = server.router();

    let init = send(&router, post("/mcp/messages", &initialize(1), None)).await;
    assert_eq!(init.status(), StatusCode::OK);
    assert!(init.headers().get("mcp-session-id").is_none());

    let list = send(&router, post("/mcp/messages", &request(2, "tools/list", json!({})), None)).await;
    assert_eq!(list.status(), StatusCode::OK);
    assert_eq!(body_json(list).await["result"]["tools"].as_array().unwrap().len(), 3);
    assert!(server.sessions().is_empty());
}

#[tokio::test]
async fn test_include_filter_applies_to_list() {
    let (server, _) = server(ServerConfig {
        tools: ToolFilter {
            include: vec![FilterPattern::StartsWith("drive_".to_string())],
            exclude: Vec::new(),
        },
        ..Default::default()
    });
    let router = server.router();
    let session = open_session(&router).await;

    let response = send(
        &router,
        post("/mcp/messages", &request(2, "tools/list", json!({})), Some(&session)),
    )
    .await;
    let body = body_json(response).await;
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["drive_list", "drive_upload"]);
}

#[tokio::test]
async fn test_call_unknown_tool_skips_backend() {
    let (server, backend) = server(ServerConfig::default());
    let router = server.router();
    let session = open_session(&router).await;

    send(
        &router,
        post("/mcp/messages", &request(2, "tools/list", json!({})), Some(&session)),
    )
    .await;
    let response = send(
        &router,
        post(
            "/mcp/messages",
            &request(3, "tools/call", json!({"name": "drive_delete", "arguments": {}})),
            Some(&session),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], 3);
    assert_eq!(body["result"]["isError"], true);
    assert_eq!(backend.invocation_count(), 0);
}

#[tokio::test]
async fn test_call_reaches_backend() {
    let (server, backend) = server(ServerConfig::default());
    let router = server.router();
    let session = open_session(&router).await;

    let response = send(
        &router,
        post(
            "/mcp/messages",
            &request(4, "tools/call", json!({"name": "drive_list", "arguments": {"path": "/docs"}})),
            Some(&session),
        ),
    )
    .await;

    let body = body_json(response).await;
    assert!(body["result"].get("isError").is_none());
    assert_eq!(body["result"]["structuredContent"]["operation"], "drive.list");
    assert_eq!(
        backend.invocations.lock().unwrap()[0],
        ("drive.list".to_string(), json!({"path": "/docs"}))
    );
}

#[tokio::test]
async fn test_invalid_arguments_rejected_before_backend() {
    let (server, backend) = server(ServerConfig::default());
    let router = server.router();
    let session = open_session(&router).await;

    send(
        &router,
        post("/mcp/messages", &request(2, "tools/list", json!({})), Some(&session)),
    )
    .await;
    let response = send(
        &router,
        post(
            "/mcp/messages",
            &request(3, "tools/call", json!({"name": "drive_list", "arguments": {"path": 42}})),
            Some(&session),
        ),
    )
    .await;

    assert_eq!(body_json(response).await["result"]["isError"], true);
    assert_eq!(backend.invocation_count(), 0);
}

#[tokio::test]
async fn test_notifications_only_is_202() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();
    let session = open_session(&router).await;

    let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    let response = send(&router, post("/mcp/messages", &notification, Some(&session))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_batch_reply_keeps_order() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();
    let session = open_session(&router).await;

    let batch = json!([
        request(10, "ping", json!({})),
        {"jsonrpc": "2.0", "method": "notifications/initialized"},
        request(11, "tools/list", json!({}))
    ]);
    let response = send(&router, post("/mcp/messages", &batch, Some(&session))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let ids: Vec<&Value> = body.as_array().unwrap().iter().map(|reply| &reply["id"]).collect();
    assert_eq!(ids, vec![&json!(10), &json!(11)]);
}

#[tokio::test]
async fn test_unknown_method_is_32601() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();
    let session = open_session(&router).await;

    let response = send(
        &router,
        post("/mcp/messages", &request(5, "resources/list", json!({})), Some(&session)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["error"]["code"], -32601);
}

#[tokio::test]
async fn test_delete_closes_session() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();
    let session = open_session(&router).await;

    let delete = Request::builder()
        .method("DELETE")
        .uri("/mcp/messages")
        .header("mcp-session-id", &session)
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&router, delete).await.status(), StatusCode::OK);
    assert!(server.sessions().is_empty());

    let response = send(
        &router,
        post("/mcp/messages", &request(2, "ping", json!({})), Some(&session)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsupported_method_is_405() {
    let (server, _) = server(ServerConfig::default());
    let request = Request::builder()
        .method("PUT")
        .uri("/mcp/messages")
        .body(Body::empty())
        .unwrap();

    let response = send(&server.router(), request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["allow"], "GET, POST, DELETE");
    assert_eq!(body_json(response).await["error"]["code"], -32000);
}

#[tokio::test]
async fn test_session_limit_is_503() {
    let (server, _) = server(ServerConfig {
        sessions: SessionConfig {
            enabled: true,
            max_sessions: Some(1),
        },
        ..Default::default()
    });
    let router = server.router();
    open_session(&router).await;

    let response = send(&router, post("/mcp/messages", &initialize(2), None)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"]["code"], -32000);
}

#[tokio::test]
async fn test_base_path_prefixes_routes() {
    let (server, _) = server(ServerConfig {
        base_path: "/api".to_string(),
        ..Default::default()
    });
    let router = server.router();

    let prefixed = send(&router, post("/api/mcp/messages", &initialize(1), None)).await;
    assert_eq!(prefixed.status(), StatusCode::OK);

    let bare = send(&router, post("/mcp/messages", &initialize(1), None)).await;
    assert_eq!(bare.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sse_stream_announces_endpoint() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();

    let response = send(&router, sse_get("/mcp/sse")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let session = session_id(&response);

    let mut events = response.into_body().into_data_stream().eventsource();
    let endpoint = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(endpoint.event, "endpoint");
    assert_eq!(endpoint.data, format!("/mcp/messages?sessionId={session}"));

    let second = send(&router, sse_get(&format!("/mcp/sse?sessionId={session}"))).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let unknown = send(&router, sse_get("/mcp/sse?sessionId=missing")).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sse_side_channel_round_trip() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();

    let response = send(&router, sse_get("/mcp/sse")).await;
    let mut events = response.into_body().into_data_stream().eventsource();
    let endpoint = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .data;

    let accepted = send(&router, post(&endpoint, &initialize(7), None)).await;
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);

    let reply = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.event, "message");
    assert_eq!(reply.id, "1");
    let reply: Value = serde_json::from_str(&reply.data).unwrap();
    assert_eq!(reply["id"], 7);
    assert!(reply["result"]["serverInfo"]["name"].is_string());

    let again = send(&router, post(&endpoint, &initialize(8), None)).await;
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(again).await["error"]["code"], -32600);

    let ping = send(&router, post(&endpoint, &request(9, "ping", json!({})), None)).await;
    assert_eq!(ping.status(), StatusCode::ACCEPTED);
    let pong = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(pong.id, "2");
    assert_eq!(serde_json::from_str::<Value>(&pong.data).unwrap()["id"], 9);
}

#[tokio::test]
async fn test_sse_disconnect_removes_session() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();

    let response = send(&router, sse_get("/mcp/sse")).await;
    let session = session_id(&response);
    assert_eq!(server.sessions().len(), 1);

    drop(response);

    let side_channel = format!("/mcp/messages?sessionId={session}");
    let after = send(&router, post(&side_channel, &request(1, "ping", json!({})), None)).await;
    assert_eq!(after.status(), StatusCode::NOT_FOUND);
    assert!(server.sessions().is_empty());
}

#[tokio::test]
async fn test_side_channel_negotiates_accept() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();

    let response = send(&router, sse_get("/mcp/sse")).await;
    let mut events = response.into_body().into_data_stream().eventsource();
    let endpoint = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .data;

    let mut html = post(&endpoint, &request(1, "ping", json!({})), None);
    html.headers_mut().insert("accept", "text/html".parse().unwrap());
    let rejected = send(&router, html).await;
    assert_eq!(rejected.status(), StatusCode::NOT_ACCEPTABLE);
    assert_eq!(body_json(rejected).await["error"]["code"], -32000);

    let mut bare = post(&endpoint, &request(2, "ping", json!({})), None);
    bare.headers_mut().remove("accept");
    assert_eq!(send(&router, bare).await.status(), StatusCode::NOT_ACCEPTABLE);

    let accepted = send(&router, post(&endpoint, &request(3, "ping", json!({})), None)).await;
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    let pong = timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(serde_json::from_str::<Value>(&pong.data).unwrap()["id"], 3);
}

#[tokio::test]
async fn test_side_channel_requires_session() {
    let (server, _) = server(ServerConfig::default());
    let router = server.router();

    let empty = send(&router, post("/mcp/messages?sessionId=", &request(1, "ping", json!({})), None)).await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let unknown = send(
        &router,
        post("/mcp/messages?sessionId=nope", &request(1, "ping", json!({})), None),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(unknown).await["error"]["code"], -32001);
}

#[tokio::test]
async fn test_serve_and_shutdown() {
    let (server, _) = server(ServerConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sessions = server.sessions().clone();
    let handle = tokio::spawn(server.clone().serve(listener));

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/messages"))
        .header("accept", "application/json, text/event-stream")
        .json(&initialize(1))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("mcp-session-id"));
    assert_eq!(sessions.len(), 1);

    server.shutdown();
    timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(sessions.is_empty());
}

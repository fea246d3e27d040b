//! Legacy SSE binding: endpoint announcement, message posting, disconnects.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`

use nacos_mcp_router::session::SessionRouter;
use nacos_mcp_router::transport::{sse, SseBinding};

use super::test_helpers::{
    eventually, initialize_request, request, session_router, spawn_sse, SseReader, TestFactory,
};

fn app(sessions: &Arc<SessionRouter>) -> axum::Router {
    sse::router(Arc::new(SseBinding::new(Arc::clone(sessions))))
}

fn post_message(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn text_body(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn full_exchange_over_tcp() {
    let sessions = session_router(TestFactory::new());
    let server = spawn_sse(Arc::clone(&sessions)).await;
    let client = reqwest::Client::new();

    let stream = client
        .get(format!("{}/sse", server.base_url))
        .send()
        .await
        .expect("GET /sse");
    assert_eq!(stream.status(), 200);
    let mut events = SseReader::new(stream.bytes_stream());

    let endpoint = events.next_event().await;
    assert_eq!(endpoint.event, "endpoint");
    let session_id = endpoint
        .data
        .strip_prefix("/messages?sessionId=")
        .expect("endpoint path")
        .to_owned();
    assert!(sessions.table().contains(&session_id));

    let accepted = client
        .post(format!("{}{}", server.base_url, endpoint.data))
        .json(&initialize_request(1))
        .send()
        .await
        .expect("POST /messages");
    assert_eq!(accepted.status(), 202);
    assert_eq!(accepted.text().await.expect("body"), "Accepted");

    let reply = events.next_event().await;
    assert_eq!(reply.event, "message");
    let reply: Value = serde_json::from_str(&reply.data).expect("json reply");
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["method"], "initialize");

    server.shutdown().await.expect("clean shutdown");
    assert!(sessions.table().is_empty());
}

#[tokio::test]
async fn router_failure_is_reported_on_the_stream() {
    let sessions = session_router(TestFactory::new());
    let stream = app(&sessions)
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut events = SseReader::new(stream.into_body().into_data_stream());
    let endpoint = events.next_event().await;

    let response = app(&sessions)
        .oneshot(post_message(&endpoint.data, request(3, "fail").to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let reply: Value = serde_json::from_str(&events.next_event().await.data).unwrap();
    assert_eq!(reply["id"], 3);
    assert_eq!(reply["error"]["code"], -32603);
    assert_eq!(sessions.table().len(), 1);
}

#[tokio::test]
async fn mcp_path_is_an_alias_for_sse() {
    let sessions = session_router(TestFactory::new());
    let stream = app(&sessions)
        .oneshot(Request::get("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    let mut events = SseReader::new(stream.into_body().into_data_stream());
    assert_eq!(events.next_event().await.event, "endpoint");
    assert_eq!(sessions.table().len(), 1);
}

#[tokio::test]
async fn dropping_the_stream_terminates_the_session() {
    let factory = TestFactory::new();
    let probe = factory.probe();
    let sessions = session_router(factory);

    let stream = app(&sessions)
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut events = SseReader::new(stream.into_body().into_data_stream());
    let endpoint = events.next_event().await;
    assert_eq!(sessions.table().len(), 1);

    drop(events);
    assert!(sessions.table().is_empty(), "entry is removed synchronously on drop");
    assert!(eventually(|| probe.closed() == 1).await);

    let response = app(&sessions)
        .oneshot(post_message(&endpoint.data, request(1, "ping").to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_session_id_is_a_bad_request() {
    let sessions = session_router(TestFactory::new());
    let response = app(&sessions)
        .oneshot(post_message("/messages", request(1, "ping").to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(text_body(response).await, "Missing sessionId parameter");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let sessions = session_router(TestFactory::new());
    let response = app(&sessions)
        .oneshot(post_message(
            "/messages?sessionId=does-not-exist",
            request(1, "ping").to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(text_body(response).await, "Session not found");
}

#[tokio::test]
async fn invalid_message_is_a_bad_request() {
    let sessions = session_router(TestFactory::new());
    let stream = app(&sessions)
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut events = SseReader::new(stream.into_body().into_data_stream());
    let endpoint = events.next_event().await;

    let response = app(&sessions)
        .oneshot(post_message(&endpoint.data, "{not json".to_owned()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(text_body(response).await, "Invalid message");
    assert_eq!(sessions.table().len(), 1, "bad input does not end the session");
}

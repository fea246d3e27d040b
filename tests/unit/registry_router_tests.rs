//! Unit tests for the default registry-backed router.

use std::sync::Arc;

use serde_json::{json, Value};

use nacos_mcp_router::config::GlobalConfig;
use nacos_mcp_router::jsonrpc::{JsonRpcMessage, RequestId, INVALID_PARAMS, METHOD_NOT_FOUND};
use nacos_mcp_router::router::RegistryRouterFactory;
use nacos_mcp_router::session::{Session, TransportKind};

async fn session() -> Arc<Session> {
    let config = GlobalConfig::load_with(None, |key| {
        (key == "NACOS_SERVER_ADDR").then(|| "registry.test:8848".to_owned())
    })
    .expect("config");
    let factory = RegistryRouterFactory::new(config.router_config());
    Session::start("s".into(), TransportKind::Stdio, &factory)
        .await
        .expect("start")
}

async fn call(session: &Session, method: &str, params: Option<Value>) -> Value {
    let reply = session
        .handle(JsonRpcMessage::request(RequestId::Number(1), method, params))
        .await
        .expect("handled")
        .expect("reply");
    serde_json::to_value(reply).expect("encode")
}

#[tokio::test]
async fn initialize_advertises_tools_capability() {
    let session = session().await;
    let reply = call(&session, "initialize", Some(json!({}))).await;

    assert_eq!(reply["id"], 1);
    assert!(reply["result"]["capabilities"]["tools"].is_object());
    assert_eq!(reply["result"]["serverInfo"]["name"], "nacos-mcp-router");
    assert!(reply["result"]["instructions"]
        .as_str()
        .unwrap()
        .contains("registry.test:8848"));
}

#[tokio::test]
async fn ping_returns_an_empty_object() {
    let session = session().await;
    assert_eq!(call(&session, "ping", None).await["result"], json!({}));
}

#[tokio::test]
async fn tools_list_is_empty() {
    let session = session().await;
    let reply = call(&session, "tools/list", None).await;
    assert_eq!(reply["result"]["tools"], json!([]));
}

#[tokio::test]
async fn unknown_tool_is_invalid_params() {
    let session = session().await;
    let reply = call(&session, "tools/call", Some(json!({ "name": "search" }))).await;
    assert_eq!(reply["error"]["code"], INVALID_PARAMS);
    assert_eq!(reply["error"]["message"], "Unknown tool: search");
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let session = session().await;
    let reply = call(&session, "resources/list", None).await;
    assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
}

#[tokio::test]
async fn notifications_get_no_reply() {
    let session = session().await;
    let reply = session
        .handle(JsonRpcMessage::notification("notifications/initialized", None))
        .await
        .expect("handled");
    assert!(reply.is_none());
}

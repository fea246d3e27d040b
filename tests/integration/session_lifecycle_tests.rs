//! Session lifecycle through the session router: open, resume, terminate.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::json;

use nacos_mcp_router::jsonrpc::{JsonRpcMessage, RequestId};
use nacos_mcp_router::session::{Resolution, TransportKind};
use nacos_mcp_router::AppError;

use super::test_helpers::{session_router, TestFactory};

fn ping(id: i64) -> JsonRpcMessage {
    JsonRpcMessage::request(RequestId::Number(id), "ping", None)
}

#[tokio::test]
async fn concurrent_opens_produce_distinct_registered_sessions() {
    let sessions = session_router(TestFactory::new());

    let opened = join_all((0..64).map(|_| {
        let sessions = Arc::clone(&sessions);
        async move { sessions.open(TransportKind::Streamable).await }
    }))
    .await;

    let ids: HashSet<String> = opened
        .into_iter()
        .map(|session| session.expect("open").id().to_owned())
        .collect();
    assert_eq!(ids.len(), 64);
    assert_eq!(sessions.table().len(), 64);
    for id in &ids {
        assert_eq!(id.len(), 32, "session ids are 32 hex characters: {id}");
        assert!(sessions.table().contains(id));
    }
}

#[tokio::test]
async fn resumed_requests_reach_the_router_bound_at_creation() {
    let factory = TestFactory::new();
    let probe = factory.probe();
    let sessions = session_router(factory);

    let first = sessions.open(TransportKind::Streamable).await.expect("open");
    let second = sessions.open(TransportKind::Streamable).await.expect("open");

    for (n, id) in [first.id(), second.id(), first.id(), first.id()].into_iter().enumerate() {
        let Resolution::Resume(session) = sessions.resolve(Some(id), &ping(0)) else {
            panic!("live session must resume");
        };
        let reply = sessions
            .dispatch(&session, ping(i64::try_from(n).unwrap()))
            .await
            .expect("dispatch")
            .expect("reply");
        let JsonRpcMessage::Response(response) = reply else {
            panic!("expected a response");
        };
        let expected_router = usize::from(id == second.id());
        assert_eq!(response.result["router"], json!(expected_router));
    }

    let calls = probe.calls();
    assert_eq!(calls.len(), 4);
    for (router, session_id, _) in calls {
        let expected = if router == 0 { first.id() } else { second.id() };
        assert_eq!(session_id, expected);
    }
}

#[tokio::test]
async fn terminated_session_is_never_resolvable_again() {
    let factory = TestFactory::new();
    let probe = factory.probe();
    let sessions = session_router(factory);
    let session = sessions.open(TransportKind::Sse).await.expect("open");
    let id = session.id().to_owned();

    assert!(sessions.terminate(&id).await.expect("terminate"));
    assert!(session.is_closed());
    assert!(!sessions.table().contains(&id));
    assert!(matches!(
        sessions.lookup(Some(id.as_str())),
        Err(AppError::SessionNotFound(_))
    ));
    assert!(matches!(
        sessions.resolve(Some(id.as_str()), &ping(1)),
        Resolution::Reject(AppError::SessionNotFound(_))
    ));

    assert!(!sessions.terminate(&id).await.expect("second terminate"));
    assert_eq!(probe.closed(), 1, "router is closed exactly once");
}

#[tokio::test]
async fn handling_after_close_reports_session_not_found() {
    let sessions = session_router(TestFactory::new());
    let session = sessions.open(TransportKind::Streamable).await.expect("open");
    sessions.terminate(session.id()).await.expect("terminate");

    let err = sessions.dispatch(&session, ping(1)).await.expect_err("closed");
    assert!(matches!(err, AppError::SessionNotFound(_)));
}

#[tokio::test]
async fn transport_failure_closes_the_session() {
    let factory = TestFactory::new();
    let probe = factory.probe();
    let sessions = session_router(factory);
    let session = sessions.open(TransportKind::Streamable).await.expect("open");

    let drop_request = JsonRpcMessage::request(RequestId::Number(1), "drop", None);
    let err = sessions.dispatch(&session, drop_request).await.expect_err("drop");
    assert!(err.is_transport());
    assert!(sessions.table().is_empty());
    assert!(session.is_closed());
    assert_eq!(probe.closed(), 1);
}

#[tokio::test]
async fn router_failure_leaves_the_session_open() {
    let sessions = session_router(TestFactory::new());
    let session = sessions.open(TransportKind::Streamable).await.expect("open");

    let fail = JsonRpcMessage::request(RequestId::Number(1), "fail", None);
    let err = sessions.dispatch(&session, fail).await.expect_err("fail");
    assert!(matches!(err, AppError::Router(_)));
    assert!(sessions.table().contains(session.id()));
    assert!(!session.is_closed());
}

#[tokio::test]
async fn pushed_messages_reach_the_attached_stream() {
    let sessions = session_router(TestFactory::new());
    let session = sessions.open(TransportKind::Streamable).await.expect("open");
    let mut outbound = session.attach_stream().expect("first attach");
    assert!(session.attach_stream().is_none(), "only one stream at a time");

    let notify = JsonRpcMessage::request(RequestId::Number(7), "notify", None);
    sessions.dispatch(&session, notify).await.expect("dispatch");

    let pushed = outbound.recv().await.expect("pushed message");
    assert_eq!(pushed.method(), Some("notifications/message"));

    drop(outbound);
    assert!(session.attach_stream().is_some(), "stream can re-attach after detach");
}

#[tokio::test]
async fn push_after_close_is_a_transport_error() {
    let sessions = session_router(TestFactory::new());
    let session = sessions.open(TransportKind::Sse).await.expect("open");
    sessions.terminate(session.id()).await.expect("terminate");

    let err = session
        .push(JsonRpcMessage::notification("notifications/message", None))
        .expect_err("closed");
    assert!(err.is_transport());
}

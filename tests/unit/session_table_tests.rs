//! Unit tests for the session table.

use std::sync::Arc;

use chrono::{Duration, Utc};

use nacos_mcp_router::config::GlobalConfig;
use nacos_mcp_router::router::RegistryRouterFactory;
use nacos_mcp_router::session::{new_session_id, Session, SessionTable, TransportKind};
use nacos_mcp_router::AppError;

fn factory() -> RegistryRouterFactory {
    let config = GlobalConfig::load_with(None, |_| None).expect("default config");
    RegistryRouterFactory::new(config.router_config())
}

async fn session(id: &str) -> Arc<Session> {
    Session::start(id.to_owned(), TransportKind::Streamable, &factory())
        .await
        .expect("session starts")
}

#[tokio::test]
async fn put_then_get_returns_the_same_session() {
    let table = SessionTable::new();
    let s = session("a").await;
    table.put(Arc::clone(&s)).expect("put");

    let found = table.get("a").expect("registered");
    assert!(Arc::ptr_eq(&found, &s));
    assert!(table.contains("a"));
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn duplicate_put_is_rejected_and_keeps_the_original() {
    let table = SessionTable::new();
    let original = session("dup").await;
    let intruder = session("dup").await;
    table.put(Arc::clone(&original)).expect("first put");

    let err = table.put(intruder).expect_err("duplicate");
    assert!(matches!(err, AppError::DuplicateSession(ref id) if id == "dup"));
    assert!(Arc::ptr_eq(&table.get("dup").unwrap(), &original));
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn remove_is_idempotent() {
    let table = SessionTable::new();
    table.put(session("gone").await).expect("put");

    assert!(table.remove("gone").is_some());
    assert!(table.remove("gone").is_none());
    assert!(table.get("gone").is_none());
    assert!(table.is_empty());
}

#[tokio::test]
async fn snapshot_is_independent_of_later_changes() {
    let table = SessionTable::new();
    table.put(session("one").await).expect("put");
    table.put(session("two").await).expect("put");

    let snapshot = table.snapshot();
    table.remove("one");
    table.put(session("three").await).expect("put");

    let mut ids: Vec<&str> = snapshot.iter().map(|s| s.id()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["one", "two"]);

    let mut live = table.ids();
    live.sort();
    assert_eq!(live, ["three", "two"]);
}

#[tokio::test]
async fn for_each_may_remove_while_iterating() {
    let table = SessionTable::new();
    for id in ["a", "b", "c"] {
        table.put(session(id).await).expect("put");
    }

    let mut visited = 0;
    table.for_each(|s| {
        visited += 1;
        table.remove(s.id());
    });

    assert_eq!(visited, 3);
    assert!(table.is_empty());
}

#[tokio::test]
async fn idle_since_selects_by_last_activity() {
    let table = SessionTable::new();
    table.put(session("old").await).expect("put");

    assert!(table.idle_since(Utc::now() - Duration::hours(1)).is_empty());
    assert_eq!(table.idle_since(Utc::now() + Duration::seconds(1)), ["old"]);
}

#[test]
fn generated_ids_are_unique_hex() {
    let a = new_session_id();
    let b = new_session_id();
    assert_ne!(a, b);
    assert_eq!(a.len(), 32);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
}

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::Value;
use tempfile::tempdir;

use crate::session_state::ConnectionState;
use crate::test_support::build_test_store;

use super::super::build_router;
use super::*;

fn server(store: Store) -> TestServer {
    TestServer::new(build_router(Arc::new(store))).unwrap()
}

#[tokio::test]
async fn health_reports_ok_and_candidate_name() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    let srv = server(store);

    let response = srv.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["candidate"], "anonymous");
}

#[tokio::test]
async fn reconnect_without_token_is_bad_request() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    let srv = server(store);

    let response = srv.get("/reconnect").await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn reconnect_with_wrong_token_is_unauthorized() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    store.session_state.disconnect();
    let srv = server(store);

    let response = srv.get("/reconnect").add_query_param("token", "00".repeat(16)).await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn reconnect_while_active_is_conflict() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    assert_eq!(store.session_state.connection_state(), ConnectionState::Active);
    let token = store.session_state.reconnect_token();
    let srv = server(store);

    let response = srv.get("/reconnect").add_query_param("token", token).await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn reconnect_after_disconnect_with_valid_token_succeeds() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    let token = store.session_state.reconnect_token();
    store.session_state.disconnect();
    let srv = server(store);

    let response = srv.get("/reconnect").add_query_param("token", token).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["terminal"]["cols"].is_u64());
    assert!(body["terminal"]["buffer"].is_string());
}

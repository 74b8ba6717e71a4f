use std::time::Duration;

use tempfile::tempdir;

use crate::event_log::Severity;
use crate::test_support::build_test_store;

use super::*;

#[test]
fn parse_control_accepts_json_object_with_nonempty_type() {
    let value = parse_control(r#"{"type":"resize","cols":80,"rows":24}"#).unwrap();
    assert_eq!(value["type"], "resize");
}

#[test]
fn parse_control_rejects_plain_text() {
    assert!(parse_control("ls -la\r").is_none());
}

#[test]
fn parse_control_rejects_json_without_a_type_field() {
    assert!(parse_control(r#"{"cols":80,"rows":24}"#).is_none());
}

#[test]
fn parse_control_rejects_empty_type() {
    assert!(parse_control(r#"{"type":""}"#).is_none());
}

#[test]
fn session_ended_frame_matches_the_documented_shape() {
    let value: serde_json::Value = serde_json::from_str(SESSION_ENDED_FRAME).unwrap();
    assert_eq!(value["type"], "session_ended");
    assert_eq!(value["data"]["reason"], "shell_exited");
}

#[tokio::test]
async fn dispatch_resize_updates_session_state_size() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    dispatch_control(&store, serde_json::json!({"type": "resize", "cols": 132, "rows": 43})).await;
    assert_eq!(store.session_state.terminal_size(), (132, 43));
}

#[tokio::test]
async fn dispatch_malformed_resize_is_ignored_not_fatal() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    let before = store.session_state.terminal_size();

    dispatch_control(&store, serde_json::json!({"type": "resize", "cols": 132})).await;
    assert_eq!(store.session_state.terminal_size(), before);
}

#[tokio::test]
async fn dispatch_finish_raises_the_finish_latch() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    assert!(!store.finish_raised());
    dispatch_control(&store, serde_json::json!({"type": "finish", "timestamp": 12345})).await;
    assert!(store.finish_raised());
}

#[tokio::test]
async fn dispatch_anticheat_records_a_critical_event_via_detector_and_recorder() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    dispatch_control(
        &store,
        serde_json::json!({"type": "anticheat", "event": "paste_attempt", "chars": 40}),
    )
    .await;

    let events = store.detector.events().snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, Severity::Critical);
    assert_eq!(events[0].event_type, "paste_attempt");
}

#[tokio::test]
async fn dispatch_unrecognized_type_is_logged_and_ignored() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    dispatch_control(&store, serde_json::json!({"type": "mystery"})).await;
    assert!(!store.finish_raised());
    assert!(store.detector.events().is_empty());
}

#[tokio::test]
async fn handle_input_chunk_forwards_small_chunks_and_records_keystrokes() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    handle_input_chunk(&store, b"ls\r").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let keystrokes = std::fs::read_to_string(dir.path().join("keystrokes.log")).unwrap();
    assert!(keystrokes.contains("\"ls\\r\""));
}

#[tokio::test]
async fn handle_input_chunk_drops_oversized_chunks_without_recording() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    let big = vec![b'a'; 64];
    handle_input_chunk(&store, &big).await;

    let keystrokes = std::fs::read_to_string(dir.path().join("keystrokes.log")).unwrap();
    assert!(keystrokes.is_empty());
    assert!(store.detector.events().snapshot().iter().any(|e| e.event_type == "paste_blocked"));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boundary scenarios from `spec.md` §8, driven against the real recorder,
//! detector and PTY components the way `transport/ws.rs` wires them
//! together, without a live WebSocket client.

use std::time::{Duration, Instant};

use bytes::Bytes;
use proctor::detector::HARD_BLOCK_CHUNK_CHARS;
use proctor::event_log::AntiCheatEvent;
use proctor::test_support::build_test_store;
use tempfile::tempdir;

/// Mirrors the WS Bridge's inbound ordering (`spec.md` §5): hard-block on
/// chunk length is the bridge's own decision, independent of the detector's
/// advisory `check()`; only a non-blocked chunk is recorded and written.
async fn feed(store: &proctor::transport::Store, chunk: &[u8]) -> bool {
    let now = Instant::now();
    if chunk.len() > HARD_BLOCK_CHUNK_CHARS {
        store.detector.events().push(AntiCheatEvent::paste_blocked(now, chunk.len()));
        return false;
    }
    store.detector.check(now, chunk);
    store.recorder.record_keystrokes(chunk);
    store.pty.write(Bytes::copy_from_slice(chunk)).await.unwrap();
    true
}

async fn drain_output_until(
    rx: &mut tokio::sync::broadcast::Receiver<Bytes>,
    store: &proctor::transport::Store,
    needle: &str,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut acc = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(bytes)) => {
                store.recorder.record_terminal(&bytes);
                acc.extend_from_slice(&bytes);
                if String::from_utf8_lossy(&acc).contains(needle) {
                    return true;
                }
            }
            _ => return false,
        }
    }
}

#[tokio::test]
async fn scenario_happy_path_echoes_and_records_keystrokes() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    let mut output_rx = store.pty.subscribe();

    feed(&store, b"echo hi\r").await;

    let seen = drain_output_until(&mut output_rx, &store, "hi", Duration::from_secs(5)).await;
    assert!(seen, "shell never echoed expected output");

    store.recorder.flush();
    let keystrokes = std::fs::read_to_string(dir.path().join("keystrokes.log")).unwrap();
    assert!(keystrokes.lines().count() >= 1);

    let events = store.detector.events().snapshot();
    assert!(events.is_empty(), "happy path should not raise anticheat events");
}

#[tokio::test]
async fn scenario_paste_attempt_via_large_chunk_is_blocked() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    let chunk = "x".repeat(64);
    let allowed = feed(&store, chunk.as_bytes()).await;
    assert!(!allowed);

    store.recorder.record_websocket("inbound", "text", chunk.as_bytes());

    let events = store.detector.events().snapshot();
    let blocked = events.iter().find(|e| e.event_type == "paste_blocked");
    assert!(blocked.is_some(), "expected a paste_blocked event");

    store.recorder.flush();
    let keystrokes = std::fs::read_to_string(dir.path().join("keystrokes.log")).unwrap();
    assert!(!keystrokes.contains(&chunk), "blocked chunk must not reach keystrokes.log");
}

#[yare::parameterized(
    at_threshold = { 20, true },
    one_over_threshold = { 21, false },
    documented_paste_size = { 64, false },
)]
#[tokio::test]
async fn hard_block_threshold_is_exactly_twenty_chars(len: usize, expect_allowed: bool) {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    let allowed = feed(&store, &vec![b'x'; len]).await;
    assert_eq!(allowed, expect_allowed);
}

#[tokio::test]
async fn scenario_burst_across_chunks_is_advisory_not_blocking() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    let mut any_burst = false;
    for _ in 0..10 {
        let allowed = feed(&store, b"abcde").await;
        assert!(allowed, "5-char chunks must stay under the hard-block threshold");
        tokio::time::sleep(Duration::from_millis(8)).await;
    }

    let events = store.detector.events().snapshot();
    any_burst |= events.iter().any(|e| e.event_type == "paste_attempt");
    assert!(any_burst, "expected at least one paste_attempt (burst) event");

    let blocked_count = events.iter().filter(|e| e.event_type == "paste_blocked").count();
    assert_eq!(blocked_count, 0, "burst alone must never hard-block");
}

#[tokio::test]
async fn scenario_disconnect_then_reconnect_within_window_succeeds() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    let token = store.session_state.reconnect_token();

    store.session_state.update_terminal_buffer(&[b'a'; 256]);
    store.session_state.disconnect();

    assert!(!store.session_state.is_expired());
    let decoded = proctor::session_state::decode_token(&token).unwrap();
    assert!(store.session_state.can_reconnect(&decoded));

    let buffer = store.session_state.terminal_buffer();
    assert_eq!(buffer.len(), 256);
}

#[tokio::test]
async fn scenario_expired_reconnect_is_rejected_and_irreversible() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());
    let token = store.session_state.reconnect_token();
    let decoded = proctor::session_state::decode_token(&token).unwrap();

    store.session_state.disconnect();
    store.session_state.mark_expired();

    assert!(store.session_state.is_expired());
    assert!(!store.session_state.can_reconnect(&decoded));
    store.session_state.connect();
    assert_eq!(
        store.session_state.connection_state(),
        proctor::session_state::ConnectionState::Expired,
        "expired state must never revert, even after a connect() call"
    );
}

#[tokio::test]
async fn scenario_shell_exit_finalizes_a_completed_session() {
    let dir = tempdir().unwrap();
    let store = build_test_store(dir.path());

    store.pty.write(Bytes::from_static(b"exit\r")).await.unwrap();

    let mut output_rx = store.pty.subscribe();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match output_rx.recv().await {
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return true,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(closed, "broker output channel should close once the shell exits");

    store.recorder.close();
    store.manager.complete(store.detector.events()).unwrap();

    let metadata = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
    assert!(metadata.contains("\"completed\""));
    assert!(dir.path().join("commands.log").exists());
    assert!(dir.path().join("analysis.json").exists());
}

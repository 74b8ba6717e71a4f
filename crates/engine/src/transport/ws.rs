// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WS Bridge (`spec.md` §4.8): the `/ws` upgrade handler and the inbound /
//! outbound task pair for a single connection.
//!
//! Server→client frames are always text; `session_ended` is the only JSON
//! message the server originates (`spec.md` §6) — terminal output is sent
//! as plain lossy-UTF8 text, not base64-wrapped JSON.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::detector::HARD_BLOCK_CHUNK_CHARS;
use crate::event_log::AntiCheatEvent;

use super::state::Store;

const SESSION_ENDED_FRAME: &str = r#"{"type":"session_ended","data":{"reason":"shell_exited"}}"#;
const FINAL_FLUSH_DELAY: Duration = Duration::from_millis(500);

/// `/ws` upgrade handler.
pub async fn ws_handler(State(state): State<Arc<Store>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

async fn handle_connection(state: Arc<Store>, socket: WebSocket) {
    state.session_state.connect();
    let token = state.session_state.reconnect_token();
    info!(token_prefix = &token[..8.min(token.len())], "ws connected");

    let (ws_tx, ws_rx) = socket.split();
    let ws_tx = Arc::new(AsyncMutex::new(ws_tx));
    let done = state.shutdown.child_token();

    let outbound = tokio::spawn(run_outbound(state.clone(), ws_tx.clone(), done.clone()));
    let inbound = tokio::spawn(run_inbound(state.clone(), ws_rx, done));

    let _ = tokio::join!(outbound, inbound);
    state.session_state.disconnect();
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send_text(ws_tx: &Arc<AsyncMutex<WsSink>>, text: String) -> Result<(), ()> {
    let mut tx = ws_tx.lock().await;
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// PTY → client. Reads PTY output off the broker's broadcast channel,
/// records it, updates the rolling buffer and forwards it as a text frame.
async fn run_outbound(state: Arc<Store>, ws_tx: Arc<AsyncMutex<WsSink>>, done: CancellationToken) {
    let mut output_rx = state.pty.subscribe();

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            chunk = output_rx.recv() => {
                match chunk {
                    Ok(bytes) => {
                        state.recorder.record_terminal(&bytes);
                        state.session_state.update_terminal_buffer(&bytes);
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        if send_text(&ws_tx, text).await.is_err() {
                            done.cancel();
                            break;
                        }
                    }
                    // A slow client missed some output; it still sees the
                    // live tail and the rolling buffer covers reconnection.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = send_text(&ws_tx, SESSION_ENDED_FRAME.to_owned()).await;
                        tokio::time::sleep(FINAL_FLUSH_DELAY).await;
                        state.raise_finish();
                        done.cancel();
                        break;
                    }
                }
            }
        }
    }
}

/// Client → PTY. Reads framed messages, records each to `websocket.log`,
/// dispatches recognized control objects and runs everything else through
/// the detector before forwarding to the broker.
async fn run_inbound(state: Arc<Store>, mut ws_rx: SplitStream<WebSocket>, done: CancellationToken) {
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.recorder.record_websocket("inbound", "text", text.as_bytes());
                        match parse_control(&text) {
                            Some(control) => dispatch_control(&state, control).await,
                            None => handle_input_chunk(&state, text.as_bytes()).await,
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        state.recorder.record_websocket("inbound", "binary", &data);
                        handle_input_chunk(&state, &data).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        done.cancel();
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "ws read error");
                        done.cancel();
                        break;
                    }
                }
            }
        }
    }
}

/// Recognize a text frame as a control message: valid JSON object with a
/// non-empty string `type` field (`spec.md` §6).
fn parse_control(text: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let ty = value.get("type")?.as_str()?;
    if ty.is_empty() {
        return None;
    }
    Some(value)
}

/// Dispatch a recognized control message (`spec.md` §4.8 table). Malformed
/// or unrecognized control objects are logged and ignored, never panicked on.
async fn dispatch_control(state: &Store, value: serde_json::Value) {
    let ty = value.get("type").and_then(|v| v.as_str()).unwrap_or_default();
    match ty {
        "resize" => {
            let cols = value.get("cols").and_then(|v| v.as_u64());
            let rows = value.get("rows").and_then(|v| v.as_u64());
            match (cols, rows) {
                (Some(cols), Some(rows)) => {
                    let (cols, rows) = (cols as u16, rows as u16);
                    state.session_state.update_terminal_size(cols, rows);
                    if let Err(e) = state.pty.resize(cols, rows).await {
                        warn!(error = %e, "pty resize failed");
                    }
                }
                _ => warn!(?value, "malformed resize control message"),
            }
        }
        "finish" => {
            state.raise_finish();
        }
        "anticheat" => {
            let event_type = value.get("event").and_then(|v| v.as_str()).unwrap_or("unknown").to_owned();
            let now = Instant::now();
            state.detector.record_client_report(now, &event_type, value.clone());
            if let Some(event) = state.detector.events().snapshot().last() {
                state.recorder.record_event(event);
            }
        }
        other => warn!(type = other, "unrecognized control message type"),
    }
}

/// A raw input chunk: hard-block on chunk length (bridge's own decision,
/// `spec.md` §4.6/P9) → (blocked) log `paste_blocked`, drop; (allowed)
/// detector check for advisory stats → keystroke record → broker write
/// (`spec.md` §5 ordering).
async fn handle_input_chunk(state: &Store, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    let now = Instant::now();
    if data.len() > HARD_BLOCK_CHUNK_CHARS {
        state.detector.events().push(AntiCheatEvent::paste_blocked(now, data.len()));
        return;
    }
    state.detector.check(now, data);
    state.recorder.record_keystrokes(data);
    if let Err(e) = state.pty.write(Bytes::copy_from_slice(data)).await {
        warn!(error = %e, "pty write failed");
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state: reconnect token, connection lifecycle and the rolling
//! terminal-output buffer used to replay recent output on reconnect
//! (`spec.md` §4.5).

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::RngCore;

/// Connection lifecycle. `Active` and `Disconnected` may move back and
/// forth; once a session reaches `Expired` there is no path back — a shell
/// is never restarted after the reconnect window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Disconnected,
    Expired,
}

/// Bounded, most-recent-wins ring of terminal output bytes, replayed to a
/// client that reconnects within the window.
struct RollingBuffer {
    cap: usize,
    data: std::collections::VecDeque<u8>,
}

impl RollingBuffer {
    fn new(cap: usize) -> Self {
        Self { cap, data: std::collections::VecDeque::with_capacity(cap.min(8192)) }
    }

    fn push(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.cap {
            self.data.clear();
            self.data.extend(&bytes[bytes.len() - self.cap..]);
            return;
        }
        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.cap);
        for _ in 0..overflow {
            self.data.pop_front();
        }
        self.data.extend(bytes);
    }

    fn snapshot(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }
}

struct Inner {
    state: ConnectionState,
    token: [u8; 16],
    token_created_at: Instant,
    connect_count: u32,
    disconnect_count: u32,
    last_connect_at: Option<Instant>,
    last_disconnect_at: Option<Instant>,
    buffer: RollingBuffer,
    cols: u16,
    rows: u16,
}

/// Shared, thread-safe state for one recorded session.
pub struct SessionState {
    reconnect_window: Duration,
    inner: Mutex<Inner>,
}

impl SessionState {
    pub fn new(reconnect_window: Duration, rolling_buffer_cap: usize, cols: u16, rows: u16) -> Self {
        let mut token = [0u8; 16];
        rand::rng().fill_bytes(&mut token);
        let inner = Inner {
            state: ConnectionState::Active,
            token,
            token_created_at: Instant::now(),
            connect_count: 1,
            disconnect_count: 0,
            last_connect_at: Some(Instant::now()),
            last_disconnect_at: None,
            buffer: RollingBuffer::new(rolling_buffer_cap),
            cols,
            rows,
        };
        Self { reconnect_window, inner: Mutex::new(inner) }
    }

    /// Hex-encoded reconnect token, safe to hand to the client.
    pub fn reconnect_token(&self) -> String {
        hex_encode(&self.inner.lock().token)
    }

    /// Mark the session connected. No-op if already expired.
    pub fn connect(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Expired {
            return;
        }
        inner.state = ConnectionState::Active;
        inner.connect_count += 1;
        inner.last_connect_at = Some(Instant::now());
    }

    /// Mark the session disconnected. No-op if already expired.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Expired {
            return;
        }
        inner.state = ConnectionState::Disconnected;
        inner.disconnect_count += 1;
        inner.last_disconnect_at = Some(Instant::now());
    }

    /// Whether the reconnect window has elapsed since disconnect (or since
    /// token creation, if never yet disconnected).
    pub fn is_expired(&self) -> bool {
        let inner = self.inner.lock();
        if inner.state == ConnectionState::Expired {
            return true;
        }
        match inner.last_disconnect_at {
            Some(at) => at.elapsed() > self.reconnect_window,
            None => false,
        }
    }

    /// Transition to `Expired`. Idempotent; irreversible.
    pub fn mark_expired(&self) {
        self.inner.lock().state = ConnectionState::Expired;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Validate a client-supplied token against the stored one using a
    /// constant-time comparison, and confirm the session is reconnectable
    /// (disconnected, not expired).
    pub fn can_reconnect(&self, candidate_token: &[u8; 16]) -> bool {
        if self.is_expired() {
            return false;
        }
        let inner = self.inner.lock();
        if inner.state != ConnectionState::Disconnected {
            return false;
        }
        constant_time_eq(&inner.token, candidate_token)
    }

    pub fn token_age(&self) -> Duration {
        self.inner.lock().token_created_at.elapsed()
    }

    pub fn update_terminal_buffer(&self, bytes: &[u8]) {
        self.inner.lock().buffer.push(bytes);
    }

    pub fn terminal_buffer(&self) -> Vec<u8> {
        self.inner.lock().buffer.snapshot()
    }

    pub fn update_terminal_size(&self, cols: u16, rows: u16) {
        let mut inner = self.inner.lock();
        inner.cols = cols;
        inner.rows = rows;
    }

    pub fn terminal_size(&self) -> (u16, u16) {
        let inner = self.inner.lock();
        (inner.cols, inner.rows)
    }

    pub fn connect_count(&self) -> u32 {
        self.inner.lock().connect_count
    }

    pub fn disconnect_count(&self) -> u32 {
        self.inner.lock().disconnect_count
    }
}

fn constant_time_eq(a: &[u8; 16], b: &[u8; 16]) -> bool {
    let mut diff = 0u8;
    for i in 0..16 {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Decode a hex-encoded reconnect token back into raw bytes.
pub fn decode_token(hex: &str) -> Option<[u8; 16]> {
    if hex.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).ok()?;
        out[i] = u8::from_str_radix(s, 16).ok()?;
    }
    Some(out)
}

#[cfg(test)]
#[path = "session_state_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recorder: five append-only audit streams for a single session
//! (`spec.md` §4.3, line grammars in §3).
//!
//! `keystrokes.log`, `terminal.log`, `timing.log`, `websocket.log` and
//! `events.log` are opened 0600 at session start, buffered, flushed on a
//! periodic ticker and on explicit request, and chmod'd 0400 at `close()`.
//! A single mutex orders all writes so a `timing.log` line is always
//! written before the `terminal.log` data it describes.

use std::fs::{File, OpenOptions, Permissions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::event_log::AntiCheatEvent;

/// The five named audit streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Keystrokes,
    Terminal,
    Timing,
    Websocket,
    Events,
}

impl Stream {
    fn file_name(&self) -> &'static str {
        match self {
            Self::Keystrokes => "keystrokes.log",
            Self::Terminal => "terminal.log",
            Self::Timing => "timing.log",
            Self::Websocket => "websocket.log",
            Self::Events => "events.log",
        }
    }
}

struct Writers {
    keystrokes: BufWriter<File>,
    terminal: BufWriter<File>,
    timing: BufWriter<File>,
    websocket: BufWriter<File>,
    events: BufWriter<File>,
    started_at: Instant,
    last_output_at: Option<Instant>,
    closed: bool,
    write_errors: Vec<String>,
}

/// The session recorder. Callers share it behind their own `Arc`.
pub struct Recorder {
    dir: PathBuf,
    writers: Mutex<Writers>,
    flush_interval: Duration,
    flush_notify: Notify,
}

fn open_stream(dir: &Path, stream: Stream) -> std::io::Result<BufWriter<File>> {
    let path = dir.join(stream.file_name());
    let file = OpenOptions::new().create(true).append(true).mode(0o600).open(&path)?;
    Ok(BufWriter::new(file))
}

impl Recorder {
    /// Open all five streams under `dir`, which must already exist with the
    /// correct (0700) permissions.
    pub fn open(dir: impl Into<PathBuf>, flush_interval: Duration) -> std::io::Result<Self> {
        let dir = dir.into();
        let writers = Writers {
            keystrokes: open_stream(&dir, Stream::Keystrokes)?,
            terminal: open_stream(&dir, Stream::Terminal)?,
            timing: open_stream(&dir, Stream::Timing)?,
            websocket: open_stream(&dir, Stream::Websocket)?,
            events: open_stream(&dir, Stream::Events)?,
            started_at: Instant::now(),
            last_output_at: None,
            closed: false,
            write_errors: Vec::new(),
        };
        Ok(Self { dir, writers: Mutex::new(writers), flush_interval, flush_notify: Notify::new() })
    }

    fn elapsed_ms(writers: &Writers) -> u64 {
        writers.started_at.elapsed().as_millis() as u64
    }

    fn append(&self, stream: Stream, writers: &mut Writers, line: &str) {
        let result = match stream {
            Stream::Keystrokes => writers.keystrokes.write_all(line.as_bytes()),
            Stream::Terminal => writers.terminal.write_all(line.as_bytes()),
            Stream::Timing => writers.timing.write_all(line.as_bytes()),
            Stream::Websocket => writers.websocket.write_all(line.as_bytes()),
            Stream::Events => writers.events.write_all(line.as_bytes()),
        };
        if let Err(e) = result {
            writers.write_errors.push(format!("{stream:?}: {e}"));
        }
    }

    /// `keystrokes.log`: `<ms_since_start> <quoted_bytes>`.
    pub fn record_keystrokes(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut writers = self.writers.lock();
        if writers.closed {
            return;
        }
        let ms = Self::elapsed_ms(&writers);
        let line = format!("{ms} {}\n", quote_bytes(data));
        self.append(Stream::Keystrokes, &mut writers, &line);
    }

    /// `terminal.log` is a raw concatenation of outbound bytes; each append
    /// is preceded by a `timing.log` line so the two stay positionally
    /// paired (P2) and the pairing survives a crash mid-write.
    pub fn record_terminal(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut writers = self.writers.lock();
        if writers.closed {
            return;
        }
        let now = Instant::now();
        let since_prev = writers.last_output_at.map(|t| now.duration_since(t)).unwrap_or_default();
        writers.last_output_at = Some(now);
        let timing_line = format!("{:.6} {}\n", since_prev.as_secs_f64(), data.len());
        self.append(Stream::Timing, &mut writers, &timing_line);

        let result = writers.terminal.write_all(data);
        if let Err(e) = result {
            writers.write_errors.push(format!("Terminal: {e}"));
        }
    }

    /// `websocket.log`: `<ms> <direction> <type> <len> <quoted_sample<=100B>`.
    pub fn record_websocket(&self, direction: &str, message_type: &str, payload: &[u8]) {
        let mut writers = self.writers.lock();
        if writers.closed {
            return;
        }
        let ms = Self::elapsed_ms(&writers);
        let sample = &payload[..payload.len().min(100)];
        let line = format!(
            "{ms} {direction} {message_type} {} {}\n",
            payload.len(),
            quote_bytes(sample)
        );
        self.append(Stream::Websocket, &mut writers, &line);
    }

    /// `events.log`: `<ms> <event_type> <json_payload>`.
    pub fn record_event(&self, event: &AntiCheatEvent) {
        let mut writers = self.writers.lock();
        if writers.closed {
            return;
        }
        let ms = Self::elapsed_ms(&writers);
        let payload = serde_json::json!({
            "severity": event.severity,
            "description": event.description,
            "payload": event.payload,
        });
        let line = format!("{ms} {} {payload}\n", event.event_type);
        self.append(Stream::Events, &mut writers, &line);
    }

    /// Flush all buffered writers to disk. A no-op (not an error) once closed.
    pub fn flush(&self) {
        let mut writers = self.writers.lock();
        if writers.closed {
            return;
        }
        Self::flush_all(&mut writers);
    }

    fn flush_all(writers: &mut Writers) {
        for result in [
            writers.keystrokes.flush(),
            writers.terminal.flush(),
            writers.timing.flush(),
            writers.websocket.flush(),
            writers.events.flush(),
        ] {
            if let Err(e) = result {
                writers.write_errors.push(format!("flush: {e}"));
            }
        }
    }

    /// Aggregated write/flush errors observed so far. Never fatal: a single
    /// bad write must not tear down the session.
    pub fn errors(&self) -> Vec<String> {
        self.writers.lock().write_errors.clone()
    }

    /// Idempotent shutdown (P10): final flush, then chmod each stream file
    /// 0400. chmod failures are logged but never fail the close.
    pub fn close(&self) {
        let mut writers = self.writers.lock();
        if writers.closed {
            return;
        }
        Self::flush_all(&mut writers);
        writers.closed = true;
        drop(writers);

        for stream in
            [Stream::Keystrokes, Stream::Terminal, Stream::Timing, Stream::Websocket, Stream::Events]
        {
            let path = self.dir.join(stream.file_name());
            if let Err(e) = std::fs::set_permissions(&path, Permissions::from_mode(0o400)) {
                warn!(file = %path.display(), error = %e, "failed to chmod audit log read-only");
            }
        }
    }

    /// Spawn a background task that periodically flushes until
    /// `stop_flush_ticker` is called.
    pub fn spawn_flush_ticker(self: std::sync::Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.flush_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.flush();
                    }
                    _ = self.flush_notify.notified() => {
                        break;
                    }
                }
            }
        })
    }

    /// Stop the flush ticker spawned via `spawn_flush_ticker`.
    pub fn stop_flush_ticker(&self) {
        self.flush_notify.notify_one();
    }
}

/// Render bytes as a double-quoted, printable-escaped string (`%q`-style):
/// printable ASCII passes through, everything else is escaped.
pub(crate) fn quote_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() + 2);
    out.push('"');
    for &b in data {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('"');
    out
}

/// Wall-clock timestamp helper for callers constructing records outside the
/// recorder's own monotonic clock.
pub fn unix_millis_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;

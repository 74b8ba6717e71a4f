// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Manager (`spec.md` §4.7): session identity, directory, metadata,
//! hashing and finalization.

pub mod analysis;
pub mod extract;

use std::collections::BTreeMap;
use std::fs::Permissions;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::event_log::EventLog;

/// Recording and derived files that live in a session directory.
const RECORDING_FILES: &[&str] =
    &["keystrokes.log", "terminal.log", "timing.log", "websocket.log", "events.log", "commands.log"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Completed,
    Interrupted,
    Error,
}

/// Persisted session metadata (`metadata.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub candidate_name: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub output_dir: PathBuf,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hashes: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

/// Owns the session directory and `metadata.json`, and drives finalization.
pub struct Manager {
    dir: PathBuf,
    started_at: SystemTime,
    inner: Mutex<Metadata>,
    finalized: Mutex<bool>,
}

fn unix_timestamp_string(t: SystemTime) -> String {
    t.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs().to_string()).unwrap_or_default()
}

/// Build a short opaque id. Not cryptographically meaningful; only needs to
/// disambiguate same-second session directories for the same candidate.
fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_owned()
}

/// Sanitize a candidate label for use as a directory-name component.
fn sanitize_candidate(candidate: &str) -> String {
    candidate
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl Manager {
    /// Create the session directory (mode 0700) under `base_dir` and write
    /// the initial `metadata.json` (mode 0600).
    pub fn create(
        base_dir: &Path,
        candidate_name: &str,
        reconnect_token: &str,
        reconnect_window_seconds: u64,
    ) -> anyhow::Result<Self> {
        let started_at = SystemTime::now();
        let now = chrono_free_datetime(started_at);
        let id = short_id();
        let dir_name = format!("{}_{now}_{id}", sanitize_candidate(candidate_name));
        let dir = base_dir.join(dir_name);

        std::fs::DirBuilder::new().recursive(true).mode(0o700).create(&dir)?;

        let metadata = Metadata {
            id,
            candidate_name: candidate_name.to_owned(),
            start_time: unix_timestamp_string(started_at),
            end_time: None,
            duration_seconds: None,
            output_dir: dir.clone(),
            status: Status::Active,
            file_hashes: None,
            error: None,
            metadata: serde_json::json!({
                "reconnect_token": reconnect_token,
                "reconnect_window_seconds": reconnect_window_seconds,
            }),
        };

        let manager = Self { dir, started_at, inner: Mutex::new(metadata), finalized: Mutex::new(false) };
        manager.persist_metadata(0o600)?;
        Ok(manager)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn id(&self) -> String {
        self.inner.lock().id.clone()
    }

    fn persist_metadata(&self, mode: u32) -> anyhow::Result<()> {
        let metadata = self.inner.lock().clone();
        let path = self.dir.join("metadata.json");
        let json = serde_json::to_vec_pretty(&metadata)?;
        std::fs::write(&path, json)?;
        std::fs::set_permissions(&path, Permissions::from_mode(mode))?;
        Ok(())
    }

    /// Finalize a successful session: extract commands, hash the present
    /// recording files, write final metadata, then demote permissions.
    /// Idempotent (P10): only the first call has effect.
    pub fn complete(&self, event_log: &EventLog) -> anyhow::Result<()> {
        let mut finalized = self.finalized.lock();
        if *finalized {
            return Ok(());
        }
        *finalized = true;
        drop(finalized);

        extract::extract_commands(&self.dir.join("keystrokes.log"), &self.dir.join("commands.log"))?;

        let report = analysis::analyze(&self.dir, event_log)?;
        let analysis_path = self.dir.join("analysis.json");
        std::fs::write(&analysis_path, serde_json::to_vec_pretty(&report)?)?;

        let hashes = hash_present_files(&self.dir);

        {
            let mut metadata = self.inner.lock();
            metadata.status = Status::Completed;
            let end = SystemTime::now();
            metadata.end_time = Some(unix_timestamp_string(end));
            metadata.duration_seconds =
                Some(end.duration_since(self.started_at).unwrap_or_default().as_secs_f64());
            metadata.file_hashes = Some(hashes);
        }
        // Metadata write failures are fatal (spec.md §4.7): an unrecoverable
        // disk condition at this point means the session cannot be trusted.
        self.persist_metadata(0o600)?;

        for name in [std::ffi::OsStr::new("metadata.json"), std::ffi::OsStr::new("analysis.json")] {
            demote_to_read_only(&self.dir.join(name));
        }
        demote_to_read_only(&self.dir.join("commands.log"));

        Ok(())
    }

    /// Finalize a session that ended in error.
    pub fn fail(&self, err: &anyhow::Error) -> anyhow::Result<()> {
        let mut finalized = self.finalized.lock();
        if *finalized {
            return Ok(());
        }
        *finalized = true;
        drop(finalized);

        {
            let mut metadata = self.inner.lock();
            metadata.status = Status::Error;
            metadata.error = Some(format!("{err:#}"));
            let end = SystemTime::now();
            metadata.end_time = Some(unix_timestamp_string(end));
            metadata.duration_seconds =
                Some(end.duration_since(self.started_at).unwrap_or_default().as_secs_f64());
        }
        self.persist_metadata(0o600)
    }
}

fn demote_to_read_only(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::set_permissions(path, Permissions::from_mode(0o400)) {
        warn!(file = %path.display(), error = %e, "failed to chmod session file read-only");
    }
}

/// SHA-256 each recording file that is actually present; missing files are
/// skipped, not an error (spec.md §4.7 failure semantics).
fn hash_present_files(dir: &Path) -> BTreeMap<String, String> {
    let mut hashes = BTreeMap::new();
    for name in RECORDING_FILES {
        let path = dir.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                hashes.insert((*name).to_owned(), hex_encode(&hasher.finalize()));
            }
            Err(_) => continue,
        }
    }
    hashes
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Format a `SystemTime` as `YYYY-MM-DD_HH-MM-SS` without pulling in a date
/// library, matching the directory-naming grammar in spec.md §4.7.
fn chrono_free_datetime(t: SystemTime) -> String {
    let secs = t.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let days = secs / 86_400;
    let time_of_day = secs % 86_400;
    let (year, month, day) = civil_from_days(days as i64);
    let hour = time_of_day / 3600;
    let minute = (time_of_day % 3600) / 60;
    let second = time_of_day % 60;
    format!("{year:04}-{month:02}-{day:02}_{hour:02}-{minute:02}-{second:02}")
}

/// Howard Hinnant's civil-from-days algorithm: days since the Unix epoch to
/// a (year, month, day) triple, proleptic Gregorian calendar.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

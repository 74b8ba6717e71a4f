// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test-only helpers for assembling a full [`crate::transport::state::Store`]
//! against a real (but tiny) spawned shell. Shared across test modules that
//! need more than one component wired together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::config::Config;
use crate::detector::Detector;
use crate::manager::Manager;
use crate::pty;
use crate::record::Recorder;
use crate::session_state::SessionState;
use crate::transport::state::Store;

/// Build a real `Store` backed by an actually-spawned `/bin/sh`, rooted at
/// `dir`. Callers own `dir`'s lifetime (a `tempdir()` in practice).
pub fn build_test_store(dir: &Path) -> Store {
    let config = Arc::new(Config::parse_from(["proctor"]));
    let recorder = Arc::new(Recorder::open(dir, Duration::from_secs(10)).unwrap());
    let detector = Arc::new(Detector::new(30));
    let session_state = Arc::new(SessionState::new(Duration::from_secs(300), 1024, 80, 24));
    let manager = Arc::new(Manager::create(dir, "candidate", "token", 300).unwrap());

    let (pty, _join) = pty::spawn_shell(pty::SpawnOptions {
        shell: "/bin/sh".to_owned(),
        cols: 80,
        rows: 24,
        network_isolated: false,
        home_dir: std::env::temp_dir(),
        user: "candidate".to_owned(),
    })
    .unwrap();

    Store::new(config, recorder, detector, session_state, pty, manager)
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::detector::Detector;
use crate::manager::Manager;
use crate::pty::PtyHandle;
use crate::record::Recorder;
use crate::session_state::SessionState;

/// Shared state handed to every axum handler.
pub struct Store {
    pub config: Arc<Config>,
    pub recorder: Arc<Recorder>,
    pub detector: Arc<Detector>,
    pub session_state: Arc<SessionState>,
    pub pty: PtyHandle,
    pub manager: Arc<Manager>,
    /// Parent of every per-connection done-token; cancelling this aborts all
    /// live WS Bridge connections promptly (spec.md §5 Cancellation).
    pub shutdown: CancellationToken,
    finish_notify: Notify,
    finish_raised: AtomicBool,
}

impl Store {
    pub fn new(
        config: Arc<Config>,
        recorder: Arc<Recorder>,
        detector: Arc<Detector>,
        session_state: Arc<SessionState>,
        pty: PtyHandle,
        manager: Arc<Manager>,
    ) -> Self {
        Self {
            config,
            recorder,
            detector,
            session_state,
            pty,
            manager,
            shutdown: CancellationToken::new(),
            finish_notify: Notify::new(),
            finish_raised: AtomicBool::new(false),
        }
    }

    /// Raise the one-shot finish latch. First caller wins; later calls are
    /// no-ops (spec.md §9 Design Notes).
    pub fn raise_finish(&self) {
        if !self.finish_raised.swap(true, Ordering::SeqCst) {
            self.finish_notify.notify_one();
        }
    }

    pub fn finish_raised(&self) -> bool {
        self.finish_raised.load(Ordering::SeqCst)
    }

    /// Wait until `raise_finish` has been (or is) called. `Notify::notify_one`
    /// stores a permit for a future waiter, so a call that races ahead of
    /// this method is never missed.
    pub async fn wait_finish(&self) {
        while !self.finish_raised() {
            self.finish_notify.notified().await;
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

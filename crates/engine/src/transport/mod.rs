// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP/WebSocket transport: router assembly for `/ws`, `/reconnect` and
//! `/health` (`spec.md` §6).

pub mod http;
pub mod state;
pub mod ws;

pub use state::Store;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

/// Build the axum `Router` serving the engine's full HTTP/WS surface.
pub fn build_router(state: Arc<Store>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/reconnect", get(http::reconnect))
        .route("/health", get(http::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/reconnect` and `/health` handlers (`spec.md` §6 External Interfaces).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use serde::Deserialize;

use crate::error::ErrorCode;
use crate::session_state::{decode_token, ConnectionState};

use super::state::Store;

#[derive(Debug, Deserialize)]
pub struct ReconnectQuery {
    token: Option<String>,
}

/// `GET /reconnect?token=<opaque>` (`spec.md` §6).
pub async fn reconnect(
    State(state): State<Arc<Store>>,
    Query(query): Query<ReconnectQuery>,
) -> impl IntoResponse {
    let token = match query.token.filter(|t| !t.is_empty()) {
        Some(t) => t,
        None => return ErrorCode::BadRequest.to_http_response("missing reconnect token").into_response(),
    };

    let decoded = match decode_token(&token) {
        Some(d) => d,
        None => {
            return ErrorCode::Unauthorized.to_http_response("invalid reconnect token").into_response()
        }
    };

    if state.session_state.connection_state() == ConnectionState::Active {
        return ErrorCode::ActiveSession.to_http_response("session is currently active").into_response();
    }

    if state.session_state.is_expired() {
        state.session_state.mark_expired();
        return ErrorCode::Expired.to_http_response("reconnect window has expired").into_response();
    }

    if !state.session_state.can_reconnect(&decoded) {
        return ErrorCode::Unauthorized.to_http_response("reconnect token mismatch").into_response();
    }

    let (cols, rows) = state.session_state.terminal_size();
    let buffer = state.session_state.terminal_buffer();
    Json(serde_json::json!({
        "status": "ok",
        "message": "Reconnection allowed",
        "terminal": {
            "cols": cols,
            "rows": rows,
            "buffer": base64::engine::general_purpose::STANDARD.encode(buffer),
        },
    }))
    .into_response()
}

/// `GET /health` (`spec.md` §6).
pub async fn health(State(state): State<Arc<Store>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "candidate": state.config.candidate_name,
    }))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

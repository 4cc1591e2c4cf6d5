//! API route handlers for the status server.

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::server::AppState;

/// Notifications listed on `/status`.
const RECENT_LIMIT: usize = 20;

/// Plain liveness text.
pub async fn index() -> &'static str {
    "Lamed notifier is running."
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lamed-notifier",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Dispatch counters, watched paths, and recent notifications.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let recent = match state.history.lock() {
        Ok(history) => history.recent(RECENT_LIMIT),
        Err(poisoned) => poisoned.into_inner().recent(RECENT_LIMIT),
    };
    let watched = state.gate.watched();
    let bootstrapped = watched.iter().filter(|node| node.bootstrapped).count();

    Json(serde_json::json!({
        "status": if bootstrapped == watched.len() { "ok" } else { "starting" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "stats": state.stats.snapshot(),
        "watched": watched,
        "recent": recent,
    }))
}

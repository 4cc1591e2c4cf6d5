//! HTTP server implementation using Axum.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{Router, routing::get};
use lamed_notify::{BootstrapGate, NotifyHistory, NotifyStats};
use tower_http::trace::TraceLayer;

/// Shared state for the status server.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub stats: Arc<NotifyStats>,
    pub history: Arc<Mutex<NotifyHistory>>,
    /// Watched paths and their bootstrap counters.
    pub gate: BootstrapGate,
}

impl AppState {
    pub fn new(stats: Arc<NotifyStats>, history: Arc<Mutex<NotifyHistory>>, gate: BootstrapGate) -> Self {
        Self {
            start_time: Instant::now(),
            stats,
            history,
            gate,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(super::routes::index))
        .route("/health", get(super::routes::health_check))
        .route("/status", get(super::routes::status))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serve until `shutdown` resolves.
pub async fn start<F>(state: AppState, host: &str, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Status server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

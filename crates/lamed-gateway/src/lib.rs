//! # Lamed Gateway
//! Liveness and status endpoint for the notifier process.
//!
//! Hosting platforms that expect a web service need an open port; this crate
//! answers on it and exposes dispatch counters, watched paths, and the most
//! recent notifications.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};

//! Notification dispatch: one delivery attempt per intent, failures swallowed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use lamed_core::NotificationIntent;
use serde::Serialize;
use serde_json::Value;

use crate::delivery::Delivery;
use crate::history::{NotificationRecord, NotifyHistory};

/// What happened to one dispatch call.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// No routing id: the recipient has no registered device.
    Skipped,
    /// The endpoint accepted the intent; carries its JSON response.
    Delivered(Value),
    /// Transport failure, timeout, bad status, or malformed response.
    Failed(String),
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Skipped => "skipped",
            DispatchOutcome::Delivered(_) => "delivered",
            DispatchOutcome::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Process-wide counters.
#[derive(Debug, Default)]
pub struct NotifyStats {
    delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    reminders: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub skipped: u64,
    pub failed: u64,
    pub reminders: u64,
}

impl NotifyStats {
    pub fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Skipped => &self.skipped,
            DispatchOutcome::Delivered(_) => &self.delivered,
            DispatchOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one reminder threshold marked as sent.
    pub fn record_reminder(&self) {
        self.reminders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reminders: self.reminders.load(Ordering::Relaxed),
        }
    }
}

/// Sends intents through a [`Delivery`] and records every outcome.
pub struct Dispatcher {
    delivery: Arc<dyn Delivery>,
    stats: Arc<NotifyStats>,
    history: Arc<Mutex<NotifyHistory>>,
}

impl Dispatcher {
    pub fn new(delivery: Arc<dyn Delivery>) -> Self {
        Self {
            delivery,
            stats: Arc::new(NotifyStats::default()),
            history: Arc::new(Mutex::new(NotifyHistory::new())),
        }
    }

    pub fn stats(&self) -> Arc<NotifyStats> {
        self.stats.clone()
    }

    pub fn history(&self) -> Arc<Mutex<NotifyHistory>> {
        self.history.clone()
    }

    /// Deliver `(routing_id, title, body)`. An absent routing id is a silent
    /// no-op; delivery errors are logged and returned as `Failed`, never raised.
    pub async fn dispatch(&self, routing_id: Option<&str>, title: &str, body: &str) -> DispatchOutcome {
        let outcome = match routing_id.map(str::trim).filter(|id| !id.is_empty()) {
            None => DispatchOutcome::Skipped,
            Some(routing_id) => {
                let intent = NotificationIntent {
                    routing_id: routing_id.to_string(),
                    title: title.to_string(),
                    body: body.to_string(),
                };
                match self.delivery.deliver(&intent).await {
                    Ok(result) => {
                        tracing::info!("✅ Notification sent to {routing_id}: {result}");
                        DispatchOutcome::Delivered(result)
                    }
                    Err(e) => {
                        tracing::error!("❌ Error sending notification to {routing_id}: {e}");
                        DispatchOutcome::Failed(e.to_string())
                    }
                }
            }
        };

        self.stats.record(&outcome);
        self.remember(routing_id, title, body, &outcome);
        outcome
    }

    fn remember(&self, routing_id: Option<&str>, title: &str, body: &str, outcome: &DispatchOutcome) {
        let detail = match outcome {
            DispatchOutcome::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        let record = NotificationRecord {
            title: title.to_string(),
            body: body.to_string(),
            routing_id: routing_id.map(str::to_string),
            status: outcome.label().to_string(),
            detail,
            timestamp: Utc::now(),
        };
        match self.history.lock() {
            Ok(mut history) => history.record(record),
            Err(poisoned) => poisoned.into_inner().record(record),
        }
    }
}

//! Bounded task pool: every unit of dispatch work runs on its own tokio
//! task behind an error boundary, and reports on an outcome channel.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use lamed_core::Result;
use tokio::sync::{Semaphore, mpsc};

/// How one task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(String),
    Failed(String),
    Panicked(String),
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub label: String,
    pub outcome: TaskOutcome,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    /// Submitted tasks that have not reported yet.
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    reports: mpsc::UnboundedSender<TaskReport>,
}

impl TaskPool {
    /// Create a pool running at most `max_concurrent` tasks at once, plus the
    /// receiving end of its outcome channel.
    pub fn new(max_concurrent: usize) -> (Self, mpsc::UnboundedReceiver<TaskReport>) {
        let max_concurrent = max_concurrent.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            pending: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            reports: tx,
        };
        (pool, rx)
    }

    /// Spawn `work`. Returns `false` once the pool has been shut down.
    pub fn submit<F, T>(&self, label: impl Into<String>, work: F) -> bool
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Display + Send + 'static,
    {
        let label = label.into();
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!("⚠️ Task pool closed, dropping '{label}'");
            return false;
        }

        let permits = self.permits.clone();
        let pending = self.pending.clone();
        let reports = self.reports.clone();
        pending.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                pending.fetch_sub(1, Ordering::AcqRel);
                return;
            };
            let started = Instant::now();
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(value)) => TaskOutcome::Completed(value.to_string()),
                Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
                Err(panic) => TaskOutcome::Panicked(panic_message(panic.as_ref())),
            };
            let _ = reports.send(TaskReport {
                label,
                outcome,
                elapsed: started.elapsed(),
            });
            pending.fetch_sub(1, Ordering::AcqRel);
        });
        true
    }

    /// Submitted tasks that are queued or running.
    pub fn in_flight(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop accepting work and wait up to `timeout` for queued and running
    /// tasks to finish. Returns whether the pool drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        let drained = async {
            while self.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Log reports until every pool handle is dropped.
pub async fn run_reporter(mut reports: mpsc::UnboundedReceiver<TaskReport>) {
    while let Some(report) = reports.recv().await {
        match &report.outcome {
            TaskOutcome::Completed(summary) => tracing::debug!(
                "📨 [{}] {summary} in {}ms",
                report.label,
                report.elapsed.as_millis()
            ),
            TaskOutcome::Failed(e) => tracing::warn!("⚠️ [{}] failed: {e}", report.label),
            TaskOutcome::Panicked(msg) => tracing::error!("❌ [{}] panicked: {msg}", report.label),
        }
    }
}

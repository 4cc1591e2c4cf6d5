//! Reminder Scheduler: periodic scan of `/appointments` that sends each
//! reminder window at most once per appointment.
//!
//! Every cycle re-reads the whole collection. For each appointment and each
//! threshold (in order) the scan fires when `0 < start - now <= window` and
//! the threshold's flag is unset, then persists the flag. The flag is
//! written *after* the notification attempts: a crash in between can repeat
//! a reminder on the next cycle, but never lose one.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use lamed_core::config::ReminderConfig;
use lamed_core::{MutationFeed, Notice, Result, record};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::dispatch::NotifyStats;
use crate::notifier::Notifier;

pub const APPOINTMENTS_PATH: &str = "/appointments";

/// Appointments processed concurrently within one scan.
const SCAN_CONCURRENCY: usize = 16;

/// One reminder window and the appointment flag recording that it was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderThreshold {
    pub minutes: u32,
    pub flag: String,
}

impl ReminderThreshold {
    pub fn new(minutes: u32, flag: &str) -> Self {
        Self {
            minutes,
            flag: flag.to_string(),
        }
    }

    pub fn window_millis(&self) -> i64 {
        i64::from(self.minutes) * 60_000
    }

    /// Whether an appointment starting in `time_until` ms falls in this window.
    pub fn is_due(&self, time_until: i64) -> bool {
        time_until > 0 && time_until <= self.window_millis()
    }

    pub fn from_config(config: &ReminderConfig) -> Vec<Self> {
        config
            .thresholds
            .iter()
            .map(|t| Self::new(t.minutes, &t.flag))
            .collect()
    }

    fn patient_notice(&self, patient_id: &str, doctor_name: Option<&str>) -> Notice {
        let body = match doctor_name {
            Some(doctor) => format!(
                "Your appointment with Dr. {doctor} starts within {} minutes.",
                self.minutes
            ),
            None => format!("Your appointment starts within {} minutes.", self.minutes),
        };
        Notice::new(patient_id, "⏰ Appointment Reminder", &body, &self.source())
    }

    fn doctor_notice(&self, doctor_id: &str, patient_name: Option<&str>) -> Notice {
        let body = format!(
            "Your session with {} starts within {} minutes.",
            patient_name.unwrap_or("your patient"),
            self.minutes
        );
        Notice::new(doctor_id, "⏰ Upcoming Session", &body, &self.source())
    }

    fn source(&self) -> String {
        format!("reminder-{}m", self.minutes)
    }
}

/// Result of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Appointments with a usable timestamp.
    pub scanned: usize,
    /// Appointments without one.
    pub skipped: usize,
    /// `(appointment key, flag)` for every threshold marked sent.
    pub fired: Vec<(String, String)>,
    /// Appointments with a failed flag write or a panic.
    pub errors: usize,
}

enum Processed {
    NoTimestamp,
    Scanned {
        fired: Vec<String>,
        /// Flags whose write failed; retried next cycle.
        unsaved: Vec<String>,
    },
}

pub struct ReminderScheduler {
    feed: Arc<dyn MutationFeed>,
    notifier: Arc<Notifier>,
    stats: Arc<NotifyStats>,
    thresholds: Vec<ReminderThreshold>,
}

impl ReminderScheduler {
    pub fn new(
        feed: Arc<dyn MutationFeed>,
        notifier: Arc<Notifier>,
        thresholds: Vec<ReminderThreshold>,
    ) -> Self {
        let stats = notifier.dispatcher().stats();
        Self {
            feed,
            notifier,
            stats,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &[ReminderThreshold] {
        &self.thresholds
    }

    /// Scan using the current wall clock.
    pub async fn scan(&self) -> ScanReport {
        self.scan_at(Utc::now().timestamp_millis()).await
    }

    /// Scan as if the current time were `now` (epoch millis).
    pub async fn scan_at(&self, now: i64) -> ScanReport {
        let appointments = match self.feed.read(APPOINTMENTS_PATH).await {
            Ok(appointments) => appointments,
            Err(e) => {
                tracing::warn!("⚠️ Reminder scan skipped, cannot read {APPOINTMENTS_PATH}: {e}");
                return ScanReport {
                    errors: 1,
                    ..ScanReport::default()
                };
            }
        };

        let results: Vec<(String, std::thread::Result<Processed>)> =
            futures::stream::iter(appointments)
                .map(|(key, appointment)| async move {
                    let outcome = AssertUnwindSafe(self.process(&key, &appointment, now))
                        .catch_unwind()
                        .await;
                    (key, outcome)
                })
                .buffer_unordered(SCAN_CONCURRENCY)
                .collect()
                .await;

        let mut report = ScanReport::default();
        for (key, outcome) in results {
            match outcome {
                Ok(Processed::NoTimestamp) => report.skipped += 1,
                Ok(Processed::Scanned { fired, unsaved }) => {
                    report.scanned += 1;
                    if !unsaved.is_empty() {
                        report.errors += 1;
                    }
                    report
                        .fired
                        .extend(fired.into_iter().map(|flag| (key.clone(), flag)));
                }
                Err(_) => {
                    report.errors += 1;
                    tracing::error!("❌ Reminder processing panicked for appointment {key}");
                }
            }
        }
        report.fired.sort();
        report
    }

    async fn process(&self, key: &str, appointment: &Value, now: i64) -> Processed {
        let Some(start) = record::millis(appointment, "timestamp") else {
            tracing::debug!("Appointment {key} has no timestamp, skipping");
            return Processed::NoTimestamp;
        };
        let time_until = start - now;

        let patient_id = record::text(appointment, "patientId");
        let doctor_id = record::text(appointment, "doctorId");
        let patient_name = record::text(appointment, "patientName");
        let doctor_name = record::text(appointment, "doctorName");

        let mut fired = Vec::new();
        let mut unsaved = Vec::new();
        for threshold in &self.thresholds {
            if !threshold.is_due(time_until) || record::flag(appointment, &threshold.flag) {
                continue;
            }

            tracing::info!(
                "🔔 Appointment {key} starts in {}s, sending {}-minute reminder",
                time_until / 1000,
                threshold.minutes
            );

            let patient = async {
                if let Some(id) = &patient_id {
                    let notice = threshold.patient_notice(id, doctor_name.as_deref());
                    self.notifier.notify_user(&notice).await;
                }
            };
            let doctor = async {
                if let Some(id) = &doctor_id {
                    let notice = threshold.doctor_notice(id, patient_name.as_deref());
                    self.notifier.notify_user(&notice).await;
                }
            };
            futures::join!(patient, doctor);

            match self.mark_sent(key, &threshold.flag).await {
                Ok(()) => {
                    self.stats.record_reminder();
                    fired.push(threshold.flag.clone());
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Could not mark {} on appointment {key}, will retry next scan: {e}",
                        threshold.flag
                    );
                    unsaved.push(threshold.flag.clone());
                }
            }
        }

        Processed::Scanned { fired, unsaved }
    }

    /// Partial update touching only the reminder flag.
    async fn mark_sent(&self, key: &str, flag: &str) -> Result<()> {
        let mut fields = Map::new();
        fields.insert(flag.to_string(), Value::Bool(true));
        self.feed
            .update(&format!("{APPOINTMENTS_PATH}/{key}"), fields)
            .await
    }

    /// Run a scan every `every` until `shutdown` flips to `true`. Scans never
    /// overlap; ticks missed during a long scan are skipped.
    pub async fn run(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Reminder scheduler started (every {}s, windows: {})",
            every.as_secs(),
            self.thresholds
                .iter()
                .map(|t| format!("{}m", t.minutes))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.scan().await;
                    if !report.fired.is_empty() || report.errors > 0 {
                        tracing::info!(
                            "📣 Reminder scan: {} scanned, {} fired, {} errors",
                            report.scanned,
                            report.fired.len(),
                            report.errors
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("⏹️ Reminder scheduler stopped");
                        return;
                    }
                }
            }
        }
    }
}

//! Domain routers: map created or changed records to notices.
//!
//! Routers are pure with respect to I/O. They read fields from the record,
//! decide who should hear about it, and hand [`Notice`]s back to the gate.
//! A record missing the identifier a router needs is skipped at debug level.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lamed_core::config::ListenerConfig;
use lamed_core::{Notice, record};
use serde_json::Value;

use crate::gate::{BootstrapGate, ChildCollection, ChildRouter};

pub const APPOINTMENTS: &str = "/appointments";
pub const PRESCRIPTIONS: &str = "/prescriptions";
pub const LAB_REQUESTS: &str = "/lab_requests";
pub const PATIENT_FILES: &str = "/patient_files";
pub const CHATS: &str = "/chats";
pub const PAYMENTS: &str = "/payments";

/// Register every domain router on `gate`.
pub fn register_all(gate: &BootstrapGate, config: &ListenerConfig) {
    gate.watch(APPOINTMENTS, Arc::new(AppointmentRouter));
    gate.watch(PRESCRIPTIONS, Arc::new(RecordRouter::flat(RecordKind::Prescription)));
    gate.watch(LAB_REQUESTS, Arc::new(RecordRouter::flat(RecordKind::LabResult)));
    gate.watch_nested(
        PATIENT_FILES,
        vec![
            ChildCollection::new(RecordKind::Prescription.segment(), |user: &str| {
                Arc::new(RecordRouter::scoped(RecordKind::Prescription, user)) as Arc<dyn ChildRouter>
            }),
            ChildCollection::new(RecordKind::LabResult.segment(), |user: &str| {
                Arc::new(RecordRouter::scoped(RecordKind::LabResult, user)) as Arc<dyn ChildRouter>
            }),
        ],
    );
    gate.watch_nested(
        CHATS,
        vec![ChildCollection::new("messages", |chat: &str| {
            Arc::new(ChatRouter::new(chat)) as Arc<dyn ChildRouter>
        })],
    );
    gate.watch(PAYMENTS, Arc::new(PaymentRouter::new(&config.support_contact)));
    tracing::info!("👂 Domain routers registered");
}

// ── Appointments ──────────────────────────────────────

/// New bookings: tell the doctor and the patient.
pub struct AppointmentRouter;

impl ChildRouter for AppointmentRouter {
    fn name(&self) -> &str {
        "appointments"
    }

    fn on_added(&self, key: &str, appointment: &Value) -> Vec<Notice> {
        let mut notices = Vec::new();

        if let Some(doctor_id) = record::text(appointment, "doctorId") {
            let patient = record::text(appointment, "patientName").unwrap_or_else(|| "A patient".into());
            notices.push(Notice::new(
                &doctor_id,
                "🩺 New Appointment Booked",
                &format!("{patient} booked a session with you."),
                self.name(),
            ));
        }

        if let Some(patient_id) = record::text(appointment, "patientId") {
            let body = match record::text(appointment, "doctorName") {
                Some(doctor) => format!("Your appointment with Dr. {doctor} is scheduled."),
                None => "Your appointment is scheduled.".to_string(),
            };
            notices.push(Notice::new(&patient_id, "📅 Appointment Scheduled", &body, self.name()));
        }

        if notices.is_empty() {
            tracing::debug!("Appointment {key} has no participants, skipping");
        }
        notices
    }
}

// ── Prescriptions and lab results ─────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Prescription,
    LabResult,
}

impl RecordKind {
    /// Collection name, both top-level and under `/patient_files/{user}`.
    pub fn segment(self) -> &'static str {
        match self {
            RecordKind::Prescription => "prescriptions",
            RecordKind::LabResult => "lab_requests",
        }
    }

    fn title(self) -> &'static str {
        match self {
            RecordKind::Prescription => "💊 New Prescription",
            RecordKind::LabResult => "🧪 New Lab Result",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            RecordKind::Prescription => "prescription",
            RecordKind::LabResult => "lab result",
        }
    }
}

/// Medical records uploaded by a doctor for a patient.
///
/// Flat collections carry the patient in `patientId`; scoped collections
/// live under the patient's own file and take the owner from the path.
pub struct RecordRouter {
    kind: RecordKind,
    owner: Option<String>,
    name: String,
}

impl RecordRouter {
    pub fn flat(kind: RecordKind) -> Self {
        Self {
            kind,
            owner: None,
            name: kind.segment().to_string(),
        }
    }

    pub fn scoped(kind: RecordKind, user_id: &str) -> Self {
        Self {
            kind,
            owner: Some(user_id.to_string()),
            name: format!("patient_files/{}", kind.segment()),
        }
    }

    fn doctor_label(&self, record: &Value) -> String {
        let name = match self.owner {
            Some(_) => record::first_text(record, &["Doctor", "doctorName"]),
            None => record::text(record, "doctorName"),
        };
        match name {
            Some(name) => format!("Dr. {name}"),
            None => "Doctor".to_string(),
        }
    }
}

impl ChildRouter for RecordRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_added(&self, key: &str, value: &Value) -> Vec<Notice> {
        let patient = match &self.owner {
            Some(owner) => Some(owner.clone()),
            None => record::text(value, "patientId"),
        };
        let Some(patient) = patient else {
            tracing::debug!("{} {key} has no patientId, skipping", self.kind.noun());
            return Vec::new();
        };

        let body = format!(
            "{} uploaded a new {} for you.",
            self.doctor_label(value),
            self.kind.noun()
        );
        vec![Notice::new(&patient, self.kind.title(), &body, &self.name)]
    }
}

// ── Chat ──────────────────────────────────────────────

pub const FILE_INDICATOR: &str = "📎 Sent you a new file";

/// Messages of one conversation, `/chats/{chat_id}/messages`.
pub struct ChatRouter {
    chat_id: String,
}

impl ChatRouter {
    pub fn new(chat_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
        }
    }
}

impl ChildRouter for ChatRouter {
    fn name(&self) -> &str {
        "chat"
    }

    fn on_added(&self, key: &str, message: &Value) -> Vec<Notice> {
        let Some(to) = record::first_text(message, &["to", "toUserId"]) else {
            tracing::debug!("Chat {}/{key} has no recipient, skipping", self.chat_id);
            return Vec::new();
        };
        let from = record::first_text(message, &["from", "fromUserId", "senderId"]);
        if from.as_deref() == Some(to.as_str()) {
            return Vec::new();
        }

        let body = if record::text(message, "fileUrl").is_some() {
            FILE_INDICATOR.to_string()
        } else {
            record::text(message, "text").unwrap_or_default()
        };
        let title = match record::text(message, "senderName") {
            Some(sender) => format!("💬 New Message from {sender}"),
            None => "💬 New Message".to_string(),
        };
        vec![Notice::new(&to, &title, &body, self.name())]
    }
}

// ── Payments ──────────────────────────────────────────

const SUCCESS_STATUSES: &[&str] = &["paid", "confirmed", "completed", "success", "successful", "approved"];
const FAILURE_STATUSES: &[&str] = &["rejected", "failed", "declined", "cancelled", "canceled"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Success,
    Failure(String),
    Other(String),
}

impl PaymentStatus {
    /// Classify a raw status, trimmed and lower-cased; missing is "updated".
    pub fn classify(raw: Option<&str>) -> Self {
        let status = raw
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "updated".to_string());
        if SUCCESS_STATUSES.contains(&status.as_str()) {
            PaymentStatus::Success
        } else if FAILURE_STATUSES.contains(&status.as_str()) {
            PaymentStatus::Failure(status)
        } else {
            PaymentStatus::Other(status)
        }
    }

    fn message(&self, support_contact: &str) -> String {
        match self {
            PaymentStatus::Success => "Your payment was received successfully. Thank you!".to_string(),
            PaymentStatus::Failure(status) => format!(
                "Your payment was {status}. Please contact {support_contact} if you need help."
            ),
            PaymentStatus::Other(status) => format!("Your payment status is now {status}."),
        }
    }
}

/// Status transitions on `/payments`. Changes to other fields are ignored.
pub struct PaymentRouter {
    support_contact: String,
    statuses: Mutex<HashMap<String, Option<String>>>,
}

impl PaymentRouter {
    pub fn new(support_contact: &str) -> Self {
        Self {
            support_contact: support_contact.to_string(),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    fn normalized_status(payment: &Value) -> Option<String> {
        record::text(payment, "status").map(|s| s.trim().to_lowercase())
    }

    /// Record `status` for `key`; returns whether it differs from the last seen.
    fn remember(&self, key: &str, status: Option<String>) -> bool {
        let mut statuses = match self.statuses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match statuses.insert(key.to_string(), status.clone()) {
            Some(previous) => previous != status,
            None => true,
        }
    }
}

impl ChildRouter for PaymentRouter {
    fn name(&self) -> &str {
        "payments"
    }

    fn on_bootstrap(&self, snapshot: &[(String, Value)]) {
        for (key, payment) in snapshot {
            self.remember(key, Self::normalized_status(payment));
        }
    }

    fn on_added(&self, key: &str, payment: &Value) -> Vec<Notice> {
        self.remember(key, Self::normalized_status(payment));
        Vec::new()
    }

    fn on_changed(&self, key: &str, payment: &Value) -> Vec<Notice> {
        let status = Self::normalized_status(payment);
        if !self.remember(key, status.clone()) {
            tracing::debug!("Payment {key} changed without a status change, skipping");
            return Vec::new();
        }
        let Some(patient_id) = record::text(payment, "patientId") else {
            tracing::debug!("Payment {key} has no patientId, skipping");
            return Vec::new();
        };

        let body = PaymentStatus::classify(status.as_deref()).message(&self.support_contact);
        vec![Notice::new(&patient_id, "💰 Payment Update", &body, self.name())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::testing::{CollectingSink, eventually, settle};
    use lamed_core::config::PreBootstrapPolicy;
    use lamed_feed::MemoryFeed;
    use serde_json::json;

    #[test]
    fn test_appointment_notifies_both_parties() {
        let notices = AppointmentRouter.on_added(
            "a1",
            &json!({"doctorId": "d1", "patientId": "p1", "patientName": "Liya", "doctorName": "Abel"}),
        );
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].user_id, "d1");
        assert_eq!(notices[0].title, "🩺 New Appointment Booked");
        assert_eq!(notices[0].body, "Liya booked a session with you.");
        assert_eq!(notices[1].user_id, "p1");
        assert_eq!(notices[1].body, "Your appointment with Dr. Abel is scheduled.");

        let doctor_only = AppointmentRouter.on_added("a2", &json!({"doctorId": "d1"}));
        assert_eq!(doctor_only.len(), 1);
        assert!(AppointmentRouter.on_added("a3", &json!({"status": "pending"})).is_empty());
    }

    #[test]
    fn test_scoped_prescription_names_doctor() {
        let router = RecordRouter::scoped(RecordKind::Prescription, "u3");
        let named = router.on_added("rx1", &json!({"Doctor": "Abel", "doctorName": "Other"}));
        assert_eq!(named[0].user_id, "u3");
        assert_eq!(named[0].title, "💊 New Prescription");
        assert_eq!(named[0].body, "Dr. Abel uploaded a new prescription for you.");

        let fallback = router.on_added("rx2", &json!({"doctorName": "Sara"}));
        assert_eq!(fallback[0].body, "Dr. Sara uploaded a new prescription for you.");

        let anonymous = router.on_added("rx3", &json!({"medication": "x"}));
        assert_eq!(anonymous[0].body, "Doctor uploaded a new prescription for you.");
    }

    #[test]
    fn test_flat_lab_result_requires_patient() {
        let router = RecordRouter::flat(RecordKind::LabResult);
        let notices = router.on_added("l1", &json!({"patientId": "p1", "doctorName": "Abel", "Doctor": "Ignored"}));
        assert_eq!(notices[0].user_id, "p1");
        assert_eq!(notices[0].title, "🧪 New Lab Result");
        assert_eq!(notices[0].body, "Dr. Abel uploaded a new lab result for you.");
        assert!(router.on_added("l2", &json!({"doctorName": "Abel"})).is_empty());
    }

    #[test]
    fn test_chat_routing() {
        let router = ChatRouter::new("c1");

        let file = router.on_added("m1", &json!({"from": "u1", "to": "u2", "fileUrl": "x", "text": "hi"}));
        assert_eq!(file[0].user_id, "u2");
        assert_eq!(file[0].body, FILE_INDICATOR);
        assert_eq!(file[0].title, "💬 New Message");

        let legacy = router.on_added(
            "m2",
            &json!({"fromUserId": "u2", "toUserId": "u1", "text": "hello", "senderName": "Sara"}),
        );
        assert_eq!(legacy[0].user_id, "u1");
        assert_eq!(legacy[0].body, "hello");
        assert_eq!(legacy[0].title, "💬 New Message from Sara");

        assert!(router.on_added("m3", &json!({"from": "u1", "to": "u1", "text": "note"})).is_empty());
        assert!(router.on_added("m4", &json!({"senderId": "u1", "text": "?"})).is_empty());
    }

    #[test]
    fn test_payment_status_classification() {
        assert_eq!(PaymentStatus::classify(Some(" PAID ")), PaymentStatus::Success);
        assert_eq!(PaymentStatus::classify(Some("Approved")), PaymentStatus::Success);
        assert_eq!(
            PaymentStatus::classify(Some("Declined")),
            PaymentStatus::Failure("declined".into())
        );
        assert_eq!(
            PaymentStatus::classify(Some("refunded")),
            PaymentStatus::Other("refunded".into())
        );
        assert_eq!(PaymentStatus::classify(None), PaymentStatus::Other("updated".into()));

        let failure = PaymentStatus::Failure("rejected".into()).message("help@lamed.health");
        assert!(failure.contains("rejected"));
        assert!(failure.contains("help@lamed.health"));
    }

    #[test]
    fn test_payment_skips_unchanged_status() {
        let router = PaymentRouter::new("support");
        router.on_bootstrap(&[("pay1".into(), json!({"patientId": "p1", "status": "pending"}))]);

        let unchanged = router.on_changed("pay1", &json!({"patientId": "p1", "status": "Pending", "note": "x"}));
        assert!(unchanged.is_empty());

        let paid = router.on_changed("pay1", &json!({"patientId": "p1", "status": "paid"}));
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].user_id, "p1");
        assert_eq!(paid[0].title, "💰 Payment Update");
        assert!(paid[0].body.contains("successfully"));

        assert!(router.on_changed("pay1", &json!({"patientId": "p1", "status": "paid"})).is_empty());
    }

    #[test]
    fn test_payment_added_after_bootstrap_is_tracked() {
        let router = PaymentRouter::new("support");
        assert!(router.on_added("pay2", &json!({"patientId": "p1", "status": "pending"})).is_empty());
        assert!(router.on_changed("pay2", &json!({"patientId": "p1", "status": "pending"})).is_empty());
        let other = router.on_changed("pay2", &json!({"patientId": "p1", "status": "on hold"}));
        assert_eq!(other[0].body, "Your payment status is now on hold.");
    }

    #[tokio::test]
    async fn test_registered_routers_ignore_existing_data() {
        let feed = Arc::new(MemoryFeed::with_data(json!({
            "appointments": {"a0": {"doctorId": "d0", "patientId": "p0"}},
            "payments": {"pay1": {"patientId": "p1", "status": "pending"}},
            "chats": {"c1": {"messages": {"m0": {"from": "u1", "to": "u2", "text": "old"}}}},
            "patient_files": {"u3": {"prescriptions": {"rx0": {"Doctor": "Old"}}}}
        })));
        let sink = Arc::new(CollectingSink::default());
        let gate = BootstrapGate::new(feed.clone(), sink.clone(), PreBootstrapPolicy::Drop);
        register_all(&gate, &ListenerConfig::default());

        let nested = [
            "/appointments",
            "/payments",
            "/chats/c1/messages",
            "/patient_files/u3/prescriptions",
            "/patient_files/u3/lab_requests",
        ];
        eventually(|| nested.iter().all(|path| gate.is_bootstrapped(path))).await;
        settle().await;
        assert!(sink.notices().is_empty());

        feed.set("/payments/pay1/status", json!("paid"));
        feed.set("/chats/c1/messages/m1", json!({"from": "u1", "to": "u2", "fileUrl": "x"}));
        feed.set("/patient_files/u3/prescriptions/rx1", json!({"Doctor": "Abel"}));
        feed.set("/appointments/a1", json!({"doctorId": "d1", "patientName": "Liya"}));
        eventually(|| sink.notices().len() == 4).await;
        settle().await;

        let notices = sink.notices();
        assert_eq!(notices.len(), 4);
        let to = |user: &str| notices.iter().find(|n| n.user_id == user).cloned().unwrap();
        assert!(to("p1").body.contains("successfully"));
        assert_eq!(to("u2").body, FILE_INDICATOR);
        assert_eq!(to("u3").body, "Dr. Abel uploaded a new prescription for you.");
        assert_eq!(to("d1").body, "Liya booked a session with you.");
    }
}

//! Value objects passed between routers, the resolver, and the dispatcher.

use serde::{Deserialize, Serialize};

/// Payload posted to the delivery endpoint. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntent {
    pub routing_id: String,
    pub title: String,
    pub body: String,
}

/// A notification addressed to a domain user, before the user's device
/// routing id has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub user_id: String,
    pub title: String,
    pub body: String,
    /// Which router or reminder produced this notice.
    pub source: String,
}

impl Notice {
    pub fn new(user_id: &str, title: &str, body: &str, source: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            source: source.to_string(),
        }
    }
}

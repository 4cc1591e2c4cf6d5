//! Recent notification history: in-memory ring buffer for the status endpoint.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

const DEFAULT_CAPACITY: usize = 100;

/// One dispatch attempt (or skip), as shown on the status page.
///
/// Device routing ids, message bodies, and failure details stay in memory
/// and in the logs; they are never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub title: String,
    #[serde(skip_serializing)]
    pub body: String,
    #[serde(skip_serializing)]
    pub routing_id: Option<String>,
    /// delivered, skipped, failed
    pub status: String,
    #[serde(skip_serializing)]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NotifyHistory {
    records: VecDeque<NotificationRecord>,
    capacity: usize,
}

impl NotifyHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record an attempt, evicting the oldest entry when full.
    pub fn record(&mut self, record: NotificationRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<NotificationRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for NotifyHistory {
    fn default() -> Self {
        Self::new()
    }
}

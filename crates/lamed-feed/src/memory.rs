//! In-process mutation feed backed by a single JSON tree.
//!
//! Mirrors realtime-database event semantics closely enough to drive the
//! listeners in tests and local runs: a subscription first replays `Added`
//! for existing children, and every write reports `Added` / `Changed` for
//! the direct children of each subscribed path it touches.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use lamed_core::feed::{children_of, normalize_path, segments, set_value_at, value_at};
use lamed_core::{ChildEvent, ChildEventStream, LamedError, MutationFeed, Result};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

struct Subscriber {
    path: String,
    tx: mpsc::UnboundedSender<ChildEvent>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    /// Path prefixes whose reads fail, for exercising error handling.
    failing: HashSet<String>,
    /// Path prefixes whose partial updates fail.
    failing_writes: HashSet<String>,
}

/// In-memory [`MutationFeed`].
#[derive(Default)]
pub struct MemoryFeed {
    inner: Mutex<Inner>,
    push_counter: AtomicU64,
    reads: AtomicU64,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a feed pre-populated with `root`.
    pub fn with_data(root: Value) -> Self {
        let feed = Self::new();
        feed.lock().root = root;
        feed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the value at `path` (null deletes).
    pub fn set(&self, path: &str, value: Value) {
        let path = normalize_path(path);
        let mut inner = self.lock();
        inner.write(&path, |root| set_value_at(root, &segments(&path), value));
    }

    /// Append `value` under a fresh, chronologically ordered key. Returns the key.
    pub fn push(&self, path: &str, value: Value) -> String {
        let n = self.push_counter.fetch_add(1, Ordering::Relaxed);
        let key = format!("-Lamed{n:010}");
        self.set(&format!("{path}/{key}"), value);
        key
    }

    /// Merge `fields` into the value at `path`.
    pub fn merge(&self, path: &str, fields: Map<String, Value>) {
        let path = normalize_path(path);
        let mut inner = self.lock();
        inner.write(&path, |root| {
            let base = segments(&path);
            for (key, value) in fields {
                let mut segs = base.clone();
                segs.extend(segments(&key));
                set_value_at(root, &segs, value);
            }
        });
    }

    /// Current value at `path`.
    pub fn value(&self, path: &str) -> Option<Value> {
        let path = normalize_path(path);
        value_at(&self.lock().root, &segments(&path)).cloned()
    }

    /// Make reads and lookups under `prefix` fail until [`MemoryFeed::heal`].
    pub fn fail_reads(&self, prefix: &str) {
        self.lock().failing.insert(normalize_path(prefix));
    }

    /// Make partial updates under `prefix` fail until [`MemoryFeed::heal`].
    pub fn fail_updates(&self, prefix: &str) {
        self.lock().failing_writes.insert(normalize_path(prefix));
    }

    /// Clear read and update failures registered for `prefix`.
    pub fn heal(&self, prefix: &str) {
        let prefix = normalize_path(prefix);
        let mut inner = self.lock();
        inner.failing.remove(&prefix);
        inner.failing_writes.remove(&prefix);
    }

    /// Number of `read` / `get` calls served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn lookup(&self, path: &str) -> Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let path = normalize_path(path);
        let inner = self.lock();
        if inner.is_failing(&path) {
            return Err(LamedError::Feed(format!("permission denied reading {path}")));
        }
        Ok(value_at(&inner.root, &segments(&path))
            .filter(|v| !v.is_null())
            .cloned())
    }
}

impl Inner {
    fn is_failing(&self, path: &str) -> bool {
        self.failing
            .iter()
            .any(|prefix| is_within(path, prefix))
    }

    fn is_write_failing(&self, path: &str) -> bool {
        self.failing_writes
            .iter()
            .any(|prefix| is_within(path, prefix))
    }

    fn children_map(&self, path: &str) -> BTreeMap<String, Value> {
        value_at(&self.root, &segments(path))
            .map(children_of)
            .unwrap_or_default()
            .into_iter()
            .collect()
    }

    /// Apply a write at `path` and notify subscribers whose children it touched.
    fn write<F: FnOnce(&mut Value)>(&mut self, path: &str, apply: F) {
        self.subscribers.retain(|s| !s.tx.is_closed());

        let affected: Vec<usize> = self
            .subscribers
            .iter()
            .enumerate()
            .filter(|(_, s)| is_within(path, &s.path) || is_within(&s.path, path))
            .map(|(i, _)| i)
            .collect();
        let before: Vec<BTreeMap<String, Value>> = affected
            .iter()
            .map(|&i| self.children_map(&self.subscribers[i].path))
            .collect();

        apply(&mut self.root);

        for (&i, before) in affected.iter().zip(before) {
            let subscriber = &self.subscribers[i];
            for (key, value) in self.children_map(&subscriber.path) {
                let event = match before.get(&key) {
                    None => ChildEvent::added(key, value),
                    Some(prev) if *prev != value => ChildEvent::changed(key, value),
                    Some(_) => continue,
                };
                let _ = subscriber.tx.send(event);
            }
        }
    }
}

/// Whether `path` equals `prefix` or lies below it.
fn is_within(path: &str, prefix: &str) -> bool {
    let path = segments(path);
    let prefix = segments(prefix);
    path.len() >= prefix.len() && path[..prefix.len()] == prefix[..]
}

#[async_trait]
impl MutationFeed for MemoryFeed {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, path: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .lookup(path)?
            .map(|value| children_of(&value))
            .unwrap_or_default())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        self.lookup(path)
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let path = normalize_path(path);
        if self.lock().is_write_failing(&path) {
            return Err(LamedError::Feed(format!("permission denied writing {path}")));
        }
        self.merge(&path, fields);
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<ChildEventStream> {
        let path = normalize_path(path);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        for (key, value) in inner.children_map(&path) {
            let _ = tx.send(ChildEvent::added(key, value));
        }
        inner.subscribers.push(Subscriber { path, tx });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamed_core::ChildEventKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_replays_existing_children() {
        let feed = MemoryFeed::with_data(json!({"appointments": {"a1": {"x": 1}, "a2": {"x": 2}}}));
        let mut stream = feed.subscribe("/appointments").await.unwrap();
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first, ChildEvent::added("a1", json!({"x": 1})));
        assert_eq!(second.key, "a2");
    }

    #[tokio::test]
    async fn test_writes_emit_added_then_changed() {
        let feed = MemoryFeed::new();
        let mut stream = feed.subscribe("/payments").await.unwrap();

        feed.set("/payments/p1", json!({"status": "pending"}));
        feed.set("/payments/p1/status", json!("paid"));
        // Writes elsewhere are invisible to this subscriber.
        feed.set("/appointments/a1", json!({"x": 1}));

        let added = stream.next().await.unwrap();
        assert_eq!(added.kind, ChildEventKind::Added);
        let changed = stream.next().await.unwrap();
        assert_eq!(changed, ChildEvent::changed("p1", json!({"status": "paid"})));
    }

    #[tokio::test]
    async fn test_read_update_and_failures() {
        let feed = MemoryFeed::new();
        let key = feed.push("/appointments", json!({"timestamp": 5}));
        let mut fields = Map::new();
        fields.insert("reminder20Sent".into(), json!(true));
        feed.update(&format!("/appointments/{key}"), fields).await.unwrap();

        let children = feed.read("/appointments").await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].1, json!({"timestamp": 5, "reminder20Sent": true}));

        assert_eq!(feed.get("/users/u1/token").await.unwrap(), None);
        feed.fail_reads("/users");
        assert!(feed.get("/users/u1/token").await.is_err());
        feed.heal("/users");
        assert!(feed.get("/users/u1/token").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_failures_are_scoped() {
        let feed = MemoryFeed::with_data(json!({"appointments": {"a1": {}, "a2": {}}}));
        feed.fail_updates("/appointments/a1");

        let mut fields = Map::new();
        fields.insert("reminder20Sent".into(), json!(true));
        assert!(feed.update("/appointments/a1", fields.clone()).await.is_err());
        assert_eq!(feed.value("/appointments/a1/reminder20Sent"), None);
        feed.update("/appointments/a2", fields.clone()).await.unwrap();
        assert_eq!(feed.value("/appointments/a2/reminder20Sent"), Some(json!(true)));

        feed.heal("/appointments/a1");
        feed.update("/appointments/a1", fields).await.unwrap();
        assert_eq!(feed.value("/appointments/a1/reminder20Sent"), Some(json!(true)));
    }
}

//! Mutation feed contract: the hierarchical, key-addressed data store the
//! listener observes.
//!
//! Adapters translate their native change notifications into ordered
//! [`ChildEvent`]s per watched path. Like the Firebase SDKs, a fresh
//! subscription first emits `Added` for every child that already exists;
//! the bootstrap gate is responsible for suppressing those.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::Result;

/// Kind of change observed on a direct child of a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEventKind {
    Added,
    Changed,
}

impl std::fmt::Display for ChildEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildEventKind::Added => write!(f, "child_added"),
            ChildEventKind::Changed => write!(f, "child_changed"),
        }
    }
}

/// A change to one direct child, carrying the child's full current value.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    pub kind: ChildEventKind,
    pub key: String,
    pub value: Value,
}

impl ChildEvent {
    pub fn added(key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChildEventKind::Added,
            key: key.into(),
            value,
        }
    }

    pub fn changed(key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChildEventKind::Changed,
            key: key.into(),
            value,
        }
    }
}

pub type ChildEventStream = BoxStream<'static, ChildEvent>;

/// Data source operations the notification core needs.
#[async_trait]
pub trait MutationFeed: Send + Sync {
    /// Adapter name, for logs.
    fn name(&self) -> &str;

    /// Full read of a collection: ordered `(key, value)` pairs of its children.
    async fn read(&self, path: &str) -> Result<Vec<(String, Value)>>;

    /// Point lookup. `Ok(None)` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Partial update: writes only the given fields below `path`.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Live child events for `path`, starting with `Added` for existing children.
    async fn subscribe(&self, path: &str) -> Result<ChildEventStream>;
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical form: leading slash, no trailing or doubled slashes.
/// The root normalizes to `/`.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", segments(path).join("/"))
}

/// Join a parent path with a relative child path.
pub fn join_path(parent: &str, child: &str) -> String {
    normalize_path(&format!("{parent}/{child}"))
}

/// Children of a collection value in key order. Null children are skipped;
/// arrays (which the database produces for dense integer keys) use their
/// indices as keys.
pub fn children_of(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Navigate to the value stored under `segs`.
pub fn value_at<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    segs.iter().try_fold(root, |node, seg| match node {
        Value::Object(map) => map.get(*seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` under `segs`, creating intermediate objects as needed.
/// Writing `null` deletes the entry, matching realtime-database semantics.
pub fn set_value_at(root: &mut Value, segs: &[&str], value: Value) {
    let Some((last, parents)) = segs.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if value.is_null() {
            map.remove(*last);
        } else {
            map.insert(last.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("appointments"), "/appointments");
        assert_eq!(normalize_path("//chats/c1/messages/"), "/chats/c1/messages");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(join_path("/patient_files", "u3/prescriptions"), "/patient_files/u3/prescriptions");
    }

    #[test]
    fn test_children_of_skips_null() {
        let value = json!({"b": {"x": 1}, "a": {"x": 2}, "c": null});
        let children = children_of(&value);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].0, "a");
        assert_eq!(children[1].0, "b");
        assert!(children_of(&json!("scalar")).is_empty());
    }

    #[test]
    fn test_set_and_get_nested() {
        let mut root = Value::Null;
        set_value_at(&mut root, &["appointments", "a1", "status"], json!("booked"));
        assert_eq!(
            value_at(&root, &["appointments", "a1", "status"]),
            Some(&json!("booked"))
        );

        set_value_at(&mut root, &["appointments", "a1", "status"], Value::Null);
        assert_eq!(value_at(&root, &["appointments", "a1"]), Some(&json!({})));

        set_value_at(&mut root, &[], json!({"fresh": true}));
        assert_eq!(root, json!({"fresh": true}));
    }
}

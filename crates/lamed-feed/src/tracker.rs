//! Turns realtime-database `put` / `patch` stream payloads into per-child
//! events.
//!
//! The REST streaming API reports raw writes relative to the watched path
//! (`{"path": "/a1/status", "data": "paid"}`), not child events. The tracker
//! keeps the last known value of every direct child so it can tell an
//! addition from a change and always emit the child's full value.

use std::collections::BTreeMap;

use lamed_core::feed::{children_of, segments, set_value_at};
use lamed_core::ChildEvent;
use serde_json::{Map, Value};

/// Kind of raw write reported by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Replace the value at the path.
    Put,
    /// Merge the given keys into the value at the path.
    Patch,
}

#[derive(Debug, Default)]
pub struct ChildTracker {
    children: BTreeMap<String, Value>,
}

impl ChildTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Apply a raw write and return the resulting child events.
    pub fn apply(&mut self, kind: WriteKind, path: &str, data: Value) -> Vec<ChildEvent> {
        let base = segments(path);

        if base.is_empty() && kind == WriteKind::Put {
            return self.replace_all(&data);
        }

        let writes: Vec<(Vec<String>, Value)> = match (kind, data) {
            (WriteKind::Patch, Value::Object(fields)) => fields
                .into_iter()
                .map(|(key, value)| {
                    let mut segs: Vec<String> = base.iter().map(|s| s.to_string()).collect();
                    segs.extend(segments(&key).into_iter().map(str::to_string));
                    (segs, value)
                })
                .collect(),
            (WriteKind::Patch, _) => {
                tracing::debug!("Ignoring non-object patch at {path}");
                Vec::new()
            }
            (WriteKind::Put, value) => {
                vec![(base.iter().map(|s| s.to_string()).collect(), value)]
            }
        };

        let mut touched: Vec<String> = Vec::new();
        let mut before: BTreeMap<String, Option<Value>> = BTreeMap::new();

        for (segs, value) in writes {
            let Some((key, rest)) = segs.split_first() else {
                continue;
            };
            if !before.contains_key(key) {
                before.insert(key.clone(), self.children.get(key).cloned());
                touched.push(key.clone());
            }

            let mut child = self
                .children
                .remove(key)
                .unwrap_or_else(|| Value::Object(Map::new()));
            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
            set_value_at(&mut child, &rest, value);
            if !is_empty_value(&child) {
                self.children.insert(key.clone(), child);
            }
        }

        touched
            .into_iter()
            .filter_map(|key| {
                let previous = before.remove(&key).flatten();
                let current = self.children.get(&key)?.clone();
                match previous {
                    None => Some(ChildEvent::added(key, current)),
                    Some(prev) if prev != current => Some(ChildEvent::changed(key, current)),
                    Some(_) => None,
                }
            })
            .collect()
    }

    fn replace_all(&mut self, data: &Value) -> Vec<ChildEvent> {
        let mut events = Vec::new();
        let mut next = BTreeMap::new();
        for (key, value) in children_of(data) {
            match self.children.get(&key) {
                None => events.push(ChildEvent::added(key.clone(), value.clone())),
                Some(prev) if *prev != value => {
                    events.push(ChildEvent::changed(key.clone(), value.clone()))
                }
                Some(_) => {}
            }
            next.insert(key, value);
        }
        self.children = next;
        events
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

//! Bootstrap Gate: replay-safe change listeners.
//!
//! A fresh subscription reports every pre-existing child as "added". The
//! gate keeps those from reaching domain logic: per watched path it issues
//! one full read, and only after that read resolves does the path become
//! bootstrapped and start forwarding events to its [`ChildRouter`].
//!
//! ```text
//! watch(path) ──> subscribe ──┬── events before read resolves ──> discarded (Drop)
//!                             │                                 └> buffered  (Reconcile)
//!                 read(path) ─┘
//!                     └── bootstrapped ──> event matches snapshot value? ──> discarded once
//!                                          otherwise ──> router ──> NoticeSink
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use lamed_core::config::PreBootstrapPolicy;
use lamed_core::feed::{children_of, join_path, normalize_path};
use lamed_core::{ChildEvent, ChildEventKind, MutationFeed, Notice, Result};
use serde::Serialize;
use serde_json::Value;

const MAX_RETRY_SECS: u64 = 30;

/// Maps child events on one path to notices.
///
/// Handlers run sequentially per path, in feed order, and must not block.
pub trait ChildRouter: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per bootstrap with the initial read, before any event.
    fn on_bootstrap(&self, _snapshot: &[(String, Value)]) {}

    fn on_added(&self, _key: &str, _value: &Value) -> Vec<Notice> {
        Vec::new()
    }

    fn on_changed(&self, _key: &str, _value: &Value) -> Vec<Notice> {
        Vec::new()
    }
}

/// Where routed notices go (normally the dispatch [`Pipeline`](crate::Pipeline)).
pub trait NoticeSink: Send + Sync {
    fn submit(&self, notice: Notice);
}

/// Per-path listener state.
#[derive(Debug)]
pub struct WatchedNode {
    path: String,
    router: String,
    bootstrapped: AtomicBool,
    delivered: AtomicU64,
    discarded: AtomicU64,
    covered: AtomicU64,
}

impl WatchedNode {
    fn new(path: &str, router: &str) -> Self {
        Self {
            path: path.to_string(),
            router: router.to_string(),
            bootstrapped: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            covered: AtomicU64::new(0),
        }
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::Acquire)
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            path: self.path.clone(),
            router: self.router.clone(),
            bootstrapped: self.is_bootstrapped(),
            delivered: self.delivered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            covered: self.covered.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of one watched path, for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub path: String,
    pub router: String,
    pub bootstrapped: bool,
    /// Events handed to the router.
    pub delivered: u64,
    /// Events dropped because they arrived before bootstrap completed.
    pub discarded: u64,
    /// Events dropped because the initial read already contained them.
    pub covered: u64,
}

struct GateInner {
    feed: Arc<dyn MutationFeed>,
    sink: Arc<dyn NoticeSink>,
    policy: PreBootstrapPolicy,
    nodes: Mutex<HashMap<String, Arc<WatchedNode>>>,
}

/// Registry of watched paths. Cheap to clone.
#[derive(Clone)]
pub struct BootstrapGate {
    inner: Arc<GateInner>,
}

impl BootstrapGate {
    pub fn new(feed: Arc<dyn MutationFeed>, sink: Arc<dyn NoticeSink>, policy: PreBootstrapPolicy) -> Self {
        Self {
            inner: Arc::new(GateInner {
                feed,
                sink,
                policy,
                nodes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start watching `path`. Returns `false` if the path is already watched.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch(&self, path: &str, router: Arc<dyn ChildRouter>) -> bool {
        let path = normalize_path(path);
        let node = {
            let mut nodes = self.lock_nodes();
            if nodes.contains_key(&path) {
                return false;
            }
            let node = Arc::new(WatchedNode::new(&path, router.name()));
            nodes.insert(path.clone(), node.clone());
            node
        };

        tracing::info!("👂 Watching {path} ({})", router.name());
        tokio::spawn(self.clone().run(node, router));
        true
    }

    /// Watch `parent` and, for every existing or future parent key, each
    /// `parent/{key}/{segment}` collection in `children`.
    pub fn watch_nested(&self, parent: &str, children: Vec<ChildCollection>) -> bool {
        let router = NestedRouter {
            gate: self.clone(),
            parent: normalize_path(parent),
            children,
        };
        self.watch(parent, Arc::new(router))
    }

    pub fn is_bootstrapped(&self, path: &str) -> bool {
        self.lock_nodes()
            .get(&normalize_path(path))
            .is_some_and(|node| node.is_bootstrapped())
    }

    /// Status of every watched path, sorted by path.
    pub fn watched(&self) -> Vec<NodeStatus> {
        let mut statuses: Vec<NodeStatus> = self.lock_nodes().values().map(|n| n.status()).collect();
        statuses.sort_by(|a, b| a.path.cmp(&b.path));
        statuses
    }

    fn lock_nodes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<WatchedNode>>> {
        self.inner
            .nodes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Listener task for one path: bootstrap, forward, and re-bootstrap if the
    /// subscription ends or the initial read fails.
    async fn run(self, node: Arc<WatchedNode>, router: Arc<dyn ChildRouter>) {
        let mut retry_secs = 1u64;
        loop {
            match self.listen(&node, router.as_ref()).await {
                Ok(()) => {
                    tracing::warn!("⚠️ Subscription to {} ended, resubscribing", node.path);
                    retry_secs = 1;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Listener for {} failed: {e}, retrying in {retry_secs}s", node.path);
                }
            }
            node.bootstrapped.store(false, Ordering::Release);
            tokio::time::sleep(Duration::from_secs(retry_secs)).await;
            retry_secs = (retry_secs * 2).min(MAX_RETRY_SECS);
        }
    }

    async fn listen(&self, node: &WatchedNode, router: &dyn ChildRouter) -> Result<()> {
        let feed = &self.inner.feed;
        let mut events = feed.subscribe(&node.path).await?;
        let read = feed.read(&node.path);
        tokio::pin!(read);

        let mut buffered: Vec<ChildEvent> = Vec::new();
        let snapshot = loop {
            tokio::select! {
                biased;
                snapshot = &mut read => break snapshot?,
                event = events.next() => {
                    let Some(event) = event else { return Ok(()) };
                    node.discarded.fetch_add(1, Ordering::Relaxed);
                    if self.inner.policy == PreBootstrapPolicy::Reconcile {
                        buffered.push(event);
                    }
                }
            }
        };

        router.on_bootstrap(&snapshot);
        let mut covered: HashMap<String, Value> = snapshot.into_iter().collect();
        node.bootstrapped.store(true, Ordering::Release);
        tracing::info!(
            "✅ {} bootstrapped ({} existing, {} early events)",
            node.path,
            covered.len(),
            node.discarded.load(Ordering::Relaxed)
        );

        if !buffered.is_empty() {
            // Replayed events do not count as discarded.
            node.discarded.fetch_sub(buffered.len() as u64, Ordering::Relaxed);
            for event in buffered {
                self.forward(node, router, &mut covered, event);
            }
        }

        while let Some(event) = events.next().await {
            self.forward(node, router, &mut covered, event);
        }
        Ok(())
    }

    fn forward(
        &self,
        node: &WatchedNode,
        router: &dyn ChildRouter,
        covered: &mut HashMap<String, Value>,
        event: ChildEvent,
    ) {
        // The first event per pre-existing key may be a replay of what the
        // initial read already returned.
        if let Some(known) = covered.remove(&event.key) {
            if known == event.value {
                node.covered.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("{}: {} {} already known", node.path, event.kind, event.key);
                return;
            }
        }

        node.delivered.fetch_add(1, Ordering::Relaxed);
        let notices = match event.kind {
            ChildEventKind::Added => router.on_added(&event.key, &event.value),
            ChildEventKind::Changed => router.on_changed(&event.key, &event.value),
        };
        for notice in notices {
            self.inner.sink.submit(notice);
        }
    }
}

type RouterFactory = Arc<dyn Fn(&str) -> Arc<dyn ChildRouter> + Send + Sync>;

/// A per-entity sub-collection: `parent/{key}/{segment}`, routed by a router
/// built for that key.
#[derive(Clone)]
pub struct ChildCollection {
    segment: String,
    factory: RouterFactory,
}

impl ChildCollection {
    pub fn new<F>(segment: &str, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn ChildRouter> + Send + Sync + 'static,
    {
        Self {
            segment: segment.trim_matches('/').to_string(),
            factory: Arc::new(factory),
        }
    }
}

/// Discovers parents and registers gate watches on their sub-collections.
struct NestedRouter {
    gate: BootstrapGate,
    parent: String,
    children: Vec<ChildCollection>,
}

impl NestedRouter {
    fn child_path(&self, key: &str, child: &ChildCollection) -> String {
        join_path(&self.parent, &format!("{key}/{}", child.segment))
    }
}

impl ChildRouter for NestedRouter {
    fn name(&self) -> &str {
        "nested"
    }

    fn on_bootstrap(&self, snapshot: &[(String, Value)]) {
        for (key, _) in snapshot {
            for child in &self.children {
                self.gate.watch(&self.child_path(key, child), (child.factory)(key));
            }
        }
    }

    /// A parent created after bootstrap may already carry children; those
    /// are part of the child watch's initial read, so route them here.
    fn on_added(&self, key: &str, value: &Value) -> Vec<Notice> {
        let mut notices = Vec::new();
        for child in &self.children {
            let router = (child.factory)(key);
            if !self.gate.watch(&self.child_path(key, child), router.clone()) {
                continue;
            }
            if let Some(embedded) = value.get(&child.segment) {
                for (child_key, child_value) in children_of(embedded) {
                    notices.extend(router.on_added(&child_key, &child_value));
                }
            }
        }
        notices
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Collects notices instead of dispatching them.
    #[derive(Default)]
    pub struct CollectingSink {
        pub notices: Mutex<Vec<Notice>>,
    }

    impl CollectingSink {
        pub fn notices(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }
    }

    impl NoticeSink for CollectingSink {
        fn submit(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    /// Wait until `check` holds, polling briefly.
    pub async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    /// Give the listener tasks a chance to drain their queues.
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{CollectingSink, eventually, settle};
    use super::*;
    use async_trait::async_trait;
    use lamed_core::ChildEventStream;
    use lamed_feed::MemoryFeed;
    use serde_json::{Map, json};

    /// Emits a notice per event, addressed to the event key.
    struct EchoRouter;

    impl ChildRouter for EchoRouter {
        fn name(&self) -> &str {
            "echo"
        }

        fn on_added(&self, key: &str, _value: &Value) -> Vec<Notice> {
            vec![Notice::new(key, "added", "", "echo")]
        }

        fn on_changed(&self, key: &str, _value: &Value) -> Vec<Notice> {
            vec![Notice::new(key, "changed", "", "echo")]
        }
    }

    fn gate_for(feed: Arc<dyn MutationFeed>, policy: PreBootstrapPolicy) -> (BootstrapGate, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        (BootstrapGate::new(feed, sink.clone(), policy), sink)
    }

    #[tokio::test]
    async fn test_existing_children_are_not_notified() {
        let feed = Arc::new(MemoryFeed::with_data(json!({
            "appointments": {"a1": {"x": 1}, "a2": {"x": 2}}
        })));
        let (gate, sink) = gate_for(feed.clone(), PreBootstrapPolicy::Drop);

        assert!(gate.watch("/appointments", Arc::new(EchoRouter)));
        eventually(|| gate.is_bootstrapped("/appointments")).await;
        settle().await;
        assert!(sink.notices().is_empty());

        feed.set("/appointments/a3", json!({"x": 3}));
        feed.set("/appointments/a1/x", json!(10));
        eventually(|| sink.notices().len() == 2).await;

        let notices = sink.notices();
        assert_eq!((notices[0].user_id.as_str(), notices[0].title.as_str()), ("a3", "added"));
        assert_eq!((notices[1].user_id.as_str(), notices[1].title.as_str()), ("a1", "changed"));

        let status = &gate.watched()[0];
        assert_eq!(status.covered, 2);
        assert_eq!(status.delivered, 2);
    }

    #[tokio::test]
    async fn test_watch_is_idempotent_per_path() {
        let feed = Arc::new(MemoryFeed::new());
        let (gate, _sink) = gate_for(feed, PreBootstrapPolicy::Drop);
        assert!(gate.watch("/payments", Arc::new(EchoRouter)));
        assert!(!gate.watch("payments/", Arc::new(EchoRouter)));
        assert_eq!(gate.watched().len(), 1);
    }

    /// Feed whose initial read is held back until released, and which
    /// reports events written in the meantime.
    struct SlowReadFeed {
        inner: MemoryFeed,
        release: tokio::sync::Notify,
        /// Value the read returns (taken before the early writes).
        snapshot: Vec<(String, Value)>,
    }

    #[async_trait]
    impl MutationFeed for SlowReadFeed {
        fn name(&self) -> &str {
            "slow"
        }

        async fn read(&self, _path: &str) -> Result<Vec<(String, Value)>> {
            self.release.notified().await;
            Ok(self.snapshot.clone())
        }

        async fn get(&self, path: &str) -> Result<Option<Value>> {
            self.inner.get(path).await
        }

        async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
            self.inner.update(path, fields).await
        }

        async fn subscribe(&self, path: &str) -> Result<ChildEventStream> {
            self.inner.subscribe(path).await
        }
    }

    fn slow_feed() -> Arc<SlowReadFeed> {
        Arc::new(SlowReadFeed {
            inner: MemoryFeed::with_data(json!({"chats": {"old": {"text": "hi"}}})),
            release: tokio::sync::Notify::new(),
            snapshot: vec![("old".into(), json!({"text": "hi"}))],
        })
    }

    #[tokio::test]
    async fn test_events_before_bootstrap_are_dropped() {
        let feed = slow_feed();
        let (gate, sink) = gate_for(feed.clone(), PreBootstrapPolicy::Drop);
        gate.watch("/chats", Arc::new(EchoRouter));

        settle().await;
        feed.inner.set("/chats/early", json!({"text": "before bootstrap"}));
        settle().await;
        assert!(!gate.is_bootstrapped("/chats"));

        feed.release.notify_one();
        eventually(|| gate.is_bootstrapped("/chats")).await;
        settle().await;
        assert!(sink.notices().is_empty());
        assert_eq!(gate.watched()[0].discarded, 2);

        feed.inner.set("/chats/late", json!({"text": "after"}));
        eventually(|| sink.notices().len() == 1).await;
        assert_eq!(sink.notices()[0].user_id, "late");
    }

    #[tokio::test]
    async fn test_reconcile_replays_uncovered_events_once() {
        let feed = slow_feed();
        let (gate, sink) = gate_for(feed.clone(), PreBootstrapPolicy::Reconcile);
        gate.watch("/chats", Arc::new(EchoRouter));

        settle().await;
        feed.inner.set("/chats/early", json!({"text": "before bootstrap"}));
        settle().await;
        assert!(sink.notices().is_empty(), "nothing runs before bootstrap");

        feed.release.notify_one();
        eventually(|| sink.notices().len() == 1).await;
        settle().await;
        let notices = sink.notices();
        assert_eq!(notices.len(), 1, "pre-existing child is covered by the read");
        assert_eq!(notices[0].user_id, "early");
        assert_eq!(gate.watched()[0].discarded, 0);
    }

    /// Forwards `messages` children as notices naming the parent key.
    struct MessageRouter(String);

    impl ChildRouter for MessageRouter {
        fn name(&self) -> &str {
            "messages"
        }

        fn on_added(&self, key: &str, _value: &Value) -> Vec<Notice> {
            vec![Notice::new(&self.0, key, "", "messages")]
        }
    }

    #[tokio::test]
    async fn test_nested_watch_discovers_parents() {
        let feed = Arc::new(MemoryFeed::with_data(json!({
            "chats": {"c1": {"messages": {"m1": {"text": "old"}}}}
        })));
        let (gate, sink) = gate_for(feed.clone(), PreBootstrapPolicy::Drop);
        let children = vec![ChildCollection::new("messages", |chat: &str| {
            Arc::new(MessageRouter(chat.to_string())) as Arc<dyn ChildRouter>
        })];
        gate.watch_nested("/chats", children);

        eventually(|| gate.is_bootstrapped("/chats/c1/messages")).await;
        feed.set("/chats/c1/messages/m2", json!({"text": "new"}));
        eventually(|| sink.notices().len() == 1).await;
        assert_eq!(sink.notices()[0], Notice::new("c1", "m2", "", "messages"));

        // A new chat created together with its first message.
        feed.set("/chats/c2", json!({"messages": {"m3": {"text": "first"}}}));
        eventually(|| gate.is_bootstrapped("/chats/c2/messages")).await;
        settle().await;
        let notices = sink.notices();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[1], Notice::new("c2", "m3", "", "messages"));
    }
}

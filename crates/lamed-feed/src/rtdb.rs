//! Firebase Realtime Database adapter over the REST API.
//!
//! Reads and partial updates are plain `GET` / `PATCH` calls on
//! `{url}/{path}.json`. Subscriptions use the REST streaming protocol
//! (`Accept: text/event-stream`), whose `put` / `patch` events are folded
//! through a [`ChildTracker`] into child events. A dropped stream is
//! reconnected with capped exponential backoff; the reconnect's initial
//! `put` only yields events for children that changed in the meantime.
//! The server sends `keep-alive` every 30 s, so a stream silent for longer
//! than the idle timeout is treated as dead and reconnected.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lamed_core::config::DatabaseConfig;
use lamed_core::feed::{children_of, normalize_path, segments};
use lamed_core::{ChildEvent, ChildEventStream, LamedError, MutationFeed, Result};
use serde::Deserialize;
use reqwest::Url;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::sse::{SseEvent, SseParser};
use crate::tracker::{ChildTracker, WriteKind};

const MAX_BACKOFF_SECS: u64 = 30;

/// Three missed keep-alives.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Payload of `put` / `patch` stream events.
#[derive(Debug, Deserialize)]
struct StreamWrite {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Realtime Database REST client.
#[derive(Clone)]
pub struct RtdbFeed {
    base_url: Url,
    auth: String,
    auth_param: String,
    request_timeout: Duration,
    idle_timeout: Duration,
    client: reqwest::Client,
}

impl RtdbFeed {
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LamedError::Feed(format!("HTTP client init failed: {e}")))?;
        let base_url = Url::parse(config.url.trim())
            .map_err(|e| LamedError::Config(format!("Invalid database URL '{}': {e}", config.url)))?;
        if base_url.cannot_be_a_base() {
            return Err(LamedError::Config(format!("Invalid database URL '{}'", config.url)));
        }
        Ok(Self {
            base_url,
            auth: config.auth.clone(),
            auth_param: config.auth_param.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            idle_timeout: STREAM_IDLE_TIMEOUT,
            client,
        })
    }

    /// Reconnect a stream that has been silent for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// `{base}/{segments}.json`, each segment percent-encoded so keys with
    /// `?`, `%`, `&` or spaces stay inside the path.
    fn url(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let path = normalize_path(path);
        let segs = segments(&path);
        if let Ok(mut parts) = url.path_segments_mut() {
            parts.pop_if_empty();
            match segs.split_last() {
                Some((last, parents)) => {
                    parts.extend(parents);
                    parts.push(&format!("{last}.json"));
                }
                None => {
                    parts.push(".json");
                }
            }
        }
        url
    }

    fn auth_query(&self) -> [(&str, &str); 1] {
        [(self.auth_param.as_str(), self.auth.as_str())]
    }

    async fn fetch(&self, path: &str) -> Result<Value> {
        let resp = self
            .client
            .get(self.url(path))
            .query(&self.auth_query())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| LamedError::Feed(format!("GET {path} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LamedError::Feed(format!("GET {path} returned {status}: {body}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| LamedError::Feed(format!("GET {path} returned invalid JSON: {e}")))
    }

    /// Stream loop for one subscription. Returns when the receiver is gone
    /// or the server cancels the subscription.
    async fn run_stream(self, path: String, tx: mpsc::UnboundedSender<ChildEvent>) {
        let mut tracker = ChildTracker::new();
        let mut backoff = 1u64;

        loop {
            match self.stream_once(&path, &mut tracker, &tx).await {
                Ok(StreamEnd::ReceiverGone) => return,
                Ok(StreamEnd::Cancelled) => {
                    tracing::error!("❌ Stream for {path} cancelled by the database (check security rules)");
                    return;
                }
                Ok(StreamEnd::Closed) => {
                    tracing::warn!("⚠️ Stream for {path} closed, reconnecting in {backoff}s");
                }
                Ok(StreamEnd::AuthRevoked) => {
                    tracing::warn!("⚠️ Credential revoked for {path} stream, reconnecting in {backoff}s");
                }
                Err(e) => {
                    tracing::warn!("⚠️ Stream for {path} failed: {e}, reconnecting in {backoff}s");
                }
            }
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
        }
    }

    async fn stream_once(
        &self,
        path: &str,
        tracker: &mut ChildTracker,
        tx: &mpsc::UnboundedSender<ChildEvent>,
    ) -> Result<StreamEnd> {
        let resp = self
            .client
            .get(self.url(path))
            .query(&self.auth_query())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| LamedError::Feed(format!("stream connect failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LamedError::Feed(format!("stream returned {status}")));
        }
        tracing::debug!("📡 Streaming {path}");

        let mut parser = SseParser::new();
        let mut body = resp.bytes_stream();
        loop {
            let chunk = match tokio::time::timeout(self.idle_timeout, body.next()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return Ok(StreamEnd::Closed),
                Err(_) => {
                    tracing::warn!(
                        "⚠️ No data on {path} stream for {}s, assuming connection lost",
                        self.idle_timeout.as_secs()
                    );
                    return Ok(StreamEnd::Closed);
                }
            };
            let chunk = chunk.map_err(|e| LamedError::Feed(format!("stream read failed: {e}")))?;
            for event in parser.push(&chunk) {
                if let Some(end) = handle_event(path, event, tracker, tx) {
                    return Ok(end);
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    Closed,
    Cancelled,
    AuthRevoked,
    ReceiverGone,
}

fn handle_event(
    path: &str,
    event: SseEvent,
    tracker: &mut ChildTracker,
    tx: &mpsc::UnboundedSender<ChildEvent>,
) -> Option<StreamEnd> {
    let kind = match event.event.as_str() {
        "put" => WriteKind::Put,
        "patch" => WriteKind::Patch,
        "keep-alive" => return None,
        "cancel" => return Some(StreamEnd::Cancelled),
        "auth_revoked" => return Some(StreamEnd::AuthRevoked),
        other => {
            tracing::debug!("Ignoring stream event '{other}' on {path}");
            return None;
        }
    };

    let write: StreamWrite = match serde_json::from_str(&event.data) {
        Ok(write) => write,
        Err(e) => {
            tracing::warn!("⚠️ Malformed {} payload on {path}: {e}", event.event);
            return None;
        }
    };

    for child_event in tracker.apply(kind, &write.path, write.data) {
        if tx.send(child_event).is_err() {
            return Some(StreamEnd::ReceiverGone);
        }
    }
    None
}

#[async_trait]
impl MutationFeed for RtdbFeed {
    fn name(&self) -> &str {
        "firebase-rtdb"
    }

    async fn read(&self, path: &str) -> Result<Vec<(String, Value)>> {
        Ok(children_of(&self.fetch(path).await?))
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let value = self.fetch(path).await?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let resp = self
            .client
            .patch(self.url(path))
            .query(&self.auth_query())
            .json(&fields)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| LamedError::Feed(format!("PATCH {path} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LamedError::Feed(format!("PATCH {path} returned {status}: {body}")));
        }
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<ChildEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.clone().run_stream(normalize_path(path), tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

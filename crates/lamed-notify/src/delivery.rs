//! Push delivery: the outbound seam to the external notification worker.

use std::time::Duration;

use async_trait::async_trait;
use lamed_core::config::DeliveryConfig;
use lamed_core::{LamedError, NotificationIntent, Result};
use serde_json::Value;

/// Delivers one intent. Implementations make exactly one attempt.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Returns the endpoint's JSON response on success.
    async fn deliver(&self, intent: &NotificationIntent) -> Result<Value>;
}

/// POSTs `{routingId, title, body}` to the configured worker URL.
pub struct HttpDelivery {
    endpoint: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpDelivery {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone().filter(|url| !url.trim().is_empty()),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(&self, intent: &NotificationIntent) -> Result<Value> {
        let Some(url) = &self.endpoint else {
            return Err(LamedError::Delivery("no delivery endpoint configured".into()));
        };

        let resp = self
            .client
            .post(url)
            .json(intent)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LamedError::Delivery(format!("send failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LamedError::Delivery(format!("reading response failed: {e}")))?;

        if !status.is_success() {
            return Err(LamedError::Delivery(format!(
                "endpoint returned {status}: {}",
                truncate(&text, 200)
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            LamedError::Delivery(format!("non-JSON response ({e}): {}", truncate(&text, 200)))
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn intent() -> NotificationIntent {
        NotificationIntent {
            routing_id: "player-1".into(),
            title: "💬 New Message".into(),
            body: "hi".into(),
        }
    }

    fn delivery(url: Option<String>) -> HttpDelivery {
        HttpDelivery::new(&DeliveryConfig {
            endpoint: url,
            timeout_secs: 2,
        })
    }

    #[tokio::test]
    async fn test_posts_camel_case_payload() {
        let app = Router::new().route(
            "/",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"echo": body}))
            }),
        );
        let url = serve(app).await;

        let response = delivery(Some(url)).deliver(&intent()).await.unwrap();
        assert_eq!(
            response["echo"],
            json!({"routingId": "player-1", "title": "💬 New Message", "body": "hi"})
        );
    }

    #[tokio::test]
    async fn test_non_json_and_error_status_fail() {
        let app = Router::new()
            .route("/text", post(|| async { "ok" }))
            .route("/boom", post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }));
        let base = serve(app).await;

        let err = delivery(Some(format!("{base}text"))).deliver(&intent()).await.unwrap_err();
        assert!(err.to_string().contains("non-JSON"));

        let err = delivery(Some(format!("{base}boom"))).deliver(&intent()).await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails_without_io() {
        let err = delivery(Some("  ".into())).deliver(&intent()).await.unwrap_err();
        assert!(err.to_string().contains("no delivery endpoint"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("🩺🩺🩺", 2), "🩺🩺");
        assert_eq!(truncate("abc", 10), "abc");
    }
}

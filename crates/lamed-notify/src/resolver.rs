//! Recipient resolution: domain user id → device routing id.

use std::sync::Arc;

use lamed_core::MutationFeed;
use serde_json::Value;

/// Characters the database forbids in keys; ids containing them cannot be looked up.
const FORBIDDEN_KEY_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

pub struct RecipientResolver {
    feed: Arc<dyn MutationFeed>,
    routing_field: String,
}

impl RecipientResolver {
    pub fn new(feed: Arc<dyn MutationFeed>, routing_field: &str) -> Self {
        Self {
            feed,
            routing_field: routing_field.to_string(),
        }
    }

    /// Look up `/users/{user_id}/{routing_field}`.
    ///
    /// Returns `None` for an empty id, a missing or non-string binding, and
    /// for read failures, which are logged here and never propagated.
    pub async fn resolve(&self, user_id: &str) -> Option<String> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return None;
        }
        if user_id.contains(FORBIDDEN_KEY_CHARS) {
            tracing::warn!("⚠️ Refusing to resolve malformed user id '{user_id}'");
            return None;
        }

        let path = format!("/users/{user_id}/{}", self.routing_field);
        match self.feed.get(&path).await {
            Ok(Some(Value::String(id))) if !id.trim().is_empty() => Some(id.trim().to_string()),
            Ok(_) => {
                tracing::warn!("⚠️ No routing id found for user {user_id}");
                None
            }
            Err(e) => {
                tracing::error!("❌ Error fetching routing id for user {user_id}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamed_feed::MemoryFeed;
    use serde_json::json;

    fn feed() -> Arc<MemoryFeed> {
        Arc::new(MemoryFeed::with_data(json!({
            "users": {
                "u1": {"oneSignalPlayerId": "player-1"},
                "u2": {"oneSignalPlayerId": ""},
                "u3": {"oneSignalPlayerId": 17},
                "u4": {"name": "no device"}
            }
        })))
    }

    #[tokio::test]
    async fn test_resolves_binding() {
        let resolver = RecipientResolver::new(feed(), "oneSignalPlayerId");
        assert_eq!(resolver.resolve("u1").await.as_deref(), Some("player-1"));
    }

    #[tokio::test]
    async fn test_absent_bindings_resolve_to_none() {
        let feed = feed();
        let resolver = RecipientResolver::new(feed.clone(), "oneSignalPlayerId");
        for user in ["u2", "u3", "u4", "nobody"] {
            assert_eq!(resolver.resolve(user).await, None, "user {user}");
        }

        let reads = feed.read_count();
        assert_eq!(resolver.resolve("").await, None);
        assert_eq!(resolver.resolve("a/b").await, None);
        assert_eq!(feed.read_count(), reads, "no lookup for empty or malformed ids");
    }

    #[tokio::test]
    async fn test_read_failure_is_swallowed() {
        let feed = feed();
        feed.fail_reads("/users");
        let resolver = RecipientResolver::new(feed, "oneSignalPlayerId");
        assert_eq!(resolver.resolve("u1").await, None);
    }
}

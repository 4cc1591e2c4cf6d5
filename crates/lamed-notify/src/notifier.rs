//! Resolve-then-dispatch, and the pipeline that runs it on the task pool.

use std::sync::Arc;

use lamed_core::Notice;

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::gate::NoticeSink;
use crate::pool::TaskPool;
use crate::resolver::RecipientResolver;

/// Routers and the reminder scanner depend on this, not on the feed client.
pub struct Notifier {
    resolver: RecipientResolver,
    dispatcher: Dispatcher,
}

impl Notifier {
    pub fn new(resolver: RecipientResolver, dispatcher: Dispatcher) -> Self {
        Self { resolver, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Resolve the notice's recipient and dispatch it. Never fails.
    pub async fn notify_user(&self, notice: &Notice) -> DispatchOutcome {
        let routing_id = self.resolver.resolve(&notice.user_id).await;
        if routing_id.is_none() {
            tracing::debug!(
                "🔕 [{}] no device for user '{}', skipping '{}'",
                notice.source,
                notice.user_id,
                notice.title
            );
        }
        self.dispatcher
            .dispatch(routing_id.as_deref(), &notice.title, &notice.body)
            .await
    }
}

/// Submits every routed notice to the task pool as its own unit of work.
#[derive(Clone)]
pub struct Pipeline {
    notifier: Arc<Notifier>,
    pool: TaskPool,
}

impl Pipeline {
    pub fn new(notifier: Arc<Notifier>, pool: TaskPool) -> Self {
        Self { notifier, pool }
    }
}

impl NoticeSink for Pipeline {
    fn submit(&self, notice: Notice) {
        let notifier = self.notifier.clone();
        let label = format!("{} → {}", notice.source, notice.user_id);
        self.pool.submit(label, async move {
            Ok::<_, lamed_core::LamedError>(notifier.notify_user(&notice).await)
        });
    }
}

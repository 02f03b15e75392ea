//! Event routing table
//!
//! Built once at startup and shared read-only afterwards.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use chorus_core::{Envelope, EventKind};

/// Substantive work for one kind of event
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()>;
}

pub type SharedHandler = Arc<dyn EventHandler>;

pub struct EventRouter {
    routes: HashMap<EventKind, SharedHandler>,
}

impl EventRouter {
    pub fn builder() -> EventRouterBuilder {
        EventRouterBuilder::default()
    }

    pub fn handler(&self, kind: EventKind) -> Option<SharedHandler> {
        self.routes.get(&kind).cloned()
    }

    /// Routed kinds, in declaration order of [`EventKind::ALL`]
    pub fn kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.routes.contains_key(kind))
            .collect()
    }
}

#[derive(Default)]
pub struct EventRouterBuilder {
    routes: HashMap<EventKind, SharedHandler>,
}

impl EventRouterBuilder {
    /// Route `kind` to `handler`, replacing any earlier route
    pub fn on(mut self, kind: EventKind, handler: SharedHandler) -> Self {
        self.routes.insert(kind, handler);
        self
    }

    pub fn build(self) -> EventRouter {
        EventRouter { routes: self.routes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::InboundEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _envelope: Envelope) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let counter = Arc::new(Counter::default());
        let router = EventRouter::builder()
            .on(EventKind::ReactionAdd, counter.clone())
            .on(EventKind::MessageCreate, counter.clone())
            .build();

        assert_eq!(router.kinds(), vec![EventKind::MessageCreate, EventKind::ReactionAdd]);
        assert!(router.handler(EventKind::MessageUpdate).is_none());

        let handler = router.handler(EventKind::MessageCreate).unwrap();
        handler
            .handle(Envelope {
                application_id: None,
                event: InboundEvent::Ping,
            })
            .await
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}

//! Notification routing
//!
//! Maps server-assigned subscription tokens to the handler of the
//! owning subscription. Pushes for unknown tokens are dropped and
//! logged — expected whenever an unsubscribe races a push, or a token
//! from a previous connection is still draining.

use std::sync::Arc;

use dashmap::DashMap;
use portside_protocol::{Notification, SubscriptionId};
use serde_json::Value;
use tracing::{debug, warn};

/// Event delivered to a subscription handler, in arrival order.
///
/// The initial snapshot and all following deltas are funneled through
/// the same handler from the connection task, so a consumer can never
/// observe a delta that predates its snapshot.
pub(crate) enum RouterEvent<'a> {
    /// The subscribe response's result payload (token + initial snapshot).
    Snapshot(&'a Value),
    /// A push notification addressed to this subscription's token.
    Notification(&'a Notification),
}

pub(crate) type NotificationHandler = Arc<dyn Fn(RouterEvent<'_>) + Send + Sync>;

#[derive(Default)]
pub(crate) struct NotificationRouter {
    handlers: DashMap<SubscriptionId, NotificationHandler>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: SubscriptionId, handler: NotificationHandler) {
        if self.handlers.insert(token.clone(), handler).is_some() {
            warn!(
                component = "router",
                event = "router.register.replaced",
                token = %token,
                "Replaced an existing handler for subscription token"
            );
        }
    }

    pub fn unregister(&self, token: &str) {
        self.handlers.remove(token);
    }

    /// Deliver a push to its subscription. Returns false if no handler
    /// is registered for the token (the push is dropped).
    pub fn dispatch(&self, note: &Notification) -> bool {
        let Some(token) = note.subscription_id() else {
            warn!(
                component = "router",
                event = "router.dispatch.missing_token",
                method = %note.method,
                "Push notification without a subscription token"
            );
            return false;
        };

        match self.handlers.get(token) {
            Some(entry) => {
                // Clone the handler out so the shard lock is not held
                // while it runs.
                let handler = entry.value().clone();
                drop(entry);
                handler(RouterEvent::Notification(note));
                true
            }
            None => {
                debug!(
                    component = "router",
                    event = "router.dispatch.unmatched",
                    method = %note.method,
                    token = %token,
                    "Dropping push for unknown subscription token"
                );
                false
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}

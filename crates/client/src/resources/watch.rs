//! File/directory watch adapter
//!
//! The watched path is part of the subscription's identity: watching a
//! different path means dropping this handle and subscribing anew.

use serde_json::{json, Value};

use portside_protocol::methods::{self, WatchSubscribeResult};
use portside_protocol::notify::{self, WatchChanged};

use crate::client::Client;
use crate::subscription::{ResourceKind, Subscription, SubscriptionEvent};

pub(crate) struct WatchKind {
    path: String,
}

impl ResourceKind for WatchKind {
    const KIND: &'static str = "watch";
    const SUBSCRIBE: &'static str = methods::WATCH_SUBSCRIBE;
    const UNSUBSCRIBE: &'static str = methods::WATCH_UNSUBSCRIBE;
    const NOTIFICATION: &'static str = notify::WATCH_CHANGED;
    type Snapshot = WatchSubscribeResult;
    type Delta = WatchChanged;

    fn subscribe_params(&self) -> Value {
        json!({ "path": self.path })
    }
}

/// Watch a file or directory on the server for changes.
pub struct FsWatch {
    subscription: Subscription,
}

impl FsWatch {
    /// `on_changed` is invoked with the changed path on every event.
    /// The watch survives reconnects; events that happened while the
    /// connection was down are not replayed.
    pub fn subscribe<F>(client: &Client, path: impl Into<String>, on_changed: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let kind = WatchKind { path: path.into() };
        let subscription = client.subscribe(kind, move |event| {
            if let SubscriptionEvent::Delta(changed) = event {
                on_changed(&changed.path);
            }
        });
        Self { subscription }
    }

    pub fn disable(&self) {
        self.subscription.disable();
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

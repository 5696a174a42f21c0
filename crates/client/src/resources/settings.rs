//! Settings adapter
//!
//! Settings are global (not worktree-scoped). The current value is
//! readable lock-free; a watch channel signals every change.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{json, Value};
use tokio::sync::watch;

use portside_protocol::methods::{self, SettingsSubscribeResult, SettingsUpdateParams};
use portside_protocol::notify::{self, SettingsChanged};
use portside_protocol::types::Settings;

use crate::client::Client;
use crate::error::ClientError;
use crate::subscription::{ResourceKind, Subscription, SubscriptionEvent};

pub(crate) struct SettingsKind;

impl ResourceKind for SettingsKind {
    const KIND: &'static str = "settings";
    const SUBSCRIBE: &'static str = methods::SETTINGS_SUBSCRIBE;
    const UNSUBSCRIBE: &'static str = methods::SETTINGS_UNSUBSCRIBE;
    const NOTIFICATION: &'static str = notify::SETTINGS_CHANGED;
    type Snapshot = SettingsSubscribeResult;
    type Delta = SettingsChanged;

    fn subscribe_params(&self) -> Value {
        json!({})
    }
}

/// Settings as currently known. `settings` is `None` until the first
/// snapshot and again after every teardown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsState {
    pub ready: bool,
    pub settings: Option<Settings>,
}

/// Live view of server settings.
pub struct SettingsHandle {
    client: Client,
    current: Arc<ArcSwap<SettingsState>>,
    changed_rx: watch::Receiver<u64>,
    subscription: Subscription,
}

impl SettingsHandle {
    pub fn subscribe(client: &Client) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(SettingsState::default()));
        let (changed_tx, changed_rx) = watch::channel(0u64);

        let store = current.clone();
        let subscription = client.subscribe(SettingsKind, move |event| {
            store.store(Arc::new(fold_event(event)));
            changed_tx.send_modify(|version| *version += 1);
        });

        Self {
            client: client.clone(),
            current,
            changed_rx,
            subscription,
        }
    }

    /// The latest known state, lock-free.
    pub fn current(&self) -> Arc<SettingsState> {
        self.current.load_full()
    }

    /// Receiver bumped on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changed_rx.clone()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Push a settings change to the server. The authoritative value
    /// comes back through the subscription's change notification.
    pub async fn update(&self, settings: Settings) -> Result<(), ClientError> {
        let _: Value = self
            .client
            .call(methods::SETTINGS_UPDATE, &SettingsUpdateParams { settings })
            .await?;
        Ok(())
    }
}

fn fold_event(event: SubscriptionEvent<SettingsKind>) -> SettingsState {
    match event {
        SubscriptionEvent::Ready(snapshot) => SettingsState {
            ready: true,
            settings: Some(snapshot.settings),
        },
        SubscriptionEvent::Delta(change) => SettingsState {
            ready: true,
            settings: Some(change.settings),
        },
        SubscriptionEvent::NotReady => SettingsState::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_makes_settings_ready() {
        let state = fold_event(SubscriptionEvent::Ready(SettingsSubscribeResult {
            id: "w_tok".to_string(),
            settings: Settings { sandbox: true },
        }));
        assert!(state.ready);
        assert_eq!(state.settings, Some(Settings { sandbox: true }));
    }

    #[test]
    fn change_notification_overwrites_value() {
        let state = fold_event(SubscriptionEvent::Delta(SettingsChanged {
            id: "w_tok".to_string(),
            settings: Settings { sandbox: false },
        }));
        assert_eq!(state.settings, Some(Settings { sandbox: false }));
    }

    #[test]
    fn teardown_resets_to_not_ready() {
        let state = fold_event(SubscriptionEvent::NotReady);
        assert!(!state.ready);
        assert!(state.settings.is_none());
    }
}

//! Session list adapter
//!
//! Combines the generic subscription with local optimistic mutations.
//! Merging is identifier-based and idempotent: a locally created
//! session and the server's later `create` echo collapse into one
//! entry, with the server-confirmed fields winning. A fresh snapshot
//! always replaces the whole list — it is authoritative.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::watch;

use portside_protocol::methods::{
    self, SessionDeleteParams, SessionRenameParams, SessionSubscribeResult,
};
use portside_protocol::notify::{self, SessionListChanged, SessionListOp};
use portside_protocol::types::SessionMeta;

use crate::client::Client;
use crate::error::ClientError;
use crate::subscription::{ResourceKind, Subscription, SubscriptionEvent};

pub(crate) struct SessionListKind;

impl ResourceKind for SessionListKind {
    const KIND: &'static str = "sessions";
    const SUBSCRIBE: &'static str = methods::SESSION_SUBSCRIBE;
    const UNSUBSCRIBE: &'static str = methods::SESSION_UNSUBSCRIBE;
    const NOTIFICATION: &'static str = notify::SESSION_CHANGED;
    type Snapshot = SessionSubscribeResult;
    type Delta = SessionListChanged;

    fn subscribe_params(&self) -> Value {
        json!({})
    }
}

/// The session list as currently known. `ready` is false until a
/// snapshot arrives and drops back to false on every teardown, so
/// consumers never show stale data as live.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionListState {
    pub ready: bool,
    pub sessions: Vec<SessionMeta>,
}

/// Live view of the server's session list.
pub struct SessionList {
    client: Client,
    store: Arc<watch::Sender<SessionListState>>,
    state_rx: watch::Receiver<SessionListState>,
    subscription: Subscription,
}

impl SessionList {
    /// Subscribe to the session list. The subscription follows the
    /// connection: it re-establishes itself after every reconnect.
    pub fn subscribe(client: &Client) -> Self {
        let (tx, state_rx) = watch::channel(SessionListState::default());
        let store = Arc::new(tx);

        let fold_store = store.clone();
        let subscription = client.subscribe(SessionListKind, move |event| {
            fold_store.send_modify(|state| fold_event(state, event));
        });

        Self {
            client: client.clone(),
            store,
            state_rx,
            subscription,
        }
    }

    /// Receiver observing every state change.
    pub fn state(&self) -> watch::Receiver<SessionListState> {
        self.state_rx.clone()
    }

    pub fn current(&self) -> SessionListState {
        self.state_rx.borrow().clone()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Create a session. The returned metadata is inserted into the
    /// local list immediately; the server's `create` notification for
    /// the same id later merges without duplicating.
    pub async fn create(&self) -> Result<SessionMeta, ClientError> {
        let meta: SessionMeta = self.client.call(methods::SESSION_CREATE, &json!({})).await?;
        let optimistic = meta.clone();
        self.store
            .send_modify(|state| apply_create(&mut state.sessions, optimistic));
        Ok(meta)
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), ClientError> {
        let _: Value = self
            .client
            .call(
                methods::SESSION_DELETE,
                &SessionDeleteParams {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        self.store
            .send_modify(|state| apply_delete(&mut state.sessions, session_id));
        Ok(())
    }

    pub async fn rename(&self, session_id: &str, title: &str) -> Result<(), ClientError> {
        let _: Value = self
            .client
            .call(
                methods::SESSION_RENAME,
                &SessionRenameParams {
                    session_id: session_id.to_string(),
                    title: title.to_string(),
                },
            )
            .await?;
        self.store.send_modify(|state| {
            if let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) {
                session.title = title.to_string();
            }
        });
        Ok(())
    }
}

/// Fold one subscription event into the list state.
fn fold_event(state: &mut SessionListState, event: SubscriptionEvent<SessionListKind>) {
    match event {
        SubscriptionEvent::Ready(snapshot) => {
            // Snapshot wins over any optimistic entries.
            state.ready = true;
            state.sessions = snapshot.sessions;
        }
        SubscriptionEvent::Delta(change) => match change.operation {
            SessionListOp::Create => {
                if let Some(session) = change.session {
                    apply_create(&mut state.sessions, session);
                }
            }
            SessionListOp::Update => {
                if let Some(session) = change.session {
                    apply_update(&mut state.sessions, session);
                }
            }
            SessionListOp::Delete => {
                if let Some(session_id) = change.session_id {
                    apply_delete(&mut state.sessions, &session_id);
                }
            }
        },
        SubscriptionEvent::NotReady => {
            state.ready = false;
            state.sessions.clear();
        }
    }
}

/// Prepend a session, removing any existing entry with the same id.
/// Used for both server `create` notifications and optimistic inserts;
/// applying the same create twice leaves exactly one entry, with the
/// later (server-confirmed) fields.
fn apply_create(sessions: &mut Vec<SessionMeta>, session: SessionMeta) {
    sessions.retain(|s| s.id != session.id);
    sessions.insert(0, session);
}

/// Replace an existing session in place. Updating an absent id is a
/// no-op — append is reserved for create.
fn apply_update(sessions: &mut [SessionMeta], session: SessionMeta) {
    if let Some(slot) = sessions.iter_mut().find(|s| s.id == session.id) {
        *slot = session;
    }
}

/// Remove a session. Deleting an absent id is a no-op.
fn apply_delete(sessions: &mut Vec<SessionMeta>, session_id: &str) {
    sessions.retain(|s| s.id != session_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, title: &str) -> SessionMeta {
        SessionMeta {
            id: id.to_string(),
            title: title.to_string(),
            created_at: "2025-11-02T10:00:00Z".to_string(),
            updated_at: "2025-11-02T10:00:00Z".to_string(),
        }
    }

    fn ready_state(sessions: Vec<SessionMeta>) -> SessionListState {
        SessionListState {
            ready: true,
            sessions,
        }
    }

    fn delta(change: SessionListChanged) -> SubscriptionEvent<SessionListKind> {
        SubscriptionEvent::Delta(change)
    }

    fn create_note(session: SessionMeta) -> SessionListChanged {
        SessionListChanged {
            id: "w_tok".to_string(),
            operation: SessionListOp::Create,
            session: Some(session),
            session_id: None,
        }
    }

    #[test]
    fn snapshot_replaces_optimistic_entries() {
        let mut state = ready_state(vec![meta("local", "Optimistic")]);
        fold_event(
            &mut state,
            SubscriptionEvent::Ready(SessionSubscribeResult {
                id: "w_tok".to_string(),
                sessions: vec![meta("a", "A"), meta("b", "B")],
            }),
        );
        assert!(state.ready);
        let ids: Vec<_> = state.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn duplicate_create_keeps_one_entry_with_server_fields() {
        let mut state = ready_state(vec![]);

        // Optimistic insert after session.create returned.
        apply_create(&mut state.sessions, meta("s1", "New Chat"));
        // Server's create echo with confirmed fields.
        fold_event(&mut state, delta(create_note(meta("s1", "Renamed by server"))));

        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].title, "Renamed by server");
    }

    #[test]
    fn create_prepends_new_sessions() {
        let mut state = ready_state(vec![meta("a", "A"), meta("b", "B")]);
        fold_event(&mut state, delta(create_note(meta("c", "C"))));
        let ids: Vec<_> = state.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn update_for_absent_id_is_a_noop() {
        let mut state = ready_state(vec![meta("a", "A")]);
        fold_event(
            &mut state,
            delta(SessionListChanged {
                id: "w_tok".to_string(),
                operation: SessionListOp::Update,
                session: Some(meta("ghost", "Ghost")),
                session_id: None,
            }),
        );
        let ids: Vec<_> = state.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a"]);
    }

    #[test]
    fn update_replaces_in_place() {
        let mut state = ready_state(vec![meta("a", "A"), meta("b", "B")]);
        fold_event(
            &mut state,
            delta(SessionListChanged {
                id: "w_tok".to_string(),
                operation: SessionListOp::Update,
                session: Some(meta("b", "B2")),
                session_id: None,
            }),
        );
        assert_eq!(state.sessions[1].title, "B2");
        assert_eq!(state.sessions.len(), 2);
    }

    #[test]
    fn delete_for_absent_id_is_a_noop() {
        let mut state = ready_state(vec![meta("a", "A")]);
        fold_event(
            &mut state,
            delta(SessionListChanged {
                id: "w_tok".to_string(),
                operation: SessionListOp::Delete,
                session: None,
                session_id: Some("ghost".to_string()),
            }),
        );
        assert_eq!(state.sessions.len(), 1);
    }

    #[test]
    fn not_ready_resets_to_explicit_empty() {
        let mut state = ready_state(vec![meta("a", "A")]);
        fold_event(&mut state, SubscriptionEvent::NotReady);
        assert!(!state.ready);
        assert!(state.sessions.is_empty());
    }
}

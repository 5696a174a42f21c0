//! Subscription driver
//!
//! One driver task per consumer. The task owns a [`Reconciler`] and
//! walks it through enable/disable toggles and connection cycles:
//! subscribe when enabled and connected, tear down locally on
//! disconnect, resubscribe on the next `connected` transition, and
//! unsubscribe-on-arrival when a subscribe response lands after the
//! consumer already disabled.
//!
//! Consumer-facing events (snapshot, deltas, resets) are serialized
//! through an epoch-checked gate: the snapshot and deltas are emitted
//! by the connection task in arrival order, resets by the driver, and
//! anything from a superseded attempt is rejected.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::connection::ConnectionState;
use crate::error::ClientError;
use crate::reconciler::{DisableAction, Reconciler, SubscribeCompletion};
use crate::router::{NotificationHandler, RouterEvent};

const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A subscribable resource kind, known at compile time.
pub trait ResourceKind: Send + Sync + 'static {
    /// Short name used in log fields.
    const KIND: &'static str;
    const SUBSCRIBE: &'static str;
    const UNSUBSCRIBE: &'static str;
    /// Expected push method for this kind.
    const NOTIFICATION: &'static str;
    /// The subscribe response's result payload (token + initial state).
    type Snapshot: DeserializeOwned + Send + 'static;
    /// One push notification's payload.
    type Delta: DeserializeOwned + Send + 'static;

    fn subscribe_params(&self) -> Value;
}

/// Event stream a resource adapter folds into its state.
pub enum SubscriptionEvent<K: ResourceKind> {
    /// Subscribed; carries the authoritative initial snapshot.
    Ready(K::Snapshot),
    /// A push for the live subscription.
    Delta(K::Delta),
    /// Subscription is gone (disabled, failed, or connection lost).
    /// Dependent state must reset to an explicit not-ready condition.
    NotReady,
}

/// Handle owned by the consumer. Dropping it (or calling
/// [`Subscription::disable`]) tears the subscription down; the driver
/// performs the best-effort unsubscribe in the background.
pub struct Subscription {
    enabled_tx: watch::Sender<bool>,
}

impl Subscription {
    pub fn disable(&self) {
        let _ = self.enabled_tx.send(false);
    }

    pub fn enable(&self) {
        let _ = self.enabled_tx.send(true);
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled_tx.borrow()
    }
}

impl Client {
    /// Subscribe to a resource kind. `on_event` is the adapter's fold:
    /// it is invoked with `Ready` / `Delta` in server order and with
    /// `NotReady` on every teardown, and must not block.
    pub fn subscribe<K, F>(&self, kind: K, on_event: F) -> Subscription
    where
        K: ResourceKind,
        F: Fn(SubscriptionEvent<K>) + Send + Sync + 'static,
    {
        let (enabled_tx, enabled_rx) = watch::channel(true);
        let gate = Arc::new(EventGate {
            inner: Mutex::new(GateInner { epoch: 0 }),
            on_event: Box::new(on_event),
        });
        tokio::spawn(run_subscription(self.clone(), kind, gate, enabled_rx));
        Subscription { enabled_tx }
    }
}

struct GateInner {
    epoch: u64,
}

/// Epoch-checked emission gate shared by the connection task (snapshot
/// and deltas) and the driver (resets). The lock makes "reject stale
/// attempt" atomic with emission: after a reset advanced the epoch, no
/// event from the old attempt can reach the consumer.
struct EventGate<K: ResourceKind> {
    inner: Mutex<GateInner>,
    on_event: Box<dyn Fn(SubscriptionEvent<K>) + Send + Sync>,
}

impl<K: ResourceKind> EventGate<K> {
    fn emit_if_current(&self, epoch: u64, event: SubscriptionEvent<K>) {
        let guard = self.inner.lock().unwrap();
        if guard.epoch == epoch {
            (self.on_event)(event);
        } else {
            debug!(
                component = "subscription",
                event = "subscription.event.stale",
                kind = K::KIND,
                attempt_epoch = epoch,
                current_epoch = guard.epoch,
                "Dropping event from a superseded subscribe attempt"
            );
        }
    }

    /// Advance to `epoch` and emit a reset in the same critical section.
    fn reset(&self, epoch: u64) {
        let mut guard = self.inner.lock().unwrap();
        guard.epoch = epoch;
        (self.on_event)(SubscriptionEvent::NotReady);
    }

    fn set_epoch(&self, epoch: u64) {
        self.inner.lock().unwrap().epoch = epoch;
    }
}

/// Build the router handler for one subscribe attempt.
fn attempt_handler<K: ResourceKind>(gate: Arc<EventGate<K>>, epoch: u64) -> NotificationHandler {
    Arc::new(move |event| match event {
        RouterEvent::Snapshot(value) => match serde_json::from_value::<K::Snapshot>(value.clone())
        {
            Ok(snapshot) => gate.emit_if_current(epoch, SubscriptionEvent::Ready(snapshot)),
            Err(err) => warn!(
                component = "subscription",
                event = "subscription.snapshot.invalid",
                kind = K::KIND,
                error = %err,
                "Dropping undecodable subscribe snapshot"
            ),
        },
        RouterEvent::Notification(note) => {
            if note.method != K::NOTIFICATION {
                warn!(
                    component = "subscription",
                    event = "subscription.notification.unexpected_method",
                    kind = K::KIND,
                    method = %note.method,
                    "Push method does not match the subscribed resource"
                );
                return;
            }
            match serde_json::from_value::<K::Delta>(note.params.clone()) {
                Ok(delta) => gate.emit_if_current(epoch, SubscriptionEvent::Delta(delta)),
                Err(err) => warn!(
                    component = "subscription",
                    event = "subscription.notification.invalid",
                    kind = K::KIND,
                    error = %err,
                    "Dropping undecodable push payload"
                ),
            }
        }
    })
}

/// Outcome of waiting on an in-flight subscribe.
enum Attempt {
    Done(Result<Value, ClientError>),
    Cancelled { handle_gone: bool },
}

async fn run_subscription<K: ResourceKind>(
    client: Client,
    kind: K,
    gate: Arc<EventGate<K>>,
    mut enabled_rx: watch::Receiver<bool>,
) {
    let mut status_rx = client.status();
    let mut rec = Reconciler::new();

    loop {
        // Idle until the consumer enables us. A closed channel means
        // the handle was dropped with nothing live: just exit.
        while !*enabled_rx.borrow() {
            if enabled_rx.changed().await.is_err() {
                return;
            }
        }

        // Wait for `connected`, bailing out if disabled meanwhile.
        loop {
            if status_rx.borrow().is_connected() {
                break;
            }
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = enabled_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            if !*enabled_rx.borrow() {
                break;
            }
        }
        if !*enabled_rx.borrow() {
            continue;
        }

        // The generation this attempt is bound to: if it changes, the
        // connection cycled underneath us and the server-side
        // subscription died with it.
        let attempt_generation = status_rx.borrow().generation;

        // Issue the subscribe attempt. The loop invariant guarantees
        // the reconciler is Idle here.
        let Some(epoch) = rec.begin_subscribe() else {
            warn!(
                component = "subscription",
                event = "subscription.subscribe.not_idle",
                kind = K::KIND,
                state = ?rec.state(),
                "Subscribe attempted while an attempt is outstanding"
            );
            continue;
        };
        gate.set_epoch(epoch);
        debug!(
            component = "subscription",
            event = "subscription.subscribe.started",
            kind = K::KIND,
            epoch = epoch,
            "Issuing subscribe request"
        );

        let mut fut: BoxFuture<'static, Result<Value, ClientError>> = {
            let client = client.clone();
            let params = kind.subscribe_params();
            let handler = attempt_handler::<K>(gate.clone(), epoch);
            Box::pin(async move { client.submit_subscribe(K::SUBSCRIBE, params, handler).await })
        };

        let attempt = loop {
            tokio::select! {
                result = &mut fut => break Attempt::Done(result),
                changed = enabled_rx.changed() => {
                    let handle_gone = changed.is_err();
                    if handle_gone || !*enabled_rx.borrow() {
                        break Attempt::Cancelled { handle_gone };
                    }
                }
            }
        };

        match attempt {
            Attempt::Cancelled { handle_gone } => {
                // Disabled while the subscribe was outstanding: mark the
                // attempt stale and let its completion unsubscribe the
                // token on arrival. Never wait for it here.
                rec.disable();
                gate.reset(rec.epoch());
                spawn_stale_reaper::<K>(client.clone(), fut);
                if handle_gone {
                    return;
                }
                continue;
            }
            Attempt::Done(Err(err)) => {
                warn!(
                    component = "subscription",
                    event = "subscription.subscribe.failed",
                    kind = K::KIND,
                    error = %err,
                    "Subscribe request failed"
                );
                rec.subscribe_failed(epoch);
                gate.reset(rec.epoch());
                // No automatic retry: the next `connected` transition
                // drives the resubscribe.
                if !wait_out_connected(&mut status_rx, &mut enabled_rx, attempt_generation).await {
                    return;
                }
                continue;
            }
            Attempt::Done(Ok(value)) => {
                let Some(token) = value.get("id").and_then(Value::as_str).map(str::to_string)
                else {
                    warn!(
                        component = "subscription",
                        event = "subscription.subscribe.missing_token",
                        kind = K::KIND,
                        "Subscribe result carries no subscription token"
                    );
                    rec.subscribe_failed(epoch);
                    gate.reset(rec.epoch());
                    if !wait_out_connected(&mut status_rx, &mut enabled_rx, attempt_generation)
                        .await
                    {
                        return;
                    }
                    continue;
                };

                match rec.subscribe_succeeded(epoch, token.clone()) {
                    SubscribeCompletion::Adopt => {
                        info!(
                            component = "subscription",
                            event = "subscription.active",
                            kind = K::KIND,
                            token = %token,
                            "Subscription active"
                        );
                        if !run_active(
                            &client,
                            &mut rec,
                            &gate,
                            &token,
                            attempt_generation,
                            &mut status_rx,
                            &mut enabled_rx,
                        )
                        .await
                        {
                            return;
                        }
                    }
                    SubscribeCompletion::UnsubscribeStale => {
                        client.router().unregister(&token);
                        best_effort_unsubscribe(&client, K::UNSUBSCRIBE, K::KIND, &token).await;
                    }
                }
            }
        }
    }
}

/// Hold the Active state until disable or disconnect. Returns false if
/// the driver should exit (consumer handle dropped).
async fn run_active<K: ResourceKind>(
    client: &Client,
    rec: &mut Reconciler,
    gate: &Arc<EventGate<K>>,
    token: &str,
    attempt_generation: u64,
    status_rx: &mut watch::Receiver<ConnectionState>,
    enabled_rx: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        let handle_gone = tokio::select! {
            changed = status_rx.changed() => {
                let state = *status_rx.borrow();
                if changed.is_err() {
                    true
                } else if !state.is_connected() || state.generation != attempt_generation {
                    // Connection gone (possibly already back under a
                    // new generation): drop the token locally, no
                    // unsubscribe call — the server saw the socket close.
                    info!(
                        component = "subscription",
                        event = "subscription.connection_lost",
                        kind = K::KIND,
                        token = %token,
                        "Connection lost, tearing down subscription state"
                    );
                    rec.connection_lost();
                    client.router().unregister(token);
                    gate.reset(rec.epoch());
                    return true;
                } else {
                    continue;
                }
            }
            changed = enabled_rx.changed() => {
                if changed.is_err() {
                    true
                } else if !*enabled_rx.borrow() {
                    false
                } else {
                    continue;
                }
            }
        };

        // Disabled, or the handle is gone: unregister first so no
        // further delta reaches the consumer, then reset, then the
        // best-effort unsubscribe round trip.
        match rec.disable() {
            DisableAction::Unsubscribe(live) => {
                client.router().unregister(&live);
                gate.reset(rec.epoch());
                best_effort_unsubscribe(client, K::UNSUBSCRIBE, K::KIND, &live).await;
                rec.unsubscribe_finished();
            }
            _ => {
                client.router().unregister(token);
                gate.reset(rec.epoch());
            }
        }
        return !handle_gone;
    }
}

/// Wait until the connection leaves `connected` — or has already
/// cycled past the given generation — or the consumer disables.
/// Returns false if the driver should exit.
async fn wait_out_connected(
    status_rx: &mut watch::Receiver<ConnectionState>,
    enabled_rx: &mut watch::Receiver<bool>,
    seen_generation: u64,
) -> bool {
    loop {
        let state = *status_rx.borrow();
        if !state.is_connected() || state.generation != seen_generation || !*enabled_rx.borrow() {
            return true;
        }
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            changed = enabled_rx.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Reap a subscribe attempt that was cancelled while in flight: when
/// the response eventually lands with a token, unsubscribe it exactly
/// once; it must never be treated as live.
fn spawn_stale_reaper<K: ResourceKind>(
    client: Client,
    fut: BoxFuture<'static, Result<Value, ClientError>>,
) {
    tokio::spawn(async move {
        if let Ok(value) = fut.await {
            if let Some(token) = value.get("id").and_then(Value::as_str) {
                info!(
                    component = "subscription",
                    event = "subscription.stale_token.reaped",
                    kind = K::KIND,
                    token = %token,
                    "Subscribe completed after disable, unsubscribing its token"
                );
                client.router().unregister(token);
                best_effort_unsubscribe(&client, K::UNSUBSCRIBE, K::KIND, token).await;
            }
        }
    });
}

async fn best_effort_unsubscribe(client: &Client, method: &str, kind: &str, token: &str) {
    let params = json!({ "id": token });
    if let Err(err) = client
        .request_with_timeout(method, params, UNSUBSCRIBE_TIMEOUT)
        .await
    {
        // Not retried: the server also observes the socket closing.
        debug!(
            component = "subscription",
            event = "subscription.unsubscribe.failed",
            kind = kind,
            token = %token,
            error = %err,
            "Best-effort unsubscribe failed"
        );
    }
}

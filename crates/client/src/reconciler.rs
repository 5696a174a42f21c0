//! Subscription lifecycle reconciliation
//!
//! One `Reconciler` per consumer drives the subscribe →
//! token → unsubscribe sequence and re-runs it across connection
//! cycles. The state machine is pure and synchronous; the async driver
//! in [`crate::subscription`] owns one instance and feeds it events.
//!
//! Every subscribe attempt is guarded by a monotonically increasing
//! epoch. A completion whose epoch no longer matches was superseded —
//! by a disable or a connection cycle — and its token must be
//! unsubscribed rather than adopted.

use portside_protocol::SubscriptionId;

/// Lifecycle state of one consumer's subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubState {
    Idle,
    Subscribing,
    Active(SubscriptionId),
    Unsubscribing,
}

/// What the driver must do after a subscribe attempt completed.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SubscribeCompletion {
    /// The attempt is current: the token is now live.
    Adopt,
    /// The attempt was cancelled or superseded while in flight. The
    /// token must be unsubscribed (best-effort) and never stored.
    UnsubscribeStale,
}

/// What the driver must do on disable.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DisableAction {
    /// Nothing was live or in flight.
    Noop,
    /// A live token must be unsubscribed.
    Unsubscribe(SubscriptionId),
    /// A subscribe is in flight; its completion is now stale and will
    /// unsubscribe-on-arrival. Do not wait for it.
    CancelInFlight,
}

#[derive(Debug)]
pub(crate) struct Reconciler {
    state: SubState,
    epoch: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            state: SubState::Idle,
            epoch: 0,
        }
    }

    pub fn state(&self) -> &SubState {
        &self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start a subscribe attempt. Returns the guarding epoch, or `None`
    /// if an attempt is already in flight or a token is live — at most
    /// one outstanding subscribe per consumer.
    pub fn begin_subscribe(&mut self) -> Option<u64> {
        if self.state != SubState::Idle {
            return None;
        }
        self.epoch += 1;
        self.state = SubState::Subscribing;
        Some(self.epoch)
    }

    /// A subscribe attempt returned a token.
    pub fn subscribe_succeeded(
        &mut self,
        epoch: u64,
        token: SubscriptionId,
    ) -> SubscribeCompletion {
        if self.epoch == epoch && self.state == SubState::Subscribing {
            self.state = SubState::Active(token);
            SubscribeCompletion::Adopt
        } else {
            SubscribeCompletion::UnsubscribeStale
        }
    }

    /// A subscribe attempt failed. Returns true if it was the current
    /// attempt (stale failures are discarded).
    pub fn subscribe_failed(&mut self, epoch: u64) -> bool {
        if self.epoch == epoch && self.state == SubState::Subscribing {
            self.state = SubState::Idle;
            true
        } else {
            false
        }
    }

    /// The consumer disabled the subscription. Any invalidating
    /// transition bumps the epoch so events from the torn-down attempt
    /// are recognizably stale.
    pub fn disable(&mut self) -> DisableAction {
        match std::mem::replace(&mut self.state, SubState::Idle) {
            SubState::Active(token) => {
                self.epoch += 1;
                self.state = SubState::Unsubscribing;
                DisableAction::Unsubscribe(token)
            }
            SubState::Subscribing => {
                self.epoch += 1;
                DisableAction::CancelInFlight
            }
            SubState::Idle | SubState::Unsubscribing => DisableAction::Noop,
        }
    }

    /// The best-effort unsubscribe round trip finished (or was skipped).
    pub fn unsubscribe_finished(&mut self) {
        if self.state == SubState::Unsubscribing {
            self.state = SubState::Idle;
        }
    }

    /// The connection left `connected`. Local state is torn down with
    /// no unsubscribe call — the server observes the socket closing.
    /// Returns true if the consumer should be resubscribed once the
    /// connection is back.
    pub fn connection_lost(&mut self) -> bool {
        match self.state {
            SubState::Active(_) | SubState::Subscribing => {
                self.epoch += 1;
                self.state = SubState::Idle;
                true
            }
            SubState::Idle | SubState::Unsubscribing => false,
        }
    }
}

//! Request/response correlation
//!
//! Pending requests are keyed by their client-allocated id. The table
//! is owned exclusively by the connection task; every entry leaves the
//! table through exactly one of: a matching response, an explicit
//! cancel, or a connection loss failing everything at once.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ClientError;
use crate::router::NotificationHandler;

pub(crate) type ResponseSender = oneshot::Sender<Result<Value, ClientError>>;

/// A request awaiting its response.
pub(crate) struct PendingRequest {
    pub reply: ResponseSender,
    /// For subscribe requests: handler to register under the returned
    /// token before the reply resolves, so no push can slip past it.
    pub on_subscribed: Option<NotificationHandler>,
}

#[derive(Default)]
pub(crate) struct Correlator {
    pending: HashMap<u64, PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly sent request. Ids come from a process-scoped
    /// counter, so a collision means a caller bug.
    pub fn track(&mut self, id: u64, request: PendingRequest) {
        let replaced = self.pending.insert(id, request);
        debug_assert!(replaced.is_none(), "duplicate in-flight request id {id}");
    }

    /// Take the pending entry for a response id, if any.
    pub fn take(&mut self, id: u64) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    /// Drop a pending entry without resolving it (caller timed out).
    pub fn cancel(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Fail every in-flight request with `ConnectionLost` and empty the
    /// table. The single cleanup point that guarantees no request hangs
    /// across a dropped connection.
    pub fn fail_all(&mut self) {
        let count = self.pending.len();
        if count > 0 {
            debug!(
                component = "correlator",
                event = "correlator.fail_all",
                pending = count,
                "Failing in-flight requests after disconnect"
            );
        }
        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(ClientError::ConnectionLost));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

//! Client handle
//!
//! Cheaply cloneable; all clones share one connection task. The handle
//! allocates request ids, performs the fast not-connected check, and
//! forwards everything else to the task that owns the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::Config;
use crate::connection::{connection_task, Command, ConnectionState};
use crate::error::ClientError;
use crate::router::{NotificationHandler, NotificationRouter};

const COMMAND_CHANNEL_CAPACITY: usize = 256;

struct ClientInner {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<ConnectionState>,
    next_id: AtomicU64,
    router: Arc<NotificationRouter>,
}

/// Handle to the shared connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create the client and spawn its connection task. No connection
    /// is attempted until [`Client::connect`] is called.
    pub fn new(config: Config) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ConnectionState::initial());
        let router = Arc::new(NotificationRouter::new());

        tokio::spawn(connection_task(
            config,
            cmd_rx,
            status_tx,
            router.clone(),
        ));

        Self {
            inner: Arc::new(ClientInner {
                cmd_tx,
                status_rx,
                next_id: AtomicU64::new(1),
                router,
            }),
        }
    }

    /// Start connecting. Idempotent: a no-op while already connecting
    /// or connected. Returns without waiting for the connection; use
    /// [`Client::wait_until_connected`] to block on it.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner
            .cmd_tx
            .send(Command::Connect)
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Close the connection and stop reconnecting. Every in-flight
    /// request fails with `ConnectionLost`.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.inner
            .cmd_tx
            .send(Command::Disconnect)
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Current status plus a receiver for future transitions. The
    /// carried generation counter distinguishes one `connected` stretch
    /// from the next across fast reconnect cycles.
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_rx.clone()
    }

    /// Wait until the connection reaches `connected`.
    pub async fn wait_until_connected(&self) -> Result<(), ClientError> {
        let mut rx = self.status();
        rx.wait_for(|state| state.is_connected())
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    /// Issue a request and wait for its response. Pends until the
    /// response arrives or the connection signals loss.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.request_inner(method, params, None, None).await
    }

    /// Like [`Client::request`] with a caller-supplied deadline. On
    /// timeout the pending entry is cancelled so it cannot leak.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        self.request_inner(method, params, Some(timeout), None).await
    }

    /// Typed request: serialize params, deserialize the result.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ClientError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|err| ClientError::Protocol(format!("invalid {method} params: {err}")))?;
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|err| ClientError::Protocol(format!("invalid {method} result: {err}")))
    }

    /// Typed request with a deadline.
    pub async fn call_with_timeout<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<R, ClientError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|err| ClientError::Protocol(format!("invalid {method} params: {err}")))?;
        let value = self.request_with_timeout(method, params, timeout).await?;
        serde_json::from_value(value)
            .map_err(|err| ClientError::Protocol(format!("invalid {method} result: {err}")))
    }

    /// Subscribe request: the handler is registered under the returned
    /// token by the connection task, atomically with response delivery.
    pub(crate) async fn submit_subscribe(
        &self,
        method: &str,
        params: Value,
        handler: NotificationHandler,
    ) -> Result<Value, ClientError> {
        self.request_inner(method, params, None, Some(handler)).await
    }

    pub(crate) fn router(&self) -> &Arc<NotificationRouter> {
        &self.inner.router
    }

    async fn request_inner(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
        on_subscribed: Option<NotificationHandler>,
    ) -> Result<Value, ClientError> {
        if !self.inner.status_rx.borrow().is_connected() {
            return Err(ClientError::NotConnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .cmd_tx
            .send(Command::Request {
                id,
                method: method.to_string(),
                params,
                reply: reply_tx,
                on_subscribed,
            })
            .await
            .map_err(|_| ClientError::Closed)?;

        match timeout {
            None => reply_rx.await.map_err(|_| ClientError::Closed)?,
            Some(deadline) => match tokio::time::timeout(deadline, reply_rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(ClientError::Closed),
                Err(_) => {
                    // Deadline elapsed: drop the pending entry so the
                    // table cannot leak; a late response is then logged
                    // as unmatched and discarded.
                    let _ = self.inner.cmd_tx.try_send(Command::Cancel { id });
                    Err(ClientError::Timeout)
                }
            },
        }
    }
}

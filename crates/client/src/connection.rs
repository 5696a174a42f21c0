//! Connection state machine
//!
//! A background task owns the WebSocket plus the two shared tables
//! (pending requests, token → handler) and serializes every mutation
//! of them. Commands arrive over an mpsc channel; status transitions
//! are broadcast on a watch channel that the request layer and every
//! subscription driver listen to.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use portside_protocol::rpc::{self, Inbound, Request};

use crate::config::Config;
use crate::correlator::{Correlator, PendingRequest, ResponseSender};
use crate::error::ClientError;
use crate::router::{NotificationHandler, NotificationRouter, RouterEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle status, broadcast on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus a generation counter that increments every time the
/// connection reaches `connected`. Watchers compare generations to
/// detect a full disconnect/reconnect cycle even when the intermediate
/// status value was coalesced away by the watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub generation: u64,
}

impl ConnectionState {
    pub(crate) fn initial() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            generation: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Commands from client handles to the connection task.
pub(crate) enum Command {
    Request {
        id: u64,
        method: String,
        params: Value,
        reply: ResponseSender,
        on_subscribed: Option<NotificationHandler>,
    },
    Cancel {
        id: u64,
    },
    Connect,
    Disconnect,
}

/// What to do with the socket after one event was handled.
enum SocketOutcome {
    Keep,
    /// Tear the socket down and move to this status.
    Drop(ConnectionStatus),
    /// Tear down and exit the task (all handles gone).
    Exit,
}

fn set_status(status_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let previous = *status_tx.borrow();
    if previous != next {
        info!(
            component = "connection",
            event = "connection.status",
            from = previous.status.as_str(),
            to = next.status.as_str(),
            generation = next.generation,
            "Connection status changed"
        );
        status_tx.send_replace(next);
    }
}

/// The main background task owning the socket and both shared tables.
pub(crate) async fn connection_task(
    config: Config,
    mut cmd_rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<ConnectionState>,
    router: Arc<NotificationRouter>,
) {
    let mut correlator = Correlator::new();
    let mut socket: Option<WsStream> = None;
    let mut attempts: u32 = 0;
    let mut generation: u64 = 0;
    let mut want_connected = false;
    let url = config.request_url();

    loop {
        if let Some(ws) = socket.as_mut() {
            let outcome = tokio::select! {
                cmd = cmd_rx.recv() => {
                    handle_command_connected(
                        cmd,
                        ws,
                        &mut correlator,
                        &mut want_connected,
                    )
                    .await
                }
                frame = ws.next() => {
                    handle_socket_event(frame, ws, &mut correlator, &router).await
                }
            };

            match outcome {
                SocketOutcome::Keep => {}
                SocketOutcome::Drop(next) => {
                    socket = None;
                    correlator.fail_all();
                    set_status(
                        &status_tx,
                        ConnectionState {
                            status: next,
                            generation,
                        },
                    );
                }
                SocketOutcome::Exit => {
                    socket = None;
                    correlator.fail_all();
                    set_status(
                        &status_tx,
                        ConnectionState {
                            status: ConnectionStatus::Disconnected,
                            generation,
                        },
                    );
                    return;
                }
            }
        } else if want_connected {
            if status_tx.borrow().status == ConnectionStatus::Disconnected {
                set_status(
                    &status_tx,
                    ConnectionState {
                        status: ConnectionStatus::Connecting,
                        generation,
                    },
                );
            }

            match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => {
                    generation += 1;
                    info!(
                        component = "connection",
                        event = "connection.established",
                        attempts = attempts,
                        generation = generation,
                        "WebSocket connection established"
                    );
                    socket = Some(stream);
                    attempts = 0;
                    set_status(
                        &status_tx,
                        ConnectionState {
                            status: ConnectionStatus::Connected,
                            generation,
                        },
                    );
                }
                Ok(Err(err)) => {
                    warn!(
                        component = "connection",
                        event = "connection.attempt.failed",
                        attempt = attempts + 1,
                        error = %err,
                        "Connection attempt failed"
                    );
                    attempts += 1;
                    if !retry_or_give_up(
                        &config,
                        attempts,
                        generation,
                        &mut cmd_rx,
                        &mut correlator,
                        &mut want_connected,
                        &status_tx,
                    )
                    .await
                    {
                        return;
                    }
                }
                Err(_) => {
                    warn!(
                        component = "connection",
                        event = "connection.attempt.timeout",
                        attempt = attempts + 1,
                        "Connection attempt timed out"
                    );
                    attempts += 1;
                    if !retry_or_give_up(
                        &config,
                        attempts,
                        generation,
                        &mut cmd_rx,
                        &mut correlator,
                        &mut want_connected,
                        &status_tx,
                    )
                    .await
                    {
                        return;
                    }
                }
            }
        } else {
            // Disconnected and staying that way until an explicit connect.
            match cmd_rx.recv().await {
                Some(Command::Request { reply, .. }) => {
                    let _ = reply.send(Err(ClientError::NotConnected));
                }
                Some(Command::Cancel { id }) => {
                    correlator.cancel(id);
                }
                Some(Command::Connect) => {
                    want_connected = true;
                    attempts = 0;
                }
                Some(Command::Disconnect) => {}
                None => return,
            }
        }
    }
}

async fn handle_command_connected(
    cmd: Option<Command>,
    ws: &mut WsStream,
    correlator: &mut Correlator,
    want_connected: &mut bool,
) -> SocketOutcome {
    match cmd {
        Some(Command::Request {
            id,
            method,
            params,
            reply,
            on_subscribed,
        }) => {
            let frame = Request::new(id, method.as_str(), params);
            let raw = match serde_json::to_string(&frame) {
                Ok(raw) => raw,
                Err(err) => {
                    let _ = reply.send(Err(ClientError::Protocol(format!(
                        "failed to serialize request: {err}"
                    ))));
                    return SocketOutcome::Keep;
                }
            };
            correlator.track(id, PendingRequest { reply, on_subscribed });
            debug!(
                component = "connection",
                event = "connection.request.sent",
                request_id = id,
                method = %method,
                "Sending request"
            );
            if let Err(err) = ws.send(Message::Text(raw.into())).await {
                warn!(
                    component = "connection",
                    event = "connection.send.failed",
                    error = %err,
                    "WebSocket send failed, dropping connection"
                );
                return SocketOutcome::Drop(ConnectionStatus::Reconnecting);
            }
            SocketOutcome::Keep
        }
        Some(Command::Cancel { id }) => {
            if correlator.cancel(id) {
                debug!(
                    component = "connection",
                    event = "connection.request.cancelled",
                    request_id = id,
                    "Cancelled pending request"
                );
            }
            SocketOutcome::Keep
        }
        Some(Command::Connect) => SocketOutcome::Keep,
        Some(Command::Disconnect) => {
            *want_connected = false;
            let _ = ws.close(None).await;
            SocketOutcome::Drop(ConnectionStatus::Disconnected)
        }
        None => {
            let _ = ws.close(None).await;
            SocketOutcome::Exit
        }
    }
}

async fn handle_socket_event(
    frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ws: &mut WsStream,
    correlator: &mut Correlator,
    router: &NotificationRouter,
) -> SocketOutcome {
    match frame {
        Some(Ok(Message::Text(text))) => {
            handle_frame(text.as_str(), correlator, router);
            SocketOutcome::Keep
        }
        Some(Ok(Message::Ping(payload))) => {
            let _ = ws.send(Message::Pong(payload)).await;
            SocketOutcome::Keep
        }
        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => {
            SocketOutcome::Keep
        }
        Some(Ok(Message::Close(_))) | None => {
            info!(
                component = "connection",
                event = "connection.socket.closed",
                "Server closed the connection"
            );
            SocketOutcome::Drop(ConnectionStatus::Reconnecting)
        }
        Some(Err(err)) => {
            warn!(
                component = "connection",
                event = "connection.socket.error",
                error = %err,
                "WebSocket error, dropping connection"
            );
            SocketOutcome::Drop(ConnectionStatus::Reconnecting)
        }
    }
}

/// After a failed attempt: either back off (answering commands while
/// waiting) or give up if the retry budget is spent. Returns false if
/// the task should exit.
async fn retry_or_give_up(
    config: &Config,
    attempts: u32,
    generation: u64,
    cmd_rx: &mut mpsc::Receiver<Command>,
    correlator: &mut Correlator,
    want_connected: &mut bool,
    status_tx: &watch::Sender<ConnectionState>,
) -> bool {
    if let Some(max) = config.max_reconnect_attempts {
        if attempts >= max {
            warn!(
                component = "connection",
                event = "connection.retries.exhausted",
                attempts = attempts,
                "Giving up after repeated connection failures"
            );
            *want_connected = false;
            set_status(
                status_tx,
                ConnectionState {
                    status: ConnectionStatus::Disconnected,
                    generation,
                },
            );
            return true;
        }
    }

    set_status(
        status_tx,
        ConnectionState {
            status: ConnectionStatus::Reconnecting,
            generation,
        },
    );
    let delay = config.backoff_delay(attempts.saturating_sub(1));
    debug!(
        component = "connection",
        event = "connection.backoff",
        delay_ms = delay.as_millis() as u64,
        "Waiting before next connection attempt"
    );

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Request { reply, .. }) => {
                    let _ = reply.send(Err(ClientError::NotConnected));
                }
                Some(Command::Cancel { id }) => {
                    correlator.cancel(id);
                }
                Some(Command::Connect) => {}
                Some(Command::Disconnect) => {
                    *want_connected = false;
                    set_status(
                        status_tx,
                        ConnectionState {
                            status: ConnectionStatus::Disconnected,
                            generation,
                        },
                    );
                    return true;
                }
                None => return false,
            }
        }
    }
}

/// Decode one inbound frame and hand it to the right table. A frame
/// that fails to decode is logged and dropped; the connection stays up.
fn handle_frame(raw: &str, correlator: &mut Correlator, router: &NotificationRouter) {
    match rpc::parse_inbound(raw) {
        Ok(Inbound::Response(resp)) => {
            let Some(entry) = correlator.take(resp.id) else {
                debug!(
                    component = "connection",
                    event = "connection.response.unmatched",
                    request_id = resp.id,
                    "Response for unknown request id (cancelled or timed out)"
                );
                return;
            };

            let outcome = match (resp.result, resp.error) {
                (_, Some(err)) => Err(ClientError::from(err)),
                (Some(value), None) => Ok(value),
                (None, None) => Err(ClientError::Protocol(
                    "response carries neither result nor error".to_string(),
                )),
            };

            // Subscribe responses: register the handler under the new
            // token and deliver the snapshot before resolving the
            // caller, so no following push can outrun it.
            if let (Ok(value), Some(handler)) = (&outcome, entry.on_subscribed.as_ref()) {
                if let Some(token) = value.get("id").and_then(Value::as_str) {
                    router.register(token.to_string(), handler.clone());
                    handler(RouterEvent::Snapshot(value));
                }
            }

            let _ = entry.reply.send(outcome);
        }
        Ok(Inbound::Notification(note)) => {
            router.dispatch(&note);
        }
        Err(err) => {
            warn!(
                component = "connection",
                event = "connection.frame.malformed",
                error = %err,
                frame_bytes = raw.len(),
                "Dropping malformed frame"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portside_protocol::rpc::JSONRPC_VERSION;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[test]
    fn frame_resolves_pending_request() {
        let mut correlator = Correlator::new();
        let router = NotificationRouter::new();
        let (tx, mut rx) = oneshot::channel();
        correlator.track(
            9,
            PendingRequest {
                reply: tx,
                on_subscribed: None,
            },
        );

        handle_frame(
            r#"{"jsonrpc":"2.0","id":9,"result":{"ok":true}}"#,
            &mut correlator,
            &router,
        );

        match rx.try_recv() {
            Ok(Ok(value)) => assert_eq!(value, json!({"ok": true})),
            other => panic!("expected resolved request, got {:?}", other),
        }
        assert_eq!(correlator.len(), 0);
    }

    #[test]
    fn error_response_surfaces_rpc_error() {
        let mut correlator = Correlator::new();
        let router = NotificationRouter::new();
        let (tx, mut rx) = oneshot::channel();
        correlator.track(
            2,
            PendingRequest {
                reply: tx,
                on_subscribed: None,
            },
        );

        handle_frame(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32000,"message":"nope"}}"#,
            &mut correlator,
            &router,
        );

        match rx.try_recv() {
            Ok(Err(ClientError::Rpc { code, message })) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "nope");
            }
            other => panic!("expected Rpc error, got {:?}", other),
        }
    }

    #[test]
    fn subscribe_response_registers_handler_and_delivers_snapshot_first() {
        let mut correlator = Correlator::new();
        let router = NotificationRouter::new();
        let (tx, mut rx) = oneshot::channel();

        let snapshots = Arc::new(AtomicUsize::new(0));
        let snapshots_clone = snapshots.clone();
        let handler: NotificationHandler = Arc::new(move |event| {
            if matches!(event, RouterEvent::Snapshot(_)) {
                snapshots_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        correlator.track(
            4,
            PendingRequest {
                reply: tx,
                on_subscribed: Some(handler),
            },
        );

        handle_frame(
            r#"{"jsonrpc":"2.0","id":4,"result":{"id":"w_tok9","sessions":[]}}"#,
            &mut correlator,
            &router,
        );

        // Snapshot was delivered through the handler before the reply.
        assert_eq!(snapshots.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().expect("reply resolved").is_ok());

        // The token now routes pushes.
        let note = portside_protocol::Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: "session.changed".to_string(),
            params: json!({"id": "w_tok9", "operation": "delete", "session_id": "s1"}),
        };
        assert!(router.dispatch(&note));
    }

    #[test]
    fn malformed_frame_is_dropped_quietly() {
        let mut correlator = Correlator::new();
        let router = NotificationRouter::new();
        handle_frame("{malformed", &mut correlator, &router);
        assert_eq!(correlator.len(), 0);
    }

    #[test]
    fn response_with_no_body_fails_as_protocol_error() {
        let mut correlator = Correlator::new();
        let router = NotificationRouter::new();
        let (tx, mut rx) = oneshot::channel();
        correlator.track(
            6,
            PendingRequest {
                reply: tx,
                on_subscribed: None,
            },
        );

        handle_frame(r#"{"jsonrpc":"2.0","id":6}"#, &mut correlator, &router);

        match rx.try_recv() {
            Ok(Err(ClientError::Protocol(_))) => {}
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }
}

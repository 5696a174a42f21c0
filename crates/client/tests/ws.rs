//! End-to-end tests against an in-process WebSocket server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use portside_client::resources::{FsWatch, SessionList};
use portside_client::{Client, ClientError, Config, ConnectionStatus};

type ServerWs = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.expect("accept tcp");
    accept_async(stream).await.expect("ws handshake")
}

/// Read frames until a request arrives, answering pings on the way.
async fn recv_request(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await.expect("socket open").expect("frame") {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload)).await.expect("send pong");
            }
            Message::Close(_) => panic!("unexpected close frame"),
            _ => {}
        }
    }
}

async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

fn reply_ok(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn session(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "created_at": "2025-11-02T10:00:00Z",
        "updated_at": "2025-11-02T10:00:00Z"
    })
}

fn test_config(url: &str) -> Config {
    let mut config = Config::new(url);
    config.reconnect_initial_delay = Duration::from_millis(50);
    config.reconnect_max_delay = Duration::from_millis(200);
    config
}

#[tokio::test]
async fn unary_request_roundtrip() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        assert_eq!(req["method"], "git.status");
        send_json(
            &mut ws,
            reply_ok(&req["id"], json!({"staged": [], "unstaged": []})),
        )
        .await;
        // Hold the socket open until the client is done.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = Client::new(test_config(&url));
    client.connect().await.expect("connect");
    client.wait_until_connected().await.expect("connected");

    let status = client.git_status().await.expect("git.status");
    assert!(status.staged.is_empty());
    assert!(status.unstaged.is_empty());

    server.await.expect("server task");
}

#[tokio::test]
async fn request_while_disconnected_fails_immediately() {
    // Never connected: the request must not hang.
    let client = Client::new(test_config("ws://127.0.0.1:9"));
    let err = client
        .request("git.status", json!({}))
        .await
        .expect_err("should fail");
    assert_eq!(err, ClientError::NotConnected);
}

#[tokio::test]
async fn disconnect_fails_all_pending_requests() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        // Swallow two requests, reply to neither, then cut the link.
        let _ = recv_request(&mut ws).await;
        let _ = recv_request(&mut ws).await;
        drop(ws);
    });

    let client = Client::new(test_config(&url));
    client.connect().await.expect("connect");
    client.wait_until_connected().await.expect("connected");

    let (first, second) = tokio::join!(
        client.request("git.status", json!({})),
        client.git_diff("a.rs", true),
    );
    assert_eq!(first.expect_err("first pending"), ClientError::ConnectionLost);
    assert_eq!(
        second.expect_err("second pending"),
        ClientError::ConnectionLost
    );

    server.await.expect("server task");
}

#[tokio::test]
async fn request_timeout_cancels_the_pending_entry() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let _ = recv_request(&mut ws).await;
        // Never reply; keep the connection alive well past the deadline.
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(ws);
    });

    let client = Client::new(test_config(&url));
    client.connect().await.expect("connect");
    client.wait_until_connected().await.expect("connected");

    let err = client
        .request_with_timeout("git.status", json!({}), Duration::from_millis(100))
        .await
        .expect_err("should time out");
    assert_eq!(err, ClientError::Timeout);

    server.abort();
}

#[tokio::test]
async fn explicit_disconnect_is_terminal_until_reconnect() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        // First connection: client disconnects it explicitly.
        let _ws = accept(&listener).await;
        // Second connection: after an explicit connect() again.
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        send_json(
            &mut ws,
            reply_ok(&req["id"], json!({"staged": [], "unstaged": []})),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = Client::new(test_config(&url));
    client.connect().await.expect("connect");
    client.wait_until_connected().await.expect("connected");

    client.disconnect().await.expect("disconnect");
    let mut status = client.status();
    status
        .wait_for(|s| s.status == ConnectionStatus::Disconnected)
        .await
        .expect("status");

    // No automatic reconnect after an explicit disconnect.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        client.status().borrow().status,
        ConnectionStatus::Disconnected
    );
    assert_eq!(
        client
            .request("git.status", json!({}))
            .await
            .expect_err("still down"),
        ClientError::NotConnected
    );

    client.connect().await.expect("reconnect");
    client.wait_until_connected().await.expect("connected again");
    client.git_status().await.expect("request works again");

    server.await.expect("server task");
}

#[tokio::test]
async fn session_subscription_survives_a_reconnect() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        // First connection: subscribe, snapshot [A, B], then create C.
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        assert_eq!(req["method"], "session.subscribe");
        send_json(
            &mut ws,
            reply_ok(
                &req["id"],
                json!({"id": "t1", "sessions": [session("a", "A"), session("b", "B")]}),
            ),
        )
        .await;
        send_json(
            &mut ws,
            json!({
                "jsonrpc": "2.0",
                "method": "session.changed",
                "params": {"id": "t1", "operation": "create", "session": session("c", "C")}
            }),
        )
        .await;
        // Let the delta land, then cut the link.
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(ws);

        // Second connection: fresh subscribe gets a fresh token and the
        // server's view as snapshot.
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        assert_eq!(req["method"], "session.subscribe");
        send_json(
            &mut ws,
            reply_ok(
                &req["id"],
                json!({"id": "t2", "sessions": [session("c", "C"), session("a", "A"), session("b", "B")]}),
            ),
        )
        .await;
        // A push still keyed to the dead token must be dropped.
        send_json(
            &mut ws,
            json!({
                "jsonrpc": "2.0",
                "method": "session.changed",
                "params": {"id": "t1", "operation": "create", "session": session("x", "Stale")}
            }),
        )
        .await;
        // A push keyed to the live token is applied.
        send_json(
            &mut ws,
            json!({
                "jsonrpc": "2.0",
                "method": "session.changed",
                "params": {"id": "t2", "operation": "update", "session": session("c", "C-updated")}
            }),
        )
        .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let client = Client::new(test_config(&url));
    client.connect().await.expect("connect");

    let list = SessionList::subscribe(&client);
    let mut state = list.state();

    // Snapshot plus the create delta.
    state
        .wait_for(|s| s.ready && s.sessions.len() == 3)
        .await
        .expect("first cycle state");
    {
        let current = state.borrow();
        let ids: Vec<_> = current.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    // After the reconnect cycle: resubscribed under the fresh token and
    // the update applied; the stale-token push never surfaced.
    state
        .wait_for(|s| {
            s.ready
                && s.sessions
                    .iter()
                    .any(|sess| sess.id == "c" && sess.title == "C-updated")
        })
        .await
        .expect("second cycle state");
    {
        let current = state.borrow();
        assert_eq!(current.sessions.len(), 3);
        assert!(current.sessions.iter().all(|sess| sess.id != "x"));
    }

    server.abort();
}

#[tokio::test]
async fn subscription_resets_to_not_ready_while_down() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        send_json(
            &mut ws,
            reply_ok(&req["id"], json!({"id": "t1", "sessions": [session("a", "A")]})),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Drop the connection and never come back.
        drop(ws);
        drop(listener);
    });

    let client = Client::new(test_config(&url));
    client.connect().await.expect("connect");

    let list = SessionList::subscribe(&client);
    let mut state = list.state();

    state
        .wait_for(|s| s.ready)
        .await
        .expect("subscription became ready");

    // With the server gone for good, the list degrades to an explicit
    // not-ready state instead of showing stale data.
    state
        .wait_for(|s| !s.ready && s.sessions.is_empty())
        .await
        .expect("reset to not-ready");

    server.await.expect("server task");
}

#[tokio::test]
async fn disable_during_inflight_subscribe_unsubscribes_the_token() {
    let (listener, url) = bind().await;
    let (subscribed_tx, subscribed_rx) = oneshot::channel::<()>();
    let (disabled_tx, disabled_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        assert_eq!(req["method"], "session.subscribe");
        subscribed_tx.send(()).expect("signal subscribe seen");

        // Hold the response until the consumer has disabled.
        disabled_rx.await.expect("await disable");
        send_json(
            &mut ws,
            reply_ok(&req["id"], json!({"id": "t9", "sessions": []})),
        )
        .await;

        // The token obtained after disable must be unsubscribed, once.
        let unsub = recv_request(&mut ws).await;
        assert_eq!(unsub["method"], "session.unsubscribe");
        assert_eq!(unsub["params"]["id"], "t9");
        send_json(&mut ws, reply_ok(&unsub["id"], json!({}))).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = Client::new(test_config(&url));
    client.connect().await.expect("connect");

    let list = SessionList::subscribe(&client);
    subscribed_rx.await.expect("subscribe in flight");

    list.subscription().disable();
    disabled_tx.send(()).expect("signal disabled");

    server.await.expect("server assertions");

    // The consumer never saw the subscription as live.
    assert!(!list.current().ready);
    assert!(list.current().sessions.is_empty());
}

#[tokio::test]
async fn fs_watch_delivers_change_events() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = recv_request(&mut ws).await;
        assert_eq!(req["method"], "watch.subscribe");
        assert_eq!(req["params"]["path"], "src");
        send_json(&mut ws, reply_ok(&req["id"], json!({"id": "w_1"}))).await;

        // Socket-level keepalive: the client answers pings transparently.
        ws.send(Message::Ping(bytes::Bytes::new()))
            .await
            .expect("send ping");
        match ws.next().await.expect("frame").expect("frame") {
            Message::Pong(_) => {}
            other => panic!("expected pong, got {:?}", other),
        }

        send_json(
            &mut ws,
            json!({
                "jsonrpc": "2.0",
                "method": "watch.changed",
                "params": {"id": "w_1", "path": "src/main.rs"}
            }),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;
    });

    let client = Client::new(test_config(&url));
    client.connect().await.expect("connect");

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    let _watch = FsWatch::subscribe(&client, "src", move |path| {
        assert_eq!(path, "src/main.rs");
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });

    server.await.expect("server task");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

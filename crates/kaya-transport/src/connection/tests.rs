//! Tests for the connection lifecycle state machine.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{
    close_disposition, run_connection, CloseDisposition, ConnectionConfig, ConnectionState,
    WsTransport,
};
use crate::credentials::CredentialStore;
use crate::wire::{InboundMessage, Transport, CLOSE_STATUS_LOGGED_OUT};

#[test]
fn logged_out_status_terminates_everything_else_reconnects() {
    assert_eq!(
        close_disposition(CLOSE_STATUS_LOGGED_OUT),
        CloseDisposition::Terminate
    );
    assert_eq!(close_disposition(1000), CloseDisposition::Reconnect);
    assert_eq!(close_disposition(1006), CloseDisposition::Reconnect);
    assert_eq!(close_disposition(4000), CloseDisposition::Reconnect);
}

fn test_config(url: String) -> ConnectionConfig {
    ConnectionConfig {
        url,
        handshake_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(20),
        on_pairing: None,
    }
}

struct Harness {
    store: Arc<CredentialStore>,
    inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    transport: WsTransport,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn start_harness(url: String, store: Arc<CredentialStore>) -> Harness {
    let (transport, outbound_rx) = WsTransport::channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_connection(
        test_config(url),
        store.clone(),
        inbound_tx,
        outbound_rx,
        state_tx,
        shutdown_rx,
    ));
    Harness {
        store,
        inbound_rx,
        state_rx,
        shutdown_tx,
        transport,
        task,
    }
}

async fn accept_and_open(
    listener: &TcpListener,
) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
    let (socket, _) = listener.accept().await.expect("accept");
    let mut stream = tokio_tungstenite::accept_async(socket).await.expect("ws");
    // First client frame is the auth handshake.
    let auth = stream.next().await.expect("auth frame").expect("auth ok");
    let value: serde_json::Value =
        serde_json::from_str(auth.to_text().expect("text")).expect("auth json");
    assert_eq!(value["type"], "auth");
    stream
        .send(WsMessage::text(json!({"type": "open"}).to_string()))
        .await
        .expect("send open");
    stream
}

#[tokio::test]
async fn session_delivers_messages_and_terminal_close_purges_credentials() {
    let dir = tempdir().expect("tempdir");
    let auth_dir = dir.path().join("auth");
    let store = Arc::new(CredentialStore::new(&auth_dir));
    store.persist(&json!({"k": "v"})).await.expect("persist");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));
    let mut harness = start_harness(url, store).await;

    let mut stream = accept_and_open(&listener).await;
    stream
        .send(WsMessage::text(
            json!({
                "type": "message",
                "id": "m1",
                "chat": "1234@u",
                "text": "hello",
            })
            .to_string(),
        ))
        .await
        .expect("send message");

    let inbound = harness.inbound_rx.recv().await.expect("inbound");
    assert_eq!(inbound.text, "hello");
    assert_eq!(inbound.chat, "1234@u");

    stream
        .send(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(CLOSE_STATUS_LOGGED_OUT),
            reason: "logged out".into(),
        })))
        .await
        .expect("close");

    harness.task.await.expect("join").expect("run");
    assert_eq!(*harness.state_rx.borrow(), ConnectionState::ClosedTerminal);
    assert!(!auth_dir.exists(), "credentials must be purged");
}

#[tokio::test]
async fn retryable_close_schedules_exactly_one_reconnect() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(CredentialStore::new(dir.path().join("auth")));
    store.persist(&json!({"k": "v"})).await.expect("persist");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));
    let harness = start_harness(url, store.clone()).await;

    // First session: server closes with a retryable status.
    let mut stream = accept_and_open(&listener).await;
    stream
        .send(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(1000_u16),
            reason: "restarting".into(),
        })))
        .await
        .expect("close");
    drop(stream);

    // The client must come back with a brand-new connection.
    let _second = accept_and_open(&listener).await;

    // Credentials survive a retryable close.
    assert!(store.validate().await);

    harness.shutdown_tx.send(true).expect("shutdown");
    harness.task.await.expect("join").expect("run");
}

#[tokio::test]
async fn credentials_update_backs_up_last_good_state_before_persisting() {
    let dir = tempdir().expect("tempdir");
    let auth_dir = dir.path().join("auth");
    let store = Arc::new(CredentialStore::new(&auth_dir));
    store.persist(&json!({"session": "old"})).await.expect("persist");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));
    let harness = start_harness(url, store.clone()).await;

    let mut stream = accept_and_open(&listener).await;
    stream
        .send(WsMessage::text(
            json!({"type": "credentials", "data": {"session": "new"}}).to_string(),
        ))
        .await
        .expect("send creds");

    // Outbound op exercises the sink path and gives the update time to land.
    harness
        .transport
        .send_message("1234@u", "ok", &[])
        .await
        .expect("send");
    let outbound = stream.next().await.expect("frame").expect("ok");
    let value: serde_json::Value =
        serde_json::from_str(outbound.to_text().expect("text")).expect("json");
    assert_eq!(value["type"], "message");
    assert_eq!(value["text"], "ok");

    // The two frames travel independent channels; give the update a moment.
    let mut live = store.load().await.expect("live creds");
    for _ in 0..50 {
        if live["session"] == "new" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        live = store.load().await.expect("live creds");
    }
    assert_eq!(live["session"], "new");
    let backup = tokio::fs::read_to_string(auth_dir.join("creds.backup.json"))
        .await
        .expect("backup");
    let backup: serde_json::Value = serde_json::from_str(&backup).expect("backup json");
    assert_eq!(backup["session"], "old");

    harness.shutdown_tx.send(true).expect("shutdown");
    harness.task.await.expect("join").expect("run");
}

#[tokio::test]
async fn credentials_arriving_before_the_open_ack_are_persisted() {
    let dir = tempdir().expect("tempdir");
    let auth_dir = dir.path().join("auth");
    let store = Arc::new(CredentialStore::new(&auth_dir));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));
    let mut harness = start_harness(url, store.clone()).await;

    // Fresh pairing: the credential update lands before the open ack.
    let (socket, _) = listener.accept().await.expect("accept");
    let mut stream = tokio_tungstenite::accept_async(socket).await.expect("ws");
    let _auth = stream.next().await.expect("auth").expect("auth ok");
    stream
        .send(WsMessage::text(
            json!({"type": "credentials", "data": {"session": "paired"}}).to_string(),
        ))
        .await
        .expect("send creds");
    stream
        .send(WsMessage::text(json!({"type": "open"}).to_string()))
        .await
        .expect("send open");

    // The handshake drains frames in order, so open implies the update landed.
    while *harness.state_rx.borrow() != ConnectionState::Open {
        harness.state_rx.changed().await.expect("state");
    }
    let live = store.load().await.expect("live creds");
    assert_eq!(live["session"], "paired");

    harness.shutdown_tx.send(true).expect("shutdown");
    harness.task.await.expect("join").expect("run");
}

#[tokio::test]
async fn pairing_challenges_reach_the_injected_callback() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(CredentialStore::new(dir.path().join("auth")));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));

    let (challenge_tx, mut challenge_rx) = mpsc::unbounded_channel();
    let mut config = test_config(url);
    config.on_pairing = Some(Arc::new(move |challenge: String| {
        let _ = challenge_tx.send(challenge);
    }));

    let (_transport, outbound_rx) = WsTransport::channel();
    let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
    let (state_tx, _state_rx) = watch::channel(ConnectionState::Connecting);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_connection(
        config,
        store,
        inbound_tx,
        outbound_rx,
        state_tx,
        shutdown_rx,
    ));

    // Challenge arrives before the open acknowledgement, as in pairing flows.
    let (socket, _) = listener.accept().await.expect("accept");
    let mut stream = tokio_tungstenite::accept_async(socket).await.expect("ws");
    let _auth = stream.next().await.expect("auth").expect("auth ok");
    stream
        .send(WsMessage::text(
            json!({"type": "pairing", "challenge": "qr-payload"}).to_string(),
        ))
        .await
        .expect("send pairing");
    stream
        .send(WsMessage::text(json!({"type": "open"}).to_string()))
        .await
        .expect("send open");

    let challenge = challenge_rx.recv().await.expect("challenge");
    assert_eq!(challenge, "qr-payload");

    shutdown_tx.send(true).expect("shutdown");
    task.await.expect("join").expect("run");
}

//! Websocket connection lifecycle: handshake, event dispatch, and the
//! reconnect-vs-terminate decision.
//!
//! The close handler is the sole authority on reconnects. Transport-level
//! read errors are logged and end the session as retryable; an explicit
//! logged-out close purges credentials and stops the loop for good.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::credentials::CredentialStore;
use crate::wire::{
    InboundFrame, InboundMessage, OutboundFrame, PresenceState, Transport,
    CLOSE_STATUS_LOGGED_OUT,
};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedRetryable,
    ClosedTerminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a remote-initiated close.
pub enum CloseDisposition {
    Reconnect,
    Terminate,
}

/// Maps a close status code onto the reconnect decision. Only the explicit
/// logged-out status is terminal.
pub fn close_disposition(status: u16) -> CloseDisposition {
    if status == CLOSE_STATUS_LOGGED_OUT {
        CloseDisposition::Terminate
    } else {
        CloseDisposition::Reconnect
    }
}

pub type PairingCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Clone)]
/// Configuration for the connection lifecycle loop.
pub struct ConnectionConfig {
    pub url: String,
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Pairing challenges are forwarded here; rendering is the caller's job.
    pub on_pairing: Option<PairingCallback>,
}

/// Cheap cloneable handle implementing the outbound [`Transport`] operations
/// by handing frames to the connection task.
#[derive(Clone)]
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl WsTransport {
    /// Returns the transport handle plus the receiver the connection loop
    /// drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { outbound }, rx)
    }

    fn push(&self, frame: OutboundFrame) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| anyhow::anyhow!("transport connection is gone"))
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send_message(&self, to: &str, text: &str, mentions: &[String]) -> Result<()> {
        self.push(OutboundFrame::Message {
            to: to.to_string(),
            text: text.to_string(),
            mentions: mentions.to_vec(),
        })
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        self.push(OutboundFrame::Read {
            id: message_id.to_string(),
        })
    }

    async fn set_presence(&self, to: &str, state: PresenceState) -> Result<()> {
        self.push(OutboundFrame::Presence {
            to: to.to_string(),
            state,
        })
    }
}

enum SessionEnd {
    Retryable,
    Terminal,
    Shutdown,
}

/// Runs the connection lifecycle until shutdown or a terminal logout.
///
/// Each iteration constructs a brand-new connection; the previous session's
/// streams are dropped before the reconnect delay so no stale listener can
/// deliver duplicate events.
pub async fn run_connection(
    config: ConnectionConfig,
    store: Arc<CredentialStore>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if let Err(error) = store.restore_if_corrupted().await {
            // Leave the open attempt to fail; that failure is retryable.
            eprintln!("credential restore failed: {error}");
        }

        let _ = state_tx.send(ConnectionState::Connecting);
        let end = run_session(
            &config,
            &store,
            &inbound_tx,
            &mut outbound_rx,
            &state_tx,
            &mut shutdown_rx,
        )
        .await;

        match end {
            Ok(SessionEnd::Shutdown) => return Ok(()),
            Ok(SessionEnd::Terminal) => {
                let _ = state_tx.send(ConnectionState::ClosedTerminal);
                println!("logged out; purging credentials");
                store.purge().await?;
                return Ok(());
            }
            Ok(SessionEnd::Retryable) => {
                let _ = state_tx.send(ConnectionState::ClosedRetryable);
            }
            Err(error) => {
                let _ = state_tx.send(ConnectionState::ClosedRetryable);
                eprintln!("transport session error: {error}");
            }
        }

        println!(
            "reconnecting in {}ms",
            config.reconnect_delay.as_millis()
        );
        tokio::select! {
            _ = shutdown_rx.changed() => return Ok(()),
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
}

async fn run_session(
    config: &ConnectionConfig,
    store: &CredentialStore,
    inbound_tx: &mpsc::UnboundedSender<InboundMessage>,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    state_tx: &watch::Sender<ConnectionState>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<SessionEnd> {
    let connect = tokio::time::timeout(config.handshake_timeout, connect_async(&config.url))
        .await
        .context("websocket connect timed out")?;
    let (stream, _response) = connect.context("websocket connect failed")?;
    let (mut sink, mut source) = stream.split();

    let credentials = store.load().await.unwrap_or(Value::Null);
    let auth = serde_json::to_string(&OutboundFrame::Auth { credentials })?;
    sink.send(WsMessage::text(auth)).await?;

    // The handshake completes when the server acknowledges with an open frame.
    let opened = tokio::time::timeout(config.handshake_timeout, async {
        loop {
            let Some(message) = source.next().await else {
                return Ok::<_, anyhow::Error>(None);
            };
            match decode_frame(message?) {
                Some(InboundFrame::Open) => return Ok(Some(())),
                Some(InboundFrame::Pairing { challenge }) => {
                    if let Some(on_pairing) = &config.on_pairing {
                        on_pairing(challenge);
                    }
                }
                // A first pairing delivers fresh credentials before the open
                // ack; losing them here would force a re-pair on restart.
                Some(InboundFrame::Credentials { data }) => {
                    store.backup().await;
                    if let Err(error) = store.persist(&data).await {
                        eprintln!("credential persist failed: {error}");
                    }
                }
                Some(_) | None => {}
            }
        }
    })
    .await
    .context("handshake timed out")??;
    if opened.is_none() {
        return Ok(SessionEnd::Retryable);
    }

    let _ = state_tx.send(ConnectionState::Open);
    println!("transport connection open");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
            maybe_frame = outbound_rx.recv() => {
                let Some(frame) = maybe_frame else {
                    return Ok(SessionEnd::Shutdown);
                };
                let rendered = serde_json::to_string(&frame)?;
                sink.send(WsMessage::text(rendered)).await?;
            }
            maybe_message = source.next() => {
                let Some(message_result) = maybe_message else {
                    // Stream ended without a close frame: retryable.
                    return Ok(SessionEnd::Retryable);
                };
                let message = match message_result {
                    Ok(message) => message,
                    Err(error) => {
                        eprintln!("transport read error: {error}");
                        return Ok(SessionEnd::Retryable);
                    }
                };

                if let WsMessage::Close(close_frame) = &message {
                    let status = close_frame
                        .as_ref()
                        .map(|frame| u16::from(frame.code))
                        .unwrap_or(1000);
                    println!("connection closed with status {status}");
                    return Ok(match close_disposition(status) {
                        CloseDisposition::Terminate => SessionEnd::Terminal,
                        CloseDisposition::Reconnect => SessionEnd::Retryable,
                    });
                }

                match decode_frame(message) {
                    Some(InboundFrame::Message(inbound)) => {
                        if inbound_tx.send(inbound).is_err() {
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    Some(InboundFrame::Credentials { data }) => {
                        // Backup must see the last good state before the new
                        // state overwrites it.
                        store.backup().await;
                        if let Err(error) = store.persist(&data).await {
                            eprintln!("credential persist failed: {error}");
                        }
                    }
                    Some(InboundFrame::Pairing { challenge }) => {
                        if let Some(on_pairing) = &config.on_pairing {
                            on_pairing(challenge);
                        }
                    }
                    Some(InboundFrame::Open) | None => {}
                }
            }
        }
    }
}

fn decode_frame(message: WsMessage) -> Option<InboundFrame> {
    let text = match message {
        WsMessage::Text(text) => text.to_string(),
        WsMessage::Binary(bytes) => String::from_utf8(bytes.into()).ok()?,
        _ => return None,
    };
    match serde_json::from_str(&text) {
        Ok(frame) => Some(frame),
        Err(error) => {
            eprintln!("undecodable transport frame: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests;

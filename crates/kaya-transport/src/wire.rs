//! Wire frame codec and outbound transport operations.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Application close status signalling an explicit logout. Terminal: the only
/// close code after which credentials are purged and no reconnect happens.
pub const CLOSE_STATUS_LOGGED_OUT: u16 = 4401;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Frames the transport delivers to the runtime.
pub enum InboundFrame {
    /// Handshake acknowledgement; the session is open.
    Open,
    Message(InboundMessage),
    /// Updated identity material to back up and persist.
    Credentials { data: Value },
    /// Pairing challenge forwarded to the injectable callback; this layer
    /// never renders it.
    Pairing { challenge: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One inbound chat message.
pub struct InboundMessage {
    pub id: String,
    /// Conversation the message arrived in: a user jid or a group jid.
    pub chat: String,
    /// Sending participant, set for group messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted: Option<String>,
    /// Echo of a message this agent sent; always ignored.
    #[serde(default)]
    pub from_me: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Frames the runtime sends over the transport.
pub enum OutboundFrame {
    Auth {
        credentials: Value,
    },
    Message {
        to: String,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mentions: Vec<String>,
    },
    Read {
        id: String,
    },
    Presence {
        to: String,
        state: PresenceState,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `PresenceState` values.
pub enum PresenceState {
    Composing,
    Paused,
}

#[async_trait]
/// Outbound operations the rest of the system invokes on the transport.
pub trait Transport: Send + Sync {
    async fn send_message(&self, to: &str, text: &str, mentions: &[String]) -> Result<()>;
    async fn mark_read(&self, message_id: &str) -> Result<()>;
    async fn set_presence(&self, to: &str, state: PresenceState) -> Result<()>;
}

pub fn is_group_jid(jid: &str) -> bool {
    jid.ends_with("@g.us")
}

pub fn is_broadcast_jid(jid: &str) -> bool {
    jid.ends_with("@broadcast")
}

/// Strips device suffixes (`1234:5@s.net` → `1234@s.net`) so a user is one
/// identity regardless of which device sent the message.
pub fn normalize_jid(jid: &str) -> String {
    match jid.split_once('@') {
        Some((user, server)) => {
            let user = user.split_once(':').map(|(base, _)| base).unwrap_or(user);
            format!("{user}@{server}")
        }
        None => jid.to_string(),
    }
}

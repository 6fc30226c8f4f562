//! Transport layer: credential integrity, the websocket connection lifecycle
//! state machine, and the wire frame codec.

pub mod connection;
pub mod credentials;
pub mod wire;

pub use connection::{
    close_disposition, run_connection, CloseDisposition, ConnectionConfig, ConnectionState,
    PairingCallback, WsTransport,
};
pub use credentials::CredentialStore;
pub use wire::{
    is_broadcast_jid, is_group_jid, normalize_jid, InboundFrame, InboundMessage, OutboundFrame,
    PresenceState, Transport, CLOSE_STATUS_LOGGED_OUT,
};

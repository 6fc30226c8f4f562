//! Inbound event runtime: gates which messages become agent turns, runs the
//! turns one at a time in arrival order, and maintains the typing indicator
//! while a turn is in flight.

pub mod presence;
pub mod reply_queue;
pub mod runtime;

pub use presence::{PresenceConfig, PresenceRegistry};
pub use reply_queue::ReplyQueue;
pub use runtime::{AgentRuntime, RuntimeConfig, TransportSink};

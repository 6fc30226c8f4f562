//! Per-conversation typing indicator. The composing state decays on the
//! remote end, so an active conversation re-asserts it on an interval until
//! the turn finishes or the hard cap cuts it off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kaya_transport::{PresenceState, Transport};
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How often the composing state is re-asserted.
    pub refresh_interval: Duration,
    /// Upper bound on one conversation's typing indicator; protects against
    /// a turn that never settles.
    pub max_duration: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            max_duration: Duration::from_secs(120),
        }
    }
}

/// One independent timer per conversation; cheap to clone.
#[derive(Clone)]
pub struct PresenceRegistry {
    transport: Arc<dyn Transport>,
    config: PresenceConfig,
    active: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl PresenceRegistry {
    pub fn new(transport: Arc<dyn Transport>, config: PresenceConfig) -> Self {
        Self {
            transport,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts the typing indicator for one conversation. Idempotent: a second
    /// start while the timer runs leaves the existing timer in place.
    pub async fn start(&self, conversation: &str) {
        let stop_rx = {
            let mut active = self.active.lock().expect("presence lock");
            if active.contains_key(conversation) {
                return;
            }
            let (stop_tx, stop_rx) = oneshot::channel();
            active.insert(conversation.to_string(), stop_tx);
            stop_rx
        };
        // Asserted inline so even a turn that finishes before the timer task
        // runs still brackets the conversation with composing then paused.
        if let Err(error) = self
            .transport
            .set_presence(conversation, PresenceState::Composing)
            .await
        {
            eprintln!("presence update for {conversation} failed: {error}");
        }
        self.spawn_timer(conversation.to_string(), stop_rx);
    }

    /// Stops the indicator and sends the paused state. A stop with no active
    /// timer is a no-op.
    pub async fn stop(&self, conversation: &str) {
        let removed = self
            .active
            .lock()
            .expect("presence lock")
            .remove(conversation);
        if let Some(stop_tx) = removed {
            let _ = stop_tx.send(());
            // Paused goes out inline so the bracket is complete by the time
            // stop returns; the timer only pauses on its own for the cap.
            if let Err(error) = self
                .transport
                .set_presence(conversation, PresenceState::Paused)
                .await
            {
                eprintln!("presence update for {conversation} failed: {error}");
            }
        }
    }

    fn spawn_timer(&self, conversation: String, mut stop_rx: oneshot::Receiver<()>) {
        let transport = self.transport.clone();
        let active = self.active.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(config.max_duration);
            tokio::pin!(deadline);
            // The initial composing was sent by start; the first refresh
            // comes one interval later.
            let mut refresh = tokio::time::interval_at(
                tokio::time::Instant::now() + config.refresh_interval,
                config.refresh_interval,
            );

            loop {
                tokio::select! {
                    _ = refresh.tick() => {
                        if let Err(error) = transport
                            .set_presence(&conversation, PresenceState::Composing)
                            .await
                        {
                            eprintln!("presence update for {conversation} failed: {error}");
                        }
                    }
                    // Stop already pauses the conversation; just exit.
                    _ = &mut stop_rx => return,
                    _ = &mut deadline => {
                        // Hard cap: drop our own registration so a later
                        // start can begin a fresh timer.
                        active.lock().expect("presence lock").remove(&conversation);
                        break;
                    }
                }
            }

            if let Err(error) = transport
                .set_presence(&conversation, PresenceState::Paused)
                .await
            {
                eprintln!("presence update for {conversation} failed: {error}");
            }
        });
    }
}

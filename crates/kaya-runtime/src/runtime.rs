//! The inbound message loop: filters echoes and broadcasts, applies the
//! group addressing gate, and turns accepted messages into agent turns.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kaya_agent::{ExecutionContext, Orchestrator, ReplySink};
use kaya_ai::ModelClient;
use kaya_transport::{is_broadcast_jid, is_group_jid, normalize_jid, InboundMessage, Transport};
use tokio::sync::mpsc;

use crate::presence::PresenceRegistry;
use crate::reply_queue::ReplyQueue;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// The agent's own identity, normalized; used for the group mention gate
    /// and to derive the `@number` text form.
    pub agent_jid: String,
    /// Display name the agent answers to as `@name` in group text.
    pub agent_name: String,
}

/// [`ReplySink`] writing straight to the transport. Ordering comes from the
/// reply queue running at most one turn at a time, so sends within a turn
/// need no further serialization.
pub struct TransportSink {
    transport: Arc<dyn Transport>,
}

impl TransportSink {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ReplySink for TransportSink {
    async fn reply(&self, ctx: &ExecutionContext, text: &str, mentions: &[String]) -> Result<()> {
        self.transport
            .send_message(ctx.conversation(), text, mentions)
            .await
    }

    async fn send_to(&self, target: &str, text: &str, mentions: &[String]) -> Result<()> {
        self.transport.send_message(target, text, mentions).await
    }
}

pub struct AgentRuntime {
    config: RuntimeConfig,
    transport: Arc<dyn Transport>,
    queue: ReplyQueue,
    presence: PresenceRegistry,
    model: Arc<dyn ModelClient>,
    orchestrator: Arc<Orchestrator>,
}

impl AgentRuntime {
    pub fn new(
        config: RuntimeConfig,
        transport: Arc<dyn Transport>,
        queue: ReplyQueue,
        presence: PresenceRegistry,
        model: Arc<dyn ModelClient>,
        orchestrator: Arc<Orchestrator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport,
            queue,
            presence,
            model,
            orchestrator,
        })
    }

    /// Consumes inbound messages until the channel closes. Each message is
    /// enqueued as one reply task, so turns run whole and strictly in
    /// arrival order while intake itself never blocks.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            let runtime = self.clone();
            let _ = self.queue.enqueue(async move {
                runtime.handle_message(message).await;
            });
        }
    }

    async fn handle_message(&self, message: InboundMessage) {
        let Some(ctx) = self.admit(&message) else {
            return;
        };

        if let Err(error) = self.transport.mark_read(&message.id).await {
            eprintln!("mark-read for {} failed: {error}", message.id);
        }

        // Liveness probe answers without spending a model call.
        if message.text.trim().eq_ignore_ascii_case("ping") {
            if let Err(error) = self
                .transport
                .send_message(ctx.conversation(), "pong 🏓", &[])
                .await
            {
                eprintln!("ping reply failed: {error}");
            }
            return;
        }

        let conversation = ctx.conversation().to_string();
        self.presence.start(&conversation).await;
        self.run_turn(ctx).await;
        self.presence.stop(&conversation).await;
    }

    async fn run_turn(&self, mut ctx: ExecutionContext) {
        match self.model.query(&ctx.model_query()).await {
            Ok(response) => {
                ctx.response = response;
                self.orchestrator.run_turn(ctx).await;
            }
            Err(error) => {
                eprintln!("model query failed: {error}");
                let notice = kaya_agent::ActionError::execution_failed(
                    "the language model is unreachable right now",
                )
                .render();
                if let Err(send_error) = self
                    .transport
                    .send_message(ctx.conversation(), &notice, &[])
                    .await
                {
                    eprintln!("failed to deliver model failure notice: {send_error}");
                }
            }
        }
    }

    /// The admission gate. Returns the execution context for messages the
    /// agent should answer, `None` for everything it must ignore.
    fn admit(&self, message: &InboundMessage) -> Option<ExecutionContext> {
        if message.from_me || is_broadcast_jid(&message.chat) {
            return None;
        }

        let (user_id, group_id) = if is_group_jid(&message.chat) {
            if !self.addressed_in_group(message) {
                return None;
            }
            let participant = message.sender.as_deref().unwrap_or(&message.chat);
            (normalize_jid(participant), Some(message.chat.clone()))
        } else {
            (normalize_jid(&message.chat), None)
        };

        Some(ExecutionContext {
            user_id,
            group_id,
            mentions: message.mentions.clone(),
            quoted_text: message.quoted.clone(),
            request: message.text.clone(),
            response: String::new(),
            output_chain: Vec::new(),
        })
    }

    /// In groups the agent only answers when addressed: a jid mention, or an
    /// `@name` / `@number` form typed into the text.
    fn addressed_in_group(&self, message: &InboundMessage) -> bool {
        if message
            .mentions
            .iter()
            .any(|mention| normalize_jid(mention) == self.config.agent_jid)
        {
            return true;
        }
        let text = message.text.to_lowercase();
        if text.contains(&format!("@{}", self.config.agent_name.to_lowercase())) {
            return true;
        }
        let number = self
            .config
            .agent_jid
            .split_once('@')
            .map(|(user, _)| user)
            .unwrap_or(&self.config.agent_jid);
        text.contains(&format!("@{number}"))
    }
}

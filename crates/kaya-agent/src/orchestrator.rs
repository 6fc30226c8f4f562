//! Turns one model response into executed side effects, with authorization,
//! output chaining, and the result feedback loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kaya_ai::ModelClient;
use serde_json::Value;

use crate::context::{resolve_value_refs, ExecutionContext};
use crate::descriptor::{parse_action_value, ActionDescriptor, ActionKind, ErrorCode, ParsedAction};
use crate::policy::ActionPolicy;
use crate::registry::{ActionError, ActionOutcome, ActionRegistry, ReplySink};

#[derive(Debug, Clone)]
/// Tunables for the interpretation loop.
pub struct OrchestratorConfig {
    /// Maximum result→re-query→re-parse hops per turn. The feedback loop is
    /// otherwise bounded only by the model choosing to stop, so the bound is
    /// enforced here.
    pub max_feedback_hops: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_feedback_hops: 8,
        }
    }
}

/// The action interpretation engine.
pub struct Orchestrator {
    registry: ActionRegistry,
    policy: ActionPolicy,
    model: Arc<dyn ModelClient>,
    replies: Arc<dyn ReplySink>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: ActionRegistry,
        policy: ActionPolicy,
        model: Arc<dyn ModelClient>,
        replies: Arc<dyn ReplySink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            policy,
            model,
            replies,
            config,
        }
    }

    /// Interprets one model response; the turn ends when every action and
    /// every feedback hop has settled.
    pub async fn run_turn(&self, ctx: ExecutionContext) {
        self.interpret(ctx, 0).await;
    }

    fn interpret<'a>(
        &'a self,
        ctx: ExecutionContext,
        hop: usize,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let body = unwrap_json_fences(&ctx.response);
            let elements = match serde_json::from_str::<Value>(body) {
                Ok(Value::Array(items)) => items,
                Ok(value @ Value::Object(_)) => vec![value],
                Ok(other) => {
                    // Valid JSON but not an action shape; nothing to run.
                    eprintln!("model response is not an action value: {other}");
                    return;
                }
                Err(_) => {
                    // A model that forgot to emit JSON is not a hard failure:
                    // the whole response becomes a talk action.
                    let talk = serde_json::json!({
                        "action": "talk",
                        "text": ctx.response,
                    });
                    self.run_element(&ctx, talk, &[], hop).await;
                    return;
                }
            };

            let mut chain = ctx.output_chain.clone();
            for mut element in elements {
                resolve_value_refs(&mut element, &chain);
                let produced = self.run_element(&ctx, element, &chain, hop).await;
                chain.push(produced);
            }
        })
    }

    /// Runs one action element and returns the chain entry it produced
    /// (`Null` for fire-and-forget and failed actions).
    async fn run_element(
        &self,
        ctx: &ExecutionContext,
        element: Value,
        chain: &[Value],
        hop: usize,
    ) -> Value {
        let descriptor = match parse_action_value(&element) {
            ParsedAction::Known(descriptor) => *descriptor,
            ParsedAction::Unsupported { action } => {
                self.deliver_error(ctx, ActionError::unsupported_action(&action))
                    .await;
                return Value::Null;
            }
            ParsedAction::Malformed { action, error } => {
                self.deliver_error(
                    ctx,
                    ActionError::new(
                        ErrorCode::InvalidStructure,
                        format!("action '{action}' does not match its schema: {error}"),
                    ),
                )
                .await;
                return Value::Null;
            }
        };

        let kind = descriptor.kind();
        if let Err(error) = self.policy.authorize(kind, &ctx.user_id) {
            // Checked before dispatch; the handler is never reached.
            self.deliver_error(ctx, error).await;
            return Value::Null;
        }

        let Some(handler) = self.registry.lookup(kind) else {
            self.deliver_error(ctx, ActionError::unsupported_action(kind.as_str()))
                .await;
            return Value::Null;
        };

        let mut scoped = ctx.clone();
        scoped.output_chain = chain.to_vec();
        match handler.execute(&descriptor, &scoped).await {
            ActionOutcome::Done => Value::Null,
            ActionOutcome::Error(error) => {
                self.deliver_error(ctx, error).await;
                Value::Null
            }
            ActionOutcome::Value(result) => {
                self.feed_back(ctx, result.clone(), hop).await;
                result
            }
        }
    }

    /// The result feedback loop: re-query the model with the prior exchange
    /// and the result, then re-enter interpretation on its continuation.
    async fn feed_back(&self, ctx: &ExecutionContext, result: Value, hop: usize) {
        if hop >= self.config.max_feedback_hops {
            self.deliver_error(
                ctx,
                ActionError::new(
                    ErrorCode::ParserRisk,
                    format!(
                        "result feedback exceeded {} hops; ending the turn",
                        self.config.max_feedback_hops
                    ),
                ),
            )
            .await;
            return;
        }

        let query = ctx.model_query().with_result(&ctx.response, result);
        match self.model.query(&query).await {
            Ok(continuation) => {
                let mut next = ctx.clone();
                next.response = continuation;
                next.output_chain = Vec::new();
                self.interpret(next, hop + 1).await;
            }
            Err(error) => {
                eprintln!("model re-query failed: {error}");
            }
        }
    }

    /// Routes an orchestrator-level error through the error action handler so
    /// the notice reaches the conversation exactly like a model-emitted one.
    async fn deliver_error(&self, ctx: &ExecutionContext, error: ActionError) {
        let descriptor = ActionDescriptor::Error {
            error: error.code,
            details: error.details.clone(),
            missing_fields: error.missing_fields.clone(),
            suggested_fix: error.suggested_fix.clone(),
        };
        if let Some(handler) = self.registry.lookup(ActionKind::Error) {
            handler.execute(&descriptor, ctx).await;
            return;
        }
        if let Err(send_error) = self.replies.reply(ctx, &error.render(), &[]).await {
            eprintln!("failed to deliver error notice: {send_error}");
        }
    }
}

/// Strips a ```json fence when the model wrapped its output in one.
fn unwrap_json_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

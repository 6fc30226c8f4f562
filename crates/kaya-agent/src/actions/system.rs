//! Conversational and host-process handlers: talk, status notices, shell
//! execution, arithmetic, contact lookup, and lifecycle control.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use super::truncate_output;
use crate::context::ExecutionContext;
use crate::descriptor::{ActionDescriptor, ErrorCode};
use crate::registry::{ActionError, ActionHandler, ActionOutcome, HostControl, ReplySink};

pub(super) struct TalkHandler {
    replies: Arc<dyn ReplySink>,
}

impl TalkHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for TalkHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Talk { text } = action else {
            return ActionOutcome::Done;
        };
        match self.replies.reply(ctx, text, &ctx.mentions).await {
            Ok(()) => ActionOutcome::Done,
            Err(error) => ActionOutcome::error(ErrorCode::ExecutionFailed, error.to_string()),
        }
    }
}

/// The model's explicit "nothing to do" choice.
pub(super) struct NoneHandler;

#[async_trait]
impl ActionHandler for NoneHandler {
    async fn execute(&self, _action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        ActionOutcome::Done
    }
}

pub(super) struct StatusHandler {
    replies: Arc<dyn ReplySink>,
}

impl StatusHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for StatusHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Status { state, details } = action else {
            return ActionOutcome::Done;
        };
        let mut notice = format!("*[STATUS]* `{state}`");
        if !details.is_empty() {
            notice.push('\n');
            notice.push_str(details);
        }
        match self.replies.reply(ctx, &notice, &[]).await {
            Ok(()) => ActionOutcome::Done,
            Err(error) => ActionOutcome::error(ErrorCode::ExecutionFailed, error.to_string()),
        }
    }
}

/// Renders error descriptors into the conversation. The orchestrator routes
/// its own failures through this handler as well, so every notice a user sees
/// has the same shape.
pub(super) struct ErrorNoticeHandler {
    replies: Arc<dyn ReplySink>,
}

impl ErrorNoticeHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for ErrorNoticeHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Error {
            error,
            details,
            missing_fields,
            suggested_fix,
        } = action
        else {
            return ActionOutcome::Done;
        };
        let notice = ActionError {
            code: *error,
            details: details.clone(),
            missing_fields: missing_fields.clone(),
            suggested_fix: suggested_fix.clone(),
        }
        .render();
        if let Err(send_error) = self.replies.reply(ctx, &notice, &[]).await {
            eprintln!("failed to deliver error notice: {send_error}");
        }
        ActionOutcome::Done
    }
}

pub(super) struct MessengerHandler {
    replies: Arc<dyn ReplySink>,
}

impl MessengerHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for MessengerHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Messenger {
            platform,
            to,
            message,
            mentions,
        } = action
        else {
            return ActionOutcome::Done;
        };
        if !platform.eq_ignore_ascii_case("whatsapp") {
            return ActionOutcome::error(
                ErrorCode::ExecutionFailed,
                format!("messenger platform '{platform}' is not available"),
            );
        }
        match self.replies.send_to(to, message, mentions).await {
            Ok(()) => ActionOutcome::Done,
            Err(error) => ActionOutcome::error(ErrorCode::ExecutionFailed, error.to_string()),
        }
    }
}

pub(super) struct ExecuteHandler {
    timeout: Duration,
    max_output_bytes: usize,
}

impl ExecuteHandler {
    pub(super) fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl ActionHandler for ExecuteHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Execute { command } = action else {
            return ActionOutcome::Done;
        };
        let spawned = Command::new("sh").arg("-c").arg(command).output();
        let output = match timeout(self.timeout, spawned).await {
            Err(_) => {
                return ActionOutcome::error(
                    ErrorCode::ExecutionFailed,
                    format!("command timed out after {}s", self.timeout.as_secs()),
                );
            }
            Ok(Err(error)) => {
                return ActionOutcome::error(
                    ErrorCode::ExecutionFailed,
                    format!("failed to spawn command: {error}"),
                );
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let detail = if stderr.trim().is_empty() {
                stdout.trim_end().to_string()
            } else {
                stderr.trim_end().to_string()
            };
            return ActionOutcome::error(
                ErrorCode::ExecutionFailed,
                format!(
                    "command exited with {}: {}",
                    output.status,
                    truncate_output(&detail, self.max_output_bytes)
                ),
            );
        }

        let text = if stdout.trim().is_empty() && !stderr.trim().is_empty() {
            stderr.trim_end().to_string()
        } else {
            stdout.trim_end().to_string()
        };
        ActionOutcome::Value(Value::String(truncate_output(&text, self.max_output_bytes)))
    }
}

pub(super) struct CalculateHandler {
    replies: Arc<dyn ReplySink>,
}

impl CalculateHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for CalculateHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Calculate { expression } = action else {
            return ActionOutcome::Done;
        };
        let value = match evaluate_expression(expression) {
            Ok(value) => value,
            Err(error) => {
                return ActionOutcome::error(
                    ErrorCode::ExecutionFailed,
                    format!("cannot evaluate '{expression}': {error}"),
                );
            }
        };
        let reply = format!("{expression} = *{}*", format_number(value));
        match self.replies.reply(ctx, &reply, &[]).await {
            Ok(()) => ActionOutcome::Done,
            Err(error) => ActionOutcome::error(ErrorCode::ExecutionFailed, error.to_string()),
        }
    }
}

pub(super) struct WebSearchHandler {
    replies: Arc<dyn ReplySink>,
}

impl WebSearchHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for WebSearchHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::WebSearch { result } = action else {
            return ActionOutcome::Done;
        };
        let notice = format!("*[WEB SEARCH]*\n{result}");
        match self.replies.reply(ctx, &notice, &[]).await {
            Ok(()) => ActionOutcome::Done,
            Err(error) => ActionOutcome::error(ErrorCode::ExecutionFailed, error.to_string()),
        }
    }
}

/// Case-insensitive keyword search over the configured contact book. The
/// matches go back to the model, which typically follows up with a messenger
/// action targeting one of them.
pub(super) struct ContactHandler {
    contacts: HashMap<String, String>,
}

impl ContactHandler {
    pub(super) fn new(contacts: HashMap<String, String>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl ActionHandler for ContactHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Contact { keywords } = action else {
            return ActionOutcome::Done;
        };
        let lowered: Vec<String> = keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .collect();
        let mut matches: Vec<Value> = self
            .contacts
            .iter()
            .filter(|(name, _)| {
                lowered.is_empty()
                    || lowered
                        .iter()
                        .any(|keyword| name.to_lowercase().contains(keyword))
            })
            .map(|(name, id)| json!({ "name": name, "id": id }))
            .collect();
        matches.sort_by_key(|entry| entry["name"].as_str().unwrap_or_default().to_string());
        ActionOutcome::Value(Value::Array(matches))
    }
}

pub(super) struct ShutdownHandler {
    replies: Arc<dyn ReplySink>,
    host: Arc<dyn HostControl>,
}

impl ShutdownHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>, host: Arc<dyn HostControl>) -> Self {
        Self { replies, host }
    }
}

#[async_trait]
impl ActionHandler for ShutdownHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Shutdown { reason } = action else {
            return ActionOutcome::Done;
        };
        let notice = lifecycle_notice("Shutting down", reason);
        if let Err(error) = self.replies.reply(ctx, &notice, &[]).await {
            eprintln!("failed to announce shutdown: {error}");
        }
        self.host.shutdown(reason).await;
        ActionOutcome::Done
    }
}

pub(super) struct RestartHandler {
    replies: Arc<dyn ReplySink>,
    host: Arc<dyn HostControl>,
}

impl RestartHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>, host: Arc<dyn HostControl>) -> Self {
        Self { replies, host }
    }
}

#[async_trait]
impl ActionHandler for RestartHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Restart { reason } = action else {
            return ActionOutcome::Done;
        };
        let notice = lifecycle_notice("Restarting", reason);
        if let Err(error) = self.replies.reply(ctx, &notice, &[]).await {
            eprintln!("failed to announce restart: {error}");
        }
        self.host.restart(reason).await;
        ActionOutcome::Done
    }
}

fn lifecycle_notice(verb: &str, reason: &str) -> String {
    if reason.is_empty() {
        format!("*[SYSTEM]* {verb}.")
    } else {
        format!("*[SYSTEM]* {verb}: {reason}")
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Evaluates an arithmetic expression with `+ - * / %`, parentheses, and
/// unary minus. Division and modulo by zero are rejected rather than
/// producing non-finite values.
pub fn evaluate_expression(input: &str) -> Result<f64, String> {
    let mut parser = ExprParser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let value = parser.expr(0)?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(format!("unexpected input at position {}", parser.pos));
    }
    Ok(value)
}

struct ExprParser {
    chars: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    // Precedence climbing; higher binds tighter.
    fn expr(&mut self, min_prec: u8) -> Result<f64, String> {
        let mut left = self.atom()?;
        loop {
            self.skip_ws();
            let Some(op) = self.peek() else { break };
            let prec = match op {
                '+' | '-' => 1,
                '*' | '/' | '%' => 2,
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.expr(prec + 1)?;
            left = match op {
                '+' => left + right,
                '-' => left - right,
                '*' => left * right,
                '/' if right == 0.0 => return Err("division by zero".to_string()),
                '/' => left / right,
                '%' if right == 0.0 => return Err("modulo by zero".to_string()),
                '%' => left % right,
                _ => unreachable!(),
            };
        }
        Ok(left)
    }

    fn atom(&mut self) -> Result<f64, String> {
        self.skip_ws();
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.atom()?)
            }
            Some('(') => {
                self.pos += 1;
                let value = self.expr(0)?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    return Err("missing closing parenthesis".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(format!("unexpected character '{c}'")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == '_')
        {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        literal
            .parse::<f64>()
            .map_err(|_| format!("invalid number '{literal}'"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::super::testing::{ctx, RecordingSink};
    use super::{
        evaluate_expression, CalculateHandler, ContactHandler, ExecuteHandler, MessengerHandler,
        StatusHandler,
    };
    use crate::descriptor::{ActionDescriptor, ErrorCode};
    use crate::registry::{ActionHandler, ActionOutcome};

    #[test]
    fn expression_evaluation_honors_precedence_and_parens() {
        assert_eq!(evaluate_expression("2 + 3 * 4"), Ok(14.0));
        assert_eq!(evaluate_expression("(2 + 3) * 4"), Ok(20.0));
        assert_eq!(evaluate_expression("10 % 4 - -1"), Ok(3.0));
        assert_eq!(evaluate_expression("1.5 * 2"), Ok(3.0));
        assert!(evaluate_expression("1 / 0").is_err());
        assert!(evaluate_expression("2 +").is_err());
        assert!(evaluate_expression("2 ; rm").is_err());
    }

    #[tokio::test]
    async fn calculate_replies_with_formatted_result() {
        let sink = Arc::new(RecordingSink::default());
        let handler = CalculateHandler::new(sink.clone());
        let outcome = handler
            .execute(
                &ActionDescriptor::Calculate {
                    expression: "6 * 7".to_string(),
                },
                &ctx(),
            )
            .await;
        assert_eq!(outcome, ActionOutcome::Done);
        assert_eq!(sink.texts(), vec!["6 * 7 = *42*".to_string()]);
    }

    #[tokio::test]
    async fn status_notice_carries_state_and_details() {
        let sink = Arc::new(RecordingSink::default());
        let handler = StatusHandler::new(sink.clone());
        handler
            .execute(
                &ActionDescriptor::Status {
                    state: "ONLINE".to_string(),
                    details: "all transports connected".to_string(),
                },
                &ctx(),
            )
            .await;
        assert_eq!(
            sink.texts(),
            vec!["*[STATUS]* `ONLINE`\nall transports connected".to_string()]
        );
    }

    #[tokio::test]
    async fn execute_returns_trimmed_stdout_as_a_result() {
        let handler = ExecuteHandler::new(Duration::from_secs(10), 64 * 1024);
        let outcome = handler
            .execute(
                &ActionDescriptor::Execute {
                    command: "printf 'hello world\\n'".to_string(),
                },
                &ctx(),
            )
            .await;
        assert_eq!(
            outcome,
            ActionOutcome::Value(Value::String("hello world".to_string()))
        );
    }

    #[tokio::test]
    async fn execute_reports_nonzero_exit_as_execution_failed() {
        let handler = ExecuteHandler::new(Duration::from_secs(10), 64 * 1024);
        let outcome = handler
            .execute(
                &ActionDescriptor::Execute {
                    command: "printf 'boom' >&2; exit 3".to_string(),
                },
                &ctx(),
            )
            .await;
        let ActionOutcome::Error(error) = outcome else {
            panic!("expected an error outcome");
        };
        assert_eq!(error.code, ErrorCode::ExecutionFailed);
        assert!(error.details.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn contact_lookup_filters_by_keyword() {
        let handler = ContactHandler::new(HashMap::from([
            ("Alice Summers".to_string(), "111@u".to_string()),
            ("Bob Winters".to_string(), "222@u".to_string()),
        ]));
        let outcome = handler
            .execute(
                &ActionDescriptor::Contact {
                    keywords: vec!["alice".to_string()],
                },
                &ctx(),
            )
            .await;
        assert_eq!(
            outcome,
            ActionOutcome::Value(json!([{ "name": "Alice Summers", "id": "111@u" }]))
        );
    }

    #[tokio::test]
    async fn messenger_routes_to_the_named_target() {
        let sink = Arc::new(RecordingSink::default());
        let handler = MessengerHandler::new(sink.clone());
        handler
            .execute(
                &ActionDescriptor::Messenger {
                    platform: "whatsapp".to_string(),
                    to: "333@u".to_string(),
                    message: "on my way".to_string(),
                    mentions: vec![],
                },
                &ctx(),
            )
            .await;
        let sent = sink.sent.lock().expect("lock").clone();
        assert_eq!(sent, vec![("333@u".to_string(), "on my way".to_string())]);
    }

    #[tokio::test]
    async fn messenger_rejects_unknown_platforms() {
        let sink = Arc::new(RecordingSink::default());
        let handler = MessengerHandler::new(sink);
        let outcome = handler
            .execute(
                &ActionDescriptor::Messenger {
                    platform: "telegram".to_string(),
                    to: "333@u".to_string(),
                    message: "hi".to_string(),
                    mentions: vec![],
                },
                &ctx(),
            )
            .await;
        assert!(matches!(outcome, ActionOutcome::Error(_)));
    }
}

//! Handler registry and the seams handlers reach side effects through.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::descriptor::{ActionDescriptor, ActionKind, ErrorCode};

#[derive(Debug, Clone, PartialEq)]
/// Structured failure a handler (or the orchestrator) reports.
pub struct ActionError {
    pub code: ErrorCode,
    pub details: Option<String>,
    pub missing_fields: Vec<String>,
    pub suggested_fix: Option<String>,
}

impl ActionError {
    pub fn new(code: ErrorCode, details: impl Into<String>) -> Self {
        Self {
            code,
            details: Some(details.into()),
            missing_fields: Vec::new(),
            suggested_fix: None,
        }
    }

    pub fn execution_failed(details: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionFailed, details)
    }

    pub fn unauthorized_user(action: &str, owner_name: &str) -> Self {
        Self {
            code: ErrorCode::UnauthorizedUser,
            details: Some(format!(
                "Unauthorized users can NOT perform '{action}' actions!"
            )),
            missing_fields: Vec::new(),
            suggested_fix: Some(format!("Ask agent owner '{owner_name}' for permission.")),
        }
    }

    pub fn unsupported_action(action: &str) -> Self {
        Self {
            code: ErrorCode::UnsupportedAction,
            details: Some(format!("Requested action '{action}' is not implemented!")),
            missing_fields: Vec::new(),
            suggested_fix: None,
        }
    }

    /// Renders the structured, human-readable notice sent back over the
    /// triggering conversation.
    pub fn render(&self) -> String {
        let mut notice = format!("*[ERROR]* `{}`", self.code.as_str());
        if let Some(details) = &self.details {
            notice.push_str(&format!("\nReason: {details}"));
        }
        if !self.missing_fields.is_empty() {
            notice.push_str("\n\nMissing fields:");
            for field in &self.missing_fields {
                notice.push_str(&format!("\n    {field}"));
            }
        }
        if let Some(fix) = &self.suggested_fix {
            notice.push_str(&format!("\n\nSuggested fix: {fix}"));
        }
        notice
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Exactly one outcome per executed action.
pub enum ActionOutcome {
    /// Fire-and-forget; nothing to feed back.
    Done,
    /// Result-bearing: the orchestrator re-queries the model with this value.
    Value(Value),
    /// Handler-level failure, delivered over the reply path.
    Error(ActionError),
}

impl ActionOutcome {
    pub fn error(code: ErrorCode, details: impl Into<String>) -> Self {
        Self::Error(ActionError::new(code, details))
    }
}

#[async_trait]
/// Serialized delivery of outbound replies for a conversation.
pub trait ReplySink: Send + Sync {
    /// Replies into the context's conversation (group when present).
    async fn reply(&self, ctx: &ExecutionContext, text: &str, mentions: &[String]) -> Result<()>;
    /// Sends to an arbitrary conversation, for messenger-style actions.
    async fn send_to(&self, target: &str, text: &str, mentions: &[String]) -> Result<()>;
}

#[async_trait]
/// Host process lifecycle control for shutdown/restart actions.
pub trait HostControl: Send + Sync {
    async fn shutdown(&self, reason: &str);
    async fn restart(&self, reason: &str);
}

#[async_trait]
/// One capability: executes a descriptor of its kind against a context.
///
/// Authorization and schema validation happen before dispatch; a handler only
/// ever sees a well-formed descriptor its user was allowed to run.
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome;
}

/// Capability table mapping an action kind to its handler.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn lookup(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::ErrorCode;

    use super::ActionError;

    #[test]
    fn error_notice_renders_all_optional_sections() {
        let error = ActionError {
            code: ErrorCode::MissingInformation,
            details: Some("no path given".to_string()),
            missing_fields: vec!["path".to_string(), "content".to_string()],
            suggested_fix: Some("provide a path".to_string()),
        };
        let notice = error.render();
        assert!(notice.starts_with("*[ERROR]* `MISSING_INFORMATION`"));
        assert!(notice.contains("Reason: no path given"));
        assert!(notice.contains("Missing fields:\n    path\n    content"));
        assert!(notice.contains("Suggested fix: provide a path"));
    }

    #[test]
    fn error_notice_omits_absent_sections() {
        let notice = ActionError::execution_failed("disk full").render();
        assert_eq!(notice, "*[ERROR]* `EXECUTION_FAILED`\nReason: disk full");
    }
}

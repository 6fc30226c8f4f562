//! Per-event execution context and the `#{output}` reference syntax.

use kaya_ai::ModelQuery;
use serde_json::Value;

/// State threaded through every action of one model turn.
///
/// Created when an inbound event is accepted, discarded when the turn's
/// feedback loop terminates. The output chain is exclusively owned by the
/// turn interpreting it and never shared across turns.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Direct sender identity.
    pub user_id: String,
    /// Set only when the message originated in a group and the agent was
    /// addressed there.
    pub group_id: Option<String>,
    pub mentions: Vec<String>,
    pub quoted_text: Option<String>,
    /// The raw inbound request text.
    pub request: String,
    /// The model output currently being interpreted.
    pub response: String,
    /// Ordered results of prior actions within the same turn.
    pub output_chain: Vec<Value>,
}

impl ExecutionContext {
    /// The conversation replies go to: the group when present, else the user.
    pub fn conversation(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.user_id)
    }

    /// Base model query for this context, used for feedback re-queries.
    pub fn model_query(&self) -> ModelQuery {
        ModelQuery {
            request: self.request.clone(),
            from: self.user_id.clone(),
            group: self.group_id.clone(),
            mentions: self.mentions.clone(),
            quoted: self.quoted_text.clone(),
            feedback: None,
        }
    }
}

/// Replaces `#{output}`, `#{output.N}`, and `#{output.field}` references with
/// values from the chain. Out-of-range or unknown references resolve to the
/// empty string.
pub fn resolve_output_refs(input: &str, chain: &[Value]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("#{output") {
        out.push_str(&rest[..start]);
        let after = &rest[start + "#{output".len()..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&render_reference(&after[..end], chain));
                rest = &after[end + 1..];
            }
            None => {
                // Unclosed reference: keep the text as-is.
                out.push_str("#{output");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Walks a JSON value and resolves output references inside every string,
/// except the `action` tag itself.
pub fn resolve_value_refs(value: &mut Value, chain: &[Value]) {
    match value {
        Value::String(text) => {
            if text.contains("#{output") {
                *text = resolve_output_refs(text, chain);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_value_refs(item, chain);
            }
        }
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if key != "action" {
                    resolve_value_refs(item, chain);
                }
            }
        }
        _ => {}
    }
}

fn render_reference(selector: &str, chain: &[Value]) -> String {
    // Fire-and-forget elements leave null placeholders; the bare and field
    // forms mean the most recent element that actually produced a result.
    let last_result = || chain.iter().rev().find(|value| !value.is_null());
    let target = match selector.strip_prefix('.') {
        None if selector.is_empty() => last_result().cloned(),
        None => None,
        Some(token) => match token.parse::<usize>() {
            Ok(index) => chain.get(index).cloned(),
            Err(_) => last_result().and_then(|last| last.get(token)).cloned(),
        },
    };
    match target {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

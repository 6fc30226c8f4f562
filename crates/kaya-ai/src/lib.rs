//! Model collaborator interface: the agent talks to an opaque completion
//! provider through [`ModelClient`] and never assumes the reply is valid JSON.

mod openai;
mod retry;
mod types;

pub use openai::{OpenAiChatClient, OpenAiChatConfig};
pub use retry::{
    is_retryable_http_error, next_backoff_ms, parse_retry_after_ms, retry_delay_ms,
    should_retry_status,
};
pub use types::{ModelClient, ModelError, ModelFeedback, ModelQuery};

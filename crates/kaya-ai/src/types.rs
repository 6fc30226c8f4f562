use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One request to the model, carrying the inbound message and its context.
///
/// For feedback-loop re-queries (an action reported a result and the model
/// gets to decide on follow-up actions) `feedback` holds the prior exchange
/// and the result value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelQuery {
    pub request: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<ModelFeedback>,
}

impl ModelQuery {
    pub fn new(request: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            from: from.into(),
            group: None,
            mentions: Vec::new(),
            quoted: None,
            feedback: None,
        }
    }

    /// Derives the re-query issued after a result-bearing action settles.
    pub fn with_result(&self, prior_response: impl Into<String>, result: Value) -> Self {
        let mut next = self.clone();
        next.feedback = Some(ModelFeedback {
            prior_request: self.request.clone(),
            prior_response: prior_response.into(),
            result,
        });
        next
    }
}

/// Prior exchange plus the new result value supplied on feedback hops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelFeedback {
    pub prior_request: String,
    pub prior_response: String,
    pub result: Value,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
/// Trait contract for completion providers: context in, free text out.
pub trait ModelClient: Send + Sync {
    async fn query(&self, query: &ModelQuery) -> Result<String, ModelError>;
}

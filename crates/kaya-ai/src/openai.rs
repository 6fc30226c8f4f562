use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{is_retryable_http_error, parse_retry_after_ms, retry_delay_ms, should_retry_status},
    ModelClient, ModelError, ModelQuery,
};

#[derive(Debug, Clone)]
/// Configuration for the OpenAI-compatible chat completion client.
pub struct OpenAiChatConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub instructions: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

#[derive(Debug, Clone)]
/// OpenAI-compatible chat client implementing [`ModelClient`].
pub struct OpenAiChatClient {
    client: reqwest::Client,
    config: OpenAiChatConfig,
}

impl OpenAiChatClient {
    pub fn new(config: OpenAiChatConfig) -> Result<Self, ModelError> {
        if config.api_key.trim().is_empty() {
            return Err(ModelError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| ModelError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }

    fn build_request_body(&self, query: &ModelQuery) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "system",
                    "content": self.config.instructions,
                },
                {
                    "role": "user",
                    "content": render_query_prompt(query),
                },
            ],
        })
    }
}

/// Renders the user-facing prompt: the raw request plus its context lines,
/// or a `returning_results` payload on feedback hops.
fn render_query_prompt(query: &ModelQuery) -> String {
    if let Some(feedback) = &query.feedback {
        return json!({
            "action": "returning_results",
            "context": {
                "request_was": feedback.prior_request,
                "response_was": feedback.prior_response,
            },
            "result": feedback.result,
        })
        .to_string();
    }

    let mut prompt = format!("[REQUEST]\n{}\n\n[FROM]\n{}", query.request, query.from);
    if let Some(group) = &query.group {
        prompt.push_str(&format!("\n\n[CHAT]\n{group}"));
    }
    if !query.mentions.is_empty() {
        prompt.push_str(&format!("\n\n[MENTIONS]\n{}", query.mentions.join("\n")));
    }
    if let Some(quoted) = &query.quoted {
        prompt.push_str(&format!("\n\n[QUOTED]\n{quoted}"));
    }
    prompt
}

fn parse_chat_response(raw: &str) -> Result<String, ModelError> {
    let value: Value = serde_json::from_str(raw)?;
    let content = value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ModelError::InvalidResponse("chat response missing choices[0].message.content".into())
        })?;
    Ok(content.to_string())
}

#[async_trait]
impl ModelClient for OpenAiChatClient {
    async fn query(&self, query: &ModelQuery) -> Result<String, ModelError> {
        let body = self.build_request_body(query);
        let url = self.chat_completions_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let response = self.client.post(&url).json(&body).send().await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let body_text = response.text().await.unwrap_or_default();
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        sleep(std::time::Duration::from_millis(retry_delay_ms(
                            attempt,
                            retry_after_ms,
                        )))
                        .await;
                        continue;
                    }
                    return Err(ModelError::HttpStatus {
                        status: status.as_u16(),
                        body: body_text,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        sleep(std::time::Duration::from_millis(retry_delay_ms(
                            attempt, None,
                        )))
                        .await;
                        continue;
                    }
                    return Err(ModelError::Http(error));
                }
            }
        }

        Err(ModelError::InvalidResponse(
            "retry loop exited without a response".into(),
        ))
    }
}

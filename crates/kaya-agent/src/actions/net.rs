//! Network handlers: file download and arbitrary HTTP calls whose responses
//! feed back to the model.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::fs;

use super::truncate_output;
use crate::context::ExecutionContext;
use crate::descriptor::{ActionDescriptor, ErrorCode};
use crate::registry::{ActionHandler, ActionOutcome, ReplySink};

pub(super) struct DownloadHandler {
    http: reqwest::Client,
    replies: Arc<dyn ReplySink>,
}

impl DownloadHandler {
    pub(super) fn new(http: reqwest::Client, replies: Arc<dyn ReplySink>) -> Self {
        Self { http, replies }
    }
}

#[async_trait]
impl ActionHandler for DownloadHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Download { url, path } = action else {
            return ActionOutcome::Done;
        };
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(error) => {
                return ActionOutcome::error(
                    ErrorCode::ExecutionFailed,
                    format!("download of '{url}' failed: {error}"),
                );
            }
        };
        if !response.status().is_success() {
            return ActionOutcome::error(
                ErrorCode::ExecutionFailed,
                format!("download of '{url}' returned {}", response.status()),
            );
        }
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(error) => {
                return ActionOutcome::error(
                    ErrorCode::ExecutionFailed,
                    format!("download of '{url}' failed mid-stream: {error}"),
                );
            }
        };

        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(error) = fs::create_dir_all(parent).await {
                    return ActionOutcome::error(
                        ErrorCode::ExecutionFailed,
                        format!("cannot create parent of '{}': {error}", path.display()),
                    );
                }
            }
        }
        if let Err(error) = fs::write(&path, &body).await {
            return ActionOutcome::error(
                ErrorCode::ExecutionFailed,
                format!("cannot write '{}': {error}", path.display()),
            );
        }

        let notice = format!("*[DOWNLOAD]* `{}` ({} bytes)", path.display(), body.len());
        if let Err(error) = self.replies.reply(ctx, &notice, &[]).await {
            eprintln!("failed to acknowledge download: {error}");
        }
        ActionOutcome::Done
    }
}

pub(super) struct FetchApiHandler {
    http: reqwest::Client,
    max_output_bytes: usize,
}

impl FetchApiHandler {
    pub(super) fn new(http: reqwest::Client, max_output_bytes: usize) -> Self {
        Self {
            http,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl ActionHandler for FetchApiHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::FetchApi {
            method,
            url,
            headers,
            body,
        } = action
        else {
            return ActionOutcome::Done;
        };
        let method = match Method::from_bytes(method.to_ascii_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return ActionOutcome::error(
                    ErrorCode::InvalidStructure,
                    format!("'{method}' is not an HTTP method"),
                );
            }
        };

        let mut request = self.http.request(method, url);
        if let Some(Value::Object(headers)) = headers {
            for (name, value) in headers {
                let Some(value) = value.as_str() else {
                    return ActionOutcome::error(
                        ErrorCode::InvalidStructure,
                        format!("header '{name}' must be a string"),
                    );
                };
                request = request.header(name, value);
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                return ActionOutcome::error(
                    ErrorCode::ExecutionFailed,
                    format!("request to '{url}' failed: {error}"),
                );
            }
        };
        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(text) => text,
            Err(error) => {
                return ActionOutcome::error(
                    ErrorCode::ExecutionFailed,
                    format!("cannot read response from '{url}': {error}"),
                );
            }
        };

        // JSON bodies stay structured so later `#{output}.field` references
        // can reach into them.
        let body = serde_json::from_str::<Value>(&text)
            .unwrap_or_else(|_| Value::String(truncate_output(&text, self.max_output_bytes)));
        ActionOutcome::Value(json!({ "status": status, "body": body }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::super::testing::{ctx, RecordingSink};
    use super::{DownloadHandler, FetchApiHandler};
    use crate::descriptor::ActionDescriptor;
    use crate::registry::{ActionHandler, ActionOutcome};

    #[tokio::test]
    async fn download_writes_the_body_and_acknowledges() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/file.bin");
                then.status(200).body("binary-ish payload");
            })
            .await;
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("downloads/file.bin");

        let sink = Arc::new(RecordingSink::default());
        let handler = DownloadHandler::new(reqwest::Client::new(), sink.clone());
        let outcome = handler
            .execute(
                &ActionDescriptor::Download {
                    url: server.url("/file.bin"),
                    path: target.to_string_lossy().to_string(),
                },
                &ctx(),
            )
            .await;

        mock.assert_calls(1);
        assert_eq!(outcome, ActionOutcome::Done);
        assert_eq!(
            std::fs::read_to_string(&target).expect("downloaded"),
            "binary-ish payload"
        );
        let texts = sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("*[DOWNLOAD]*"));
    }

    #[tokio::test]
    async fn download_of_a_missing_resource_is_an_execution_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(404);
            })
            .await;
        let dir = tempfile::tempdir().expect("tempdir");

        let handler = DownloadHandler::new(
            reqwest::Client::new(),
            Arc::new(RecordingSink::default()),
        );
        let outcome = handler
            .execute(
                &ActionDescriptor::Download {
                    url: server.url("/gone"),
                    path: dir.path().join("x").to_string_lossy().to_string(),
                },
                &ctx(),
            )
            .await;
        assert!(matches!(outcome, ActionOutcome::Error(_)));
    }

    #[tokio::test]
    async fn fetch_api_returns_status_and_structured_json_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/things")
                    .header("x-token", "secret")
                    .json_body(json!({ "name": "kaya" }));
                then.status(201).json_body(json!({ "id": 7 }));
            })
            .await;

        let handler = FetchApiHandler::new(reqwest::Client::new(), 64 * 1024);
        let outcome = handler
            .execute(
                &ActionDescriptor::FetchApi {
                    method: "post".to_string(),
                    url: server.url("/v1/things"),
                    headers: Some(json!({ "x-token": "secret" })),
                    body: Some(json!({ "name": "kaya" })),
                },
                &ctx(),
            )
            .await;

        mock.assert_calls(1);
        assert_eq!(
            outcome,
            ActionOutcome::Value(json!({ "status": 201, "body": { "id": 7 } }))
        );
    }

    #[tokio::test]
    async fn fetch_api_rejects_nonsense_methods() {
        let handler = FetchApiHandler::new(reqwest::Client::new(), 64 * 1024);
        let outcome = handler
            .execute(
                &ActionDescriptor::FetchApi {
                    method: "no such method".to_string(),
                    url: "http://localhost/".to_string(),
                    headers: None,
                    body: None,
                },
                &ctx(),
            )
            .await;
        assert!(matches!(outcome, ActionOutcome::Error(_)));
    }
}

//! Archive handlers, all driven through the `7z` binary. Gzip tarballs are
//! produced in two passes because 7z writes one compression layer at a time.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::process::Command;

use super::truncate_output;
use crate::context::ExecutionContext;
use crate::descriptor::{ActionDescriptor, ArchiveKind, ErrorCode};
use crate::registry::{ActionError, ActionHandler, ActionOutcome, ReplySink};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum ArchiveStep {
    SevenZ(Vec<String>),
    RemoveFile(PathBuf),
}

/// Invocation plan for one compress request.
pub(super) fn compress_steps(kind: ArchiveKind, path: &str, destination: &str) -> Vec<ArchiveStep> {
    let args = |format: &str, dest: &str, src: &str| {
        vec![
            "a".to_string(),
            format!("-t{format}"),
            dest.to_string(),
            src.to_string(),
        ]
    };
    match kind {
        ArchiveKind::Zip => vec![ArchiveStep::SevenZ(args("zip", destination, path))],
        ArchiveKind::SevenZ => vec![ArchiveStep::SevenZ(args("7z", destination, path))],
        ArchiveKind::Tar => vec![ArchiveStep::SevenZ(args("tar", destination, path))],
        ArchiveKind::Tgz => {
            let intermediate = format!("{destination}.partial.tar");
            vec![
                ArchiveStep::SevenZ(args("tar", &intermediate, path)),
                ArchiveStep::SevenZ(args("gzip", destination, &intermediate)),
                ArchiveStep::RemoveFile(PathBuf::from(intermediate)),
            ]
        }
    }
}

pub(super) fn decompress_args(path: &str, destination: &str) -> Vec<String> {
    vec![
        "x".to_string(),
        path.to_string(),
        format!("-o{destination}"),
        "-y".to_string(),
    ]
}

async fn run_7z(args: &[String]) -> Result<String, ActionError> {
    let output = Command::new("7z").args(args).output().await.map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            ActionError::execution_failed("the 7z binary is not installed on this host")
        } else {
            ActionError::execution_failed(format!("failed to spawn 7z: {error}"))
        }
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ActionError::execution_failed(format!(
            "7z exited with {}: {}",
            output.status,
            stderr.trim_end()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

async fn run_steps(steps: &[ArchiveStep]) -> Result<(), ActionError> {
    for step in steps {
        match step {
            ArchiveStep::SevenZ(args) => {
                run_7z(args).await?;
            }
            ArchiveStep::RemoveFile(path) => {
                if let Err(error) = fs::remove_file(path).await {
                    eprintln!(
                        "failed to remove intermediate archive {}: {error}",
                        path.display()
                    );
                }
            }
        }
    }
    Ok(())
}

pub(super) struct CompressHandler {
    replies: Arc<dyn ReplySink>,
}

impl CompressHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for CompressHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Compress {
            path,
            destination,
            archive,
        } = action
        else {
            return ActionOutcome::Done;
        };
        if !PathBuf::from(path).exists() {
            return ActionOutcome::error(
                ErrorCode::ExecutionFailed,
                format!("nothing to compress at '{path}'"),
            );
        }
        if let Err(error) = run_steps(&compress_steps(*archive, path, destination)).await {
            return ActionOutcome::Error(error);
        }
        let notice = format!("*[ARCHIVE]* `{destination}`");
        if let Err(error) = self.replies.reply(ctx, &notice, &[]).await {
            eprintln!("failed to acknowledge compress: {error}");
        }
        ActionOutcome::Done
    }
}

pub(super) struct DecompressHandler {
    replies: Arc<dyn ReplySink>,
}

impl DecompressHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for DecompressHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Decompress { path, destination } = action else {
            return ActionOutcome::Done;
        };
        if let Err(error) = run_7z(&decompress_args(path, destination)).await {
            return ActionOutcome::Error(error);
        }
        let notice = format!("*[ARCHIVE]* extracted to `{destination}`");
        if let Err(error) = self.replies.reply(ctx, &notice, &[]).await {
            eprintln!("failed to acknowledge decompress: {error}");
        }
        ActionOutcome::Done
    }
}

/// Feeds the 7z listing back to the model instead of the conversation; the
/// model summarizes it for the user.
pub(super) struct ArchiveListHandler {
    max_output_bytes: usize,
}

impl ArchiveListHandler {
    pub(super) fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

#[async_trait]
impl ActionHandler for ArchiveListHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::ArchiveList { path } = action else {
            return ActionOutcome::Done;
        };
        match run_7z(&["l".to_string(), path.clone()]).await {
            Ok(listing) => ActionOutcome::Value(Value::String(truncate_output(
                &listing,
                self.max_output_bytes,
            ))),
            Err(error) => ActionOutcome::Error(error),
        }
    }
}

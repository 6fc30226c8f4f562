//! Filesystem handlers. Reads feed their content back to the model; mutations
//! acknowledge into the conversation and end the turn.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;

use super::truncate_output;
use crate::context::ExecutionContext;
use crate::descriptor::{ActionDescriptor, ErrorCode};
use crate::registry::{ActionHandler, ActionOutcome, ReplySink};

fn fs_failed(operation: &str, path: &Path, error: impl std::fmt::Display) -> ActionOutcome {
    ActionOutcome::error(
        ErrorCode::ExecutionFailed,
        format!("{operation} '{}' failed: {error}", path.display()),
    )
}

pub(super) struct ReadHandler {
    max_output_bytes: usize,
}

impl ReadHandler {
    pub(super) fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

#[async_trait]
impl ActionHandler for ReadHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Read { path } = action else {
            return ActionOutcome::Done;
        };
        let path = PathBuf::from(path);
        // A directory reads as its listing.
        if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return match list_entries(&path).await {
                Ok(names) => ActionOutcome::Value(Value::Array(
                    names.into_iter().map(Value::String).collect(),
                )),
                Err(error) => fs_failed("list", &path, error),
            };
        }
        match fs::read_to_string(&path).await {
            Ok(content) => ActionOutcome::Value(Value::String(truncate_output(
                &content,
                self.max_output_bytes,
            ))),
            Err(error) => fs_failed("read", &path, error),
        }
    }
}

async fn list_entries(path: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = fs::read_dir(path).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}

pub(super) struct WriteHandler {
    replies: Arc<dyn ReplySink>,
}

impl WriteHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for WriteHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Write { path, content } = action else {
            return ActionOutcome::Done;
        };
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(error) = fs::create_dir_all(parent).await {
                    return fs_failed("create parent of", &path, error);
                }
            }
        }
        if let Err(error) = fs::write(&path, content).await {
            return fs_failed("write", &path, error);
        }
        let notice = format!("*[WRITE]* `{}`", path.display());
        if let Err(error) = self.replies.reply(ctx, &notice, &[]).await {
            eprintln!("failed to acknowledge write: {error}");
        }
        ActionOutcome::Done
    }
}

pub(super) struct DeleteHandler {
    replies: Arc<dyn ReplySink>,
}

impl DeleteHandler {
    pub(super) fn new(replies: Arc<dyn ReplySink>) -> Self {
        Self { replies }
    }
}

#[async_trait]
impl ActionHandler for DeleteHandler {
    async fn execute(&self, action: &ActionDescriptor, ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Delete { path } = action else {
            return ActionOutcome::Done;
        };
        let path = PathBuf::from(path);
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) => return fs_failed("delete", &path, error),
        };
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        if let Err(error) = result {
            return fs_failed("delete", &path, error);
        }
        let notice = format!("Deleted `{}`.", path.display());
        if let Err(error) = self.replies.reply(ctx, &notice, &[]).await {
            eprintln!("failed to acknowledge delete: {error}");
        }
        ActionOutcome::Done
    }
}

pub(super) struct CopyHandler;

#[async_trait]
impl ActionHandler for CopyHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Copy { from, to } = action else {
            return ActionOutcome::Done;
        };
        let from = PathBuf::from(from);
        let to = PathBuf::from(to);
        match copy_recursive(from.clone(), to).await {
            Ok(()) => ActionOutcome::Done,
            Err(error) => fs_failed("copy", &from, error),
        }
    }
}

/// Directories copy depth-first; symlinks are followed, not preserved.
fn copy_recursive(
    from: PathBuf,
    to: PathBuf,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send>> {
    Box::pin(async move {
        let metadata = fs::metadata(&from).await?;
        if !metadata.is_dir() {
            if let Some(parent) = to.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
            fs::copy(&from, &to).await?;
            return Ok(());
        }

        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            copy_recursive(entry.path(), to.join(entry.file_name())).await?;
        }
        Ok(())
    })
}

pub(super) struct MoveHandler;

#[async_trait]
impl ActionHandler for MoveHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Move { from, to } = action else {
            return ActionOutcome::Done;
        };
        let from = PathBuf::from(from);
        let to = PathBuf::from(to);
        if let Some(parent) = to.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(error) = fs::create_dir_all(parent).await {
                    return fs_failed("create parent of", &to, error);
                }
            }
        }
        match fs::rename(&from, &to).await {
            Ok(()) => ActionOutcome::Done,
            Err(error) => fs_failed("move", &from, error),
        }
    }
}

pub(super) struct MakeDirHandler;

#[async_trait]
impl ActionHandler for MakeDirHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::MakeDir { path } = action else {
            return ActionOutcome::Done;
        };
        let path = PathBuf::from(path);
        match fs::create_dir_all(&path).await {
            Ok(()) => ActionOutcome::Done,
            Err(error) => fs_failed("create directory", &path, error),
        }
    }
}

/// Without keywords: a bare existence probe. With keywords: lists directory
/// entries whose names match any keyword, which the model then reasons over.
pub(super) struct ExistsHandler;

#[async_trait]
impl ActionHandler for ExistsHandler {
    async fn execute(&self, action: &ActionDescriptor, _ctx: &ExecutionContext) -> ActionOutcome {
        let ActionDescriptor::Exists { path, keywords } = action else {
            return ActionOutcome::Done;
        };
        let path = PathBuf::from(path);
        if keywords.is_empty() {
            return ActionOutcome::Value(json!(path.exists()));
        }

        let lowered: Vec<String> = keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .collect();
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(error) => return fs_failed("list", &path, error),
        };
        let mut matches = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if lowered
                        .iter()
                        .any(|keyword| name.to_lowercase().contains(keyword))
                    {
                        matches.push(Value::String(name));
                    }
                }
                Ok(None) => break,
                Err(error) => return fs_failed("list", &path, error),
            }
        }
        matches.sort_by_key(|entry| entry.as_str().unwrap_or_default().to_string());
        ActionOutcome::Value(Value::Array(matches))
    }
}

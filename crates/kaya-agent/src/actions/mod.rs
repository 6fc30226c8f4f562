//! The built-in action handlers and the registry builder that wires them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::descriptor::ActionKind;
use crate::registry::{ActionRegistry, HostControl, ReplySink};

mod archive;
mod fs;
mod net;
mod system;

pub use system::evaluate_expression;

/// Host-side settings shared by the handlers.
#[derive(Debug, Clone)]
pub struct ActionSetConfig {
    /// Display name to conversation id, for the contact lookup action.
    pub contacts: HashMap<String, String>,
    pub execute_timeout: Duration,
    pub download_timeout: Duration,
    /// Cap on process output and file content fed back to the model.
    pub max_output_bytes: usize,
}

impl Default for ActionSetConfig {
    fn default() -> Self {
        Self {
            contacts: HashMap::new(),
            execute_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(120),
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Builds a registry with every supported action kind bound to its handler.
pub fn build_action_registry(
    config: ActionSetConfig,
    replies: Arc<dyn ReplySink>,
    host: Arc<dyn HostControl>,
) -> Result<ActionRegistry> {
    let http = reqwest::Client::builder()
        .timeout(config.download_timeout)
        .build()
        .context("failed to build HTTP client for network actions")?;

    let mut registry = ActionRegistry::new();

    registry.register(
        ActionKind::Talk,
        Arc::new(system::TalkHandler::new(replies.clone())),
    );
    registry.register(ActionKind::None, Arc::new(system::NoneHandler));
    registry.register(
        ActionKind::Status,
        Arc::new(system::StatusHandler::new(replies.clone())),
    );
    registry.register(
        ActionKind::Error,
        Arc::new(system::ErrorNoticeHandler::new(replies.clone())),
    );
    registry.register(
        ActionKind::Messenger,
        Arc::new(system::MessengerHandler::new(replies.clone())),
    );
    registry.register(
        ActionKind::Execute,
        Arc::new(system::ExecuteHandler::new(
            config.execute_timeout,
            config.max_output_bytes,
        )),
    );
    registry.register(
        ActionKind::Calculate,
        Arc::new(system::CalculateHandler::new(replies.clone())),
    );
    registry.register(
        ActionKind::WebSearch,
        Arc::new(system::WebSearchHandler::new(replies.clone())),
    );
    registry.register(
        ActionKind::Contact,
        Arc::new(system::ContactHandler::new(config.contacts.clone())),
    );

    registry.register(
        ActionKind::Read,
        Arc::new(fs::ReadHandler::new(config.max_output_bytes)),
    );
    registry.register(
        ActionKind::Write,
        Arc::new(fs::WriteHandler::new(replies.clone())),
    );
    registry.register(
        ActionKind::Delete,
        Arc::new(fs::DeleteHandler::new(replies.clone())),
    );
    registry.register(ActionKind::Copy, Arc::new(fs::CopyHandler));
    registry.register(ActionKind::Move, Arc::new(fs::MoveHandler));
    registry.register(ActionKind::MakeDir, Arc::new(fs::MakeDirHandler));
    registry.register(ActionKind::Exists, Arc::new(fs::ExistsHandler));

    registry.register(
        ActionKind::Compress,
        Arc::new(archive::CompressHandler::new(replies.clone())),
    );
    registry.register(
        ActionKind::Decompress,
        Arc::new(archive::DecompressHandler::new(replies.clone())),
    );
    registry.register(
        ActionKind::ArchiveList,
        Arc::new(archive::ArchiveListHandler::new(config.max_output_bytes)),
    );

    registry.register(
        ActionKind::Download,
        Arc::new(net::DownloadHandler::new(http.clone(), replies.clone())),
    );
    registry.register(
        ActionKind::FetchApi,
        Arc::new(net::FetchApiHandler::new(http, config.max_output_bytes)),
    );

    registry.register(
        ActionKind::Shutdown,
        Arc::new(system::ShutdownHandler::new(replies.clone(), host.clone())),
    );
    registry.register(
        ActionKind::Restart,
        Arc::new(system::RestartHandler::new(replies, host)),
    );

    Ok(registry)
}

/// Truncates on a char boundary and marks the cut.
pub(crate) fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [truncated]", &text[..end])
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use crate::context::ExecutionContext;
    use crate::registry::ReplySink;

    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        pub fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .expect("lock")
                .iter()
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn reply(
            &self,
            ctx: &ExecutionContext,
            text: &str,
            _mentions: &[String],
        ) -> Result<()> {
            self.sent
                .lock()
                .expect("lock")
                .push((ctx.conversation().to_string(), text.to_string()));
            Ok(())
        }

        async fn send_to(&self, target: &str, text: &str, _mentions: &[String]) -> Result<()> {
            self.sent
                .lock()
                .expect("lock")
                .push((target.to_string(), text.to_string()));
            Ok(())
        }
    }

    pub fn ctx() -> ExecutionContext {
        ExecutionContext {
            user_id: "user@u".to_string(),
            request: "request".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::testing::RecordingSink;
    use super::{build_action_registry, truncate_output, ActionSetConfig};
    use crate::descriptor::ActionKind;
    use crate::registry::HostControl;

    struct NoopHost;

    #[async_trait]
    impl HostControl for NoopHost {
        async fn shutdown(&self, _reason: &str) {}
        async fn restart(&self, _reason: &str) {}
    }

    #[test]
    fn registry_covers_every_action_kind() {
        let registry = build_action_registry(
            ActionSetConfig::default(),
            Arc::new(RecordingSink::default()),
            Arc::new(NoopHost),
        )
        .expect("registry");
        for kind in ActionKind::ALL {
            assert!(registry.lookup(*kind).is_some(), "missing {}", kind.as_str());
        }
    }

    #[test]
    fn truncation_is_char_boundary_safe() {
        assert_eq!(truncate_output("short", 16), "short");
        let cut = truncate_output("héllo wörld", 3);
        assert!(cut.starts_with("h"));
        assert!(cut.ends_with("[truncated]"));
    }
}

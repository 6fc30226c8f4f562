//! Agent identity and trust configuration, loaded from a JSON file kept
//! outside the repository. A missing file gets a template so the first run
//! tells the operator exactly what to fill in.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use kaya_agent::{ActionKind, ActionPolicy};
use kaya_core::write_text_atomic;
use kaya_transport::normalize_jid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secrets {
    /// Display name the agent answers to as `@name` in groups.
    pub agent_name: String,
    /// The agent's own messaging account jid.
    pub agent_jid: String,
    /// Shown to unauthorized users asking for gated actions.
    pub owner_name: String,
    /// Users allowed to run gated actions, as jids.
    #[serde(default)]
    pub authorized_users: Vec<String>,
    /// Contact book for the lookup action: display name to jid.
    #[serde(default)]
    pub contacts: HashMap<String, String>,
    /// Overrides the built-in safe action set when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_actions: Option<Vec<String>>,
    /// Overrides the built-in model instructions when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl Secrets {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let template = serde_json::to_string_pretty(&Self::template())
                .context("failed to render secrets template")?;
            write_text_atomic(path, &template)?;
            bail!(
                "no secrets file at {}; wrote a template there, fill it in and start again",
                path.display()
            );
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read secrets file {}", path.display()))?;
        let secrets: Secrets = serde_json::from_str(&raw)
            .with_context(|| format!("secrets file {} is not valid JSON", path.display()))?;
        secrets.validate(path)?;
        Ok(secrets)
    }

    fn template() -> Self {
        Self {
            agent_name: "kaya".to_string(),
            agent_jid: String::new(),
            owner_name: String::new(),
            authorized_users: Vec::new(),
            contacts: HashMap::new(),
            safe_actions: None,
            instructions: None,
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.agent_jid.trim().is_empty() {
            bail!("agent_jid in {} is empty", path.display());
        }
        if self.agent_name.trim().is_empty() {
            bail!("agent_name in {} is empty", path.display());
        }
        if self.owner_name.trim().is_empty() {
            bail!("owner_name in {} is empty", path.display());
        }
        Ok(())
    }

    /// Authorized users with device suffixes stripped, matching how inbound
    /// senders are normalized.
    pub fn normalized_authorized_users(&self) -> Vec<String> {
        self.authorized_users
            .iter()
            .map(|user| normalize_jid(user))
            .collect()
    }

    /// The safe action set, either the override or the built-in default.
    pub fn resolve_safe_actions(&self) -> Result<Vec<ActionKind>> {
        let Some(tags) = &self.safe_actions else {
            return Ok(ActionPolicy::default_safe_actions());
        };
        tags.iter()
            .map(|tag| {
                ActionKind::from_tag(&tag.to_ascii_lowercase())
                    .with_context(|| format!("unknown action '{tag}' in safe_actions"))
            })
            .collect()
    }
}

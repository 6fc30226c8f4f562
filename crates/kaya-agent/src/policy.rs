//! Declarative authorization policy: which action kinds any user may invoke,
//! and which users may invoke the rest.
//!
//! Consulted exactly once per action, before dispatch; no handler re-checks.

use std::collections::HashSet;

use crate::descriptor::ActionKind;
use crate::registry::ActionError;

#[derive(Debug, Clone)]
pub struct ActionPolicy {
    safe_actions: HashSet<ActionKind>,
    authorized_users: HashSet<String>,
    owner_name: String,
}

impl ActionPolicy {
    pub fn new(
        safe_actions: impl IntoIterator<Item = ActionKind>,
        authorized_users: impl IntoIterator<Item = String>,
        owner_name: impl Into<String>,
    ) -> Self {
        Self {
            safe_actions: safe_actions.into_iter().collect(),
            authorized_users: authorized_users.into_iter().collect(),
            owner_name: owner_name.into(),
        }
    }

    /// Conversational and read-only reporting kinds any user may trigger.
    /// Everything touching the host (files, processes, network, the agent's
    /// own lifecycle) stays gated.
    pub fn default_safe_actions() -> Vec<ActionKind> {
        vec![
            ActionKind::Talk,
            ActionKind::None,
            ActionKind::Status,
            ActionKind::Error,
            ActionKind::Calculate,
            ActionKind::WebSearch,
            ActionKind::Contact,
        ]
    }

    pub fn is_safe(&self, kind: ActionKind) -> bool {
        self.safe_actions.contains(&kind)
    }

    pub fn is_authorized_user(&self, user_id: &str) -> bool {
        self.authorized_users.contains(user_id)
    }

    /// The central gate: non-safe kinds require membership in the
    /// authorized-users set.
    pub fn authorize(&self, kind: ActionKind, user_id: &str) -> Result<(), ActionError> {
        if self.is_safe(kind) || self.is_authorized_user(user_id) {
            return Ok(());
        }
        Err(ActionError::unauthorized_user(
            kind.as_str(),
            &self.owner_name,
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::{ActionKind, ErrorCode};

    use super::ActionPolicy;

    fn policy() -> ActionPolicy {
        ActionPolicy::new(
            ActionPolicy::default_safe_actions(),
            vec!["owner@u".to_string()],
            "Dana",
        )
    }

    #[test]
    fn safe_actions_are_open_to_everyone() {
        let policy = policy();
        assert!(policy.authorize(ActionKind::Talk, "stranger@u").is_ok());
        assert!(policy.authorize(ActionKind::Calculate, "stranger@u").is_ok());
    }

    #[test]
    fn non_safe_actions_require_authorization() {
        let policy = policy();
        let error = policy
            .authorize(ActionKind::Execute, "stranger@u")
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::UnauthorizedUser);
        assert!(error.details.unwrap_or_default().contains("execute"));
        assert!(error
            .suggested_fix
            .unwrap_or_default()
            .contains("Dana"));
    }

    #[test]
    fn authorized_users_may_do_anything() {
        let policy = policy();
        assert!(policy.authorize(ActionKind::Execute, "owner@u").is_ok());
        assert!(policy.authorize(ActionKind::Delete, "owner@u").is_ok());
        assert!(policy.authorize(ActionKind::Shutdown, "owner@u").is_ok());
    }

    #[test]
    fn default_safe_set_excludes_host_touching_kinds() {
        let policy = policy();
        for kind in [
            ActionKind::Execute,
            ActionKind::Write,
            ActionKind::Delete,
            ActionKind::Download,
            ActionKind::FetchApi,
            ActionKind::Shutdown,
            ActionKind::Restart,
        ] {
            assert!(!policy.is_safe(kind), "{kind:?} must not be safe");
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Action definition records — user-authored reusable `prompt` or `command`
//! specs, distinct from the imperative codegen actions emitted by `aad-ir`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of an action's `title`.
pub const MAX_TITLE_LEN: usize = 200;

/// The kind of an action definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// An LLM prompt executed by a configured coding agent.
    Prompt,
    /// A shell command.
    Command,
}

impl ActionKind {
    /// Wire name of this kind, e.g. `"prompt"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Command => "command",
        }
    }
}

/// The kind-dependent body of an action definition.
///
/// Represented as a raw JSON object because each kind's allowed key set is
/// normalized and validated at the registry boundary (`aad-actions`), not
/// here; this type only carries the dynamic shape.
pub type ActionSpec = serde_json::Map<String, serde_json::Value>;

/// A single action definition row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionDefinition {
    /// Row identifier. Ids `>= BUILTIN_ACTION_ID_FLOOR` are built-in.
    pub id: i64,
    /// Human-facing title, at most [`MAX_TITLE_LEN`] characters.
    pub title: String,
    /// Whether this is a prompt or a command action.
    pub kind: ActionKind,
    /// Kind-dependent normalized spec.
    pub spec: ActionSpec,
    /// Whether the action is currently enabled.
    pub enabled: bool,
    /// Creation timestamp. Built-in actions use a fixed epoch value.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ActionDefinition {
    /// Returns `true` if this is an immutable built-in action.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        crate::ids::is_builtin_action_id(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names() {
        assert_eq!(ActionKind::Prompt.as_str(), "prompt");
        assert_eq!(ActionKind::Command.as_str(), "command");
    }

    #[test]
    fn kind_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&ActionKind::Prompt).unwrap(),
            "\"prompt\""
        );
    }

    #[test]
    fn builtin_detection() {
        let mut spec = ActionSpec::new();
        spec.insert("prompt".into(), serde_json::json!("hi"));
        let def = ActionDefinition {
            id: 9_000_000_001,
            title: "Built-in".into(),
            kind: ActionKind::Prompt,
            spec,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(def.is_builtin());
    }
}

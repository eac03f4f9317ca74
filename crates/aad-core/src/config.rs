// SPDX-License-Identifier: MIT OR Apache-2.0
//! Global config key/value entries, the distinguished pipeline plan, and
//! per-workspace configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The config key under which the structured pipeline plan is stored.
pub const PIPELINE_PLAN_KEY: &str = "pipeline_plan";

/// The fixed 9-language set allowed for `WorkspaceConfig::default_language`.
pub const SUPPORTED_LANGUAGES: [&str; 9] = [
    "typescript",
    "javascript",
    "python",
    "rust",
    "go",
    "java",
    "csharp",
    "ruby",
    "php",
];

/// A single row of the global config key/value store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigEntry {
    /// The config key.
    pub key: String,
    /// Arbitrary JSON value associated with the key.
    pub value: serde_json::Value,
    /// When this entry was last written.
    pub updated_at: DateTime<Utc>,
}

/// A single step inside a [`PipelinePlan`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStep {
    /// Step identifier, unique within the plan.
    pub id: i64,
    /// Free-form block label (UI-facing, not the AAPS `block` enum).
    pub block: String,
    /// Any remaining plan-step fields the UI attaches.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The structured plan object stored under [`PIPELINE_PLAN_KEY`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelinePlan {
    /// Discriminant tag, always `"autoappdev_plan"`.
    pub kind: String,
    /// Plan schema version, currently `1`.
    pub version: u32,
    /// Ordered plan steps.
    pub steps: Vec<PlanStep>,
}

impl PipelinePlan {
    /// The expected `kind` discriminant for a valid plan.
    pub const KIND: &'static str = "autoappdev_plan";
    /// The expected `version` for a valid plan.
    pub const VERSION: u32 = 1;

    /// Returns `true` if `kind` and `version` match the expected constants.
    #[must_use]
    pub fn has_valid_header(&self) -> bool {
        self.kind == Self::KIND && self.version == Self::VERSION
    }
}

/// Per-workspace configuration, keyed by a single-segment workspace slug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    /// Workspace slug this config belongs to.
    pub workspace: String,
    /// Workspace-relative material paths (1..20 entries).
    pub materials_paths: Vec<String>,
    /// Shared context text, at most 200k characters.
    pub shared_context_text: String,
    /// Optional workspace-relative path to a shared context file.
    pub shared_context_path: Option<String>,
    /// Default language for this workspace, one of [`SUPPORTED_LANGUAGES`].
    pub default_language: String,
    /// When this config was last written.
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceConfig {
    /// Maximum number of `materials_paths` entries.
    pub const MAX_MATERIALS_PATHS: usize = 20;
    /// Maximum length of `shared_context_text`.
    pub const MAX_SHARED_CONTEXT_LEN: usize = 200_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_header_valid() {
        let plan = PipelinePlan {
            kind: "autoappdev_plan".into(),
            version: 1,
            steps: vec![],
        };
        assert!(plan.has_valid_header());
    }

    #[test]
    fn plan_header_rejects_wrong_kind() {
        let plan = PipelinePlan {
            kind: "something_else".into(),
            version: 1,
            steps: vec![],
        };
        assert!(!plan.has_valid_header());
    }

    #[test]
    fn plan_header_rejects_wrong_version() {
        let plan = PipelinePlan {
            kind: "autoappdev_plan".into(),
            version: 2,
            steps: vec![],
        };
        assert!(!plan.has_valid_header());
    }

    #[test]
    fn supported_languages_contains_rust() {
        assert!(SUPPORTED_LANGUAGES.contains(&"rust"));
    }

    #[test]
    fn config_entry_serde_roundtrip() {
        let entry = ConfigEntry {
            key: "k".into(),
            value: serde_json::json!({"a": 1}),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: ConfigEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, entry.key);
        assert_eq!(back.value, entry.value);
    }
}

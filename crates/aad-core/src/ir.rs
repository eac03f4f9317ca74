// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical IR v1 — the JSON representation of a parsed AAPS pipeline
//! script, produced by `aad-ir`'s parser and consumed by its codegen.

use serde::{Deserialize, Serialize};

/// The `kind` discriminant every IR document carries.
pub const IR_KIND: &str = "autoappdev_ir";
/// The IR schema version this crate implements.
pub const IR_VERSION: u32 = 1;

/// The block kind a [`Step`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    /// A planning step.
    Plan,
    /// A work step.
    Work,
    /// A debug step (actions run in a best-effort loop, failures tracked).
    Debug,
    /// A fix step.
    Fix,
    /// A summary step.
    Summary,
    /// A commit-and-push step.
    CommitPush,
}

impl Block {
    /// Parse a block name from its AAPS wire string.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "plan" => Self::Plan,
            "work" => Self::Work,
            "debug" => Self::Debug,
            "fix" => Self::Fix,
            "summary" => Self::Summary,
            "commit_push" => Self::CommitPush,
            _ => return None,
        })
    }

    /// The AAPS wire string for this block.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Work => "work",
            Self::Debug => "debug",
            Self::Fix => "fix",
            Self::Summary => "summary",
            Self::CommitPush => "commit_push",
        }
    }
}

/// A single action inside a [`Step`].
///
/// `kind` is an open string at this layer: the parser (`aad-ir`) accepts any
/// non-empty kind, and only the codegen stage rejects kinds it doesn't know
/// how to emit. The set of codegen-supported kinds (`note`, `run`,
/// `codex_exec`) lives in `aad-ir` alongside the renderer that interprets
/// them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Action id, unique within its parent step.
    pub id: String,
    /// Action kind, e.g. `"note"`, `"run"`, `"codex_exec"`.
    pub kind: String,
    /// Kind-dependent parameters (e.g. `text`, `cmd`, `prompt`, `model`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Optional free-form metadata (e.g. `conditional`, meta-round markers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// A single step inside a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Step id, unique within its parent task.
    pub id: String,
    /// Human-facing step title.
    pub title: String,
    /// The block this step belongs to.
    pub block: Block,
    /// Ordered actions, in declaration order.
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A single task inside an [`Ir`] document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Task id, unique within the document.
    pub id: String,
    /// Human-facing task title.
    pub title: String,
    /// Optional free-form metadata (e.g. meta-round markers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// Ordered steps, in declaration order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// The canonical in-memory/JSON representation of a parsed pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ir {
    /// Discriminant tag, always [`IR_KIND`].
    pub kind: String,
    /// Schema version, currently [`IR_VERSION`].
    pub version: u32,
    /// Ordered tasks, in declaration order.
    pub tasks: Vec<Task>,
}

impl Ir {
    /// Construct an IR document with the canonical kind/version header.
    #[must_use]
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            kind: IR_KIND.to_string(),
            version: IR_VERSION,
            tasks,
        }
    }

    /// Returns `true` if `kind` and `version` match the expected constants.
    #[must_use]
    pub fn has_valid_header(&self) -> bool {
        self.kind == IR_KIND && self.version == IR_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_roundtrip_through_wire_string() {
        for b in [
            Block::Plan,
            Block::Work,
            Block::Debug,
            Block::Fix,
            Block::Summary,
            Block::CommitPush,
        ] {
            assert_eq!(Block::from_str_opt(b.as_str()), Some(b));
        }
    }

    #[test]
    fn block_rejects_unknown() {
        assert_eq!(Block::from_str_opt("nope"), None);
    }

    #[test]
    fn commit_push_wire_name() {
        assert_eq!(Block::CommitPush.as_str(), "commit_push");
        assert_eq!(Block::from_str_opt("commit_push"), Some(Block::CommitPush));
    }

    #[test]
    fn ir_new_has_valid_header() {
        let ir = Ir::new(vec![]);
        assert!(ir.has_valid_header());
    }

    #[test]
    fn ir_serde_roundtrip() {
        let ir = Ir::new(vec![Task {
            id: "t1".into(),
            title: "T".into(),
            meta: None,
            steps: vec![Step {
                id: "s1".into(),
                title: "S".into(),
                block: Block::Plan,
                actions: vec![Action {
                    id: "a1".into(),
                    kind: "note".into(),
                    params: Some(serde_json::json!({"text": "hi"})),
                    meta: None,
                }],
            }],
        }]);
        let json = serde_json::to_string(&ir).unwrap();
        let back: Ir = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ir);
    }
}

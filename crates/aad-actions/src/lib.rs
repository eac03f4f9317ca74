// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-actions
#![deny(unsafe_code)]
//!
//! The action registry (C4): validates and normalizes user-authored action
//! definitions, merging a patch onto a base spec restricted to the keys
//! allowed for the action's kind, and enforces path containment for
//! `command` actions' `cwd`.

use aad_core::{resolve_within, ActionKind, ActionSpec};
use aad_errors::{AadError, ErrorCode};
use serde_json::Value;
use std::path::Path;

/// Resolved defaults for `prompt` actions, supplied by the caller (these
/// come from config/env, which are owned outside this crate).
#[derive(Debug, Clone)]
pub struct PromptDefaults {
    pub agent: String,
    pub model: String,
    pub reasoning: String,
}

const PROMPT_ALLOWED_KEYS: [&str; 5] = ["agent", "model", "reasoning", "timeout_s", "prompt"];
const COMMAND_ALLOWED_KEYS: [&str; 4] = ["shell", "cwd", "timeout_s", "cmd"];

const MAX_PROMPT_LEN: usize = 200_000;
const MAX_CMD_LEN: usize = 20_000;
const MAX_TITLE_LEN: usize = 200;

const PROMPT_TIMEOUT_RANGE: (i64, i64) = (5, 300);
const PROMPT_TIMEOUT_DEFAULT: i64 = 45;
const COMMAND_TIMEOUT_RANGE: (i64, i64) = (1, 3600);
const COMMAND_TIMEOUT_DEFAULT: i64 = 60;

const REASONING_LEVELS: [&str; 4] = ["low", "medium", "high", "xhigh"];

/// Validate a title supplied on create or update. `None` is always
/// accepted (absent on update preserves the existing value); `Some("")`
/// is rejected.
pub fn validate_title(title: Option<&str>) -> Result<(), AadError> {
    let Some(title) = title else { return Ok(()) };
    if title.is_empty() {
        return Err(AadError::new(ErrorCode::Empty, "title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AadError::new(
            ErrorCode::TooLong,
            format!("title exceeds {MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(())
}

/// Merge `patch` onto `base`, keeping only keys in `allowed`.
fn merge_restricted(base: Option<&ActionSpec>, patch: &ActionSpec, allowed: &[&str]) -> ActionSpec {
    let mut merged = base.cloned().unwrap_or_default();
    for key in allowed {
        if let Some(v) = patch.get(*key) {
            merged.insert((*key).to_string(), v.clone());
        }
    }
    merged
}

fn str_field(spec: &ActionSpec, key: &str) -> Option<String> {
    spec.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_field(spec: &ActionSpec, key: &str) -> Option<i64> {
    spec.get(key).and_then(Value::as_i64)
}

/// Normalize a `prompt` action's spec: merge `patch` onto `base` restricted
/// to the allowed keys, validate `prompt`/`reasoning`, and fill in defaults
/// for `agent`/`model`/`reasoning`/`timeout_s`.
pub fn normalize_prompt_spec(
    base: Option<&ActionSpec>,
    patch: &ActionSpec,
    defaults: &PromptDefaults,
) -> Result<ActionSpec, AadError> {
    let mut merged = merge_restricted(base, patch, &PROMPT_ALLOWED_KEYS);

    let prompt = str_field(&merged, "prompt").unwrap_or_default();
    if prompt.is_empty() {
        return Err(AadError::new(ErrorCode::Empty, "spec.prompt must not be empty"));
    }
    if prompt.len() > MAX_PROMPT_LEN {
        return Err(AadError::new(
            ErrorCode::TooLong,
            format!("spec.prompt exceeds {MAX_PROMPT_LEN} bytes"),
        ));
    }

    let agent = str_field(&merged, "agent").unwrap_or_else(|| defaults.agent.clone());
    merged.insert("agent".into(), Value::String(agent));

    let model = str_field(&merged, "model").unwrap_or_else(|| defaults.model.clone());
    merged.insert("model".into(), Value::String(model));

    let reasoning = str_field(&merged, "reasoning").unwrap_or_else(|| defaults.reasoning.clone());
    if !REASONING_LEVELS.contains(&reasoning.as_str()) {
        return Err(AadError::new(
            ErrorCode::invalid_field("reasoning"),
            format!("reasoning must be one of {REASONING_LEVELS:?}, got '{reasoning}'"),
        ));
    }
    merged.insert("reasoning".into(), Value::String(reasoning));

    let timeout = int_field(&merged, "timeout_s")
        .unwrap_or(PROMPT_TIMEOUT_DEFAULT)
        .clamp(PROMPT_TIMEOUT_RANGE.0, PROMPT_TIMEOUT_RANGE.1);
    merged.insert("timeout_s".into(), Value::from(timeout));

    Ok(merged)
}

/// Normalize a `command` action's spec: merge `patch` onto `base`
/// restricted to the allowed keys, validate `cmd`/`shell`, and resolve
/// `cwd` within `repo_root`.
pub fn normalize_command_spec(
    base: Option<&ActionSpec>,
    patch: &ActionSpec,
    repo_root: &Path,
) -> Result<ActionSpec, AadError> {
    let mut merged = merge_restricted(base, patch, &COMMAND_ALLOWED_KEYS);

    let cmd = str_field(&merged, "cmd").unwrap_or_default();
    if cmd.is_empty() {
        return Err(AadError::new(ErrorCode::Empty, "spec.cmd must not be empty"));
    }
    if cmd.len() > MAX_CMD_LEN {
        return Err(AadError::new(
            ErrorCode::TooLong,
            format!("spec.cmd exceeds {MAX_CMD_LEN} bytes"),
        ));
    }

    let shell = str_field(&merged, "shell").unwrap_or_else(|| "bash".to_string());
    if shell != "bash" {
        return Err(AadError::new(
            ErrorCode::invalid_field("shell"),
            format!("shell must be 'bash', got '{shell}'"),
        ));
    }
    merged.insert("shell".into(), Value::String(shell));

    let cwd = str_field(&merged, "cwd").unwrap_or_else(|| ".".to_string());
    if resolve_within(repo_root, Path::new(&cwd)).is_none() {
        return Err(AadError::new(
            ErrorCode::PathOutsideRepo,
            format!("cwd '{cwd}' resolves outside the repository root"),
        ));
    }
    merged.insert("cwd".into(), Value::String(cwd));

    let timeout = int_field(&merged, "timeout_s")
        .unwrap_or(COMMAND_TIMEOUT_DEFAULT)
        .clamp(COMMAND_TIMEOUT_RANGE.0, COMMAND_TIMEOUT_RANGE.1);
    merged.insert("timeout_s".into(), Value::from(timeout));

    Ok(merged)
}

/// Normalize a spec for the given `kind`, dispatching to
/// [`normalize_prompt_spec`] or [`normalize_command_spec`].
pub fn normalize_spec(
    kind: ActionKind,
    base: Option<&ActionSpec>,
    patch: &ActionSpec,
    repo_root: &Path,
    prompt_defaults: &PromptDefaults,
) -> Result<ActionSpec, AadError> {
    match kind {
        ActionKind::Prompt => normalize_prompt_spec(base, patch, prompt_defaults),
        ActionKind::Command => normalize_command_spec(base, patch, repo_root),
    }
}

/// Returns an error if an update attempts to change an action's kind.
pub fn check_kind_unchanged(existing: ActionKind, requested: Option<ActionKind>) -> Result<(), AadError> {
    match requested {
        Some(k) if k != existing => Err(AadError::new(
            ErrorCode::KindChangeNotAllowed,
            "an action's kind cannot be changed after creation",
        )),
        _ => Ok(()),
    }
}

/// Returns an error if `id` names a built-in (read-only) action.
pub fn check_not_builtin(id: i64) -> Result<(), AadError> {
    if aad_core::is_builtin_action_id(id) {
        return Err(AadError::new(ErrorCode::Readonly, "built-in actions are read-only"));
    }
    Ok(())
}

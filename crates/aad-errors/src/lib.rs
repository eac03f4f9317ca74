// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-errors
#![deny(unsafe_code)]
//!
//! A unified, stable error taxonomy for the AutoAppDev pipeline
//! orchestration subsystem. Every error carries a machine-readable
//! [`ErrorCode`], a human-readable message, and optional `detail`/`line`
//! fields, and knows the HTTP status it maps to at the API boundary.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Machine-readable, stable error code.
///
/// Serializes as the `snake_case` wire string named in the specification
/// (e.g. `"invalid_transition"`). [`ErrorCode::InvalidField`] is the one
/// dynamic variant: it serializes as `invalid_<field>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// The request body failed structural validation.
    InvalidBody,
    /// The request body was not valid JSON.
    InvalidJson,
    /// A specific named field failed validation (`invalid_<field>`).
    InvalidField(String),
    /// The requested resource does not exist.
    NotFound,
    /// `start` was attempted while already running.
    AlreadyRunning,
    /// `pause`/`resume`/`stop` was attempted while not running.
    NotRunning,
    /// The requested FSM event is not legal from the current state.
    InvalidTransition,
    /// A script path resolved outside the repository root.
    ScriptOutsideRepo,
    /// The referenced pipeline script does not exist.
    ScriptNotFound,
    /// A required text field was empty.
    Empty,
    /// A text field exceeded its maximum length.
    TooLong,
    /// An update attempted to change an action's immutable `kind`.
    KindChangeNotAllowed,
    /// The target is a read-only built-in resource.
    Readonly,
    /// The AAPS header line was missing.
    MissingHeader,
    /// The AAPS header line was present but malformed.
    InvalidHeader,
    /// A task/step/action id was declared twice within its parent scope.
    DuplicateId,
    /// A `STEP` line appeared with no open `TASK`.
    StepBeforeTask,
    /// An `ACTION` line appeared with no open `STEP`.
    ActionBeforeStep,
    /// A `STEP.block` value was not one of the allowed block names.
    InvalidBlock,
    /// A line used a keyword other than `TASK`/`STEP`/`ACTION`.
    UnknownKeyword,
    /// A shell file had no `# AAPS:` annotation lines.
    MissingAnnotations,
    /// The agent's assistant text had no `AUTOAPPDEV_PIPELINE 1` header.
    MissingAapsHeader,
    /// No `agent_message`/`assistant_message` record was found in stdout.
    MissingAssistantText,
    /// An external process exceeded its allotted timeout.
    Timeout,
    /// The configured agent binary was not found on `PATH`.
    CodexNotFound,
    /// A path resolved outside the repository root.
    PathOutsideRepo,
    /// A path resolved outside the workspace's `auto-apps/<workspace>/` root.
    PathOutsideAutoApps,
    /// README marker comments were malformed or duplicated.
    MarkerMismatch,
    /// A required `## Philosophy` section was missing.
    MissingPhilosophy,
    /// Writing an artifact file failed.
    ArtifactWriteFailed,
    /// An unexpected internal failure (store, I/O, etc).
    Internal,
}

impl ErrorCode {
    /// A field-specific validation error, e.g. `invalid_timeout_s`.
    #[must_use]
    pub fn invalid_field(field: impl Into<String>) -> Self {
        Self::InvalidField(field.into())
    }

    /// The wire string for this code.
    #[must_use]
    pub fn as_wire_str(&self) -> String {
        match self {
            Self::InvalidBody => "invalid_body".to_string(),
            Self::InvalidJson => "invalid_json".to_string(),
            Self::InvalidField(field) => format!("invalid_{field}"),
            Self::NotFound => "not_found".to_string(),
            Self::AlreadyRunning => "already_running".to_string(),
            Self::NotRunning => "not_running".to_string(),
            Self::InvalidTransition => "invalid_transition".to_string(),
            Self::ScriptOutsideRepo => "script_outside_repo".to_string(),
            Self::ScriptNotFound => "script_not_found".to_string(),
            Self::Empty => "empty".to_string(),
            Self::TooLong => "too_long".to_string(),
            Self::KindChangeNotAllowed => "kind_change_not_allowed".to_string(),
            Self::Readonly => "readonly".to_string(),
            Self::MissingHeader => "missing_header".to_string(),
            Self::InvalidHeader => "invalid_header".to_string(),
            Self::DuplicateId => "duplicate_id".to_string(),
            Self::StepBeforeTask => "step_before_task".to_string(),
            Self::ActionBeforeStep => "action_before_step".to_string(),
            Self::InvalidBlock => "invalid_block".to_string(),
            Self::UnknownKeyword => "unknown_keyword".to_string(),
            Self::MissingAnnotations => "missing_annotations".to_string(),
            Self::MissingAapsHeader => "missing_aaps_header".to_string(),
            Self::MissingAssistantText => "missing_assistant_text".to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::CodexNotFound => "codex_not_found".to_string(),
            Self::PathOutsideRepo => "path_outside_repo".to_string(),
            Self::PathOutsideAutoApps => "path_outside_auto_apps".to_string(),
            Self::MarkerMismatch => "marker_mismatch".to_string(),
            Self::MissingPhilosophy => "missing_philosophy".to_string(),
            Self::ArtifactWriteFailed => "artifact_write_failed".to_string(),
            Self::Internal => "internal".to_string(),
        }
    }

    /// The HTTP status this code maps to, per the propagation table.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound | Self::ScriptNotFound => 404,
            Self::Readonly | Self::PathOutsideRepo | Self::PathOutsideAutoApps => 403,
            Self::Timeout => 504,
            Self::CodexNotFound => 503,
            Self::Internal => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.as_wire_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(de)?;
        Ok(match s.as_str() {
            "invalid_body" => Self::InvalidBody,
            "invalid_json" => Self::InvalidJson,
            "not_found" => Self::NotFound,
            "already_running" => Self::AlreadyRunning,
            "not_running" => Self::NotRunning,
            "invalid_transition" => Self::InvalidTransition,
            "script_outside_repo" => Self::ScriptOutsideRepo,
            "script_not_found" => Self::ScriptNotFound,
            "empty" => Self::Empty,
            "too_long" => Self::TooLong,
            "kind_change_not_allowed" => Self::KindChangeNotAllowed,
            "readonly" => Self::Readonly,
            "missing_header" => Self::MissingHeader,
            "invalid_header" => Self::InvalidHeader,
            "duplicate_id" => Self::DuplicateId,
            "step_before_task" => Self::StepBeforeTask,
            "action_before_step" => Self::ActionBeforeStep,
            "invalid_block" => Self::InvalidBlock,
            "unknown_keyword" => Self::UnknownKeyword,
            "missing_annotations" => Self::MissingAnnotations,
            "missing_aaps_header" => Self::MissingAapsHeader,
            "missing_assistant_text" => Self::MissingAssistantText,
            "timeout" => Self::Timeout,
            "codex_not_found" => Self::CodexNotFound,
            "path_outside_repo" => Self::PathOutsideRepo,
            "path_outside_auto_apps" => Self::PathOutsideAutoApps,
            "marker_mismatch" => Self::MarkerMismatch,
            "missing_philosophy" => Self::MissingPhilosophy,
            "artifact_write_failed" => Self::ArtifactWriteFailed,
            "internal" => Self::Internal,
            other => other
                .strip_prefix("invalid_")
                .map(|field| Self::InvalidField(field.to_string()))
                .unwrap_or(Self::Internal),
        })
    }
}

/// A typed AutoAppDev error, exchanged across every component boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AadError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional extra detail (e.g. stderr excerpt, conflicting field value).
    pub detail: Option<String>,
    /// 1-based source line, set for AAPS parse errors.
    pub line: Option<u64>,
}

impl AadError {
    /// Construct an error with no detail or line.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            line: None,
        }
    }

    /// Attach a detail string.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach a 1-based source line number.
    #[must_use]
    pub fn with_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    /// The HTTP status this error maps to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Render as the `{error, detail?, line?}` wire body.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "error".to_string(),
            serde_json::Value::String(self.code.as_wire_str()),
        );
        if let Some(detail) = &self.detail {
            obj.insert("detail".to_string(), serde_json::Value::String(detail.clone()));
        }
        if let Some(line) = self.line {
            obj.insert("line".to_string(), serde_json::json!(line));
        }
        serde_json::Value::Object(obj)
    }

    /// Wrap an unexpected internal failure (store/I/O), per §7: surfaced as
    /// 500 with `{type, msg}` detail rather than a specific user-facing code.
    #[must_use]
    pub fn internal(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(ErrorCode::Internal, err.to_string())
            .with_detail(format!("{{\"type\":\"{}\",\"msg\":\"{}\"}}", std::any::type_name_of_val(err), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_str_matches_spec_codes() {
        assert_eq!(ErrorCode::InvalidBody.as_wire_str(), "invalid_body");
        assert_eq!(
            ErrorCode::InvalidTransition.as_wire_str(),
            "invalid_transition"
        );
        assert_eq!(
            ErrorCode::MissingAapsHeader.as_wire_str(),
            "missing_aaps_header"
        );
    }

    #[test]
    fn invalid_field_formats_dynamically() {
        let code = ErrorCode::invalid_field("timeout_s");
        assert_eq!(code.as_wire_str(), "invalid_timeout_s");
    }

    #[test]
    fn status_mapping_matches_propagation_table() {
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::ScriptNotFound.http_status(), 404);
        assert_eq!(ErrorCode::Readonly.http_status(), 403);
        assert_eq!(ErrorCode::PathOutsideRepo.http_status(), 403);
        assert_eq!(ErrorCode::Timeout.http_status(), 504);
        assert_eq!(ErrorCode::CodexNotFound.http_status(), 503);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
        assert_eq!(ErrorCode::InvalidBody.http_status(), 400);
        assert_eq!(ErrorCode::InvalidTransition.http_status(), 400);
    }

    #[test]
    fn to_json_includes_line_when_set() {
        let err = AadError::new(ErrorCode::DuplicateId, "dup").with_line(4);
        let json = err.to_json();
        assert_eq!(json["error"], "duplicate_id");
        assert_eq!(json["line"], 4);
    }

    #[test]
    fn to_json_omits_absent_fields() {
        let err = AadError::new(ErrorCode::NotFound, "gone");
        let json = err.to_json();
        assert!(json.get("detail").is_none());
        assert!(json.get("line").is_none());
    }

    #[test]
    fn code_serde_roundtrip_for_static_variants() {
        let code = ErrorCode::InvalidTransition;
        let json = serde_json::to_string(&code).unwrap();
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn code_serde_roundtrip_for_dynamic_variant() {
        let code = ErrorCode::invalid_field("cwd");
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"invalid_cwd\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }
}

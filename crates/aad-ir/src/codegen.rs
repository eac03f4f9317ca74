// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic IR → bash codegen.
//!
//! [`render`] splices a generated bash body into a caller-supplied template
//! at [`CODEGEN_PLACEHOLDER`]; everything else in the template passes
//! through untouched. The same `(ir, template)` pair always renders to
//! byte-identical output: no timestamps, no random ids, no iteration order
//! that isn't already fixed by the IR's declaration order.

use aad_core::{Block, Ir, IrAction, IrStep, IrTask};
use aad_errors::{AadError, ErrorCode};
use serde_json::Value;
use std::fmt::Write as _;

/// Placeholder the generated body is spliced into.
pub const CODEGEN_PLACEHOLDER: &str = "__PIPELINE_BODY__";

/// A minimal template for callers that don't supply their own.
pub const DEFAULT_TEMPLATE: &str = "#!/usr/bin/env bash\nset -euo pipefail\n\n__PIPELINE_BODY__\n";

/// Action kinds the codegen stage knows how to emit.
///
/// Deliberately narrower than the open `kind: String` the parser accepts
/// (see [`aad_core::IrAction`]): a kind can be syntactically valid AAPS and
/// still be rejected here if no renderer exists for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownActionKind {
    Note,
    Run,
    CodexExec,
}

impl KnownActionKind {
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "note" => Self::Note,
            "run" => Self::Run,
            "codex_exec" => Self::CodexExec,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Run => "run",
            Self::CodexExec => "codex_exec",
        }
    }
}

/// Render `ir` into `template`, replacing [`CODEGEN_PLACEHOLDER`] with the
/// generated body.
pub fn render(ir: &Ir, template: &str) -> Result<String, AadError> {
    let body = if is_meta_round(ir) {
        render_meta_round(ir)?
    } else {
        let mut body = String::new();
        for task in &ir.tasks {
            render_task(&mut body, task)?;
        }
        body
    };

    Ok(template.replacen(CODEGEN_PLACEHOLDER, &body, 1))
}

fn is_meta_round(ir: &Ir) -> bool {
    ir.tasks.iter().any(|t| has_key(t.meta.as_ref(), "meta_round_v0") || is_truthy(t.meta.as_ref(), "task_template_v0"))
}

fn has_key(meta: Option<&Value>, key: &str) -> bool {
    meta.and_then(|m| m.get(key)).is_some()
}

fn is_truthy(meta: Option<&Value>, key: &str) -> bool {
    match meta.and_then(|m| m.get(key)) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn render_meta_round(ir: &Ir) -> Result<String, AadError> {
    let controllers: Vec<&IrTask> = ir
        .tasks
        .iter()
        .filter(|t| has_key(t.meta.as_ref(), "meta_round_v0"))
        .collect();
    let templates: Vec<&IrTask> = ir
        .tasks
        .iter()
        .filter(|t| is_truthy(t.meta.as_ref(), "task_template_v0"))
        .collect();

    if ir.tasks.len() != 2 {
        return Err(AadError::new(
            ErrorCode::invalid_field("meta_round"),
            "meta-round mode requires exactly two tasks",
        ));
    }
    if controllers.len() != 1 {
        return Err(AadError::new(
            ErrorCode::invalid_field("meta_round"),
            "meta-round mode requires exactly one controller task (meta.meta_round_v0)",
        ));
    }
    if templates.len() != 1 {
        return Err(AadError::new(
            ErrorCode::invalid_field("meta_round"),
            "meta-round mode requires exactly one template task (meta.task_template_v0)",
        ));
    }

    let controller = controllers[0];
    let template_task = templates[0];

    let task_list_path = controller
        .meta
        .as_ref()
        .and_then(|m| m.get("meta_round_v0"))
        .and_then(|m| m.get("task_list_path"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            AadError::new(
                ErrorCode::invalid_field("meta_round"),
                "controller task.meta.meta_round_v0.task_list_path is required",
            )
        })?;

    let mut body = String::new();

    for step in &controller.steps {
        render_step(&mut body, &controller.id, step)?;
    }

    let _ = writeln!(body);
    let _ = writeln!(body, "run_task_template_v0() {{");
    let _ = writeln!(body, "  local task_id=\"$1\"");
    let _ = writeln!(body, "  local task_title=\"$2\"");
    let _ = writeln!(body, "  local task_acceptance=\"$3\"");
    let _ = writeln!(body, "  export AUTOAPPDEV_CTX_TASK_ID=\"$task_id\"");
    let _ = writeln!(body, "  export AUTOAPPDEV_CTX_TASK_TITLE=\"$task_title\"");
    let _ = writeln!(body, "  export AUTOAPPDEV_CTX_TASK_ACCEPTANCE=\"$task_acceptance\"");
    for step in &template_task.steps {
        render_step(&mut body, &template_task.id, step)?;
    }
    let _ = writeln!(body, "}}");
    let _ = writeln!(body);
    let _ = writeln!(body, "meta_round_run_template_tasks {}", shell_quote(task_list_path));

    Ok(body)
}

fn render_task(out: &mut String, task: &IrTask) -> Result<(), AadError> {
    let _ = writeln!(out, "# TASK {}: {}", task.id, collapse_newlines(&task.title));
    let _ = writeln!(out, "export AUTOAPPDEV_CTX_TASK_ID={}", shell_quote(&task.id));
    let _ = writeln!(out, "export AUTOAPPDEV_CTX_TASK_TITLE={}", shell_quote(&task.title));
    let _ = writeln!(out, "log {}", shell_quote(&format!("TASK {}: {}", task.id, task.title)));

    for step in &task.steps {
        render_step(out, &task.id, step)?;
    }

    let _ = writeln!(out);
    Ok(())
}

fn render_step(out: &mut String, task_id: &str, step: &IrStep) -> Result<(), AadError> {
    let conditional = step
        .meta
        .as_ref()
        .and_then(|m| m.get("conditional"))
        .and_then(|v| v.as_str());

    if let Some(cond) = conditional {
        let _ = writeln!(out, "if step_should_run {}; then", shell_quote(cond));
        render_step_body(out, task_id, step)?;
        let _ = writeln!(out, "else");
        let _ = writeln!(out, "  log {}", shell_quote(&format!("SKIP {}: {}", step.id, step.title)));
        let _ = writeln!(out, "fi");
    } else {
        render_step_body(out, task_id, step)?;
    }

    Ok(())
}

fn render_step_body(out: &mut String, task_id: &str, step: &IrStep) -> Result<(), AadError> {
    let _ = writeln!(out, "export AUTOAPPDEV_CTX_STEP_ID={}", shell_quote(&step.id));
    let _ = writeln!(out, "export AUTOAPPDEV_CTX_STEP_TITLE={}", shell_quote(&step.title));
    let _ = writeln!(out, "export AUTOAPPDEV_CTX_STEP_BLOCK={}", shell_quote(step.block.as_str()));
    let _ = writeln!(out, "log {}", shell_quote(&format!("STEP {}: {}", step.id, step.title)));

    if step.block == Block::Debug {
        let _ = writeln!(out, "step_failed=0");
        for action in &step.actions {
            render_debug_action(out, task_id, &step.id, action)?;
        }
        let _ = writeln!(out, "AUTOAPPDEV_TASK_LAST_DEBUG_FAILED=$step_failed");
    } else {
        for action in &step.actions {
            let call = action_call(task_id, &step.id, action)?;
            let _ = writeln!(out, "{call}");
        }
    }

    Ok(())
}

fn render_debug_action(
    out: &mut String,
    task_id: &str,
    step_id: &str,
    action: &IrAction,
) -> Result<(), AadError> {
    let call = action_call(task_id, step_id, action)?;
    let _ = writeln!(out, "if ! {call}; then step_failed=1; fi");
    Ok(())
}

fn action_call(task_id: &str, step_id: &str, action: &IrAction) -> Result<String, AadError> {
    let kind = KnownActionKind::from_str_opt(&action.kind).ok_or_else(|| {
        AadError::new(
            ErrorCode::invalid_field("kind"),
            format!(
                "unsupported action kind '{}' at {}/{}/{}",
                action.kind, task_id, step_id, action.id
            ),
        )
    })?;

    Ok(match kind {
        KnownActionKind::Note => {
            let text = string_param(action, "text").unwrap_or_default();
            format!("action_note {}", shell_quote(&text))
        }
        KnownActionKind::Run => {
            let cmd = string_param(action, "cmd").ok_or_else(|| {
                AadError::new(
                    ErrorCode::invalid_field("params"),
                    format!("'run' action requires params.cmd at {task_id}/{step_id}/{}", action.id),
                )
            })?;
            format!("action_run {}", shell_quote(&cmd))
        }
        KnownActionKind::CodexExec => {
            let prompt = string_param(action, "prompt").ok_or_else(|| {
                AadError::new(
                    ErrorCode::invalid_field("params"),
                    format!(
                        "'codex_exec' action requires params.prompt at {task_id}/{step_id}/{}",
                        action.id
                    ),
                )
            })?;
            let model = string_param(action, "model");
            let reasoning = string_param(action, "reasoning");

            let mut call = format!("action_codex_exec {}", shell_quote(&prompt));
            if model.is_some() || reasoning.is_some() {
                let _ = write!(call, " {}", shell_quote(&model.clone().unwrap_or_default()));
            }
            if let Some(r) = reasoning {
                let _ = write!(call, " {}", shell_quote(&r));
            }
            call
        }
    })
}

fn string_param(action: &IrAction, field: &str) -> Option<String> {
    action
        .params
        .as_ref()
        .and_then(|v| v.get(field))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn collapse_newlines(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

/// Escape `s` into a single-quoted bash literal: `'foo'"'"'bar'`.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aad_core::{Action, Ir, Step, Task};

    fn note_ir(text: &str) -> Ir {
        Ir::new(vec![Task {
            id: "t1".into(),
            title: "Task".into(),
            meta: None,
            steps: vec![Step {
                id: "s1".into(),
                title: "Step".into(),
                block: Block::Plan,
                actions: vec![Action {
                    id: "a1".into(),
                    kind: "note".into(),
                    params: Some(serde_json::json!({"text": text})),
                    meta: None,
                }],
            }],
        }])
    }

    #[test]
    fn render_is_deterministic() {
        let ir = note_ir("hello");
        assert_eq!(
            render(&ir, DEFAULT_TEMPLATE).unwrap(),
            render(&ir, DEFAULT_TEMPLATE).unwrap()
        );
    }

    #[test]
    fn render_splices_into_template_and_passes_rest_through() {
        let ir = note_ir("hi");
        let template = "#!/usr/bin/env bash\n# header\n__PIPELINE_BODY__\n# footer\n";
        let out = render(&ir, template).unwrap();
        assert!(out.starts_with("#!/usr/bin/env bash\n# header\n"));
        assert!(out.trim_end().ends_with("# footer"));
        assert!(!out.contains(CODEGEN_PLACEHOLDER));
    }

    #[test]
    fn unknown_kind_is_rejected_with_path() {
        let mut ir = note_ir("hello");
        ir.tasks[0].steps[0].actions[0].kind = "mystery".into();
        let err = render(&ir, DEFAULT_TEMPLATE).unwrap_err();
        assert_eq!(err.code, ErrorCode::invalid_field("kind"));
        assert!(err.message.contains("t1/s1/a1"));
    }

    #[test]
    fn run_without_cmd_param_rejected() {
        let mut ir = note_ir("hello");
        ir.tasks[0].steps[0].actions[0].kind = "run".into();
        ir.tasks[0].steps[0].actions[0].params = None;
        let err = render(&ir, DEFAULT_TEMPLATE).unwrap_err();
        assert_eq!(err.code, ErrorCode::invalid_field("params"));
    }

    #[test]
    fn debug_step_wraps_actions_best_effort() {
        let mut ir = note_ir("hello");
        ir.tasks[0].steps[0].block = Block::Debug;
        ir.tasks[0].steps[0].actions[0].kind = "run".into();
        ir.tasks[0].steps[0].actions[0].params = Some(serde_json::json!({"cmd": "false"}));
        let out = render(&ir, DEFAULT_TEMPLATE).unwrap();
        assert!(out.contains("step_failed=0"));
        assert!(out.contains("if ! action_run 'false'; then step_failed=1; fi"));
        assert!(out.contains("AUTOAPPDEV_TASK_LAST_DEBUG_FAILED=$step_failed"));
    }

    #[test]
    fn non_debug_run_is_not_best_effort() {
        let mut ir = note_ir("hello");
        ir.tasks[0].steps[0].actions[0].kind = "run".into();
        ir.tasks[0].steps[0].actions[0].params = Some(serde_json::json!({"cmd": "true"}));
        let out = render(&ir, DEFAULT_TEMPLATE).unwrap();
        assert!(!out.contains("step_failed"));
        assert!(out.contains("action_run 'true'"));
    }

    #[test]
    fn codex_exec_with_only_reasoning_passes_empty_model_placeholder() {
        let mut ir = note_ir("hello");
        ir.tasks[0].steps[0].actions[0].kind = "codex_exec".into();
        ir.tasks[0].steps[0].actions[0].params =
            Some(serde_json::json!({"prompt": "do it", "reasoning": "high"}));
        let out = render(&ir, DEFAULT_TEMPLATE).unwrap();
        assert!(out.contains("action_codex_exec 'do it' '' 'high'"));
    }

    #[test]
    fn conditional_step_wraps_body_with_skip_branch() {
        let mut ir = note_ir("hello");
        ir.tasks[0].steps[0].meta = Some(serde_json::json!({"conditional": "has_changes"}));
        let out = render(&ir, DEFAULT_TEMPLATE).unwrap();
        assert!(out.contains("if step_should_run 'has_changes'; then"));
        assert!(out.contains("else"));
        assert!(out.contains("SKIP s1: Step"));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn meta_round_requires_exactly_two_tasks() {
        let mut ir = note_ir("hello");
        ir.tasks[0].meta = Some(serde_json::json!({"meta_round_v0": {"task_list_path": "tasks.json"}}));
        let err = render(&ir, DEFAULT_TEMPLATE).unwrap_err();
        assert_eq!(err.code, ErrorCode::invalid_field("meta_round"));
    }

    #[test]
    fn meta_round_renders_controller_and_template_function() {
        let mut ir = note_ir("hello");
        ir.tasks[0].meta = Some(serde_json::json!({"meta_round_v0": {"task_list_path": "tasks.json"}}));
        ir.tasks.push(Task {
            id: "tmpl".into(),
            title: "Template".into(),
            meta: Some(serde_json::json!({"task_template_v0": true})),
            steps: vec![Step {
                id: "s2".into(),
                title: "Step2".into(),
                block: Block::Work,
                actions: vec![],
            }],
        });
        let out = render(&ir, DEFAULT_TEMPLATE).unwrap();
        assert!(out.contains("run_task_template_v0() {"));
        assert!(out.contains("meta_round_run_template_tasks 'tasks.json'"));
    }

    #[test]
    fn known_action_kind_roundtrip() {
        for k in [KnownActionKind::Note, KnownActionKind::Run, KnownActionKind::CodexExec] {
            assert_eq!(KnownActionKind::from_str_opt(k.as_str()), Some(k));
        }
        assert_eq!(KnownActionKind::from_str_opt("nope"), None);
    }
}

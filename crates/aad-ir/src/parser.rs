// SPDX-License-Identifier: MIT OR Apache-2.0
//! AAPS v1 grammar parser — turns line-oriented pipeline script source into
//! a canonical [`aad_core::Ir`] document.

use aad_core::{Block, Ir, IrAction, IrStep, IrTask};
use aad_errors::{AadError, ErrorCode};
use std::collections::HashSet;

/// The exact text required on the first non-comment line.
pub const HEADER_LINE: &str = "AUTOAPPDEV_PIPELINE 1";

/// Parse AAPS v1 source text into a canonical [`Ir`] document.
///
/// Line numbers in any returned [`AadError::line`] are 1-based and count
/// every line of the original input, including blank and comment lines.
pub fn parse_aaps(source: &str) -> Result<Ir, AadError> {
    let mut lines = source.lines().enumerate().peekable();

    let mut header_seen = false;
    let mut tasks: Vec<IrTask> = Vec::new();
    let mut task_ids: HashSet<String> = HashSet::new();
    let mut current_task: Option<usize> = None;
    let mut current_step: Option<usize> = None;
    let mut step_ids_by_task: Vec<HashSet<String>> = Vec::new();
    let mut action_ids_by_step: Vec<Vec<HashSet<String>>> = Vec::new();

    while let Some((idx, raw_line)) = lines.next() {
        let line_no = (idx + 1) as u64;
        let trimmed = raw_line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if !header_seen {
            if trimmed != HEADER_LINE {
                return Err(AadError::new(
                    ErrorCode::InvalidHeader,
                    format!("expected '{HEADER_LINE}', found '{trimmed}'"),
                )
                .with_line(line_no));
            }
            header_seen = true;
            continue;
        }

        let (keyword, rest) = split_keyword(trimmed);
        let value: serde_json::Value = match serde_json::from_str(rest) {
            Ok(v) if v.is_object() => v,
            Ok(_) => {
                return Err(AadError::new(ErrorCode::InvalidJson, "expected a JSON object")
                    .with_line(line_no));
            }
            Err(e) => {
                return Err(
                    AadError::new(ErrorCode::InvalidJson, e.to_string()).with_line(line_no)
                );
            }
        };

        match keyword {
            "TASK" => {
                let id = require_id(&value, line_no)?;
                if !task_ids.insert(id.clone()) {
                    return Err(AadError::new(ErrorCode::DuplicateId, format!("duplicate task id '{id}'"))
                        .with_line(line_no));
                }
                let title = opt_str(&value, "title").unwrap_or_default();
                let meta = value.get("meta").cloned();
                tasks.push(IrTask {
                    id,
                    title,
                    meta,
                    steps: Vec::new(),
                });
                step_ids_by_task.push(HashSet::new());
                action_ids_by_step.push(Vec::new());
                current_task = Some(tasks.len() - 1);
                current_step = None;
            }
            "STEP" => {
                let Some(task_idx) = current_task else {
                    return Err(AadError::new(
                        ErrorCode::StepBeforeTask,
                        "STEP requires an open TASK",
                    )
                    .with_line(line_no));
                };
                let id = require_id(&value, line_no)?;
                if !step_ids_by_task[task_idx].insert(id.clone()) {
                    return Err(AadError::new(ErrorCode::DuplicateId, format!("duplicate step id '{id}'"))
                        .with_line(line_no));
                }
                let title = opt_str(&value, "title").unwrap_or_default();
                let block_str = opt_str(&value, "block").ok_or_else(|| {
                    AadError::new(ErrorCode::InvalidBlock, "STEP.block is required").with_line(line_no)
                })?;
                let block = Block::from_str_opt(&block_str).ok_or_else(|| {
                    AadError::new(
                        ErrorCode::InvalidBlock,
                        format!("unknown block '{block_str}'"),
                    )
                    .with_line(line_no)
                })?;
                tasks[task_idx].steps.push(IrStep {
                    id,
                    title,
                    block,
                    actions: Vec::new(),
                });
                action_ids_by_step[task_idx].push(HashSet::new());
                current_step = Some(tasks[task_idx].steps.len() - 1);
            }
            "ACTION" => {
                let Some(task_idx) = current_task else {
                    return Err(AadError::new(
                        ErrorCode::ActionBeforeStep,
                        "ACTION requires an open STEP",
                    )
                    .with_line(line_no));
                };
                let Some(step_idx) = current_step else {
                    return Err(AadError::new(
                        ErrorCode::ActionBeforeStep,
                        "ACTION requires an open STEP",
                    )
                    .with_line(line_no));
                };
                let id = require_id(&value, line_no)?;
                if !action_ids_by_step[task_idx][step_idx].insert(id.clone()) {
                    return Err(AadError::new(
                        ErrorCode::DuplicateId,
                        format!("duplicate action id '{id}'"),
                    )
                    .with_line(line_no));
                }
                let kind = opt_str(&value, "kind").ok_or_else(|| {
                    AadError::new(ErrorCode::invalid_field("kind"), "ACTION.kind is required")
                        .with_line(line_no)
                })?;
                let params = value.get("params").cloned();
                let meta = value.get("meta").cloned();
                tasks[task_idx].steps[step_idx].actions.push(IrAction {
                    id,
                    kind,
                    params,
                    meta,
                });
            }
            other => {
                return Err(AadError::new(
                    ErrorCode::UnknownKeyword,
                    format!("unknown keyword '{other}'"),
                )
                .with_line(line_no));
            }
        }
    }

    if !header_seen {
        return Err(AadError::new(
            ErrorCode::MissingHeader,
            format!("missing required header line '{HEADER_LINE}'"),
        )
        .with_line(1));
    }

    if tasks.is_empty() {
        return Err(AadError::new(
            ErrorCode::invalid_field("tasks"),
            "at least one TASK is required",
        ));
    }

    Ok(Ir::new(tasks))
}

fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((kw, rest)) => (kw, rest.trim_start()),
        None => (line, ""),
    }
}

fn opt_str(value: &serde_json::Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

fn require_id(value: &serde_json::Value, line_no: u64) -> Result<String, AadError> {
    match opt_str(value, "id") {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(AadError::new(ErrorCode::invalid_field("id"), "id must be a non-empty string")
            .with_line(line_no)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(body: &str) -> String {
        format!("AUTOAPPDEV_PIPELINE 1\n{body}")
    }

    #[test]
    fn minimal_script_parses_one_task_step_action() {
        let src = script(concat!(
            "TASK {\"id\":\"t1\",\"title\":\"T\"}\n",
            "STEP {\"id\":\"s1\",\"title\":\"S\",\"block\":\"plan\"}\n",
            "ACTION {\"id\":\"a1\",\"kind\":\"note\",\"params\":{\"text\":\"hi\"}}\n",
        ));
        let ir = parse_aaps(&src).unwrap();
        assert_eq!(ir.tasks.len(), 1);
        assert_eq!(ir.tasks[0].steps.len(), 1);
        assert_eq!(ir.tasks[0].steps[0].block, Block::Plan);
        assert_eq!(ir.tasks[0].steps[0].actions[0].kind, "note");
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let src = "# a comment\n\nAUTOAPPDEV_PIPELINE 1\n# another\nTASK {\"id\":\"t1\"}\n";
        let ir = parse_aaps(src).unwrap();
        assert_eq!(ir.tasks.len(), 1);
    }

    #[test]
    fn missing_header_entirely() {
        let err = parse_aaps("# only comments\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingHeader);
    }

    #[test]
    fn wrong_header_text_is_invalid_header() {
        let err = parse_aaps("AUTOAPPDEV_PIPELINE 2\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidHeader);
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn step_before_task_rejected() {
        let src = script("STEP {\"id\":\"s1\",\"title\":\"S\",\"block\":\"plan\"}\n");
        let err = parse_aaps(&src).unwrap_err();
        assert_eq!(err.code, ErrorCode::StepBeforeTask);
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn action_before_step_rejected() {
        let src = script(concat!(
            "TASK {\"id\":\"t1\"}\n",
            "ACTION {\"id\":\"a1\",\"kind\":\"note\"}\n",
        ));
        let err = parse_aaps(&src).unwrap_err();
        assert_eq!(err.code, ErrorCode::ActionBeforeStep);
    }

    #[test]
    fn duplicate_step_id_reports_its_line() {
        let src = script(concat!(
            "TASK {\"id\":\"t1\"}\n",
            "STEP {\"id\":\"s1\",\"title\":\"S\",\"block\":\"plan\"}\n",
            "STEP {\"id\":\"s1\",\"title\":\"S2\",\"block\":\"work\"}\n",
        ));
        let err = parse_aaps(&src).unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateId);
        assert_eq!(err.line, Some(4));
    }

    #[test]
    fn duplicate_task_id_rejected() {
        let src = script("TASK {\"id\":\"t1\"}\nTASK {\"id\":\"t1\"}\n");
        let err = parse_aaps(&src).unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateId);
    }

    #[test]
    fn invalid_block_rejected() {
        let src = script("TASK {\"id\":\"t1\"}\nSTEP {\"id\":\"s1\",\"block\":\"nope\"}\n");
        let err = parse_aaps(&src).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidBlock);
    }

    #[test]
    fn unknown_keyword_rejected() {
        let src = script("TASK {\"id\":\"t1\"}\nWHATEVER {\"id\":\"x\"}\n");
        let err = parse_aaps(&src).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownKeyword);
    }

    #[test]
    fn no_tasks_rejected() {
        let err = parse_aaps(&script("")).unwrap_err();
        assert_eq!(err.code, ErrorCode::invalid_field("tasks"));
    }

    #[test]
    fn malformed_json_rejected() {
        let src = script("TASK {not json}\n");
        let err = parse_aaps(&src).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidJson);
    }

    #[test]
    fn missing_id_rejected() {
        let src = script("TASK {\"title\":\"no id\"}\n");
        let err = parse_aaps(&src).unwrap_err();
        assert_eq!(err.code, ErrorCode::invalid_field("id"));
    }

    #[test]
    fn action_meta_and_params_pass_through() {
        let src = script(concat!(
            "TASK {\"id\":\"t1\"}\n",
            "STEP {\"id\":\"s1\",\"block\":\"work\"}\n",
            "ACTION {\"id\":\"a1\",\"kind\":\"run\",\"params\":{\"cmd\":\"echo hi\"},\"meta\":{\"conditional\":\"x\"}}\n",
        ));
        let ir = parse_aaps(&src).unwrap();
        let action = &ir.tasks[0].steps[0].actions[0];
        assert_eq!(action.params, Some(serde_json::json!({"cmd": "echo hi"})));
        assert_eq!(action.meta, Some(serde_json::json!({"conditional": "x"})));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Imports AAPS v1 pipelines embedded in shell scripts as `# AAPS: ...`
//! comment annotations, one AAPS source line per annotated comment line.

use crate::parser::parse_aaps;
use aad_core::Ir;
use aad_errors::{AadError, ErrorCode};
use regex::Regex;
use std::sync::OnceLock;

fn annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*#\s*AAPS:\s?(.*)$").expect("valid regex"))
}

/// Scan `source` (a shell script) for `# AAPS: ...` annotation lines, and
/// parse the concatenation of their captured text as an AAPS v1 document.
///
/// Any [`AadError::line`] in the result is remapped back to the original
/// shell file's line numbers.
pub fn import_shell(source: &str) -> Result<Ir, AadError> {
    let re = annotation_re();

    let mut aaps_lines: Vec<&str> = Vec::new();
    let mut shell_line_of: Vec<u64> = Vec::new();

    for (idx, line) in source.lines().enumerate() {
        if let Some(caps) = re.captures(line) {
            let captured = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            aaps_lines.push(captured);
            shell_line_of.push((idx + 1) as u64);
        }
    }

    if aaps_lines.is_empty() {
        return Err(AadError::new(
            ErrorCode::MissingAnnotations,
            "no '# AAPS: ...' annotation lines found",
        )
        .with_line(1));
    }

    let joined = aaps_lines.join("\n");

    parse_aaps(&joined).map_err(|err| match err.line {
        Some(internal_line) if internal_line >= 1 && (internal_line as usize) <= shell_line_of.len() => {
            err.with_line(shell_line_of[internal_line as usize - 1])
        }
        _ => err,
    })
}

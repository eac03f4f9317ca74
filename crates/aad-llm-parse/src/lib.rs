// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-llm-parse
#![deny(unsafe_code)]
//!
//! LLM-assisted AAPS parse (C5): spawn an external agent binary with a
//! fixed prompt, extract the last assistant message, isolate the embedded
//! AAPS script, parse it through [`aad_ir::parse_aaps`], and persist every
//! artifact involved regardless of outcome.

use aad_core::Ir;
use aad_errors::{AadError, ErrorCode};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

/// Minimum accepted `timeout_s`.
pub const MIN_TIMEOUT_SECS: u64 = 5;
/// Maximum accepted `timeout_s`.
pub const MAX_TIMEOUT_SECS: u64 = 120;
/// Maximum accepted source length, in bytes.
pub const MAX_SOURCE_LEN: usize = 100_000;

const AAPS_HEADER: &str = "AUTOAPPDEV_PIPELINE 1";
const STDERR_HINT_LINES: usize = 20;

/// Clamp a caller-supplied timeout into `[MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS]`.
#[must_use]
pub fn clamp_timeout_secs(timeout_s: u64) -> u64 {
    timeout_s.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
}

/// Fixed configuration for invoking the external agent binary.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Executable name or path, resolved via `PATH` if bare.
    pub command: String,
    /// Model identifier passed to the agent.
    pub model: String,
    /// Reasoning effort passed to the agent (`low`/`medium`/`high`/`xhigh`).
    pub reasoning: String,
    /// Skip the agent's own git-repo sanity check, if it has one.
    pub skip_git_check: bool,
}

/// A single request to parse free-form source text through the agent.
#[derive(Debug, Clone)]
pub struct ParseRequest {
    /// Raw source text, already checked to be non-empty and `<= MAX_SOURCE_LEN`.
    pub source: String,
    /// Free-form hint describing what `source` is (e.g. `"shell"`, `"notes"`).
    pub source_format: String,
    /// Caller-supplied timeout in seconds, already clamped by the caller.
    pub timeout_s: u64,
}

/// Everything recorded about one parse attempt, success or failure.
#[derive(Debug)]
pub struct ParseOutcome {
    /// The stable `<timestamp>_<hash>` id assigned to this request.
    pub id: String,
    /// Directory holding every artifact for this request.
    pub artifacts_dir: PathBuf,
    /// Non-fatal warnings accumulated while producing `ir`.
    pub warnings: Vec<String>,
    /// Parsed IR, present only on full success.
    pub ir: Option<Ir>,
}

#[derive(Debug, Serialize)]
struct Provenance<'a> {
    id: &'a str,
    model: &'a str,
    reasoning: &'a str,
    timeout_s: u64,
    source_sha256: String,
    assistant_sha256: Option<String>,
    exit_code: Option<i32>,
    warnings: &'a [String],
    success: bool,
    error: Option<String>,
}

/// Allocate the stable request id `<UTC-timestamp>_<sha256(source)[:8]>`.
#[must_use]
pub fn request_id(source: &str) -> String {
    let ts = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{ts}_{}", &hex[..8])
}

/// Build the fixed deterministic prompt sent to the agent.
///
/// The prompt forbids tool use, demands AAPS-only output, lists the
/// allowed block and action kinds, and embeds the input verbatim.
#[must_use]
pub fn build_prompt(source: &str, source_format: &str) -> String {
    format!(
        "You are converting free-form input into an AUTOAPPDEV_PIPELINE AAPS v1 \
script. Do not call any tools, do not ask questions, and do not narrate your \
process. Respond with exactly one AAPS script and nothing else.\n\n\
Requirements:\n\
- The first non-comment, non-blank line of your output must be exactly: {AAPS_HEADER}\n\
- Every step belongs to a TASK and must declare block=one of: plan, work, debug, fix, summary, commit_push.\n\
- Every action belongs to a STEP and must declare kind=one of: note, run, codex_exec.\n\
- Use `TASK <id> \"<title>\"`, `STEP <id> block=<block> \"<title>\"`, and `ACTION <id> kind=<kind> {{...json...}}` lines, one per line.\n\
- Do not wrap the script in a markdown code fence.\n\n\
Input format hint: {source_format}\n\
--- BEGIN INPUT ---\n\
{source}\n\
--- END INPUT ---\n"
    )
}

/// Strip a single leading and trailing markdown code fence, if present.
///
/// Returns the stripped text and whether a fence was actually removed.
#[must_use]
pub fn strip_code_fences(text: &str) -> (String, bool) {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return (text.to_string(), false);
    }
    let after_open = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => return (text.to_string(), false),
    };
    let Some(close_idx) = after_open.rfind("```") else {
        return (text.to_string(), false);
    };
    (after_open[..close_idx].trim_end().to_string(), true)
}

/// Extract the AAPS script tail starting at the `AUTOAPPDEV_PIPELINE 1` header.
fn extract_aaps_tail(assistant_text: &str) -> Option<String> {
    let idx = assistant_text.find(AAPS_HEADER)?;
    Some(assistant_text[idx..].to_string())
}

/// The last `agent_message`/`assistant_message` record's text from a JSONL stream.
fn last_assistant_text(stdout: &str) -> Option<String> {
    let mut found = None;
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let kind = value
            .get("type")
            .or_else(|| value.get("item_type"))
            .and_then(|v| v.as_str());
        if kind != Some("agent_message") && kind != Some("assistant_message") {
            continue;
        }
        let text = value
            .get("text")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("content"))
            .and_then(|v| v.as_str());
        if let Some(text) = text {
            found = Some(text.to_string());
        }
    }
    found
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn stderr_hint(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .take(STDERR_HINT_LINES)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("\n")
}

async fn write_artifact(dir: &Path, name: &str, contents: &str) -> anyhow::Result<()> {
    tokio::fs::write(dir.join(name), contents).await?;
    Ok(())
}

/// Parses free-form text into AAPS IR by delegating to an external agent.
#[derive(Debug, Clone)]
pub struct LlmParser {
    config: AgentConfig,
    runtime_dir: PathBuf,
}

impl LlmParser {
    /// Construct a parser that writes artifacts under `<runtime_dir>/logs/llm_parse/`.
    #[must_use]
    pub fn new(config: AgentConfig, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            runtime_dir: runtime_dir.into(),
        }
    }

    fn artifacts_root(&self) -> PathBuf {
        self.runtime_dir.join("logs").join("llm_parse")
    }

    /// Run one parse request to completion, always persisting artifacts.
    pub async fn parse(&self, req: ParseRequest) -> Result<ParseOutcome, AadError> {
        let id = request_id(&req.source);
        let dir = self.artifacts_root().join(&id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| artifact_write_failed(&format!("create artifacts dir: {e}")))?;

        write_artifact(&dir, "source.txt", &req.source)
            .await
            .map_err(|e| artifact_write_failed(&e.to_string()))?;

        let prompt = build_prompt(&req.source, &req.source_format);
        write_artifact(&dir, "prompt.txt", &prompt)
            .await
            .map_err(|e| artifact_write_failed(&e.to_string()))?;

        let timeout = Duration::from_secs(clamp_timeout_secs(req.timeout_s));
        let mut warnings = Vec::new();

        let spawn_result = self.spawn_agent(&prompt, timeout).await;
        let (stdout, stderr, exit_code, spawn_err) = match spawn_result {
            Ok((stdout, stderr, code)) => (stdout, stderr, Some(code), None),
            Err(err) => {
                let stderr = String::new();
                (String::new(), stderr, None, Some(err))
            }
        };

        write_artifact(&dir, "codex.jsonl", &stdout)
            .await
            .map_err(|e| artifact_write_failed(&e.to_string()))?;
        write_artifact(&dir, "codex.stderr.log", &stderr)
            .await
            .map_err(|e| artifact_write_failed(&e.to_string()))?;

        if let Some(err) = spawn_err {
            self.write_provenance(&dir, &id, &req, &warnings, None, exit_code, Some(&err))
                .await;
            return Err(err);
        }

        let assistant_text = match last_assistant_text(&stdout) {
            Some(text) => text,
            None => {
                let hint = stderr_hint(&stderr);
                let err = AadError::new(
                    ErrorCode::MissingAssistantText,
                    "agent produced no agent_message/assistant_message record",
                )
                .with_detail(hint);
                write_artifact(&dir, "assistant.txt", "").await.ok();
                self.write_provenance(&dir, &id, &req, &warnings, None, exit_code, Some(&err))
                    .await;
                return Err(err);
            }
        };

        write_artifact(&dir, "assistant.txt", &assistant_text)
            .await
            .map_err(|e| artifact_write_failed(&e.to_string()))?;

        let (stripped, fences_removed) = strip_code_fences(&assistant_text);
        if fences_removed {
            warnings.push("stripped_code_fences".to_string());
        }

        let script = match extract_aaps_tail(&stripped) {
            Some(script) => script,
            None => {
                let err = AadError::new(
                    ErrorCode::MissingAapsHeader,
                    format!("assistant text had no '{AAPS_HEADER}' header"),
                );
                self.write_provenance(
                    &dir,
                    &id,
                    &req,
                    &warnings,
                    Some(&assistant_text),
                    exit_code,
                    Some(&err),
                )
                .await;
                return Err(err);
            }
        };

        match aad_ir::parse_aaps(&script) {
            Ok(ir) => {
                write_artifact(&dir, "result.aaps", &script)
                    .await
                    .map_err(|e| artifact_write_failed(&e.to_string()))?;
                self.write_provenance(
                    &dir,
                    &id,
                    &req,
                    &warnings,
                    Some(&assistant_text),
                    exit_code,
                    None,
                )
                .await;
                Ok(ParseOutcome {
                    id,
                    artifacts_dir: dir,
                    warnings,
                    ir: Some(ir),
                })
            }
            Err(err) => {
                self.write_provenance(
                    &dir,
                    &id,
                    &req,
                    &warnings,
                    Some(&assistant_text),
                    exit_code,
                    Some(&err),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn write_provenance(
        &self,
        dir: &Path,
        id: &str,
        req: &ParseRequest,
        warnings: &[String],
        assistant_text: Option<&str>,
        exit_code: Option<i32>,
        error: Option<&AadError>,
    ) {
        let provenance = Provenance {
            id,
            model: &self.config.model,
            reasoning: &self.config.reasoning,
            timeout_s: clamp_timeout_secs(req.timeout_s),
            source_sha256: sha256_hex(&req.source),
            assistant_sha256: assistant_text.map(sha256_hex),
            exit_code,
            warnings,
            success: error.is_none(),
            error: error.map(|e| e.code.as_wire_str()),
        };
        match serde_json::to_string_pretty(&provenance) {
            Ok(json) => {
                if let Err(e) = write_artifact(dir, "provenance.json", &json).await {
                    warn!(target: "aad.llm_parse", "failed to write provenance.json: {e}");
                }
            }
            Err(e) => warn!(target: "aad.llm_parse", "failed to serialize provenance: {e}"),
        }
    }

    async fn spawn_agent(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<(String, String, i32), AadError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.arg("exec")
            .arg("--json")
            .arg("-m")
            .arg(&self.config.model)
            .arg("-c")
            .arg(format!(
                "model_reasoning_effort=\"{}\"",
                self.config.reasoning
            ));
        if self.config.skip_git_check {
            cmd.arg("--skip-git-repo-check");
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AadError::new(
                    ErrorCode::CodexNotFound,
                    format!("agent binary '{}' not found on PATH", self.config.command),
                )
            } else {
                AadError::new(ErrorCode::Internal, format!("failed to spawn agent: {e}"))
            }
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AadError::new(ErrorCode::Internal, "agent stdin unavailable"))?;
        let prompt = prompt.to_string();
        let write_task = tokio::spawn(async move {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let output = tokio::time::timeout(timeout, child.wait_with_output()).await;
        let _ = write_task.await;

        match output {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let code = output.status.code().unwrap_or(-1);
                Ok((stdout, stderr, code))
            }
            Ok(Err(e)) => Err(AadError::new(
                ErrorCode::Internal,
                format!("failed to read agent output: {e}"),
            )),
            Err(_) => Err(AadError::new(
                ErrorCode::Timeout,
                format!("agent did not exit within {}s", timeout.as_secs()),
            )),
        }
    }
}

fn artifact_write_failed(detail: &str) -> AadError {
    AadError::new(ErrorCode::ArtifactWriteFailed, "failed to write artifact").with_detail(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_embeds_8_char_source_hash() {
        let id = request_id("hello world");
        let hash = sha256_hex("hello world");
        assert!(id.ends_with(&hash[..8]));
        assert!(id.contains('_'));
    }

    #[test]
    fn build_prompt_embeds_header_and_input() {
        let prompt = build_prompt("do the thing", "notes");
        assert!(prompt.contains(AAPS_HEADER));
        assert!(prompt.contains("do the thing"));
        assert!(prompt.contains("notes"));
    }

    #[test]
    fn strip_code_fences_removes_matched_fence() {
        let (text, stripped) = strip_code_fences("```\nAUTOAPPDEV_PIPELINE 1\nfoo\n```");
        assert!(stripped);
        assert_eq!(text, "AUTOAPPDEV_PIPELINE 1\nfoo");
    }

    #[test]
    fn strip_code_fences_leaves_unfenced_text_alone() {
        let (text, stripped) = strip_code_fences("AUTOAPPDEV_PIPELINE 1\nfoo");
        assert!(!stripped);
        assert_eq!(text, "AUTOAPPDEV_PIPELINE 1\nfoo");
    }

    #[test]
    fn extract_aaps_tail_finds_header_mid_text() {
        let text = "some preamble\nAUTOAPPDEV_PIPELINE 1\nTASK t1 \"x\"";
        let tail = extract_aaps_tail(text).unwrap();
        assert!(tail.starts_with(AAPS_HEADER));
    }

    #[test]
    fn extract_aaps_tail_none_without_header() {
        assert!(extract_aaps_tail("no header here").is_none());
    }

    #[test]
    fn last_assistant_text_picks_final_record() {
        let jsonl = "{\"type\":\"reasoning\",\"text\":\"thinking\"}\n\
                     {\"type\":\"agent_message\",\"text\":\"first\"}\n\
                     {\"type\":\"assistant_message\",\"text\":\"final\"}\n";
        assert_eq!(last_assistant_text(jsonl).as_deref(), Some("final"));
    }

    #[test]
    fn last_assistant_text_none_when_absent() {
        let jsonl = "{\"type\":\"reasoning\",\"text\":\"thinking\"}\n";
        assert!(last_assistant_text(jsonl).is_none());
    }

    #[test]
    fn last_assistant_text_skips_unparseable_lines() {
        let jsonl = "not json\n{\"type\":\"agent_message\",\"text\":\"ok\"}\n";
        assert_eq!(last_assistant_text(jsonl).as_deref(), Some("ok"));
    }

    #[test]
    fn clamp_timeout_secs_clamps_both_ends() {
        assert_eq!(clamp_timeout_secs(1), MIN_TIMEOUT_SECS);
        assert_eq!(clamp_timeout_secs(1000), MAX_TIMEOUT_SECS);
        assert_eq!(clamp_timeout_secs(45), 45);
    }

    fn agent_config(command: &str) -> AgentConfig {
        AgentConfig {
            command: command.to_string(),
            model: "gpt-5.3-codex".to_string(),
            reasoning: "medium".to_string(),
            skip_git_check: true,
        }
    }

    #[tokio::test]
    async fn parse_raises_codex_not_found_for_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let parser = LlmParser::new(agent_config("definitely-not-a-real-binary"), dir.path());
        let req = ParseRequest {
            source: "make a task".to_string(),
            source_format: "notes".to_string(),
            timeout_s: 45,
        };
        let err = parser.parse(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CodexNotFound);

        let mut entries = tokio::fs::read_dir(dir.path().join("logs").join("llm_parse"))
            .await
            .unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        let artifact_dir = entry.path();
        assert!(artifact_dir.join("source.txt").exists());
        assert!(artifact_dir.join("prompt.txt").exists());
        assert!(artifact_dir.join("provenance.json").exists());
    }

    #[tokio::test]
    async fn parse_raises_missing_assistant_text_when_agent_emits_no_message() {
        let dir = tempfile::tempdir().unwrap();
        let parser = LlmParser::new(agent_config("true"), dir.path());
        let req = ParseRequest {
            source: "make a task".to_string(),
            source_format: "notes".to_string(),
            timeout_s: 45,
        };
        let err = parser.parse(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingAssistantText);
    }

    #[tokio::test]
    async fn parse_succeeds_when_agent_echoes_a_valid_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "{AAPS_HEADER}\nTASK t1 \"demo\"\nSTEP s1 block=work \"do it\"\n\
             ACTION a1 kind=note {{\"text\":\"hi\"}}\n"
        );
        let record = serde_json::json!({"type": "agent_message", "text": script});
        let line = serde_json::to_string(&record).unwrap();

        // A thin wrapper script on disk stands in for the agent binary: it
        // ignores the fixed `exec --json -m ... -c ...` arguments and just
        // prints one JSONL record, the same shape a real agent would emit.
        let script_path = dir.path().join("fake_agent.sh");
        tokio::fs::write(
            &script_path,
            format!("#!/bin/sh\nprintf '%s\\n' '{}'\n", line.replace('\'', "'\\''")),
        )
        .await
        .unwrap();
        let mut perms = tokio::fs::metadata(&script_path)
            .await
            .unwrap()
            .permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o755);
        }
        tokio::fs::set_permissions(&script_path, perms)
            .await
            .unwrap();

        let parser = LlmParser::new(
            AgentConfig {
                command: script_path.to_string_lossy().to_string(),
                model: "gpt-5.3-codex".to_string(),
                reasoning: "medium".to_string(),
                skip_git_check: true,
            },
            dir.path(),
        );
        let outcome = parser
            .parse(ParseRequest {
                source: "make a task".to_string(),
                source_format: "notes".to_string(),
                timeout_s: 45,
            })
            .await
            .unwrap();

        assert!(outcome.ir.is_some());
        let ir = outcome.ir.unwrap();
        assert_eq!(ir.tasks.len(), 1);
        assert!(outcome.artifacts_dir.join("result.aaps").exists());
    }

    #[tokio::test]
    async fn parse_raises_timeout_when_agent_outlives_its_budget() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("slow_agent.sh");
        tokio::fs::write(&script_path, "#!/bin/sh\nsleep 30\n")
            .await
            .unwrap();
        let mut perms = tokio::fs::metadata(&script_path)
            .await
            .unwrap()
            .permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o755);
        }
        tokio::fs::set_permissions(&script_path, perms)
            .await
            .unwrap();

        let parser = LlmParser::new(
            AgentConfig {
                command: script_path.to_string_lossy().to_string(),
                model: "gpt-5.3-codex".to_string(),
                reasoning: "medium".to_string(),
                skip_git_check: true,
            },
            dir.path(),
        );
        let err = parser
            .parse(ParseRequest {
                source: "make a task".to_string(),
                source_format: "notes".to_string(),
                timeout_s: 5,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared application state wired together at startup and handed to every
//! route handler via [`axum::extract::State`].

use aad_actions::PromptDefaults;
use aad_controller::Controller;
use aad_llm_parse::{AgentConfig, LlmParser};
use aad_logs::LogHub;
use aad_queues::{InboxEmitter, OutboxIngester};
use aad_store::StateStore;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

/// Build identifier reported by `/api/version`. Not a `const` because a
/// real build would stamp this from the build system; here it is fixed.
pub const BUILD_ID: &str = "autoappdev-daemon-dev";

/// Everything a route handler needs, shared behind an `Arc` clone per
/// request (axum's `State` extractor requires `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub controller: Arc<Controller>,
    pub log_hub: Arc<LogHub>,
    pub inbox: Arc<InboxEmitter>,
    pub outbox: Arc<OutboxIngester>,
    pub llm_parser: Option<Arc<LlmParser>>,
    pub repo_root: PathBuf,
    pub runtime_dir: PathBuf,
    pub prompt_defaults: PromptDefaults,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Directory `<repo_root>/auto-apps/<workspace>/` a workspace's paths
    /// must resolve within.
    #[must_use]
    pub fn auto_apps_root(&self, workspace: &str) -> PathBuf {
        self.repo_root.join("auto-apps").join(workspace)
    }
}

/// Build an [`AgentConfig`] for `aad-llm-parse` from daemon configuration,
/// only when LLM-assisted parse is enabled.
#[must_use]
pub fn agent_config(model: &str, reasoning: &str, skip_git_check: bool) -> AgentConfig {
    AgentConfig {
        command: "codex".to_string(),
        model: model.to_string(),
        reasoning: reasoning.to_string(),
        skip_git_check,
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-store
#![deny(unsafe_code)]
//!
//! The durable state store (C1): config, workspace config, pipeline
//! scripts, action definitions, the three message queues, the run journal,
//! and the singleton pipeline state. Two interchangeable backends
//! implement [`StateStore`] — [`file::FileStore`] (a single JSON document,
//! always available) and, behind the `sql` feature, [`sql::SqlStore`]
//! (Postgres via `sqlx`). Construction at the boundary picks one based on
//! whether a database URL is configured; this crate never falls back
//! silently from SQL to file.

use aad_core::{
    ActionDefinition, ActionSpec, PipelineRun, PipelineScript, PipelineState, QueueKind,
    QueueMessage, RunStatus, TsKind, WorkspaceConfig,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// JSON-file fallback backend.
pub mod file;
/// Postgres backend, gated by the `sql` feature.
#[cfg(feature = "sql")]
pub mod sql;

/// Default cap on retained list entries (scripts, messages) in either
/// backend.
pub const LIST_CAP: usize = 200;

/// Update fields for [`StateStore::update_script`]; `None` preserves the
/// existing value.
#[derive(Debug, Clone, Default)]
pub struct ScriptUpdate {
    pub title: Option<String>,
    pub script_text: Option<String>,
    pub ir: Option<Value>,
}

/// Update fields for [`StateStore::update_action`]; `None` preserves the
/// existing value.
#[derive(Debug, Clone, Default)]
pub struct ActionUpdate {
    pub title: Option<String>,
    pub spec: Option<ActionSpec>,
    pub enabled: Option<bool>,
}

/// The operation set both backends implement.
///
/// Every method returns `anyhow::Result`; callers at the HTTP boundary
/// convert failures into `AadError::Internal` there (see `aad-errors`),
/// never inside this crate.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_config(&self, key: &str) -> Result<Option<Value>>;
    async fn set_config(&self, key: &str, value: Value) -> Result<()>;

    async fn get_workspace_config(&self, workspace: &str) -> Result<Option<WorkspaceConfig>>;
    async fn upsert_workspace_config(&self, workspace: &str, config: WorkspaceConfig) -> Result<()>;

    async fn create_script(
        &self,
        title: String,
        script_text: String,
        script_format: String,
    ) -> Result<PipelineScript>;
    async fn list_scripts(&self, limit: usize) -> Result<Vec<PipelineScript>>;
    async fn get_script(&self, id: i64) -> Result<Option<PipelineScript>>;
    async fn update_script(&self, id: i64, update: ScriptUpdate) -> Result<Option<PipelineScript>>;
    async fn delete_script(&self, id: i64) -> Result<bool>;

    async fn create_action(
        &self,
        title: String,
        kind: aad_core::ActionKind,
        spec: ActionSpec,
    ) -> Result<ActionDefinition>;
    async fn list_actions(&self) -> Result<Vec<ActionDefinition>>;
    async fn get_action(&self, id: i64) -> Result<Option<ActionDefinition>>;
    async fn update_action(&self, id: i64, update: ActionUpdate) -> Result<Option<ActionDefinition>>;
    async fn delete_action(&self, id: i64) -> Result<bool>;

    /// Append a message; `role` is validated by the caller against the
    /// queue's allowed role set before this is called.
    async fn append_message(&self, queue: QueueKind, role: &str, content: &str) -> Result<QueueMessage>;
    /// Newest-first, capped at `limit`. The HTTP boundary reverses this for
    /// the response so the UI sees oldest-first of the most recent N.
    async fn list_messages(&self, queue: QueueKind, limit: usize) -> Result<Vec<QueueMessage>>;

    async fn create_run(&self, pid: i32, script: String, cwd: String, args: Vec<String>) -> Result<PipelineRun>;
    async fn set_run_status(&self, run_id: i64, status: RunStatus) -> Result<()>;
    async fn latest_run(&self) -> Result<Option<PipelineRun>>;

    async fn get_pipeline_state(&self) -> Result<PipelineState>;
    async fn set_pipeline_state(
        &self,
        ts_kind: TsKind,
        pid: Option<i32>,
        run_id: Option<i64>,
    ) -> Result<PipelineState>;
}

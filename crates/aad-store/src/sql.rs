// SPDX-License-Identifier: MIT OR Apache-2.0
//! Postgres-backed state store. Selected at construction whenever a
//! database URL is configured; startup fails fast if the database is
//! unreachable rather than silently falling back to the file backend.

use crate::{ActionUpdate, ScriptUpdate, StateStore, LIST_CAP};
use aad_core::{
    ActionDefinition, ActionKind, ActionSpec, FsmState, PipelineRun, PipelineScript,
    PipelineState, QueueKind, QueueMessage, RunStatus, TsKind, WorkspaceConfig,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Idempotent schema, applied once at startup. Every statement is
/// `CREATE ... IF NOT EXISTS` so repeated application is a no-op.
const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS workspace_configs (
        workspace TEXT PRIMARY KEY,
        materials_paths JSONB NOT NULL,
        shared_context_text TEXT NOT NULL,
        shared_context_path TEXT,
        default_language TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS scripts (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        script_text TEXT NOT NULL,
        script_version BIGINT NOT NULL,
        script_format TEXT NOT NULL,
        ir JSONB,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS actions (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        kind TEXT NOT NULL,
        spec JSONB NOT NULL,
        enabled BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chat_messages (
        id BIGSERIAL PRIMARY KEY,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS inbox_messages (
        id BIGSERIAL PRIMARY KEY,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS outbox_messages (
        id BIGSERIAL PRIMARY KEY,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS runs (
        id BIGSERIAL PRIMARY KEY,
        status TEXT NOT NULL,
        pid BIGINT,
        script TEXT NOT NULL,
        cwd TEXT NOT NULL,
        args JSONB NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        stopped_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS pipeline_state (
        id INT PRIMARY KEY CHECK (id = 1),
        state TEXT NOT NULL,
        pid BIGINT,
        run_id BIGINT,
        started_at TIMESTAMPTZ,
        paused_at TIMESTAMPTZ,
        resumed_at TIMESTAMPTZ,
        stopped_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL
    )",
];

/// Postgres-backed [`StateStore`].
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: PgPool,
}

impl SqlStore {
    /// Connect to `database_url`, apply the schema idempotently, and run a
    /// `SELECT 1` smoke check. Fails fast on any connectivity problem.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(database_url)
            .await
            .context("connect to database")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("smoke check: SELECT 1")?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("apply schema statement: {statement}"))?;
        }
        Ok(())
    }

    fn row_to_script(row: &sqlx::postgres::PgRow) -> Result<PipelineScript> {
        Ok(PipelineScript {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            script_text: row.try_get("script_text")?,
            script_version: row.try_get("script_version")?,
            script_format: row.try_get("script_format")?,
            ir: row.try_get::<Option<Json<serde_json::Value>>, _>("ir")?.map(|j| j.0),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_action(row: &sqlx::postgres::PgRow) -> Result<ActionDefinition> {
        let kind_str: String = row.try_get("kind")?;
        let kind = match kind_str.as_str() {
            "prompt" => ActionKind::Prompt,
            "command" => ActionKind::Command,
            other => anyhow::bail!("unknown stored action kind '{other}'"),
        };
        Ok(ActionDefinition {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            kind,
            spec: row.try_get::<Json<ActionSpec>, _>("spec")?.0,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<QueueMessage> {
        Ok(QueueMessage {
            id: row.try_get("id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_run(row: &sqlx::postgres::PgRow) -> Result<PipelineRun> {
        let status_str: String = row.try_get("status")?;
        let status = parse_run_status(&status_str)?;
        Ok(PipelineRun {
            id: row.try_get("id")?,
            status,
            pid: row.try_get::<Option<i64>, _>("pid")?.map(|p| p as i32),
            script: row.try_get("script")?,
            cwd: row.try_get("cwd")?,
            args: row.try_get::<Json<Vec<String>>, _>("args")?.0,
            started_at: row.try_get("started_at")?,
            stopped_at: row.try_get("stopped_at")?,
        })
    }
}

fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Paused => "paused",
        RunStatus::Stopped => "stopped",
        RunStatus::Failed => "failed",
        RunStatus::Completed => "completed",
    }
}

fn parse_run_status(s: &str) -> Result<RunStatus> {
    Ok(match s {
        "running" => RunStatus::Running,
        "paused" => RunStatus::Paused,
        "stopped" => RunStatus::Stopped,
        "failed" => RunStatus::Failed,
        "completed" => RunStatus::Completed,
        other => anyhow::bail!("unknown stored run status '{other}'"),
    })
}

fn fsm_state_str(state: FsmState) -> &'static str {
    match state {
        FsmState::Stopped => "stopped",
        FsmState::Running => "running",
        FsmState::Paused => "paused",
    }
}

fn parse_fsm_state(s: &str) -> Result<FsmState> {
    Ok(match s {
        "stopped" => FsmState::Stopped,
        "running" => FsmState::Running,
        "paused" => FsmState::Paused,
        other => anyhow::bail!("unknown stored fsm state '{other}'"),
    })
}

#[async_trait]
impl StateStore for SqlStore {
    async fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("get_config")?;
        Ok(match row {
            Some(r) => Some(r.try_get::<Json<serde_json::Value>, _>("value")?.0),
            None => None,
        })
    }

    async fn set_config(&self, key: &str, value: serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO config (key, value, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
        )
        .bind(key)
        .bind(Json(value))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("set_config")?;
        Ok(())
    }

    async fn get_workspace_config(&self, workspace: &str) -> Result<Option<WorkspaceConfig>> {
        let row = sqlx::query(
            "SELECT workspace, materials_paths, shared_context_text, shared_context_path, default_language, updated_at
             FROM workspace_configs WHERE workspace = $1",
        )
        .bind(workspace)
        .fetch_optional(&self.pool)
        .await
        .context("get_workspace_config")?;
        Ok(match row {
            Some(r) => Some(WorkspaceConfig {
                workspace: r.try_get("workspace")?,
                materials_paths: r.try_get::<Json<Vec<String>>, _>("materials_paths")?.0,
                shared_context_text: r.try_get("shared_context_text")?,
                shared_context_path: r.try_get("shared_context_path")?,
                default_language: r.try_get("default_language")?,
                updated_at: r.try_get("updated_at")?,
            }),
            None => None,
        })
    }

    async fn upsert_workspace_config(&self, workspace: &str, config: WorkspaceConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO workspace_configs
                (workspace, materials_paths, shared_context_text, shared_context_path, default_language, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (workspace) DO UPDATE SET
                materials_paths = EXCLUDED.materials_paths,
                shared_context_text = EXCLUDED.shared_context_text,
                shared_context_path = EXCLUDED.shared_context_path,
                default_language = EXCLUDED.default_language,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(workspace)
        .bind(Json(config.materials_paths))
        .bind(config.shared_context_text)
        .bind(config.shared_context_path)
        .bind(config.default_language)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("upsert_workspace_config")?;
        Ok(())
    }

    async fn create_script(
        &self,
        title: String,
        script_text: String,
        script_format: String,
    ) -> Result<PipelineScript> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO scripts (title, script_text, script_version, script_format, ir, created_at, updated_at)
             VALUES ($1, $2, 1, $3, NULL, $4, $4)
             RETURNING id, title, script_text, script_version, script_format, ir, created_at, updated_at",
        )
        .bind(title)
        .bind(script_text)
        .bind(script_format)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("create_script")?;
        Self::row_to_script(&row)
    }

    async fn list_scripts(&self, limit: usize) -> Result<Vec<PipelineScript>> {
        let limit = limit.min(LIST_CAP) as i64;
        let rows = sqlx::query(
            "SELECT id, title, script_text, script_version, script_format, ir, created_at, updated_at
             FROM scripts ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list_scripts")?;
        rows.iter().map(Self::row_to_script).collect()
    }

    async fn get_script(&self, id: i64) -> Result<Option<PipelineScript>> {
        let row = sqlx::query(
            "SELECT id, title, script_text, script_version, script_format, ir, created_at, updated_at
             FROM scripts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("get_script")?;
        row.as_ref().map(Self::row_to_script).transpose()
    }

    async fn update_script(&self, id: i64, update: ScriptUpdate) -> Result<Option<PipelineScript>> {
        let Some(existing) = self.get_script(id).await? else {
            return Ok(None);
        };
        let title = update.title.unwrap_or(existing.title);
        let (script_text, script_version) = match update.script_text {
            Some(text) => (text, existing.script_version + 1),
            None => (existing.script_text, existing.script_version),
        };
        let ir = update.ir.or(existing.ir);
        let now = Utc::now();

        let row = sqlx::query(
            "UPDATE scripts SET title = $1, script_text = $2, script_version = $3, ir = $4, updated_at = $5
             WHERE id = $6
             RETURNING id, title, script_text, script_version, script_format, ir, created_at, updated_at",
        )
        .bind(title)
        .bind(script_text)
        .bind(script_version)
        .bind(ir.map(Json))
        .bind(now)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("update_script")?;
        Ok(Some(Self::row_to_script(&row)?))
    }

    async fn delete_script(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scripts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete_script")?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_action(&self, title: String, kind: ActionKind, spec: ActionSpec) -> Result<ActionDefinition> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO actions (title, kind, spec, enabled, created_at, updated_at)
             VALUES ($1, $2, $3, true, $4, $4)
             RETURNING id, title, kind, spec, enabled, created_at, updated_at",
        )
        .bind(title)
        .bind(kind.as_str())
        .bind(Json(spec))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("create_action")?;
        Self::row_to_action(&row)
    }

    async fn list_actions(&self) -> Result<Vec<ActionDefinition>> {
        let rows = sqlx::query("SELECT id, title, kind, spec, enabled, created_at, updated_at FROM actions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("list_actions")?;
        rows.iter().map(Self::row_to_action).collect()
    }

    async fn get_action(&self, id: i64) -> Result<Option<ActionDefinition>> {
        let row = sqlx::query("SELECT id, title, kind, spec, enabled, created_at, updated_at FROM actions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("get_action")?;
        row.as_ref().map(Self::row_to_action).transpose()
    }

    async fn update_action(&self, id: i64, update: ActionUpdate) -> Result<Option<ActionDefinition>> {
        let Some(existing) = self.get_action(id).await? else {
            return Ok(None);
        };
        let title = update.title.unwrap_or(existing.title);
        let spec = update.spec.unwrap_or(existing.spec);
        let enabled = update.enabled.unwrap_or(existing.enabled);
        let now = Utc::now();

        let row = sqlx::query(
            "UPDATE actions SET title = $1, spec = $2, enabled = $3, updated_at = $4
             WHERE id = $5
             RETURNING id, title, kind, spec, enabled, created_at, updated_at",
        )
        .bind(title)
        .bind(Json(spec))
        .bind(enabled)
        .bind(now)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("update_action")?;
        Ok(Some(Self::row_to_action(&row)?))
    }

    async fn delete_action(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM actions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete_action")?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(&self, queue: QueueKind, role: &str, content: &str) -> Result<QueueMessage> {
        let sql = format!(
            "INSERT INTO {} (role, content, created_at) VALUES ($1, $2, $3) RETURNING id, role, content, created_at",
            queue.table_name()
        );
        let row = sqlx::query(&sql)
            .bind(role)
            .bind(content)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .context("append_message")?;
        Self::row_to_message(&row)
    }

    async fn list_messages(&self, queue: QueueKind, limit: usize) -> Result<Vec<QueueMessage>> {
        let limit = limit.min(LIST_CAP) as i64;
        let sql = format!(
            "SELECT id, role, content, created_at FROM {} ORDER BY id DESC LIMIT $1",
            queue.table_name()
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("list_messages")?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn create_run(&self, pid: i32, script: String, cwd: String, args: Vec<String>) -> Result<PipelineRun> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO runs (status, pid, script, cwd, args, started_at, stopped_at)
             VALUES ($1, $2, $3, $4, $5, $6, NULL)
             RETURNING id, status, pid, script, cwd, args, started_at, stopped_at",
        )
        .bind(run_status_str(RunStatus::Running))
        .bind(i64::from(pid))
        .bind(script)
        .bind(cwd)
        .bind(Json(args))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("create_run")?;
        Self::row_to_run(&row)
    }

    async fn set_run_status(&self, run_id: i64, status: RunStatus) -> Result<()> {
        let stopped_at: Option<DateTime<Utc>> = if status.is_terminal() { Some(Utc::now()) } else { None };
        sqlx::query("UPDATE runs SET status = $1, stopped_at = COALESCE($2, stopped_at) WHERE id = $3")
            .bind(run_status_str(status))
            .bind(stopped_at)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .context("set_run_status")?;
        Ok(())
    }

    async fn latest_run(&self) -> Result<Option<PipelineRun>> {
        let row = sqlx::query(
            "SELECT id, status, pid, script, cwd, args, started_at, stopped_at FROM runs ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("latest_run")?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn get_pipeline_state(&self) -> Result<PipelineState> {
        let row = sqlx::query(
            "SELECT state, pid, run_id, started_at, paused_at, resumed_at, stopped_at, updated_at
             FROM pipeline_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("get_pipeline_state")?;
        let Some(row) = row else {
            return Ok(PipelineState::initial());
        };
        let state_str: String = row.try_get("state")?;
        Ok(PipelineState {
            state: parse_fsm_state(&state_str)?,
            pid: row.try_get::<Option<i64>, _>("pid")?.map(|p| p as i32),
            run_id: row.try_get("run_id")?,
            started_at: row.try_get("started_at")?,
            paused_at: row.try_get("paused_at")?,
            resumed_at: row.try_get("resumed_at")?,
            stopped_at: row.try_get("stopped_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn set_pipeline_state(
        &self,
        ts_kind: TsKind,
        pid: Option<i32>,
        run_id: Option<i64>,
    ) -> Result<PipelineState> {
        let mut state = self.get_pipeline_state().await?;
        let now = Utc::now();
        match ts_kind {
            TsKind::Start => {
                state.state = FsmState::Running;
                state.pid = pid;
                state.run_id = run_id;
                state.started_at = Some(now);
            }
            TsKind::Pause => {
                state.state = FsmState::Paused;
                state.paused_at = Some(now);
            }
            TsKind::Resume => {
                state.state = FsmState::Running;
                state.resumed_at = Some(now);
            }
            TsKind::Stop => {
                state.state = FsmState::Stopped;
                state.pid = None;
                state.stopped_at = Some(now);
            }
        }
        state.updated_at = now;

        sqlx::query(
            "INSERT INTO pipeline_state (id, state, pid, run_id, started_at, paused_at, resumed_at, stopped_at, updated_at)
             VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                state = EXCLUDED.state, pid = EXCLUDED.pid, run_id = EXCLUDED.run_id,
                started_at = EXCLUDED.started_at, paused_at = EXCLUDED.paused_at,
                resumed_at = EXCLUDED.resumed_at, stopped_at = EXCLUDED.stopped_at,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(fsm_state_str(state.state))
        .bind(state.pid.map(i64::from))
        .bind(state.run_id)
        .bind(state.started_at)
        .bind(state.paused_at)
        .bind(state.resumed_at)
        .bind(state.stopped_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .context("set_pipeline_state")?;

        Ok(state)
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! `GET/POST /api/config`, `GET/POST /api/plan`, `GET/POST
//! /api/workspaces/{ws}/config`.

use crate::error::ApiError;
use crate::routes::parse_body;
use crate::state::AppState;
use aad_core::json_guard::{validate_json, JsonGuardLimits};
use aad_core::{PipelinePlan, WorkspaceConfig, SUPPORTED_LANGUAGES};
use aad_errors::{AadError, ErrorCode};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ConfigKeyQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfigBody {
    pub key: String,
    pub value: Value,
}

/// Arbitrary config values are untrusted JSON; reject anything pathologically
/// deep or large before it ever reaches the store.
const CONFIG_VALUE_MAX_DEPTH: usize = 10;
const CONFIG_VALUE_MAX_SIZE_BYTES: usize = 1_000_000;

fn check_config_value(value: &Value) -> Result<(), ApiError> {
    let errors = validate_json(value, JsonGuardLimits::new(CONFIG_VALUE_MAX_DEPTH, CONFIG_VALUE_MAX_SIZE_BYTES));
    if let Some(first) = errors.into_iter().next() {
        return Err(AadError::new(ErrorCode::invalid_field("value"), first).into());
    }
    Ok(())
}

/// `GET /api/config?key=<k>` — a single key, 404 if unset.
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ConfigKeyQuery>,
) -> Result<Json<Value>, ApiError> {
    let value = state.store.get_config(&q.key).await?;
    match value {
        Some(value) => Ok(Json(json!({ "key": q.key, "value": value }))),
        None => Err(AadError::new(ErrorCode::NotFound, format!("no config set for key '{}'", q.key)).into()),
    }
}

/// `POST /api/config` — upsert a single key.
pub async fn set_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body: ConfigBody = parse_body(body)?;
    if body.key.is_empty() {
        return Err(AadError::new(ErrorCode::Empty, "key must not be empty").into());
    }
    check_config_value(&body.value)?;
    state.store.set_config(&body.key, body.value.clone()).await?;
    Ok(Json(json!({ "key": body.key, "value": body.value })))
}

fn validate_plan(plan: &PipelinePlan) -> Result<(), ApiError> {
    if plan.kind != PipelinePlan::KIND {
        return Err(AadError::new(
            ErrorCode::invalid_field("kind"),
            format!("plan.kind must be '{}'", PipelinePlan::KIND),
        )
        .into());
    }
    if plan.version != PipelinePlan::VERSION {
        return Err(AadError::new(
            ErrorCode::invalid_field("version"),
            format!("plan.version must be {}", PipelinePlan::VERSION),
        )
        .into());
    }
    let mut seen = std::collections::HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.id) {
            return Err(AadError::new(
                ErrorCode::invalid_field("steps"),
                format!("duplicate plan step id {}", step.id),
            )
            .into());
        }
    }
    Ok(())
}

/// `GET /api/plan` — the distinguished plan, or an empty default if unset.
pub async fn get_plan(State(state): State<Arc<AppState>>) -> Result<Json<PipelinePlan>, ApiError> {
    let stored = state.store.get_config(aad_core::config::PIPELINE_PLAN_KEY).await?;
    let plan = match stored {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| AadError::new(ErrorCode::Internal, format!("stored plan is malformed: {e}")))?,
        None => PipelinePlan {
            kind: PipelinePlan::KIND.to_string(),
            version: PipelinePlan::VERSION,
            steps: Vec::new(),
        },
    };
    Ok(Json(plan))
}

/// `POST /api/plan` — replace the distinguished plan wholesale.
pub async fn set_plan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<PipelinePlan>, ApiError> {
    let plan: PipelinePlan = parse_body(body)?;
    validate_plan(&plan)?;
    let value = serde_json::to_value(&plan).map_err(|e| AadError::internal(&e))?;
    state.store.set_config(aad_core::config::PIPELINE_PLAN_KEY, value).await?;
    Ok(Json(plan))
}

pub(crate) fn validate_workspace_slug(slug: &str) -> Result<(), ApiError> {
    let ok = !slug.is_empty()
        && slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !slug.contains('/');
    if !ok {
        return Err(AadError::new(
            ErrorCode::invalid_field("workspace"),
            "workspace must be a single path segment of [A-Za-z0-9_-]",
        )
        .into());
    }
    Ok(())
}

fn validate_workspace_config(state: &AppState, ws: &str, config: &WorkspaceConfig) -> Result<(), ApiError> {
    let root = state.auto_apps_root(ws);
    if config.materials_paths.is_empty() || config.materials_paths.len() > WorkspaceConfig::MAX_MATERIALS_PATHS {
        return Err(AadError::new(
            ErrorCode::invalid_field("materials_paths"),
            format!("materials_paths must have 1..={} entries", WorkspaceConfig::MAX_MATERIALS_PATHS),
        )
        .into());
    }
    for p in &config.materials_paths {
        if aad_core::resolve_within(&root, std::path::Path::new(p)).is_none() {
            return Err(AadError::new(
                ErrorCode::PathOutsideAutoApps,
                format!("materials path '{p}' resolves outside the workspace"),
            )
            .into());
        }
    }
    if config.shared_context_text.chars().count() > WorkspaceConfig::MAX_SHARED_CONTEXT_LEN {
        return Err(AadError::new(
            ErrorCode::TooLong,
            format!(
                "shared_context_text exceeds {} characters",
                WorkspaceConfig::MAX_SHARED_CONTEXT_LEN
            ),
        )
        .into());
    }
    if let Some(p) = &config.shared_context_path {
        if aad_core::resolve_within(&root, std::path::Path::new(p)).is_none() {
            return Err(AadError::new(
                ErrorCode::PathOutsideAutoApps,
                format!("shared_context_path '{p}' resolves outside the workspace"),
            )
            .into());
        }
    }
    if !SUPPORTED_LANGUAGES.contains(&config.default_language.as_str()) {
        return Err(AadError::new(
            ErrorCode::invalid_field("default_language"),
            format!("default_language must be one of {SUPPORTED_LANGUAGES:?}"),
        )
        .into());
    }
    Ok(())
}

/// `GET /api/workspaces/{ws}/config`.
pub async fn get_workspace_config(
    State(state): State<Arc<AppState>>,
    Path(ws): Path<String>,
) -> Result<Json<WorkspaceConfig>, ApiError> {
    validate_workspace_slug(&ws)?;
    match state.store.get_workspace_config(&ws).await? {
        Some(config) => Ok(Json(config)),
        None => Err(AadError::new(ErrorCode::NotFound, format!("no config for workspace '{ws}'")).into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceConfigBody {
    pub materials_paths: Vec<String>,
    #[serde(default)]
    pub shared_context_text: String,
    #[serde(default)]
    pub shared_context_path: Option<String>,
    pub default_language: String,
}

/// `POST /api/workspaces/{ws}/config` — upsert wholesale.
pub async fn set_workspace_config(
    State(state): State<Arc<AppState>>,
    Path(ws): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<WorkspaceConfig>, ApiError> {
    validate_workspace_slug(&ws)?;
    let body: WorkspaceConfigBody = parse_body(body)?;
    let config = WorkspaceConfig {
        workspace: ws.clone(),
        materials_paths: body.materials_paths,
        shared_context_text: body.shared_context_text,
        shared_context_path: body.shared_context_path,
        default_language: body.default_language,
        updated_at: Utc::now(),
    };
    validate_workspace_config(&state, &ws, &config)?;
    state.store.upsert_workspace_config(&ws, config.clone()).await?;
    Ok(Json(config))
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Action definition CRUD (`/api/actions`) and `/api/actions/{id}/clone`.

use crate::error::ApiError;
use crate::routes::parse_body;
use crate::state::AppState;
use aad_actions::{check_kind_unchanged, check_not_builtin, normalize_spec, validate_title};
use aad_core::{ActionDefinition, ActionKind, ActionSpec};
use aad_errors::{AadError, ErrorCode};
use aad_store::ActionUpdate;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateActionBody {
    pub title: String,
    pub kind: ActionKind,
    #[serde(default)]
    pub spec: ActionSpec,
}

pub async fn create_action(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<ActionDefinition>, ApiError> {
    let body: CreateActionBody = parse_body(body)?;
    validate_title(Some(&body.title))?;
    let spec = normalize_spec(body.kind, None, &body.spec, &state.repo_root, &state.prompt_defaults)?;
    let action = state.store.create_action(body.title, body.kind, spec).await?;
    Ok(Json(action))
}

/// Built-ins are synthesized by the store/registry layer and sorted first;
/// this handler simply forwards whatever the store returns.
pub async fn list_actions(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ActionDefinition>>, ApiError> {
    Ok(Json(state.store.list_actions().await?))
}

pub async fn get_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ActionDefinition>, ApiError> {
    match state.store.get_action(id).await? {
        Some(action) => Ok(Json(action)),
        None => Err(AadError::new(ErrorCode::NotFound, format!("no action with id {id}")).into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateActionBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: Option<ActionKind>,
    #[serde(default)]
    pub spec: Option<ActionSpec>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub async fn update_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<ActionDefinition>, ApiError> {
    check_not_builtin(id)?;
    let body: UpdateActionBody = parse_body(body)?;
    validate_title(body.title.as_deref())?;

    let existing = state
        .store
        .get_action(id)
        .await?
        .ok_or_else(|| AadError::new(ErrorCode::NotFound, format!("no action with id {id}")))?;
    check_kind_unchanged(existing.kind, body.kind)?;

    let spec = match body.spec {
        Some(patch) => Some(normalize_spec(
            existing.kind,
            Some(&existing.spec),
            &patch,
            &state.repo_root,
            &state.prompt_defaults,
        )?),
        None => None,
    };

    let update = ActionUpdate {
        title: body.title,
        spec,
        enabled: body.enabled,
    };
    match state.store.update_action(id, update).await? {
        Some(action) => Ok(Json(action)),
        None => Err(AadError::new(ErrorCode::NotFound, format!("no action with id {id}")).into()),
    }
}

pub async fn delete_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    check_not_builtin(id)?;
    let deleted = state.store.delete_action(id).await?;
    if !deleted {
        return Err(AadError::new(ErrorCode::NotFound, format!("no action with id {id}")).into());
    }
    Ok(Json(json!({ "deleted": true })))
}

/// `POST /api/actions/{id}/clone` — persist a new action with the source's
/// `kind` and `spec`, title suffixed so the clone is distinguishable.
pub async fn clone_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ActionDefinition>, ApiError> {
    let source = state
        .store
        .get_action(id)
        .await?
        .ok_or_else(|| AadError::new(ErrorCode::NotFound, format!("no action with id {id}")))?;
    let title = format!("{} (copy)", source.title);
    let cloned = state.store.create_action(title, source.kind, source.spec).await?;
    Ok(Json(cloned))
}

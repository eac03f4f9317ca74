// SPDX-License-Identifier: MIT OR Apache-2.0
//! `GET /api/pipeline`, `/api/pipeline/status`, and the FSM event routes.

use crate::error::ApiError;
use crate::routes::parse_body;
use crate::state::AppState;
use aad_core::PipelineState;
use aad_errors::{AadError, ErrorCode};
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub async fn get_pipeline(State(state): State<Arc<AppState>>) -> Result<Json<PipelineState>, ApiError> {
    Ok(Json(state.store.get_pipeline_state().await?))
}

/// `/api/pipeline/status` is an alias of `/api/pipeline` — both surface the
/// singleton FSM row, which is the sole authority for pipeline state.
pub async fn pipeline_status(State(state): State<Arc<AppState>>) -> Result<Json<PipelineState>, ApiError> {
    get_pipeline(State(state)).await
}

#[derive(Debug, Deserialize)]
pub struct StartBody {
    pub script: String,
    pub cwd: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// The controller only rejects a script path that resolves outside the
/// repo; existence is checked here so `script_not_found` can be reported
/// before a child spawn is attempted.
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<PipelineState>, ApiError> {
    let body: StartBody = parse_body(body)?;
    let candidate = std::path::Path::new(&body.cwd).join(&body.script);
    let resolved = if std::path::Path::new(&body.script).is_absolute() {
        std::path::PathBuf::from(&body.script)
    } else {
        candidate
    };
    let exists = tokio::fs::try_exists(&resolved).await.unwrap_or(false);
    if !exists {
        return Err(AadError::new(
            ErrorCode::ScriptNotFound,
            format!("script '{}' does not exist", body.script),
        )
        .into());
    }
    let new_state = state.controller.start(&body.script, &body.cwd, body.args).await?;
    Ok(Json(new_state))
}

pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<PipelineState>, ApiError> {
    Ok(Json(state.controller.stop().await?))
}

pub async fn pause(State(state): State<Arc<AppState>>) -> Result<Json<PipelineState>, ApiError> {
    Ok(Json(state.controller.pause().await?))
}

pub async fn resume(State(state): State<Arc<AppState>>) -> Result<Json<PipelineState>, ApiError> {
    Ok(Json(state.controller.resume().await?))
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline script CRUD and the three parse endpoints
//! (`/api/scripts/parse`, `/import-shell`, `/parse-llm`).

use crate::error::ApiError;
use crate::routes::parse_body;
use crate::state::AppState;
use aad_core::script::MAX_SCRIPT_LEN;
use aad_core::{Ir, PipelineScript};
use aad_errors::{AadError, ErrorCode};
use aad_llm_parse::ParseRequest;
use aad_store::ScriptUpdate;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    aad_store::LIST_CAP
}

fn check_script_text(text: &str) -> Result<(), ApiError> {
    if text.is_empty() {
        return Err(AadError::new(ErrorCode::Empty, "script_text must not be empty").into());
    }
    if text.chars().count() > MAX_SCRIPT_LEN {
        return Err(AadError::new(
            ErrorCode::TooLong,
            format!("script_text exceeds {MAX_SCRIPT_LEN} characters"),
        )
        .into());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateScriptBody {
    pub title: String,
    pub script_text: String,
    #[serde(default)]
    pub script_format: Option<String>,
}

pub async fn create_script(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<PipelineScript>, ApiError> {
    let body: CreateScriptBody = parse_body(body)?;
    check_script_text(&body.script_text)?;
    let script = state
        .store
        .create_script(
            body.title,
            body.script_text,
            body.script_format.unwrap_or_else(|| "aaps_v1".to_string()),
        )
        .await?;
    Ok(Json(script))
}

pub async fn list_scripts(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<PipelineScript>>, ApiError> {
    Ok(Json(state.store.list_scripts(q.limit).await?))
}

pub async fn get_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<PipelineScript>, ApiError> {
    match state.store.get_script(id).await? {
        Some(script) => Ok(Json(script)),
        None => Err(AadError::new(ErrorCode::NotFound, format!("no script with id {id}")).into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateScriptBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub script_text: Option<String>,
    #[serde(default)]
    pub ir: Option<Value>,
}

pub async fn update_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<PipelineScript>, ApiError> {
    let body: UpdateScriptBody = parse_body(body)?;
    if let Some(text) = &body.script_text {
        check_script_text(text)?;
    }
    let update = ScriptUpdate {
        title: body.title,
        script_text: body.script_text,
        ir: body.ir,
    };
    match state.store.update_script(id, update).await? {
        Some(script) => Ok(Json(script)),
        None => Err(AadError::new(ErrorCode::NotFound, format!("no script with id {id}")).into()),
    }
}

pub async fn delete_script(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.store.delete_script(id).await?;
    if !deleted {
        return Err(AadError::new(ErrorCode::NotFound, format!("no script with id {id}")).into());
    }
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct ParseScriptBody {
    pub script_text: String,
}

/// `POST /api/scripts/parse` — AAPS text to IR, no persistence.
pub async fn parse_script(Json(body): Json<Value>) -> Result<Json<Ir>, ApiError> {
    let body: ParseScriptBody = parse_body(body)?;
    let ir = aad_ir::parse_aaps(&body.script_text)?;
    Ok(Json(ir))
}

#[derive(Debug, Deserialize)]
pub struct ImportShellBody {
    pub source: String,
}

/// `POST /api/scripts/import-shell` — `# AAPS:`-annotated shell to IR.
pub async fn import_shell(Json(body): Json<Value>) -> Result<Json<Ir>, ApiError> {
    let body: ImportShellBody = parse_body(body)?;
    let ir = aad_ir::import_shell(&body.source)?;
    Ok(Json(ir))
}

#[derive(Debug, Deserialize)]
pub struct ParseLlmBody {
    pub source: String,
    #[serde(default = "default_source_format")]
    pub source_format: String,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_source_format() -> String {
    "notes".to_string()
}

fn default_timeout_s() -> u64 {
    45
}

/// `POST /api/scripts/parse-llm` — agent-assisted parse, gated on
/// `AUTOAPPDEV_ENABLE_LLM_PARSE`. Unset, it reports the same
/// `codex_not_found` a missing binary would, since neither case has an
/// agent available to answer the request.
pub async fn parse_llm(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body: ParseLlmBody = parse_body(body)?;
    if body.source.is_empty() {
        return Err(AadError::new(ErrorCode::Empty, "source must not be empty").into());
    }
    if body.source.len() > aad_llm_parse::MAX_SOURCE_LEN {
        return Err(AadError::new(
            ErrorCode::TooLong,
            format!("source exceeds {} bytes", aad_llm_parse::MAX_SOURCE_LEN),
        )
        .into());
    }
    let Some(parser) = &state.llm_parser else {
        return Err(AadError::new(ErrorCode::CodexNotFound, "LLM-assisted parse is not enabled").into());
    };

    let outcome = parser
        .parse(ParseRequest {
            source: body.source,
            source_format: body.source_format,
            timeout_s: body.timeout_s,
        })
        .await?;

    Ok(Json(json!({
        "id": outcome.id,
        "artifacts_dir": outcome.artifacts_dir,
        "warnings": outcome.warnings,
        "ir": outcome.ir,
    })))
}

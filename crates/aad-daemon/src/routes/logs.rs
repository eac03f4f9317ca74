// SPDX-License-Identifier: MIT OR Apache-2.0
//! `GET /api/logs` (since-id cursor) and `GET /api/logs/tail` (last-N).

use crate::error::ApiError;
use crate::state::AppState;
use aad_core::LogSource;
use aad_errors::{AadError, ErrorCode};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

fn parse_source(name: &str) -> Result<LogSource, ApiError> {
    match name {
        "pipeline" => Ok(LogSource::Pipeline),
        "backend" => Ok(LogSource::Backend),
        other => Err(AadError::new(
            ErrorCode::invalid_field("log_name"),
            format!("unknown log source '{other}', expected 'pipeline' or 'backend'"),
        )
        .into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    #[serde(default)]
    pub since: u64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    aad_logs::DEFAULT_CAPACITY
}

pub async fn logs_since(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SinceQuery>,
) -> Result<Json<Value>, ApiError> {
    let source = q.source.as_deref().map(parse_source).transpose()?;
    let (entries, next) = state.log_hub.since(q.since, source, q.limit).await;
    Ok(Json(json!({ "entries": entries, "next": next })))
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    pub name: String,
    #[serde(default = "default_tail_lines")]
    pub lines: usize,
}

fn default_tail_lines() -> usize {
    200
}

pub async fn logs_tail(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TailQuery>,
) -> Result<Json<Value>, ApiError> {
    let source = parse_source(&q.name)?;
    let entries = state.log_hub.tail(source, q.lines).await;
    Ok(Json(json!({ "entries": entries })))
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! `GET /api/health` and `GET /api/version`.

use crate::error::ApiError;
use crate::state::{AppState, BUILD_ID};
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// DB/store liveness probe. A failing `get_pipeline_state` call surfaces as
/// a 500 `internal` error rather than a degraded 200, since the store is
/// the FSM's single source of truth.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let pipeline_state = state.store.get_pipeline_state().await?;
    Ok(Json(json!({
        "status": "ok",
        "pipeline_state": pipeline_state.state,
        "llm_parse_enabled": state.llm_parser.is_some(),
        "outbox_ingest_errors": state.outbox.ingest_errors(),
    })))
}

pub async fn version(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "build_id": BUILD_ID,
        "started_at": state.started_at,
    }))
}

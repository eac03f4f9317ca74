// SPDX-License-Identifier: MIT OR Apache-2.0
//! `GET/POST /api/chat`, `/api/inbox`, `/api/outbox`.

use crate::error::ApiError;
use crate::routes::parse_body;
use crate::state::AppState;
use aad_core::message::MAX_CONTENT_LEN;
use aad_core::QueueKind;
use aad_errors::{AadError, ErrorCode};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

fn check_content(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(AadError::new(ErrorCode::Empty, "content must not be empty").into());
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(AadError::new(
            ErrorCode::TooLong,
            format!("content exceeds {MAX_CONTENT_LEN} characters"),
        )
        .into());
    }
    Ok(())
}

/// Newest-first from the store, reversed here so the response is
/// oldest-first of the most recent `limit`.
async fn list_reversed(state: &AppState, queue: QueueKind, limit: usize) -> Result<Value, ApiError> {
    let mut messages = state.store.list_messages(queue, limit).await?;
    messages.reverse();
    Ok(serde_json::to_value(messages).map_err(|e| AadError::internal(&e))?)
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub role: String,
    pub content: String,
}

pub async fn list_chat(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(list_reversed(&state, QueueKind::Chat, q.limit).await?))
}

pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body: ChatBody = parse_body(body)?;
    if body.role != "user" && body.role != "assistant" {
        return Err(AadError::new(
            ErrorCode::invalid_field("role"),
            "chat role must be 'user' or 'assistant'",
        )
        .into());
    }
    check_content(&body.content)?;
    let message = state.store.append_message(QueueKind::Chat, &body.role, &body.content).await?;
    Ok(Json(serde_json::to_value(message).map_err(|e| AadError::internal(&e))?))
}

#[derive(Debug, Deserialize)]
pub struct InboxBody {
    pub content: String,
}

pub async fn list_inbox(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(list_reversed(&state, QueueKind::Inbox, q.limit).await?))
}

/// Persist first, emit the file second, matching C8's ordering guarantee:
/// a reader seeing the file can trust the DB row already exists.
pub async fn post_inbox(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body: InboxBody = parse_body(body)?;
    check_content(&body.content)?;
    let message = state.store.append_message(QueueKind::Inbox, "user", &body.content).await?;
    state.inbox.emit(&body.content).await?;
    Ok(Json(serde_json::to_value(message).map_err(|e| AadError::internal(&e))?))
}

#[derive(Debug, Deserialize)]
pub struct OutboxBody {
    #[serde(default = "default_outbox_role")]
    pub role: String,
    pub content: String,
}

fn default_outbox_role() -> String {
    "system".to_string()
}

pub async fn list_outbox(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(list_reversed(&state, QueueKind::Outbox, q.limit).await?))
}

/// Direct outbox append for the control-plane's own system messages; the
/// usual path for pipeline-authored messages is file ingestion via C8.
pub async fn post_outbox(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body: OutboxBody = parse_body(body)?;
    if body.role != "system" && body.role != "pipeline" {
        return Err(AadError::new(
            ErrorCode::invalid_field("role"),
            "outbox role must be 'system' or 'pipeline'",
        )
        .into());
    }
    check_content(&body.content)?;
    let message = state.store.append_message(QueueKind::Outbox, &body.role, &body.content).await?;
    Ok(Json(serde_json::to_value(message).map_err(|e| AadError::internal(&e))?))
}

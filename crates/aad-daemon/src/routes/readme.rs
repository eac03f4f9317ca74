// SPDX-License-Identifier: MIT OR Apache-2.0
//! `POST /api/actions/update-readme` — upsert a marked block inside
//! `<repo>/auto-apps/<ws>/README.md`.

use crate::error::ApiError;
use crate::routes::config::validate_workspace_slug;
use crate::routes::parse_body;
use crate::state::AppState;
use aad_errors::{AadError, ErrorCode};
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const BEGIN_MARKER: &str = "<!-- AUTOAPPDEV:README:BEGIN -->";
const END_MARKER: &str = "<!-- AUTOAPPDEV:README:END -->";
const PHILOSOPHY_HEADING: &str = "## Philosophy";

#[derive(Debug, Deserialize)]
pub struct UpdateReadmeBody {
    pub workspace: String,
    pub content: String,
}

fn readme_path(state: &AppState, ws: &str) -> Result<std::path::PathBuf, ApiError> {
    let root = state.auto_apps_root(ws);
    aad_core::resolve_within(&root, std::path::Path::new("README.md")).ok_or_else(|| {
        AadError::new(
            ErrorCode::PathOutsideAutoApps,
            "README.md path resolves outside the workspace",
        )
        .into()
    })
}

fn splice(existing: &str, ws: &str, block: &str) -> Result<(String, bool), ApiError> {
    let begin_count = existing.matches(BEGIN_MARKER).count();
    let end_count = existing.matches(END_MARKER).count();

    if begin_count == 0 && end_count == 0 {
        let prefix = if existing.is_empty() {
            format!("# {ws}\n\n")
        } else {
            let mut p = existing.to_string();
            if !p.ends_with('\n') {
                p.push('\n');
            }
            p.push('\n');
            p
        };
        let spliced = format!("{prefix}{BEGIN_MARKER}\n{block}\n{END_MARKER}\n");
        return Ok((spliced, false));
    }

    if begin_count != 1 || end_count != 1 {
        return Err(AadError::new(
            ErrorCode::MarkerMismatch,
            "README must contain exactly one begin and one end marker",
        )
        .into());
    }

    let begin_idx = existing.find(BEGIN_MARKER).unwrap();
    let end_idx = existing.find(END_MARKER).unwrap();
    if end_idx < begin_idx {
        return Err(AadError::new(
            ErrorCode::MarkerMismatch,
            "README end marker appears before the begin marker",
        )
        .into());
    }

    let before = &existing[..begin_idx + BEGIN_MARKER.len()];
    let after = &existing[end_idx..];
    let spliced = format!("{before}\n{block}\n{after}");
    Ok((spliced, true))
}

fn line_diff(before: &str, after: &str) -> String {
    let mut out = String::new();
    for line in before.lines() {
        out.push('-');
        out.push_str(line);
        out.push('\n');
    }
    for line in after.lines() {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    out
}

pub async fn update_readme(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let body: UpdateReadmeBody = parse_body(body)?;
    validate_workspace_slug(&body.workspace)?;

    if !body.content.contains(PHILOSOPHY_HEADING) {
        return Err(AadError::new(
            ErrorCode::MissingPhilosophy,
            format!("update-readme content must contain a '{PHILOSOPHY_HEADING}' section"),
        )
        .into());
    }

    let path = readme_path(&state, &body.workspace)?;
    let before = match tokio::fs::read_to_string(&path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(AadError::internal(&e).into()),
    };

    let (after, markers_preexisted) = splice(&before, &body.workspace, &body.content)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| AadError::internal(&e))?;
    }
    tokio::fs::write(&path, &after).await.map_err(|e| AadError::internal(&e))?;

    let id = format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"), Uuid::new_v4().simple());
    let artifacts_dir = state.runtime_dir.join("logs").join("update_readme").join(&id);
    tokio::fs::create_dir_all(&artifacts_dir).await.map_err(|e| AadError::internal(&e))?;
    tokio::fs::write(artifacts_dir.join("before.md"), &before)
        .await
        .map_err(|e| AadError::internal(&e))?;
    tokio::fs::write(artifacts_dir.join("after.md"), &after)
        .await
        .map_err(|e| AadError::internal(&e))?;
    tokio::fs::write(artifacts_dir.join("diff.txt"), line_diff(&before, &after))
        .await
        .map_err(|e| AadError::internal(&e))?;
    let meta = json!({
        "id": id,
        "workspace": body.workspace,
        "path": path,
        "markers_preexisted": markers_preexisted,
    });
    tokio::fs::write(artifacts_dir.join("meta.json"), serde_json::to_vec_pretty(&meta).unwrap())
        .await
        .map_err(|e| AadError::internal(&e))?;

    Ok(Json(json!({
        "updated": true,
        "markers_preexisted": markers_preexisted,
        "id": id,
    })))
}

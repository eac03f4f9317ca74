// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-daemon
#![deny(unsafe_code)]
//!
//! The HTTP control-plane binary: wires the state store, pipeline
//! controller, log hub, queue components, and optional LLM-assisted parser
//! behind an axum router, per the external interface table.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use middleware::{localhost_cors_layer, request_id_middleware, request_logger};
use state::AppState;
use std::sync::Arc;

/// Build the full router, with request-id/logging middleware and permissive
/// localhost CORS applied to every route.
#[must_use]
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/version", get(routes::health::version))
        .route(
            "/api/config",
            get(routes::config::get_config).post(routes::config::set_config),
        )
        .route("/api/plan", get(routes::config::get_plan).post(routes::config::set_plan))
        .route(
            "/api/workspaces/{ws}/config",
            get(routes::config::get_workspace_config).post(routes::config::set_workspace_config),
        )
        .route(
            "/api/scripts",
            get(routes::scripts::list_scripts).post(routes::scripts::create_script),
        )
        .route(
            "/api/scripts/{id}",
            get(routes::scripts::get_script)
                .put(routes::scripts::update_script)
                .delete(routes::scripts::delete_script),
        )
        .route("/api/scripts/parse", post(routes::scripts::parse_script))
        .route("/api/scripts/import-shell", post(routes::scripts::import_shell))
        .route("/api/scripts/parse-llm", post(routes::scripts::parse_llm))
        .route(
            "/api/actions",
            get(routes::actions::list_actions).post(routes::actions::create_action),
        )
        .route(
            "/api/actions/{id}",
            get(routes::actions::get_action)
                .put(routes::actions::update_action)
                .delete(routes::actions::delete_action),
        )
        .route("/api/actions/{id}/clone", post(routes::actions::clone_action))
        .route("/api/actions/update-readme", post(routes::readme::update_readme))
        .route(
            "/api/chat",
            get(routes::queues::list_chat).post(routes::queues::post_chat),
        )
        .route(
            "/api/inbox",
            get(routes::queues::list_inbox).post(routes::queues::post_inbox),
        )
        .route(
            "/api/outbox",
            get(routes::queues::list_outbox).post(routes::queues::post_outbox),
        )
        .route("/api/pipeline", get(routes::pipeline::get_pipeline))
        .route("/api/pipeline/status", get(routes::pipeline::pipeline_status))
        .route("/api/pipeline/start", post(routes::pipeline::start))
        .route("/api/pipeline/stop", post(routes::pipeline::stop))
        .route("/api/pipeline/pause", post(routes::pipeline::pause))
        .route("/api/pipeline/resume", post(routes::pipeline::resume))
        .route("/api/logs", get(routes::logs::logs_since))
        .route("/api/logs/tail", get(routes::logs::logs_tail))
        .layer(axum::middleware::from_fn(request_logger))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(localhost_cors_layer())
        .with_state(state)
}

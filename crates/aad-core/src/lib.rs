// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-core
#![deny(unsafe_code)]
//!
//! The data model shared by every component of the AutoAppDev pipeline
//! orchestration subsystem: config, workspace config, pipeline scripts,
//! action definitions, the run journal, the pipeline FSM singleton, message
//! queues, log entries, and the canonical IR.

/// Built-in action id range and other cross-cutting id helpers.
pub mod ids;
/// Guardrails for untrusted JSON payloads (depth/size limits).
pub mod json_guard;

/// Global and workspace configuration records.
pub mod config;
/// Pipeline script records.
pub mod script;
/// Action definition records.
pub mod action;
/// Pipeline run journal and singleton pipeline state.
pub mod run;
/// Chat/inbox/outbox message queue records.
pub mod message;
/// Tailed log entry records.
pub mod log;
/// Canonical intermediate representation (AAPS IR v1).
pub mod ir;
/// Path-containment helpers shared by the action registry and controller.
pub mod paths;

pub use action::{ActionDefinition, ActionKind, ActionSpec};
pub use config::{ConfigEntry, PipelinePlan, PlanStep, WorkspaceConfig};
pub use ids::is_builtin_action_id;
pub use ir::{Action as IrAction, Block, Ir, Step as IrStep, Task as IrTask};
pub use log::{LogEntry, LogSource};
pub use message::{ChatRole, InboxRole, Message, OutboxRole, QueueKind, QueueMessage};
pub use paths::{normalize_lexically, resolve_within};
pub use run::{FsmState, PipelineRun, PipelineState, RunStatus, TsKind};
pub use script::PipelineScript;

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline run journal rows and the singleton pipeline FSM state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single run journal row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The child process is running.
    Running,
    /// The run is paused (sentinel file present).
    Paused,
    /// The run was stopped by an explicit `stop` event.
    Stopped,
    /// The child process exited with a non-zero status.
    Failed,
    /// The child process exited with status zero.
    Completed,
}

impl RunStatus {
    /// Returns `true` if this status is one of the three terminal statuses
    /// (`stopped`, `failed`, `completed`).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Completed)
    }
}

/// An append-only row in the pipeline run journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    /// Row identifier, monotonically increasing.
    pub id: i64,
    /// Current status of this run.
    pub status: RunStatus,
    /// OS pid of the spawned child, once known.
    pub pid: Option<i32>,
    /// Resolved script path passed to `bash`.
    pub script: String,
    /// Working directory the child was spawned in.
    pub cwd: String,
    /// Extra arguments passed to the script.
    pub args: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status, if it has.
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Directive controlling which timestamp column a pipeline-state write
/// touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TsKind {
    /// Update `started_at`.
    Start,
    /// Update `paused_at`.
    Pause,
    /// Update `resumed_at`.
    Resume,
    /// Update `stopped_at`.
    Stop,
}

/// The three FSM states of the singleton pipeline state row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmState {
    /// No child process is running.
    Stopped,
    /// A child process is running and unpaused.
    Running,
    /// A child process is running but paused via the sentinel file.
    Paused,
}

/// The singleton pipeline state row (row id is always `1`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineState {
    /// Current FSM state.
    pub state: FsmState,
    /// OS pid of the tracked child, if any.
    pub pid: Option<i32>,
    /// Id of the current (or most recent) run journal row.
    pub run_id: Option<i64>,
    /// When the current run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the current run was last paused.
    pub paused_at: Option<DateTime<Utc>>,
    /// When the current run was last resumed.
    pub resumed_at: Option<DateTime<Utc>>,
    /// When the current run was last stopped.
    pub stopped_at: Option<DateTime<Utc>>,
    /// When this row was last written.
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    /// The state immediately after construction: stopped, nothing running.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            state: FsmState::Stopped,
            pid: None,
            run_id: None,
            started_at: None,
            paused_at: None,
            resumed_at: None,
            stopped_at: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Stopped.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn fsm_state_snake_case() {
        assert_eq!(
            serde_json::to_string(&FsmState::Paused).unwrap(),
            "\"paused\""
        );
    }

    #[test]
    fn initial_state_is_stopped() {
        let s = PipelineState::initial();
        assert_eq!(s.state, FsmState::Stopped);
        assert!(s.pid.is_none());
        assert!(s.run_id.is_none());
    }
}

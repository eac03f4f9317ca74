// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-controller
#![deny(unsafe_code)]
//!
//! The pipeline controller (C6): a three-state FSM (`stopped`, `running`,
//! `paused`) driving a single child pipeline process. The store is the
//! single source of truth for the current state — every transition re-reads
//! it immediately before deciding whether the requested event is legal, so
//! concurrent start/stop requests race-free through the store rather than
//! through in-memory flags.

use aad_core::{resolve_within, FsmState, PipelineState, RunStatus, TsKind};
use aad_errors::{AadError, ErrorCode};
use aad_store::StateStore;
use anyhow::Context;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

const STOP_SIGTERM_GRACE: Duration = Duration::from_secs(10);
const STOP_SIGKILL_GRACE: Duration = Duration::from_secs(2);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Reaper poll interval, per the controller's concurrency contract.
pub const REAP_INTERVAL: Duration = Duration::from_millis(500);

/// Errors raised by the controller: either a typed, user-facing [`AadError`]
/// (invalid transition, path containment) or an unexpected internal failure
/// (spawn/IO/store) left as `anyhow` for the boundary to wrap as `internal`.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Typed(#[from] AadError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

struct RunningChild {
    child: Child,
    run_id: i64,
}

/// Drives the pipeline FSM: spawn/stop/pause/resume and the exit reaper.
pub struct Controller {
    store: Arc<dyn StateStore>,
    repo_root: PathBuf,
    runtime_dir: PathBuf,
    child: Mutex<Option<RunningChild>>,
}

impl Controller {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, repo_root: PathBuf, runtime_dir: PathBuf) -> Self {
        Self {
            store,
            repo_root,
            runtime_dir,
            child: Mutex::new(None),
        }
    }

    fn pause_sentinel(&self) -> PathBuf {
        self.runtime_dir.join("PAUSE")
    }

    fn pipeline_log_path(&self) -> PathBuf {
        self.runtime_dir.join("logs").join("pipeline.log")
    }

    /// `stopped --start(script,cwd,args)--> running`.
    pub async fn start(
        &self,
        script: &str,
        cwd: &str,
        args: Vec<String>,
    ) -> Result<PipelineState, ControllerError> {
        let state = self.store.get_pipeline_state().await?;
        if state.state != FsmState::Stopped {
            return Err(invalid_transition(state.state, "start").into());
        }

        let script_path = resolve_script_path(&self.repo_root, cwd, script)?;

        let log_path = self.pipeline_log_path();
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create logs directory")?;
        }
        let log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)
            .await
            .context("truncate pipeline.log")?
            .into_std()
            .await;
        let log_file_err = log_file.try_clone().context("clone pipeline.log handle")?;

        let mut cmd = Command::new("/usr/bin/env");
        cmd.arg("bash")
            .arg(&script_path)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .process_group(0);

        let child = cmd.spawn().context("spawn pipeline child")?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("spawned child has no pid"))? as i32;

        let run = self
            .store
            .create_run(pid, script.to_string(), cwd.to_string(), args)
            .await
            .context("create run row")?;

        let new_state = self
            .store
            .set_pipeline_state(TsKind::Start, Some(pid), Some(run.id))
            .await
            .context("record start transition")?;

        *self.child.lock().await = Some(RunningChild { child, run_id: run.id });
        info!(pid, run_id = run.id, "pipeline started");
        Ok(new_state)
    }

    /// `running --pause--> paused`.
    pub async fn pause(&self) -> Result<PipelineState, ControllerError> {
        let state = self.store.get_pipeline_state().await?;
        if state.state != FsmState::Running {
            return Err(invalid_transition(state.state, "pause").into());
        }
        tokio::fs::write(self.pause_sentinel(), b"")
            .await
            .context("create PAUSE sentinel")?;
        Ok(self
            .store
            .set_pipeline_state(TsKind::Pause, state.pid, state.run_id)
            .await
            .context("record pause transition")?)
    }

    /// `paused --resume--> running`.
    pub async fn resume(&self) -> Result<PipelineState, ControllerError> {
        let state = self.store.get_pipeline_state().await?;
        if state.state != FsmState::Paused {
            return Err(invalid_transition(state.state, "resume").into());
        }
        remove_sentinel_best_effort(&self.pause_sentinel()).await;
        Ok(self
            .store
            .set_pipeline_state(TsKind::Resume, state.pid, state.run_id)
            .await
            .context("record resume transition")?)
    }

    /// `running --stop--> stopped`, `paused --stop--> stopped`.
    pub async fn stop(&self) -> Result<PipelineState, ControllerError> {
        let state = self.store.get_pipeline_state().await?;
        if !matches!(state.state, FsmState::Running | FsmState::Paused) {
            return Err(invalid_transition(state.state, "stop").into());
        }
        let pid = state
            .pid
            .ok_or_else(|| anyhow::anyhow!("pipeline state is {:?} with no recorded pid", state.state))?;

        signal_process_group(pid, Signal::SIGTERM)?;
        if !self.wait_for_exit(STOP_SIGTERM_GRACE).await {
            warn!(pid, "pipeline did not exit within SIGTERM grace, sending SIGKILL");
            signal_process_group(pid, Signal::SIGKILL)?;
            self.wait_for_exit(STOP_SIGKILL_GRACE).await;
        }
        self.child.lock().await.take();

        if let Some(run_id) = state.run_id {
            self.store
                .set_run_status(run_id, RunStatus::Stopped)
                .await
                .context("record stopped run status")?;
        }
        remove_sentinel_best_effort(&self.pause_sentinel()).await;

        Ok(self
            .store
            .set_pipeline_state(TsKind::Stop, None, state.run_id)
            .await
            .context("record stop transition")?)
    }

    async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut guard = self.child.lock().await;
                match guard.as_mut() {
                    Some(running) => match running.child.try_wait() {
                        Ok(Some(_status)) => return true,
                        Ok(None) => {}
                        Err(err) => {
                            warn!(%err, "error polling child status while waiting for exit");
                            return true;
                        }
                    },
                    None => return true,
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Poll the tracked child once for a spontaneous exit. If it has exited,
    /// mark the run `completed` (exit code 0) or `failed` (otherwise),
    /// move the singleton back to `stopped`, and clear the in-memory handle.
    /// Returns `true` if a reap occurred.
    pub async fn reap_once(&self) -> anyhow::Result<bool> {
        let exit_status = {
            let mut guard = self.child.lock().await;
            let Some(running) = guard.as_mut() else {
                return Ok(false);
            };
            match running.child.try_wait().context("poll child exit status")? {
                None => return Ok(false),
                Some(status) => {
                    let run_id = running.run_id;
                    (status, run_id)
                }
            }
        };
        let (status, run_id) = exit_status;
        self.child.lock().await.take();

        let terminal = if status.success() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.store
            .set_run_status(run_id, terminal)
            .await
            .context("record terminal run status")?;
        self.store
            .set_pipeline_state(TsKind::Stop, None, Some(run_id))
            .await
            .context("record spontaneous-exit transition")?;
        remove_sentinel_best_effort(&self.pause_sentinel()).await;
        info!(run_id, status = ?terminal, "pipeline exited spontaneously");
        Ok(true)
    }

    /// Spawn the background reaper: polls [`Controller::reap_once`] every
    /// [`REAP_INTERVAL`] until the returned handle is dropped or aborted.
    #[must_use]
    pub fn spawn_reaper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(err) = self.reap_once().await {
                    warn!(%err, "reaper tick failed");
                }
            }
        })
    }
}

fn invalid_transition(state: FsmState, action: &str) -> AadError {
    let from = fsm_state_wire(state);
    AadError::new(
        ErrorCode::InvalidTransition,
        format!("cannot {action} from {from}"),
    )
    .with_detail(format!("{{\"from\":\"{from}\",\"action\":\"{action}\"}}"))
}

fn fsm_state_wire(state: FsmState) -> &'static str {
    match state {
        FsmState::Stopped => "stopped",
        FsmState::Running => "running",
        FsmState::Paused => "paused",
    }
}

fn resolve_script_path(repo_root: &Path, cwd: &str, script: &str) -> Result<PathBuf, AadError> {
    let script_path = Path::new(script);
    let candidate = if script_path.is_absolute() {
        script_path.to_path_buf()
    } else {
        Path::new(cwd).join(script_path)
    };
    resolve_within(repo_root, &candidate).ok_or_else(|| {
        AadError::new(
            ErrorCode::ScriptOutsideRepo,
            format!("script '{script}' resolves outside the repository root"),
        )
    })
}

fn signal_process_group(pid: i32, signal: Signal) -> Result<(), ControllerError> {
    kill(Pid::from_raw(-pid), signal)
        .map_err(|errno| anyhow::anyhow!("signal process group {pid} with {signal}: {errno}"))?;
    Ok(())
}

async fn remove_sentinel_best_effort(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(%err, path = %path.display(), "failed to remove PAUSE sentinel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_script_path_accepts_relative_inside_repo() {
        let repo = Path::new("/repo");
        let resolved = resolve_script_path(repo, "sub", "run.sh").unwrap();
        assert_eq!(resolved, Path::new("/repo/sub/run.sh"));
    }

    #[test]
    fn resolve_script_path_rejects_escape() {
        let repo = Path::new("/repo");
        let err = resolve_script_path(repo, ".", "../escape.sh").unwrap_err();
        assert_eq!(err.code, ErrorCode::ScriptOutsideRepo);
    }

    #[test]
    fn resolve_script_path_accepts_absolute_inside_repo() {
        let repo = Path::new("/repo");
        let resolved = resolve_script_path(repo, "ignored", "/repo/run.sh").unwrap();
        assert_eq!(resolved, Path::new("/repo/run.sh"));
    }

    #[test]
    fn resolve_script_path_rejects_absolute_outside_repo() {
        let repo = Path::new("/repo");
        let err = resolve_script_path(repo, "ignored", "/etc/run.sh").unwrap_err();
        assert_eq!(err.code, ErrorCode::ScriptOutsideRepo);
    }

    #[test]
    fn invalid_transition_detail_carries_from_and_action() {
        let err = invalid_transition(FsmState::Running, "start");
        assert_eq!(err.code, ErrorCode::InvalidTransition);
        let detail = err.detail.unwrap();
        assert!(detail.contains("\"from\":\"running\""));
        assert!(detail.contains("\"action\":\"start\""));
    }

    fn controller(tmp: &std::path::Path) -> Controller {
        let store: Arc<dyn StateStore> = Arc::new(aad_store::file::FileStore::new(tmp.join("state.json")));
        Controller::new(store, tmp.to_path_buf(), tmp.to_path_buf())
    }

    async fn write_script(tmp: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = tmp.join(name);
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn start_rejects_when_already_running() {
        let tmp = tempfile::tempdir().unwrap();
        let ctrl = controller(tmp.path());
        write_script(tmp.path(), "run.sh", "#!/usr/bin/env bash\nsleep 5\n").await;

        ctrl.start("run.sh", tmp.path().to_str().unwrap(), vec![]).await.unwrap();
        let err = ctrl.start("run.sh", tmp.path().to_str().unwrap(), vec![]).await.unwrap_err();
        match err {
            ControllerError::Typed(e) => assert_eq!(e.code, ErrorCode::InvalidTransition),
            ControllerError::Internal(e) => panic!("expected typed error, got internal: {e}"),
        }
        ctrl.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reap_once_marks_completed_on_zero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let ctrl = controller(tmp.path());
        write_script(tmp.path(), "run.sh", "#!/usr/bin/env bash\nexit 0\n").await;

        let state = ctrl.start("run.sh", tmp.path().to_str().unwrap(), vec![]).await.unwrap();
        assert_eq!(state.state, FsmState::Running);

        let mut reaped = false;
        for _ in 0..50 {
            if ctrl.reap_once().await.unwrap() {
                reaped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(reaped, "expected the short-lived child to be reaped");

        let final_state = ctrl.store.get_pipeline_state().await.unwrap();
        assert_eq!(final_state.state, FsmState::Stopped);
    }

    #[tokio::test]
    async fn pause_then_resume_toggles_sentinel_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ctrl = controller(tmp.path());
        write_script(tmp.path(), "run.sh", "#!/usr/bin/env bash\nsleep 5\n").await;
        ctrl.start("run.sh", tmp.path().to_str().unwrap(), vec![]).await.unwrap();

        ctrl.pause().await.unwrap();
        assert!(ctrl.pause_sentinel().exists());

        ctrl.resume().await.unwrap();
        assert!(!ctrl.pause_sentinel().exists());

        ctrl.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_signals_and_reaps_a_sleeping_child() {
        let tmp = tempfile::tempdir().unwrap();
        let ctrl = controller(tmp.path());
        write_script(tmp.path(), "run.sh", "#!/usr/bin/env bash\ntrap 'exit 0' TERM\nsleep 30\n").await;
        ctrl.start("run.sh", tmp.path().to_str().unwrap(), vec![]).await.unwrap();

        let state = ctrl.stop().await.unwrap();
        assert_eq!(state.state, FsmState::Stopped);

        let run = ctrl.store.latest_run().await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Stopped);
    }
}

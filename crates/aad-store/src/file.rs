// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-file fallback backend: a single document read whole on every
//! accessor and written whole via a `.tmp` + atomic rename, used only when
//! no database URL is configured.

use crate::{ActionUpdate, ScriptUpdate, StateStore, LIST_CAP};
use aad_core::{
    ActionDefinition, ActionKind, ActionSpec, FsmState, PipelineRun, PipelineScript,
    PipelineState, QueueKind, QueueMessage, RunStatus, TsKind, WorkspaceConfig,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    config: BTreeMap<String, Value>,
    #[serde(default)]
    workspace_configs: BTreeMap<String, WorkspaceConfig>,
    #[serde(default)]
    scripts: Vec<PipelineScript>,
    #[serde(default)]
    next_script_id: i64,
    #[serde(default)]
    actions: Vec<ActionDefinition>,
    #[serde(default)]
    next_action_id: i64,
    #[serde(default)]
    chat_messages: Vec<QueueMessage>,
    #[serde(default)]
    inbox_messages: Vec<QueueMessage>,
    #[serde(default)]
    outbox_messages: Vec<QueueMessage>,
    #[serde(default)]
    next_message_id: i64,
    #[serde(default)]
    runs: Vec<PipelineRun>,
    #[serde(default)]
    next_run_id: i64,
    #[serde(default)]
    pipeline_state: Option<PipelineState>,
}

impl Document {
    fn messages_mut(&mut self, queue: QueueKind) -> &mut Vec<QueueMessage> {
        match queue {
            QueueKind::Chat => &mut self.chat_messages,
            QueueKind::Inbox => &mut self.inbox_messages,
            QueueKind::Outbox => &mut self.outbox_messages,
        }
    }

    fn messages(&self, queue: QueueKind) -> &Vec<QueueMessage> {
        match queue {
            QueueKind::Chat => &self.chat_messages,
            QueueKind::Inbox => &self.inbox_messages,
            QueueKind::Outbox => &self.outbox_messages,
        }
    }
}

/// Single-document JSON state store at `<runtime>/state.json`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Create a store rooted at `path` (typically `<runtime>/state.json`).
    /// Does not touch disk until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_doc(&self) -> Result<Document> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(Document::default());
                }
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("parse state document {}", self.path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::default()),
            Err(e) => Err(e).with_context(|| format!("read state document {}", self.path.display())),
        }
    }

    async fn write_doc(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create state dir {}", parent.display()))?;
        }
        let tmp_path = tmp_path_for(&self.path);
        let json = serde_json::to_vec_pretty(doc).context("serialize state document")?;
        tokio::fs::write(&tmp_path, &json)
            .await
            .with_context(|| format!("write temp state file {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("rename temp state file into {}", self.path.display()))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[async_trait]
impl StateStore for FileStore {
    async fn get_config(&self, key: &str) -> Result<Option<Value>> {
        let doc = self.read_doc().await?;
        Ok(doc.config.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        doc.config.insert(key.to_string(), value);
        self.write_doc(&doc).await
    }

    async fn get_workspace_config(&self, workspace: &str) -> Result<Option<WorkspaceConfig>> {
        let doc = self.read_doc().await?;
        Ok(doc.workspace_configs.get(workspace).cloned())
    }

    async fn upsert_workspace_config(&self, workspace: &str, config: WorkspaceConfig) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        doc.workspace_configs.insert(workspace.to_string(), config);
        self.write_doc(&doc).await
    }

    async fn create_script(
        &self,
        title: String,
        script_text: String,
        script_format: String,
    ) -> Result<PipelineScript> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        doc.next_script_id += 1;
        let now = Utc::now();
        let script = PipelineScript {
            id: doc.next_script_id,
            title,
            script_text,
            script_version: 1,
            script_format,
            ir: None,
            created_at: now,
            updated_at: now,
        };
        doc.scripts.push(script.clone());
        if doc.scripts.len() > LIST_CAP {
            let overflow = doc.scripts.len() - LIST_CAP;
            doc.scripts.drain(0..overflow);
        }
        self.write_doc(&doc).await?;
        Ok(script)
    }

    async fn list_scripts(&self, limit: usize) -> Result<Vec<PipelineScript>> {
        let doc = self.read_doc().await?;
        let mut scripts = doc.scripts;
        scripts.sort_by(|a, b| b.id.cmp(&a.id));
        scripts.truncate(limit);
        Ok(scripts)
    }

    async fn get_script(&self, id: i64) -> Result<Option<PipelineScript>> {
        let doc = self.read_doc().await?;
        Ok(doc.scripts.into_iter().find(|s| s.id == id))
    }

    async fn update_script(&self, id: i64, update: ScriptUpdate) -> Result<Option<PipelineScript>> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let Some(script) = doc.scripts.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        if let Some(title) = update.title {
            script.title = title;
        }
        if let Some(text) = update.script_text {
            script.script_text = text;
            script.script_version += 1;
        }
        if let Some(ir) = update.ir {
            script.ir = Some(ir);
        }
        script.updated_at = Utc::now();
        let result = script.clone();
        self.write_doc(&doc).await?;
        Ok(Some(result))
    }

    async fn delete_script(&self, id: i64) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let before = doc.scripts.len();
        doc.scripts.retain(|s| s.id != id);
        let removed = doc.scripts.len() != before;
        if removed {
            self.write_doc(&doc).await?;
        }
        Ok(removed)
    }

    async fn create_action(&self, title: String, kind: ActionKind, spec: ActionSpec) -> Result<ActionDefinition> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        doc.next_action_id += 1;
        let now = Utc::now();
        let action = ActionDefinition {
            id: doc.next_action_id,
            title,
            kind,
            spec,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        doc.actions.push(action.clone());
        self.write_doc(&doc).await?;
        Ok(action)
    }

    async fn list_actions(&self) -> Result<Vec<ActionDefinition>> {
        let doc = self.read_doc().await?;
        Ok(doc.actions)
    }

    async fn get_action(&self, id: i64) -> Result<Option<ActionDefinition>> {
        let doc = self.read_doc().await?;
        Ok(doc.actions.into_iter().find(|a| a.id == id))
    }

    async fn update_action(&self, id: i64, update: ActionUpdate) -> Result<Option<ActionDefinition>> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let Some(action) = doc.actions.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        if let Some(title) = update.title {
            action.title = title;
        }
        if let Some(spec) = update.spec {
            action.spec = spec;
        }
        if let Some(enabled) = update.enabled {
            action.enabled = enabled;
        }
        action.updated_at = Utc::now();
        let result = action.clone();
        self.write_doc(&doc).await?;
        Ok(Some(result))
    }

    async fn delete_action(&self, id: i64) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let before = doc.actions.len();
        doc.actions.retain(|a| a.id != id);
        let removed = doc.actions.len() != before;
        if removed {
            self.write_doc(&doc).await?;
        }
        Ok(removed)
    }

    async fn append_message(&self, queue: QueueKind, role: &str, content: &str) -> Result<QueueMessage> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        doc.next_message_id += 1;
        let msg = QueueMessage {
            id: doc.next_message_id,
            role: role.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let list = doc.messages_mut(queue);
        list.push(msg.clone());
        if list.len() > LIST_CAP {
            let overflow = list.len() - LIST_CAP;
            list.drain(0..overflow);
        }
        self.write_doc(&doc).await?;
        Ok(msg)
    }

    async fn list_messages(&self, queue: QueueKind, limit: usize) -> Result<Vec<QueueMessage>> {
        let doc = self.read_doc().await?;
        let mut list = doc.messages(queue).clone();
        list.sort_by(|a, b| b.id.cmp(&a.id));
        list.truncate(limit);
        Ok(list)
    }

    async fn create_run(&self, pid: i32, script: String, cwd: String, args: Vec<String>) -> Result<PipelineRun> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        doc.next_run_id += 1;
        let run = PipelineRun {
            id: doc.next_run_id,
            status: RunStatus::Running,
            pid: Some(pid),
            script,
            cwd,
            args,
            started_at: Utc::now(),
            stopped_at: None,
        };
        doc.runs.push(run.clone());
        if doc.runs.len() > LIST_CAP {
            let overflow = doc.runs.len() - LIST_CAP;
            doc.runs.drain(0..overflow);
        }
        self.write_doc(&doc).await?;
        Ok(run)
    }

    async fn set_run_status(&self, run_id: i64, status: RunStatus) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let Some(run) = doc.runs.iter_mut().find(|r| r.id == run_id) else {
            anyhow::bail!("no such run {run_id}");
        };
        run.status = status;
        if status.is_terminal() {
            run.stopped_at = Some(Utc::now());
        }
        self.write_doc(&doc).await
    }

    async fn latest_run(&self) -> Result<Option<PipelineRun>> {
        let doc = self.read_doc().await?;
        Ok(doc.runs.into_iter().max_by_key(|r| r.id))
    }

    async fn get_pipeline_state(&self) -> Result<PipelineState> {
        let doc = self.read_doc().await?;
        Ok(doc.pipeline_state.unwrap_or_else(PipelineState::initial))
    }

    async fn set_pipeline_state(
        &self,
        ts_kind: TsKind,
        pid: Option<i32>,
        run_id: Option<i64>,
    ) -> Result<PipelineState> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let mut state = doc.pipeline_state.take().unwrap_or_else(PipelineState::initial);
        let now = Utc::now();
        match ts_kind {
            TsKind::Start => {
                state.state = FsmState::Running;
                state.pid = pid;
                state.run_id = run_id;
                state.started_at = Some(now);
            }
            TsKind::Pause => {
                state.state = FsmState::Paused;
                state.paused_at = Some(now);
            }
            TsKind::Resume => {
                state.state = FsmState::Running;
                state.resumed_at = Some(now);
            }
            TsKind::Stop => {
                state.state = FsmState::Stopped;
                state.pid = None;
                state.stopped_at = Some(now);
            }
        }
        state.updated_at = now;
        doc.pipeline_state = Some(state.clone());
        self.write_doc(&doc).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn store() -> (FileStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state.json"));
        (store, dir)
    }

    #[tokio::test]
    async fn config_roundtrip() {
        let (store, _dir) = store();
        assert!(store.get_config("k").await.unwrap().is_none());
        store.set_config("k", serde_json::json!({"v": 1})).await.unwrap();
        assert_eq!(store.get_config("k").await.unwrap(), Some(serde_json::json!({"v": 1})));
    }

    #[tokio::test]
    async fn script_crud_round_trips() {
        let (store, _dir) = store();
        let script = store
            .create_script("T".into(), "AUTOAPPDEV_PIPELINE 1\n".into(), "aaps".into())
            .await
            .unwrap();
        assert_eq!(script.script_version, 1);

        let fetched = store.get_script(script.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "T");

        let updated = store
            .update_script(
                script.id,
                ScriptUpdate {
                    script_text: Some("AUTOAPPDEV_PIPELINE 1\nTASK {}\n".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.script_version, 2);

        assert!(store.delete_script(script.id).await.unwrap());
        assert!(store.get_script(script.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_scripts_is_newest_first_and_capped() {
        let (store, _dir) = store();
        for i in 0..5 {
            store
                .create_script(format!("s{i}"), "AUTOAPPDEV_PIPELINE 1\n".into(), "aaps".into())
                .await
                .unwrap();
        }
        let listed = store.list_scripts(3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].id > listed[1].id);
    }

    #[tokio::test]
    async fn action_is_readonly_builtin_unaffected_by_delete_of_user_action() {
        let (store, _dir) = store();
        let action = store
            .create_action("A".into(), ActionKind::Prompt, Default::default())
            .await
            .unwrap();
        assert!(action.id < aad_core::ids::BUILTIN_ACTION_ID_FLOOR);
        assert!(store.delete_action(action.id).await.unwrap());
    }

    #[tokio::test]
    async fn append_message_assigns_increasing_ids() {
        let (store, _dir) = store();
        let a = store.append_message(QueueKind::Chat, "user", "hi").await.unwrap();
        let b = store.append_message(QueueKind::Chat, "user", "there").await.unwrap();
        assert!(b.id > a.id);
        let listed = store.list_messages(QueueKind::Chat, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
    }

    #[tokio::test]
    async fn run_lifecycle_sets_stopped_at_on_terminal_status() {
        let (store, _dir) = store();
        let run = store
            .create_run(123, "run.sh".into(), ".".into(), vec![])
            .await
            .unwrap();
        assert!(run.stopped_at.is_none());
        store.set_run_status(run.id, RunStatus::Completed).await.unwrap();
        let latest = store.latest_run().await.unwrap().unwrap();
        assert_eq!(latest.status, RunStatus::Completed);
        assert!(latest.stopped_at.is_some());
    }

    #[tokio::test]
    async fn pipeline_state_transitions_update_expected_timestamps() {
        let (store, _dir) = store();
        let state = store.set_pipeline_state(TsKind::Start, Some(42), Some(1)).await.unwrap();
        assert_eq!(state.state, FsmState::Running);
        assert!(state.started_at.is_some());

        let state = store.set_pipeline_state(TsKind::Pause, None, None).await.unwrap();
        assert_eq!(state.state, FsmState::Paused);
        assert!(state.paused_at.is_some());
        // pid/run_id survive a pause transition untouched
        assert_eq!(state.pid, Some(42));
    }

    #[tokio::test]
    async fn state_persists_across_store_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let store = FileStore::new(&path);
            store.set_config("k", serde_json::json!(1)).await.unwrap();
        }
        let store = FileStore::new(&path);
        assert_eq!(store.get_config("k").await.unwrap(), Some(serde_json::json!(1)));
    }
}

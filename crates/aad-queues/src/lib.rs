// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-queues
#![deny(unsafe_code)]
//!
//! The outbox ingester and inbox emitter (C8): the filesystem half of the
//! chat/inbox/outbox queues. Inbox emission writes a file after the
//! message row is persisted, so a reader that sees the file can trust the
//! DB row already exists. Outbox ingestion writes the DB row before
//! moving the source file, so a crash between the two steps produces at
//! most a duplicate DB row on the next boot, never data loss.

use aad_core::message::MAX_CONTENT_LEN;
use aad_core::QueueKind;
use aad_store::StateStore;
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Outbox ingester poll interval.
pub const INGEST_INTERVAL: std::time::Duration = std::time::Duration::from_millis(750);
/// Maximum files processed per ingester tick.
pub const MAX_FILES_PER_TICK: usize = 50;

fn role_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+_([A-Za-z0-9-]+)\.").expect("static regex is valid"))
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn clip(content: &str) -> String {
    content.trim().chars().take(MAX_CONTENT_LEN).collect()
}

/// Writes one file per inbox/chat POST, each named with a monotonic
/// wall-clock millisecond count so concurrent emissions within the same
/// process never collide.
pub struct InboxEmitter {
    runtime_dir: PathBuf,
    last_ms: tokio::sync::Mutex<u64>,
}

impl InboxEmitter {
    #[must_use]
    pub fn new(runtime_dir: PathBuf) -> Self {
        Self {
            runtime_dir,
            last_ms: tokio::sync::Mutex::new(0),
        }
    }

    fn inbox_dir(&self) -> PathBuf {
        self.runtime_dir.join("inbox")
    }

    async fn next_ms(&self) -> u64 {
        let mut guard = self.last_ms.lock().await;
        let ms = current_millis().max(*guard + 1);
        *guard = ms;
        ms
    }

    /// Write `<runtime>/inbox/<ms>_user.md` with `content`, trimmed and
    /// clipped to [`MAX_CONTENT_LEN`]. Call only after the message row has
    /// already been persisted.
    pub async fn emit(&self, content: &str) -> Result<PathBuf> {
        let dir = self.inbox_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create inbox directory {}", dir.display()))?;
        let ms = self.next_ms().await;
        let path = dir.join(format!("{ms}_user.md"));
        tokio::fs::write(&path, clip(content))
            .await
            .with_context(|| format!("write inbox file {}", path.display()))?;
        Ok(path)
    }
}

/// Cooperative single-flight poller that drains `<runtime>/outbox/` into
/// the outbox message queue.
pub struct OutboxIngester {
    store: Arc<dyn StateStore>,
    runtime_dir: PathBuf,
    in_flight: AtomicBool,
    ingest_errors: AtomicU64,
}

impl OutboxIngester {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, runtime_dir: PathBuf) -> Self {
        Self {
            store,
            runtime_dir,
            in_flight: AtomicBool::new(false),
            ingest_errors: AtomicU64::new(0),
        }
    }

    fn outbox_dir(&self) -> PathBuf {
        self.runtime_dir.join("outbox")
    }

    fn processed_dir(&self) -> PathBuf {
        self.outbox_dir().join("processed")
    }

    /// Count of file-move fallback deletes since startup, surfaced via
    /// `/api/health`.
    #[must_use]
    pub fn ingest_errors(&self) -> u64 {
        self.ingest_errors.load(Ordering::Relaxed)
    }

    /// One ingestion pass. Returns `0` without doing any work if a prior
    /// call is still in flight. Otherwise processes up to
    /// [`MAX_FILES_PER_TICK`] eligible files and returns how many were
    /// ingested (including files whose content was empty and thus
    /// skipped, but still moved aside).
    pub async fn tick(&self) -> usize {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let processed = self.tick_inner().await;
        self.in_flight.store(false, Ordering::Release);
        processed
    }

    async fn tick_inner(&self) -> usize {
        let dir = self.outbox_dir();
        let mut names = match list_eligible_files(&dir).await {
            Ok(names) => names,
            Err(err) => {
                let not_found = err
                    .chain()
                    .filter_map(|e| e.downcast_ref::<std::io::Error>())
                    .any(|e| e.kind() == std::io::ErrorKind::NotFound);
                if !not_found {
                    warn!(%err, dir = %dir.display(), "failed to list outbox directory");
                }
                return 0;
            }
        };
        names.sort();
        names.truncate(MAX_FILES_PER_TICK);

        let mut processed = 0;
        for name in names {
            match self.process_one(&dir, &name).await {
                Ok(()) => processed += 1,
                Err(err) => {
                    warn!(%err, file = %name, "failed to ingest outbox file");
                    self.ingest_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        processed
    }

    async fn process_one(&self, dir: &Path, name: &str) -> Result<()> {
        let path = dir.join(name);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("read outbox file {}", path.display()))?;
        let content = String::from_utf8_lossy(&bytes);
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            let role = infer_role(name);
            self.store
                .append_message(QueueKind::Outbox, outbox_role_wire(role), &clip(trimmed))
                .await
                .with_context(|| format!("persist outbox message from {name}"))?;
        }
        self.move_to_processed(&path, name).await
    }

    async fn move_to_processed(&self, path: &Path, name: &str) -> Result<()> {
        let processed_dir = self.processed_dir();
        tokio::fs::create_dir_all(&processed_dir)
            .await
            .with_context(|| format!("create {}", processed_dir.display()))?;

        let mut dest = processed_dir.join(name);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            dest = processed_dir.join(collision_name(name, current_millis()));
        }

        match tokio::fs::rename(path, &dest).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(%err, file = %name, "move to processed/ failed, deleting as a best-effort fallback");
                tokio::fs::remove_file(path)
                    .await
                    .with_context(|| format!("best-effort delete of {}", path.display()))?;
                self.ingest_errors.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Spawn a background task calling [`OutboxIngester::tick`] every
    /// [`INGEST_INTERVAL`] until the returned handle is dropped or
    /// aborted.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(INGEST_INTERVAL);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }
}

async fn list_eligible_files(dir: &Path) -> Result<Vec<String>> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("read_dir {}", dir.display()))?;
    let mut names = Vec::new();
    while let Some(entry) = reader.next_entry().await.context("read_dir entry")? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if !(name.ends_with(".md") || name.ends_with(".txt")) {
            continue;
        }
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        names.push(name);
    }
    Ok(names)
}

fn infer_role(filename: &str) -> aad_core::OutboxRole {
    let capture = role_re()
        .captures(filename)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    match capture {
        Some(c) => aad_core::OutboxRole::from_filename_capture(c),
        None => aad_core::OutboxRole::Pipeline,
    }
}

fn outbox_role_wire(role: aad_core::OutboxRole) -> &'static str {
    match role {
        aad_core::OutboxRole::System => "system",
        aad_core::OutboxRole::Pipeline => "pipeline",
    }
}

fn collision_name(name: &str, ms: u64) -> String {
    match name.rfind('.') {
        Some(idx) => format!("{}_{ms}{}", &name[..idx], &name[idx..]),
        None => format!("{name}_{ms}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aad_store::file::FileStore;

    fn store(tmp: &Path) -> Arc<dyn StateStore> {
        Arc::new(FileStore::new(tmp.join("state.json")))
    }

    #[test]
    fn infer_role_accepts_system_and_pipeline() {
        assert_eq!(infer_role("1700000000_system.md"), aad_core::OutboxRole::System);
        assert_eq!(infer_role("1700000000_pipeline.md"), aad_core::OutboxRole::Pipeline);
    }

    #[test]
    fn infer_role_folds_unknown_capture_to_pipeline() {
        assert_eq!(infer_role("1700000000_weirdo.md"), aad_core::OutboxRole::Pipeline);
    }

    #[test]
    fn infer_role_without_match_defaults_to_pipeline() {
        assert_eq!(infer_role("no-prefix-here.md"), aad_core::OutboxRole::Pipeline);
    }

    #[test]
    fn collision_name_inserts_before_suffix() {
        assert_eq!(collision_name("1700000000_pipeline.md", 42), "1700000000_pipeline_42.md");
    }

    #[test]
    fn collision_name_without_suffix_appends() {
        assert_eq!(collision_name("noext", 42), "noext_42");
    }

    #[tokio::test]
    async fn emit_writes_trimmed_clipped_file_under_inbox() {
        let tmp = tempfile::tempdir().unwrap();
        let emitter = InboxEmitter::new(tmp.path().to_path_buf());
        let path = emitter.emit("  hello world  ").await.unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_user.md"));
        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(body, "hello world");
    }

    #[tokio::test]
    async fn emit_assigns_strictly_increasing_ms_even_when_called_rapidly() {
        let tmp = tempfile::tempdir().unwrap();
        let emitter = InboxEmitter::new(tmp.path().to_path_buf());
        let p1 = emitter.emit("a").await.unwrap();
        let p2 = emitter.emit("b").await.unwrap();
        assert_ne!(p1, p2);
    }

    #[tokio::test]
    async fn tick_ingests_eligible_files_and_moves_them_to_processed() {
        let tmp = tempfile::tempdir().unwrap();
        let outbox = tmp.path().join("outbox");
        tokio::fs::create_dir_all(&outbox).await.unwrap();
        tokio::fs::write(outbox.join("1700000000_pipeline.md"), "done").await.unwrap();
        tokio::fs::write(outbox.join("1700000001_system.txt"), "sys message").await.unwrap();
        tokio::fs::write(outbox.join(".hidden.md"), "ignored").await.unwrap();
        tokio::fs::write(outbox.join("ignored.json"), "ignored").await.unwrap();

        let st = store(tmp.path());
        let ingester = OutboxIngester::new(st.clone(), tmp.path().to_path_buf());
        let processed = ingester.tick().await;
        assert_eq!(processed, 2);

        assert!(outbox.join("processed").join("1700000000_pipeline.md").exists());
        assert!(outbox.join("processed").join("1700000001_system.txt").exists());
        assert!(outbox.join(".hidden.md").exists());
        assert!(outbox.join("ignored.json").exists());

        let messages = st.list_messages(QueueKind::Outbox, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.role == "pipeline" && m.content == "done"));
        assert!(messages.iter().any(|m| m.role == "system" && m.content == "sys message"));
    }

    #[tokio::test]
    async fn tick_skips_empty_content_but_still_moves_file() {
        let tmp = tempfile::tempdir().unwrap();
        let outbox = tmp.path().join("outbox");
        tokio::fs::create_dir_all(&outbox).await.unwrap();
        tokio::fs::write(outbox.join("1700000000_pipeline.md"), "   \n  ").await.unwrap();

        let st = store(tmp.path());
        let ingester = OutboxIngester::new(st.clone(), tmp.path().to_path_buf());
        ingester.tick().await;

        assert!(outbox.join("processed").join("1700000000_pipeline.md").exists());
        let messages = st.list_messages(QueueKind::Outbox, 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn tick_appends_ms_suffix_on_filename_collision() {
        let tmp = tempfile::tempdir().unwrap();
        let outbox = tmp.path().join("outbox");
        let processed = outbox.join("processed");
        tokio::fs::create_dir_all(&processed).await.unwrap();
        tokio::fs::write(processed.join("1700000000_pipeline.md"), "existing").await.unwrap();
        tokio::fs::write(outbox.join("1700000000_pipeline.md"), "new content").await.unwrap();

        let st = store(tmp.path());
        let ingester = OutboxIngester::new(st.clone(), tmp.path().to_path_buf());
        ingester.tick().await;

        assert!(!outbox.join("1700000000_pipeline.md").exists());

        let mut names = Vec::new();
        let mut reader = tokio::fs::read_dir(&processed).await.unwrap();
        while let Some(entry) = reader.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        // the pre-existing file is untouched; the newly moved file got a
        // collision-avoiding `_<ms>` suffix instead of overwriting it.
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"1700000000_pipeline.md".to_string()));
        assert!(names.iter().any(|n| n != "1700000000_pipeline.md"));
        let existing = tokio::fs::read_to_string(processed.join("1700000000_pipeline.md"))
            .await
            .unwrap();
        assert_eq!(existing, "existing");
    }

    #[tokio::test]
    async fn concurrent_ticks_are_single_flight() {
        let tmp = tempfile::tempdir().unwrap();
        let outbox = tmp.path().join("outbox");
        tokio::fs::create_dir_all(&outbox).await.unwrap();
        for i in 0..5 {
            tokio::fs::write(outbox.join(format!("170000000{i}_pipeline.md")), "x")
                .await
                .unwrap();
        }
        let st = store(tmp.path());
        let ingester = Arc::new(OutboxIngester::new(st, tmp.path().to_path_buf()));

        let a = ingester.clone();
        let b = ingester.clone();
        let (ra, rb) = tokio::join!(
            async move { a.tick().await },
            async move { b.tick().await }
        );
        // exactly one of the two concurrent ticks does the work; the other
        // observes in_flight and returns immediately with 0.
        assert_eq!(ra + rb, 5);
    }
}

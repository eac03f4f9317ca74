// SPDX-License-Identifier: MIT OR Apache-2.0
//! aad-logs
#![deny(unsafe_code)]
//!
//! The log tailer and bounded ring buffer (C7). Two named tailers
//! (`pipeline`, `backend`) each track a byte offset and a partial-line
//! buffer into their source file; every ~500ms tick reads new bytes,
//! reassembles complete lines, and appends them to a shared ring buffer
//! with a fresh monotonic id. The since-id query serves the UI a
//! resumable, strictly-increasing cursor over the buffer.

use aad_core::{LogEntry, LogSource};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::warn;

/// Default/minimum ring buffer capacity.
pub const DEFAULT_CAPACITY: usize = 2000;
pub const MIN_CAPACITY: usize = 100;

/// Tailer poll interval.
pub const TAIL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// Tracks a single tailed file's read position and any trailing partial
/// line carried over from the previous tick.
#[derive(Debug)]
struct Tailer {
    path: PathBuf,
    source: LogSource,
    offset: u64,
    partial: String,
}

impl Tailer {
    fn new(path: PathBuf, source: LogSource) -> Self {
        Self {
            path,
            source,
            offset: 0,
            partial: String::new(),
        }
    }

    /// Read any new bytes since the last tick and return complete lines,
    /// in order. Handles truncation/rotation by resetting the offset.
    async fn tick(&mut self) -> Result<Vec<String>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("stat {}", self.path.display())),
        };

        let size = metadata.len();
        if size < self.offset {
            self.offset = 0;
            self.partial.clear();
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("open {}", self.path.display()))?;
        file.seek(std::io::SeekFrom::Start(self.offset))
            .await
            .with_context(|| format!("seek {}", self.path.display()))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .with_context(|| format!("read {}", self.path.display()))?;
        self.offset += buf.len() as u64;

        let decoded = String::from_utf8_lossy(&buf);
        let combined = if self.partial.is_empty() {
            decoded.into_owned()
        } else {
            let mut s = std::mem::take(&mut self.partial);
            s.push_str(&decoded);
            s
        };

        let mut lines = Vec::new();
        let mut rest = combined.as_str();
        loop {
            match rest.find('\n') {
                Some(idx) => {
                    let line = &rest[..idx];
                    let line = line.strip_suffix('\r').unwrap_or(line);
                    lines.push(line.to_string());
                    rest = &rest[idx + 1..];
                }
                None => {
                    self.partial = rest.to_string();
                    break;
                }
            }
        }
        Ok(lines)
    }
}

/// Bounded, append-only ring buffer of [`LogEntry`] with a monotonic id
/// cursor.
#[derive(Debug)]
struct RingBuffer {
    capacity: usize,
    next_id: u64,
    entries: VecDeque<LogEntry>,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(MIN_CAPACITY),
            next_id: 1,
            entries: VecDeque::new(),
        }
    }

    fn push(&mut self, source: LogSource, line: String) {
        let entry = LogEntry {
            id: self.next_id,
            ts: Utc::now(),
            source,
            line,
        };
        self.next_id += 1;
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Ascending entries with `id > since`, optionally filtered by
    /// `source`, clamped to `limit`. Returns `(entries, next)` where
    /// `next` is the max returned id, or `since` if nothing matched.
    fn query(&self, since: u64, source: Option<LogSource>, limit: usize) -> (Vec<LogEntry>, u64) {
        let limit = limit.clamp(1, MIN_CAPACITY.max(DEFAULT_CAPACITY));
        let matched: Vec<LogEntry> = self
            .entries
            .iter()
            .filter(|e| e.id > since)
            .filter(|e| source.is_none_or(|s| e.source == s))
            .take(limit)
            .cloned()
            .collect();
        let next = matched.last().map_or(since, |e| e.id);
        (matched, next)
    }

    /// Last `n` entries for the given source, oldest-first.
    fn tail(&self, source: LogSource, n: usize) -> Vec<LogEntry> {
        let mut out: Vec<LogEntry> = self
            .entries
            .iter()
            .rev()
            .filter(|e| e.source == source)
            .take(n)
            .cloned()
            .collect();
        out.reverse();
        out
    }
}

/// Owns both named tailers and the shared ring buffer; `tick()` drives
/// one poll of each tailer and is meant to be called every
/// [`TAIL_INTERVAL`] from a background task.
pub struct LogHub {
    pipeline: Mutex<Tailer>,
    backend: Mutex<Tailer>,
    buffer: Mutex<RingBuffer>,
}

impl LogHub {
    #[must_use]
    pub fn new(pipeline_log: PathBuf, backend_log: PathBuf, capacity: usize) -> Self {
        Self {
            pipeline: Mutex::new(Tailer::new(pipeline_log, LogSource::Pipeline)),
            backend: Mutex::new(Tailer::new(backend_log, LogSource::Backend)),
            buffer: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    /// One poll of both tailers, appending any newly-complete lines.
    pub async fn tick(&self) {
        self.tick_one(&self.pipeline).await;
        self.tick_one(&self.backend).await;
    }

    async fn tick_one(&self, tailer: &Mutex<Tailer>) {
        let (source, lines) = {
            let mut t = tailer.lock().await;
            match t.tick().await {
                Ok(lines) => (t.source, lines),
                Err(err) => {
                    warn!(%err, path = %t.path.display(), "log tailer tick failed");
                    return;
                }
            }
        };
        if lines.is_empty() {
            return;
        }
        let mut buf = self.buffer.lock().await;
        for line in lines {
            buf.push(source, line);
        }
    }

    /// Spawn a background task that calls [`LogHub::tick`] every
    /// [`TAIL_INTERVAL`] until the returned handle is dropped or aborted.
    #[must_use]
    pub fn spawn(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TAIL_INTERVAL);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    /// The since-id cursor query used by `GET /api/logs`.
    pub async fn since(&self, since: u64, source: Option<LogSource>, limit: usize) -> (Vec<LogEntry>, u64) {
        self.buffer.lock().await.query(since, source, limit)
    }

    /// Last-N tail for a single named source, used by `GET /api/logs/tail`.
    pub async fn tail(&self, source: LogSource, n: usize) -> Vec<LogEntry> {
        self.buffer.lock().await.tail(source, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, source: LogSource, line: &str) -> LogEntry {
        LogEntry {
            id,
            ts: Utc::now(),
            source,
            line: line.to_string(),
        }
    }

    #[test]
    fn ring_buffer_caps_to_capacity() {
        let mut rb = RingBuffer::new(MIN_CAPACITY);
        for i in 0..(MIN_CAPACITY + 10) {
            rb.push(LogSource::Pipeline, format!("line {i}"));
        }
        assert_eq!(rb.entries.len(), MIN_CAPACITY);
        assert_eq!(rb.entries.front().unwrap().line, "line 10");
    }

    #[test]
    fn ring_buffer_below_min_capacity_clamps_up() {
        let rb = RingBuffer::new(10);
        assert_eq!(rb.capacity, MIN_CAPACITY);
    }

    #[test]
    fn query_returns_only_ids_greater_than_since() {
        let mut rb = RingBuffer::new(MIN_CAPACITY);
        rb.entries.push_back(entry(1, LogSource::Pipeline, "a"));
        rb.entries.push_back(entry(2, LogSource::Pipeline, "b"));
        rb.entries.push_back(entry(3, LogSource::Backend, "c"));
        let (entries, next) = rb.query(1, None, 100);
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(next, 3);
    }

    #[test]
    fn query_next_is_since_when_empty() {
        let rb = RingBuffer::new(MIN_CAPACITY);
        let (entries, next) = rb.query(5, None, 100);
        assert!(entries.is_empty());
        assert_eq!(next, 5);
    }

    #[test]
    fn query_filters_by_source() {
        let mut rb = RingBuffer::new(MIN_CAPACITY);
        rb.entries.push_back(entry(1, LogSource::Pipeline, "a"));
        rb.entries.push_back(entry(2, LogSource::Backend, "b"));
        let (entries, _) = rb.query(0, Some(LogSource::Backend), 100);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, LogSource::Backend);
    }

    #[test]
    fn query_limit_is_clamped_into_range() {
        let mut rb = RingBuffer::new(DEFAULT_CAPACITY);
        for i in 1..=10 {
            rb.entries.push_back(entry(i, LogSource::Pipeline, "x"));
        }
        let (entries, _) = rb.query(0, None, 0);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn tail_returns_last_n_oldest_first_for_source() {
        let mut rb = RingBuffer::new(MIN_CAPACITY);
        for i in 1..=5 {
            rb.entries.push_back(entry(i, LogSource::Pipeline, &format!("p{i}")));
        }
        rb.entries.push_back(entry(6, LogSource::Backend, "b1"));
        let tail = rb.tail(LogSource::Pipeline, 2);
        assert_eq!(tail.iter().map(|e| e.line.clone()).collect::<Vec<_>>(), vec!["p4", "p5"]);
    }

    #[tokio::test]
    async fn tailer_reads_lines_appended_across_ticks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pipeline.log");
        tokio::fs::write(&path, "first\nsecond\n").await.unwrap();

        let mut tailer = Tailer::new(path.clone(), LogSource::Pipeline);
        let lines = tailer.tick().await.unwrap();
        assert_eq!(lines, vec!["first", "second"]);

        tokio::fs::write(&path, "first\nsecond\nthird\n")
            .await
            .unwrap();
        let lines = tailer.tick().await.unwrap();
        assert_eq!(lines, vec!["third"]);
    }

    #[tokio::test]
    async fn tailer_holds_partial_line_until_terminated() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pipeline.log");
        tokio::fs::write(&path, "complete\npartial-no-newline").await.unwrap();

        let mut tailer = Tailer::new(path.clone(), LogSource::Pipeline);
        let lines = tailer.tick().await.unwrap();
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(tailer.partial, "partial-no-newline");

        let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        use tokio::io::AsyncWriteExt;
        file.write_all(b" now done\n").await.unwrap();
        let lines = tailer.tick().await.unwrap();
        assert_eq!(lines, vec!["partial-no-newline now done"]);
    }

    #[tokio::test]
    async fn tailer_resets_offset_on_truncation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pipeline.log");
        tokio::fs::write(&path, "aaaaaaaaaa\n").await.unwrap();

        let mut tailer = Tailer::new(path.clone(), LogSource::Pipeline);
        tailer.tick().await.unwrap();
        assert!(tailer.offset > 0);

        tokio::fs::write(&path, "new\n").await.unwrap();
        let lines = tailer.tick().await.unwrap();
        assert_eq!(lines, vec!["new"]);
    }

    #[tokio::test]
    async fn missing_file_is_skipped_without_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("does-not-exist.log");
        let mut tailer = Tailer::new(path, LogSource::Backend);
        let lines = tailer.tick().await.unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn log_hub_since_query_integrates_tailer_and_buffer() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline_path = tmp.path().join("pipeline.log");
        let backend_path = tmp.path().join("backend.log");
        tokio::fs::write(&pipeline_path, "p1\np2\n").await.unwrap();
        tokio::fs::write(&backend_path, "b1\n").await.unwrap();

        let hub = LogHub::new(pipeline_path, backend_path, MIN_CAPACITY);
        hub.tick().await;

        let (entries, next) = hub.since(0, None, 100).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(next, entries.last().unwrap().id);
    }
}

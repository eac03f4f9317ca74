// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tailed log entries served to the UI via the since-id cursor API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tailed file a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// The pipeline child process's stdout+stderr.
    Pipeline,
    /// The control-plane's own log file.
    Backend,
}

/// A single ring-buffer log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// Monotonically increasing entry id, unique across both sources.
    pub id: u64,
    /// When this entry was appended to the ring buffer.
    pub ts: DateTime<Utc>,
    /// Which tailer produced this entry.
    pub source: LogSource,
    /// The (CR/LF-trimmed) log line text.
    pub line: String,
}

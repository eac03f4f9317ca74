// SPDX-License-Identifier: MIT OR Apache-2.0
//! Chat, inbox, and outbox message queue records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a message's `content`.
pub const MAX_CONTENT_LEN: usize = 10_000;

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Authored by the UI user.
    User,
    /// Authored by an assistant.
    Assistant,
}

/// Role of an inbox message author (always the UI user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxRole {
    /// Authored by the UI user.
    User,
}

/// Role of an outbox message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxRole {
    /// Emitted by the backend/control-plane itself.
    System,
    /// Emitted by the pipeline child process.
    Pipeline,
}

impl OutboxRole {
    /// Parse a role captured from an outbox filename; any value other than
    /// `"system"` is folded to `Pipeline` per C8's inference rule.
    #[must_use]
    pub fn from_filename_capture(capture: &str) -> Self {
        if capture == "system" {
            Self::System
        } else {
            Self::Pipeline
        }
    }
}

/// A single row in one of the three ordered message logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message<R> {
    /// Row identifier, monotonically increasing within its queue.
    pub id: i64,
    /// Author role.
    pub role: R,
    /// Message body, at most [`MAX_CONTENT_LEN`] characters.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Which of the three ordered message logs an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Chat,
    Inbox,
    Outbox,
}

impl QueueKind {
    /// The storage table/collection name for this queue.
    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Chat => "chat_messages",
            Self::Inbox => "inbox_messages",
            Self::Outbox => "outbox_messages",
        }
    }
}

/// A queue row with an untyped string role, as persisted by the state
/// store. Callers at the API boundary narrow `role` into [`ChatRole`],
/// [`InboxRole`], or [`OutboxRole`] as appropriate for the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueMessage {
    pub id: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbox_role_from_system_capture() {
        assert_eq!(OutboxRole::from_filename_capture("system"), OutboxRole::System);
    }

    #[test]
    fn outbox_role_folds_unknown_to_pipeline() {
        assert_eq!(
            OutboxRole::from_filename_capture("weird"),
            OutboxRole::Pipeline
        );
        assert_eq!(
            OutboxRole::from_filename_capture("pipeline"),
            OutboxRole::Pipeline
        );
    }

    #[test]
    fn message_serde_roundtrip() {
        let msg = Message {
            id: 1,
            role: ChatRole::User,
            content: "hi".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message<ChatRole> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "hi");
    }
}

//! Conversation, progress, task and notification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::ids::{ConversationId, MessageId, TaskId};
use crate::chat::core::message::Message;

/// Maximum title length derived from a first message.
const MAX_TITLE_CHARS: usize = 50;

/// Entry of the conversation list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity time.
    pub updated_at: DateTime<Utc>,
    /// Local entry for a conversation the backend has not persisted yet.
    #[serde(default)]
    pub provisional: bool,
}

impl ConversationSummary {
    /// Provisional list entry for a freshly minted temporary conversation.
    #[must_use]
    pub fn provisional(id: ConversationId, first_message: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title_from_message(first_message),
            created_at: now,
            updated_at: now,
            provisional: true,
        }
    }
}

/// Derive a display title from the first line of a message.
#[must_use]
pub fn title_from_message(text: &str) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.chars().count() <= MAX_TITLE_CHARS {
        return line.to_string();
    }
    let mut title: String = line.chars().take(MAX_TITLE_CHARS - 1).collect();
    title.push('…');
    title
}

/// Full conversation as returned by the backend.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetail {
    /// List metadata.
    pub summary: ConversationSummary,
    /// Messages in display order.
    pub messages: Vec<Message>,
}

/// Step notification received while a response streams in.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Conversation the step belongs to.
    pub conversation_id: ConversationId,
    /// Human-readable step label.
    pub step: String,
    /// Optional status reported with the step.
    pub status: Option<String>,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

/// Lifecycle of a long-running task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Still streaming.
    Pending,
    /// Result received.
    Completed,
    /// Transport failure.
    Errored,
}

/// Streaming operation promoted to a visible background task.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LongRunningTask {
    /// Task id.
    pub id: TaskId,
    /// Owning conversation, re-keyed on migration.
    pub conversation_id: ConversationId,
    /// The user message that started the operation.
    pub message_id: MessageId,
    /// Display title.
    pub title: String,
    /// Latest reported step.
    pub step: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Promotion time.
    pub created_at: DateTime<Utc>,
    /// Last status or step change.
    pub updated_at: DateTime<Utc>,
}

/// Dismissable error shown to the user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Per-tab sequence number.
    pub id: u64,
    /// Message text.
    pub message: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_uses_first_non_empty_line() {
        assert_eq!(title_from_message("\n  Draft a cold email \nfor ACME"), "Draft a cold email");
    }

    #[test]
    fn long_titles_are_truncated() {
        let text = "x".repeat(80);
        let title = title_from_message(&text);
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn provisional_summary_is_flagged() {
        let now = Utc::now();
        let id = ConversationId::mint_temporary(now);
        let summary = ConversationSummary::provisional(id.clone(), "hi", now);
        assert!(summary.provisional);
        assert_eq!(summary.id, id);
        assert_eq!(summary.title, "hi");
    }
}

//! Chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chat::core::ids::{ConversationId, MessageId};

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

impl Role {
    /// Stable string form used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// A single message, optimistic or authoritative.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Temporary or durable id.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub role: Role,
    /// Text payload.
    pub content: String,
    /// Creation time; server time for authoritative messages.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a locally created user message with a temporary id.
    #[must_use]
    pub fn optimistic_user(
        conversation_id: ConversationId,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::mint_temporary(now),
            conversation_id,
            role: Role::User,
            content: content.into(),
            created_at: now,
        }
    }

    /// Whether this message is still awaiting backend confirmation.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.id.is_temporary()
    }

    /// Time used for optimistic matching: the id's embedded stamp, else `created_at`.
    #[must_use]
    pub fn local_timestamp(&self) -> DateTime<Utc> {
        self.id.temporary_timestamp().unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_wire_names() {
        assert_eq!("user".parse::<Role>(), Ok(Role::User));
        assert_eq!("assistant".parse::<Role>(), Ok(Role::Assistant));
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn optimistic_user_message_has_temp_id() {
        let now = Utc::now();
        let conversation = ConversationId::mint_temporary(now);
        let message = Message::optimistic_user(conversation.clone(), "hello", now);

        assert!(message.is_optimistic());
        assert_eq!(message.role, Role::User);
        assert_eq!(message.conversation_id, conversation);
        assert_eq!(
            message.local_timestamp().timestamp_millis(),
            now.timestamp_millis()
        );
    }
}

//! Identifier types for conversations, messages, tabs and tracked operations.
//!
//! Conversations and messages carry string ids because the backend owns their
//! durable form; until it answers, the client mints *temporary* ids that embed
//! the creation time:
//! - conversations: `temp_<epoch-ms>_<suffix>`
//! - messages: `temp-<epoch-ms>-<suffix>`
//!
//! Tab, task and operation ids never leave the client and are plain UUIDs.

use core::fmt;
use core::str::FromStr;
use std::convert::Infallible;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of temporary conversation ids.
pub const TEMP_CONVERSATION_PREFIX: &str = "temp_";

/// Prefix of temporary message ids.
pub const TEMP_MESSAGE_PREFIX: &str = "temp-";

/// Length of the random suffix appended to temporary ids.
const SUFFIX_LEN: usize = 9;

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Parse `<ms><sep><suffix>` after a temp prefix.
fn embedded_timestamp(rest: &str, sep: char) -> Option<DateTime<Utc>> {
    let (millis, suffix) = rest.split_once(sep)?;
    if suffix.is_empty() {
        return None;
    }
    let millis: i64 = millis.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Identifier of a conversation, temporary or durable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Mint a fresh temporary id for a conversation the backend has not seen yet.
    #[must_use]
    pub fn mint_temporary(now: DateTime<Utc>) -> Self {
        Self(format!(
            "{TEMP_CONVERSATION_PREFIX}{}_{}",
            now.timestamp_millis(),
            random_suffix()
        ))
    }

    /// Wrap a backend-assigned id.
    #[must_use]
    pub fn durable(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Whether this id was minted locally and not yet persisted.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_CONVERSATION_PREFIX)
    }

    /// Creation time embedded in a temporary id.
    #[must_use]
    pub fn temporary_timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
            .strip_prefix(TEMP_CONVERSATION_PREFIX)
            .and_then(|rest| embedded_timestamp(rest, '_'))
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConversationId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Identifier of a message, temporary or durable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Mint a temporary id for an optimistic message.
    #[must_use]
    pub fn mint_temporary(now: DateTime<Utc>) -> Self {
        Self(format!(
            "{TEMP_MESSAGE_PREFIX}{}-{}",
            now.timestamp_millis(),
            random_suffix()
        ))
    }

    /// Wrap a backend-assigned id.
    #[must_use]
    pub fn durable(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Whether this id was minted locally.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_MESSAGE_PREFIX)
    }

    /// Creation time embedded in a temporary id, `None` for durable ids.
    #[must_use]
    pub fn temporary_timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
            .strip_prefix(TEMP_MESSAGE_PREFIX)
            .and_then(|rest| embedded_timestamp(rest, '-'))
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                #[cfg(feature = "uuid_v7")]
                {
                    Self(Uuid::now_v7())
                }
                #[cfg(not(feature = "uuid_v7"))]
                {
                    Self(Uuid::new_v4())
                }
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(
    /// Identifier of one client tab (one `ChatController`).
    TabId
);

define_uuid_id!(
    /// Identifier of a long-running task entry.
    TaskId
);

define_uuid_id!(
    /// Identifier of one in-flight send operation.
    ///
    /// Survives conversation migration, so timers and handlers that captured
    /// it can still find their operation after the id changed.
    OperationId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_conversation_id_embeds_timestamp() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let id = ConversationId::mint_temporary(now);

        assert!(id.is_temporary());
        assert!(id.as_str().starts_with("temp_1700000000123_"));
        assert_eq!(id.as_str().len(), "temp_1700000000123_".len() + SUFFIX_LEN);
        assert_eq!(id.temporary_timestamp(), Some(now));
    }

    #[test]
    fn temporary_message_id_embeds_timestamp() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_456).unwrap();
        let id = MessageId::mint_temporary(now);

        assert!(id.is_temporary());
        assert!(id.as_str().starts_with("temp-1700000000456-"));
        assert_eq!(id.temporary_timestamp(), Some(now));
    }

    #[test]
    fn durable_ids_are_not_temporary() {
        let conversation = ConversationId::durable("64f1c0ffee");
        let message = MessageId::durable("msg_1");

        assert!(!conversation.is_temporary());
        assert!(conversation.temporary_timestamp().is_none());
        assert!(!message.is_temporary());
        assert!(message.temporary_timestamp().is_none());
    }

    #[test]
    fn malformed_temporary_ids_have_no_timestamp() {
        assert!(MessageId::durable("temp-abc-xyz").temporary_timestamp().is_none());
        assert!(MessageId::durable("temp-123-").temporary_timestamp().is_none());
        assert!(ConversationId::durable("temp_123").temporary_timestamp().is_none());
    }

    #[test]
    fn minted_ids_are_unique() {
        let now = Utc::now();
        assert_ne!(
            ConversationId::mint_temporary(now),
            ConversationId::mint_temporary(now)
        );
    }

    #[test]
    fn uuid_ids_round_trip_through_strings() {
        let tab = TabId::new();
        let parsed: TabId = tab.to_string().parse().unwrap();
        assert_eq!(tab, parsed);
    }
}

//! Local soft-cache of conversation summaries.

pub mod sqlite;

pub use sqlite::{CacheFuture, ConversationCache, SqliteConversationCache};

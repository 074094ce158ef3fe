//! Chat client core: state, reconciliation, synchronisation and tasks.

pub mod cache;
pub mod core;
pub mod engine;
pub mod identity;
pub mod merge;
pub mod store;
pub mod streaming;
pub mod sync;
pub mod tasks;

pub use cache::{ConversationCache, SqliteConversationCache};
pub use self::core::{
    ChatConfig, ChatError, ChatResult, Clock, ConversationId, Message, MessageId, Role,
};
pub use engine::{ChatController, SendOutcome};
pub use store::ChatState;
pub use sync::{SyncBus, SyncEnvelope, SyncEvent};

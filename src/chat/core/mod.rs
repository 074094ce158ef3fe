//! Core chat types, configuration and errors.

pub mod clock;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod shutdown;
pub mod ids;
pub mod message;

pub use clock::Clock;
pub use config::{BackendConfig, CacheConfig, ChatConfig, SyncConfig, TimingConfig};
pub use conversation::{
    ConversationDetail, ConversationSummary, LongRunningTask, Notification, ProgressEvent,
    TaskStatus, title_from_message,
};
pub use errors::{ChatError, ChatResult};
pub use shutdown::Shutdown;
pub use ids::{ConversationId, MessageId, OperationId, TabId, TaskId};
pub use message::{Message, Role};

//! Message store and per-tab state container.

pub mod messages;
pub mod state;

pub use messages::MessageStore;
pub use state::{ChatState, ConversationSnapshot, InFlight};

//! Notifications delivered by a streamed send.

use serde::{Deserialize, Serialize};

use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::Message;

/// One notification of a streamed call.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Intermediate step.
    Progress {
        /// Step label.
        step: String,
        /// Optional status text.
        status: Option<String>,
    },
    /// Terminal notification with the authoritative history.
    Result {
        /// Durable conversation id, if the backend assigned or echoed one.
        conversation_id: Option<ConversationId>,
        /// Full message list of the conversation.
        messages: Vec<Message>,
    },
}

impl StreamEvent {
    /// Whether this is the terminal notification.
    #[must_use]
    pub const fn is_result(&self) -> bool {
        matches!(self, Self::Result { .. })
    }
}

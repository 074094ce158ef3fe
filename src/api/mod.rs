//! Backend operations the chat client depends on.
//!
//! The backend owns every durable record. Two implementations ship here:
//! - `http`: REST + server-sent-events client for the real API
//! - `memory`: in-process backend for tests and offline runs

pub mod error;
pub mod http;
pub mod memory;
pub mod sse;
pub mod wire;

pub use error::{ApiError, ApiResult};
pub use http::HttpChatBackend;
pub use memory::InMemoryBackend;

use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;

use crate::chat::core::conversation::{ConversationDetail, ConversationSummary};
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::Message;
use crate::chat::streaming::events::StreamEvent;

/// Boxed future type for backend operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Notifications of one streamed send.
pub type EventStream = BoxStream<'static, ApiResult<StreamEvent>>;

/// A message to send, optionally into an existing conversation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SendRequest {
    /// Durable conversation, `None` to start a new one.
    pub conversation_id: Option<ConversationId>,
    /// Message text.
    pub content: String,
}

/// Complete response of a non-streamed send.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChatReply {
    /// Durable conversation id, if any.
    pub conversation_id: Option<ConversationId>,
    /// Full message list of the conversation.
    pub messages: Vec<Message>,
}

/// Remote chat operations.
pub trait ChatBackend: Send + Sync {
    /// List conversation summaries of the current account.
    fn list_conversations(&self) -> ApiFuture<'_, ApiResult<Vec<ConversationSummary>>>;

    /// Fetch one conversation with its messages.
    fn get_conversation(&self, id: ConversationId) -> ApiFuture<'_, ApiResult<ConversationDetail>>;

    /// Send a message and wait for the complete response.
    fn send_message(&self, request: SendRequest) -> ApiFuture<'_, ApiResult<ChatReply>>;

    /// Send a message and receive progress notifications ended by a result.
    fn send_message_streaming(&self, request: SendRequest) -> ApiFuture<'_, ApiResult<EventStream>>;

    /// Delete a conversation.
    fn delete_conversation(&self, id: ConversationId) -> ApiFuture<'_, ApiResult<()>>;
}

//! JSON shapes exchanged with the chat API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::ChatReply;
use crate::chat::core::conversation::{ConversationDetail, ConversationSummary, title_from_message};
use crate::chat::core::ids::{ConversationId, MessageId};
use crate::chat::core::message::{Message, Role};
use crate::chat::streaming::events::StreamEvent;

/// Conversation list entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireSummary {
    /// Durable id.
    pub id: String,
    /// Title, absent until the backend names the conversation.
    #[serde(default)]
    pub title: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WireSummary {
    /// Convert into the client model.
    #[must_use]
    pub fn into_summary(self) -> ConversationSummary {
        ConversationSummary {
            id: ConversationId::durable(self.id),
            title: self.title.unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
            provisional: false,
        }
    }
}

/// Stored message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    /// Durable id.
    pub id: String,
    /// Author.
    pub role: Role,
    /// Text payload.
    pub content: String,
    /// Server creation time.
    pub created_at: DateTime<Utc>,
}

impl WireMessage {
    /// Convert into the client model, owned by `conversation_id`.
    #[must_use]
    pub fn into_message(self, conversation_id: &ConversationId) -> Message {
        Message {
            id: MessageId::durable(self.id),
            conversation_id: conversation_id.clone(),
            role: self.role,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// Conversation with messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireDetail {
    /// Durable id.
    pub id: String,
    /// Title.
    #[serde(default)]
    pub title: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Messages in display order.
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

impl WireDetail {
    /// Convert into the client model.
    #[must_use]
    pub fn into_detail(self) -> ConversationDetail {
        let id = ConversationId::durable(self.id);
        let messages: Vec<Message> =
            self.messages.into_iter().map(|m| m.into_message(&id)).collect();
        let title = self.title.unwrap_or_else(|| {
            messages
                .first()
                .map(|m| title_from_message(&m.content))
                .unwrap_or_default()
        });
        ConversationDetail {
            summary: ConversationSummary {
                id,
                title,
                created_at: self.created_at,
                updated_at: self.updated_at.unwrap_or(self.created_at),
                provisional: false,
            },
            messages,
        }
    }
}

/// Body of a send request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireSendRequest {
    /// Existing conversation, omitted for a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Message text.
    pub message: String,
}

/// Body of a non-streamed send response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireReply {
    /// Durable conversation id.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Full message list.
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

impl WireReply {
    /// Convert into the client model; `fallback` owns messages when no id came back.
    #[must_use]
    pub fn into_reply(self, fallback: &ConversationId) -> ChatReply {
        let conversation_id = self.conversation_id.map(ConversationId::durable);
        let owner = conversation_id.clone().unwrap_or_else(|| fallback.clone());
        ChatReply {
            conversation_id,
            messages: self.messages.into_iter().map(|m| m.into_message(&owner)).collect(),
        }
    }
}

/// One server-sent event payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireStreamEvent {
    /// Intermediate step.
    Progress {
        /// Step label.
        step: String,
        /// Optional status text.
        #[serde(default)]
        status: Option<String>,
    },
    /// Final response.
    Result {
        /// Durable conversation id.
        #[serde(default)]
        conversation_id: Option<String>,
        /// Full message list.
        #[serde(default)]
        messages: Vec<WireMessage>,
    },
    /// Backend-side failure.
    Error {
        /// Failure description.
        message: String,
    },
}

impl WireStreamEvent {
    /// Convert into a stream notification; `fallback` owns messages when no id came back.
    ///
    /// # Errors
    /// Returns an error for `error` payloads.
    pub fn into_event(self, fallback: &ConversationId) -> ApiResult<StreamEvent> {
        match self {
            Self::Progress { step, status } => Ok(StreamEvent::Progress { step, status }),
            Self::Result {
                conversation_id,
                messages,
            } => {
                let conversation_id = conversation_id.map(ConversationId::durable);
                let owner = conversation_id.clone().unwrap_or_else(|| fallback.clone());
                Ok(StreamEvent::Result {
                    conversation_id,
                    messages: messages.into_iter().map(|m| m.into_message(&owner)).collect(),
                })
            }
            Self::Error { message } => Err(ApiError::Remote(message)),
        }
    }
}

/// Parse one `data:` payload of the event stream.
///
/// # Errors
/// Returns an error for malformed JSON or backend `error` payloads.
pub fn parse_stream_payload(data: &str, fallback: &ConversationId) -> ApiResult<StreamEvent> {
    let event: WireStreamEvent = serde_json::from_str(data)?;
    event.into_event(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_payload() {
        let fallback = ConversationId::durable("c-1");
        let event =
            parse_stream_payload(r#"{"type":"progress","step":"Searching"}"#, &fallback).unwrap();
        assert_eq!(
            event,
            StreamEvent::Progress {
                step: "Searching".to_string(),
                status: None
            }
        );
    }

    #[test]
    fn result_messages_take_the_returned_conversation_id() {
        let fallback = ConversationId::durable("unused");
        let data = r#"{"type":"result","conversation_id":"c-9","messages":[
            {"id":"m-1","role":"user","content":"hi","created_at":"2026-01-01T00:00:00Z"}
        ]}"#;
        let StreamEvent::Result {
            conversation_id,
            messages,
        } = parse_stream_payload(data, &fallback).unwrap()
        else {
            panic!("expected result");
        };
        assert_eq!(conversation_id, Some(ConversationId::durable("c-9")));
        assert_eq!(messages[0].conversation_id.as_str(), "c-9");
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn error_payload_becomes_remote_error() {
        let fallback = ConversationId::durable("c-1");
        let err =
            parse_stream_payload(r#"{"type":"error","message":"quota"}"#, &fallback).unwrap_err();
        assert!(matches!(err, ApiError::Remote(m) if m == "quota"));
    }

    #[test]
    fn detail_without_title_uses_first_message() {
        let detail = WireDetail {
            id: "c-2".to_string(),
            title: None,
            created_at: Utc::now(),
            updated_at: None,
            messages: vec![WireMessage {
                id: "m-1".to_string(),
                role: Role::User,
                content: "Plan the launch".to_string(),
                created_at: Utc::now(),
            }],
        }
        .into_detail();
        assert_eq!(detail.summary.title, "Plan the launch");
        assert!(!detail.summary.provisional);
    }
}

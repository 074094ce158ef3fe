//! In-process chat backend.
//!
//! Stores conversations in a `DashMap`, answers every message with a canned
//! assistant reply and can be scripted with progress steps, per-step delays
//! and injected failures. Call counters let tests assert how often each
//! operation reached the backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::{ApiFuture, ChatBackend, ChatReply, EventStream, SendRequest};
use crate::chat::core::clock::Clock;
use crate::chat::core::conversation::{ConversationDetail, ConversationSummary, title_from_message};
use crate::chat::core::ids::{ConversationId, MessageId};
use crate::chat::core::message::{Message, Role};
use crate::chat::streaming::events::StreamEvent;

/// Prefix of the canned assistant reply.
pub const REPLY_PREFIX: &str = "You said: ";

struct Shared {
    clock: Clock,
    conversations: DashMap<ConversationId, ConversationDetail>,
    next_id: AtomicU64,
}

impl Shared {
    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Persist the user message, creating the conversation when needed.
    fn record_user_message(&self, request: &SendRequest) -> ApiResult<ConversationId> {
        let now = self.clock.now();
        let id = match &request.conversation_id {
            Some(id) => {
                if !self.conversations.contains_key(id) {
                    return Err(not_found(id));
                }
                id.clone()
            }
            None => {
                let id = ConversationId::durable(self.next("conv"));
                self.conversations.insert(
                    id.clone(),
                    ConversationDetail {
                        summary: ConversationSummary {
                            id: id.clone(),
                            title: title_from_message(&request.content),
                            created_at: now,
                            updated_at: now,
                            provisional: false,
                        },
                        messages: Vec::new(),
                    },
                );
                id
            }
        };
        self.append(&id, Role::User, request.content.clone());
        Ok(id)
    }

    /// Persist the assistant reply and return the full message list.
    fn record_reply(&self, id: &ConversationId, content: &str) -> Vec<Message> {
        self.append(id, Role::Assistant, format!("{REPLY_PREFIX}{content}"))
    }

    fn append(&self, id: &ConversationId, role: Role, content: String) -> Vec<Message> {
        let now = self.clock.now();
        let message_id = MessageId::durable(self.next("msg"));
        let Some(mut detail) = self.conversations.get_mut(id) else {
            return Vec::new();
        };
        detail.messages.push(Message {
            id: message_id,
            conversation_id: id.clone(),
            role,
            content,
            created_at: now,
        });
        detail.summary.updated_at = now;
        detail.messages.clone()
    }
}

fn not_found(id: &ConversationId) -> ApiError {
    ApiError::Status {
        status: 404,
        body: format!("conversation {id} not found"),
    }
}

/// Take one injected failure if any are armed.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Default)]
struct Counters {
    list: AtomicUsize,
    get: AtomicUsize,
    send: AtomicUsize,
    stream: AtomicUsize,
    delete: AtomicUsize,
}

/// Scriptable backend living in the current process.
pub struct InMemoryBackend {
    shared: Arc<Shared>,
    progress_steps: Vec<String>,
    step_delay: Duration,
    omit_conversation_id: AtomicBool,
    fail_streams: AtomicUsize,
    break_streams: AtomicUsize,
    fail_sends: AtomicUsize,
    fail_gets: AtomicUsize,
    fail_deletes: AtomicUsize,
    calls: Counters,
}

impl InMemoryBackend {
    /// Empty backend stamping messages with `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                conversations: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
            progress_steps: Vec::new(),
            step_delay: Duration::ZERO,
            omit_conversation_id: AtomicBool::new(false),
            fail_streams: AtomicUsize::new(0),
            break_streams: AtomicUsize::new(0),
            fail_sends: AtomicUsize::new(0),
            fail_gets: AtomicUsize::new(0),
            fail_deletes: AtomicUsize::new(0),
            calls: Counters::default(),
        }
    }

    /// Progress steps emitted before every streamed result.
    #[must_use]
    pub fn with_progress_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.progress_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Delay before each progress step and before the result.
    ///
    /// A response therefore takes `(steps + 1) * delay`.
    #[must_use]
    pub const fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Seed a stored conversation.
    pub fn insert_conversation(&self, title: &str, messages: &[(Role, &str)]) -> ConversationId {
        let now = self.shared.clock.now();
        let id = ConversationId::durable(self.shared.next("conv"));
        self.shared.conversations.insert(
            id.clone(),
            ConversationDetail {
                summary: ConversationSummary {
                    id: id.clone(),
                    title: title.to_string(),
                    created_at: now,
                    updated_at: now,
                    provisional: false,
                },
                messages: Vec::new(),
            },
        );
        for (role, content) in messages {
            self.shared.append(&id, *role, (*content).to_string());
        }
        id
    }

    /// Stored copy of a conversation.
    #[must_use]
    pub fn conversation(&self, id: &ConversationId) -> Option<ConversationDetail> {
        self.shared.conversations.get(id).map(|d| d.clone())
    }

    /// Number of stored conversations.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.shared.conversations.len()
    }

    /// Results of new conversations omit the conversation id.
    pub fn set_omit_conversation_id(&self, omit: bool) {
        self.omit_conversation_id.store(omit, Ordering::SeqCst);
    }

    /// Next `n` streamed sends fail before any notification.
    pub fn fail_next_streams(&self, n: usize) {
        self.fail_streams.store(n, Ordering::SeqCst);
    }

    /// Next `n` streams emit their progress then fail instead of the result.
    pub fn break_next_streams(&self, n: usize) {
        self.break_streams.store(n, Ordering::SeqCst);
    }

    /// Next `n` blocking sends fail.
    pub fn fail_next_sends(&self, n: usize) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Next `n` conversation fetches fail.
    pub fn fail_next_gets(&self, n: usize) {
        self.fail_gets.store(n, Ordering::SeqCst);
    }

    /// Next `n` deletes fail.
    pub fn fail_next_deletes(&self, n: usize) {
        self.fail_deletes.store(n, Ordering::SeqCst);
    }

    /// Calls to `list_conversations`.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.calls.list.load(Ordering::SeqCst)
    }

    /// Calls to `get_conversation`.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.calls.get.load(Ordering::SeqCst)
    }

    /// Calls to `send_message`.
    #[must_use]
    pub fn send_calls(&self) -> usize {
        self.calls.send.load(Ordering::SeqCst)
    }

    /// Calls to `send_message_streaming`.
    #[must_use]
    pub fn stream_calls(&self) -> usize {
        self.calls.stream.load(Ordering::SeqCst)
    }

    /// Calls to `delete_conversation`.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.calls.delete.load(Ordering::SeqCst)
    }

    fn reply_id(&self, request: &SendRequest, id: ConversationId) -> Option<ConversationId> {
        let omit =
            request.conversation_id.is_none() && self.omit_conversation_id.load(Ordering::SeqCst);
        (!omit).then_some(id)
    }
}

impl ChatBackend for InMemoryBackend {
    fn list_conversations(&self) -> ApiFuture<'_, ApiResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            self.calls.list.fetch_add(1, Ordering::SeqCst);
            let mut summaries: Vec<ConversationSummary> = self
                .shared
                .conversations
                .iter()
                .map(|entry| entry.summary.clone())
                .collect();
            summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(summaries)
        })
    }

    fn get_conversation(&self, id: ConversationId) -> ApiFuture<'_, ApiResult<ConversationDetail>> {
        Box::pin(async move {
            self.calls.get.fetch_add(1, Ordering::SeqCst);
            if take(&self.fail_gets) {
                return Err(ApiError::Unavailable("injected get failure".to_string()));
            }
            self.conversation(&id).ok_or_else(|| not_found(&id))
        })
    }

    fn send_message(&self, request: SendRequest) -> ApiFuture<'_, ApiResult<ChatReply>> {
        Box::pin(async move {
            self.calls.send.fetch_add(1, Ordering::SeqCst);
            if take(&self.fail_sends) {
                return Err(ApiError::Unavailable("injected send failure".to_string()));
            }
            let id = self.shared.record_user_message(&request)?;
            for _ in 0..=self.progress_steps.len() {
                tokio::time::sleep(self.step_delay).await;
            }
            let messages = self.shared.record_reply(&id, &request.content);
            Ok(ChatReply {
                conversation_id: self.reply_id(&request, id),
                messages,
            })
        })
    }

    fn send_message_streaming(
        &self,
        request: SendRequest,
    ) -> ApiFuture<'_, ApiResult<EventStream>> {
        Box::pin(async move {
            self.calls.stream.fetch_add(1, Ordering::SeqCst);
            if take(&self.fail_streams) {
                return Err(ApiError::Unavailable("injected stream failure".to_string()));
            }
            let id = self.shared.record_user_message(&request)?;
            debug!(
                conversation_id = %id,
                steps = self.progress_steps.len(),
                "Streaming scripted reply"
            );

            let delay = self.step_delay;
            let broken = take(&self.break_streams);
            let reply_id = self.reply_id(&request, id.clone());
            let shared = Arc::clone(&self.shared);
            let content = request.content;

            let progress =
                futures::stream::iter(self.progress_steps.clone()).then(move |step| async move {
                    tokio::time::sleep(delay).await;
                    Ok(StreamEvent::Progress { step, status: None })
                });
            let result = futures::stream::once(async move {
                tokio::time::sleep(delay).await;
                if broken {
                    return Err(ApiError::Unavailable("stream interrupted".to_string()));
                }
                let messages = shared.record_reply(&id, &content);
                Ok(StreamEvent::Result {
                    conversation_id: reply_id,
                    messages,
                })
            });
            Ok(progress.chain(result).boxed())
        })
    }

    fn delete_conversation(&self, id: ConversationId) -> ApiFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            self.calls.delete.fetch_add(1, Ordering::SeqCst);
            if take(&self.fail_deletes) {
                return Err(ApiError::Unavailable("injected delete failure".to_string()));
            }
            self.shared
                .conversations
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| not_found(&id))
        })
    }
}

//! Per-conversation optimistic messages and streaming progress events.

use std::collections::HashMap;

use crate::chat::core::conversation::ProgressEvent;
use crate::chat::core::ids::{ConversationId, MessageId};
use crate::chat::core::message::Message;

/// Keyed collections of not-yet-confirmed messages and progress events.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    optimistic: HashMap<ConversationId, Vec<Message>>,
    progress: HashMap<ConversationId, Vec<ProgressEvent>>,
}

impl MessageStore {
    /// Stage an optimistic message under its conversation.
    pub fn add_optimistic(&mut self, message: Message) {
        let bucket = self
            .optimistic
            .entry(message.conversation_id.clone())
            .or_default();
        if !bucket.iter().any(|m| m.id == message.id) {
            bucket.push(message);
        }
    }

    /// Remove one optimistic message, returning it if present.
    pub fn remove_optimistic(
        &mut self,
        conversation_id: &ConversationId,
        id: &MessageId,
    ) -> Option<Message> {
        let bucket = self.optimistic.get_mut(conversation_id)?;
        let idx = bucket.iter().position(|m| &m.id == id)?;
        let removed = bucket.remove(idx);
        if bucket.is_empty() {
            self.optimistic.remove(conversation_id);
        }
        Some(removed)
    }

    /// Keep only the optimistic messages of a conversation matching `keep`.
    pub fn retain_optimistic<F>(&mut self, conversation_id: &ConversationId, keep: F) -> usize
    where
        F: FnMut(&Message) -> bool,
    {
        let Some(bucket) = self.optimistic.get_mut(conversation_id) else {
            return 0;
        };
        let before = bucket.len();
        bucket.retain(keep);
        let dropped = before - bucket.len();
        if bucket.is_empty() {
            self.optimistic.remove(conversation_id);
        }
        dropped
    }

    /// Optimistic messages of a conversation in staging order.
    #[must_use]
    pub fn optimistic(&self, conversation_id: &ConversationId) -> &[Message] {
        self.optimistic.get(conversation_id).map_or(&[], Vec::as_slice)
    }

    /// Conversations that currently hold optimistic messages.
    #[must_use]
    pub fn conversations_with_optimistic(&self) -> Vec<ConversationId> {
        self.optimistic.keys().cloned().collect()
    }

    /// Append a progress event under its conversation.
    pub fn append_progress(&mut self, event: ProgressEvent) {
        self.progress
            .entry(event.conversation_id.clone())
            .or_default()
            .push(event);
    }

    /// Progress events of a conversation in arrival order.
    #[must_use]
    pub fn progress(&self, conversation_id: &ConversationId) -> &[ProgressEvent] {
        self.progress.get(conversation_id).map_or(&[], Vec::as_slice)
    }

    /// Drop the progress events of a conversation.
    pub fn clear_progress(&mut self, conversation_id: &ConversationId) {
        self.progress.remove(conversation_id);
    }

    /// Drop everything held for a conversation.
    pub fn clear_conversation(&mut self, conversation_id: &ConversationId) {
        self.optimistic.remove(conversation_id);
        self.progress.remove(conversation_id);
    }

    /// Move optimistic messages and progress events from `from` to `to`.
    ///
    /// Entries already under `to` are kept; moved entries are appended after them.
    pub fn rekey(&mut self, from: &ConversationId, to: &ConversationId) {
        if let Some(messages) = self.optimistic.remove(from) {
            for mut message in messages {
                message.conversation_id = to.clone();
                self.add_optimistic(message);
            }
        }
        if let Some(events) = self.progress.remove(from) {
            let bucket = self.progress.entry(to.clone()).or_default();
            bucket.extend(events.into_iter().map(|mut e| {
                e.conversation_id = to.clone();
                e
            }));
        }
    }
}

//! Owned per-tab chat state with named mutation operations.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::{DateTime, TimeDelta, Utc};
use lru::LruCache;
use tracing::debug;

use crate::chat::core::config::{ChatConfig, TimingConfig};
use crate::chat::core::conversation::{ConversationSummary, Notification, ProgressEvent};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, MessageId, OperationId};
use crate::chat::core::message::Message;
use crate::chat::merge::view::{MergeInput, OptimisticFate, merge_messages, optimistic_fate};
use crate::chat::store::messages::MessageStore;
use crate::chat::tasks::registry::TaskRegistry;

/// Streaming operation currently awaiting its result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InFlight {
    /// Operation id, stable across migration.
    pub operation: OperationId,
    /// User message that started it.
    pub message_id: MessageId,
    /// Local start time.
    pub started_at: DateTime<Utc>,
}

/// Local state removed by a delete, kept for rollback.
#[derive(Clone, Debug, Default)]
pub struct ConversationSnapshot {
    /// List entry.
    pub summary: Option<ConversationSummary>,
    /// Cached authoritative messages.
    pub messages: Option<Vec<Message>>,
    /// Whether the conversation was the active one.
    pub was_active: bool,
}

/// Single source of truth of one tab.
pub struct ChatState {
    timing: TimingConfig,
    messages: MessageStore,
    details: LruCache<ConversationId, Vec<Message>>,
    summaries: HashMap<ConversationId, ConversationSummary>,
    active: Option<ConversationId>,
    in_flight: HashMap<ConversationId, InFlight>,
    remote_streaming: HashMap<ConversationId, DateTime<Utc>>,
    completions: HashMap<ConversationId, DateTime<Utc>>,
    composer: String,
    notifications: Vec<Notification>,
    next_notification: u64,
    tasks: TaskRegistry,
    last_cleanup: Option<DateTime<Utc>>,
}

impl ChatState {
    /// Create an empty state.
    ///
    /// # Errors
    /// Returns an error if the detail cache capacity is zero.
    pub fn new(config: &ChatConfig) -> ChatResult<Self> {
        let capacity = NonZeroUsize::new(config.cache.detail_capacity).ok_or_else(|| {
            ChatError::InvalidConfig("cache.detail_capacity must be > 0".to_string())
        })?;
        Ok(Self {
            timing: config.timing.clone(),
            messages: MessageStore::default(),
            details: LruCache::new(capacity),
            summaries: HashMap::new(),
            active: None,
            in_flight: HashMap::new(),
            remote_streaming: HashMap::new(),
            completions: HashMap::new(),
            composer: String::new(),
            notifications: Vec::new(),
            next_notification: 1,
            tasks: TaskRegistry::new(),
            last_cleanup: None,
        })
    }

    /// Timer thresholds in use.
    #[must_use]
    pub const fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    // ===== Optimistic messages =============================================

    /// Stage an optimistic message.
    pub fn add_optimistic_message(&mut self, message: Message) {
        self.messages.add_optimistic(message);
    }

    /// Withdraw an optimistic message.
    pub fn remove_optimistic_message(
        &mut self,
        conversation_id: &ConversationId,
        id: &MessageId,
    ) -> Option<Message> {
        self.messages.remove_optimistic(conversation_id, id)
    }

    /// Optimistic messages of a conversation.
    #[must_use]
    pub fn optimistic_messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.messages.optimistic(conversation_id)
    }

    /// Commit confirmed and drop expired optimistic messages of one conversation.
    pub fn reconcile_optimistic(
        &mut self,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) -> usize {
        let window = self.timing.optimistic_window();
        let authoritative = self.details.peek(conversation_id).map_or(&[][..], Vec::as_slice);
        self.messages.retain_optimistic(conversation_id, |m| {
            optimistic_fate(m, authoritative, now, window) == OptimisticFate::Pending
        })
    }

    /// Reconcile every conversation, at most once per cleanup throttle.
    ///
    /// Also forgets completion marks past the appear delay. Returns `None`
    /// when throttled.
    pub fn cleanup_stale_optimistic(&mut self, now: DateTime<Utc>) -> Option<usize> {
        if let Some(last) = self.last_cleanup {
            if now - last < self.timing.cleanup_throttle() {
                return None;
            }
        }
        self.last_cleanup = Some(now);
        let appear_delay = self.timing.appear_delay();
        self.completions.retain(|_, done| now - *done < appear_delay);
        let dropped: usize = self
            .messages
            .conversations_with_optimistic()
            .iter()
            .map(|id| self.reconcile_optimistic(id, now))
            .sum();
        Some(dropped)
    }

    // ===== Progress events =================================================

    /// Append a streaming progress event.
    pub fn append_progress(&mut self, event: ProgressEvent) {
        self.messages.append_progress(event);
    }

    /// Progress events of a conversation.
    #[must_use]
    pub fn progress_events(&self, conversation_id: &ConversationId) -> &[ProgressEvent] {
        self.messages.progress(conversation_id)
    }

    /// Clear the progress events of a conversation.
    pub fn clear_progress(&mut self, conversation_id: &ConversationId) {
        self.messages.clear_progress(conversation_id);
    }

    // ===== Authoritative details ===========================================

    /// Replace the authoritative messages of a conversation.
    pub fn set_conversation_detail(
        &mut self,
        conversation_id: ConversationId,
        messages: Vec<Message>,
    ) {
        self.details.put(conversation_id, messages);
    }

    /// Authoritative messages of a conversation, if cached.
    #[must_use]
    pub fn conversation_messages(&self, conversation_id: &ConversationId) -> Option<&[Message]> {
        self.details.peek(conversation_id).map(Vec::as_slice)
    }

    /// Evict the authoritative messages of a conversation.
    pub fn remove_conversation_detail(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Option<Vec<Message>> {
        self.details.pop(conversation_id)
    }

    // ===== Conversation list ===============================================

    /// Replace the backend-known list, keeping local provisional entries.
    pub fn replace_summaries(&mut self, summaries: Vec<ConversationSummary>) {
        self.summaries.retain(|_, s| s.provisional);
        for summary in summaries {
            self.summaries.insert(summary.id.clone(), summary);
        }
    }

    /// Insert or replace one list entry.
    pub fn upsert_summary(&mut self, summary: ConversationSummary) {
        self.summaries.insert(summary.id.clone(), summary);
    }

    /// Remove one list entry.
    pub fn remove_summary(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Option<ConversationSummary> {
        self.summaries.remove(conversation_id)
    }

    /// One list entry.
    #[must_use]
    pub fn summary(&self, conversation_id: &ConversationId) -> Option<&ConversationSummary> {
        self.summaries.get(conversation_id)
    }

    /// List entries, most recently updated first.
    #[must_use]
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let mut list: Vec<ConversationSummary> = self.summaries.values().cloned().collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    // ===== Active pointer ==================================================

    /// Conversation currently shown.
    #[must_use]
    pub const fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Show a conversation.
    pub fn set_active_conversation(&mut self, conversation_id: ConversationId) {
        self.active = Some(conversation_id);
    }

    /// Show no conversation (composer for a new one).
    pub fn clear_active_conversation(&mut self) {
        self.active = None;
    }

    // ===== Streaming =======================================================

    /// Register an in-flight operation; `false` if one is already running.
    pub fn begin_streaming(
        &mut self,
        conversation_id: ConversationId,
        operation: OperationId,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> bool {
        if self.in_flight.contains_key(&conversation_id) {
            return false;
        }
        self.in_flight.insert(
            conversation_id,
            InFlight {
                operation,
                message_id,
                started_at: now,
            },
        );
        true
    }

    /// Forget the in-flight operation of a conversation.
    pub fn end_streaming(&mut self, conversation_id: &ConversationId) -> Option<InFlight> {
        self.in_flight.remove(conversation_id)
    }

    /// Whether this tab has an operation in flight for the conversation.
    #[must_use]
    pub fn is_streaming(&self, conversation_id: &ConversationId) -> bool {
        self.in_flight.contains_key(conversation_id)
    }

    /// Current conversation of an operation, following migrations.
    #[must_use]
    pub fn in_flight_for_operation(
        &self,
        operation: OperationId,
    ) -> Option<(&ConversationId, &InFlight)> {
        self.in_flight.iter().find(|(_, f)| f.operation == operation)
    }

    /// Record that another tab started or stopped streaming.
    pub fn set_remote_streaming(
        &mut self,
        conversation_id: ConversationId,
        streaming: bool,
        now: DateTime<Utc>,
    ) {
        if streaming {
            self.remote_streaming.insert(conversation_id, now);
        } else {
            self.remote_streaming.remove(&conversation_id);
        }
    }

    /// Whether another tab reported streaming on the conversation.
    #[must_use]
    pub fn is_streaming_elsewhere(&self, conversation_id: &ConversationId) -> bool {
        self.remote_streaming.contains_key(conversation_id)
    }

    /// Forget remote streaming marks older than `max_age`.
    ///
    /// A tab that closes mid-stream never sends its stop event.
    pub fn expire_remote_streaming(&mut self, now: DateTime<Utc>, max_age: TimeDelta) -> usize {
        let before = self.remote_streaming.len();
        self.remote_streaming.retain(|_, started| now - *started <= max_age);
        before - self.remote_streaming.len()
    }

    /// Record a completion for the appear delay.
    pub fn mark_completed(&mut self, conversation_id: ConversationId, now: DateTime<Utc>) {
        self.completions.insert(conversation_id, now);
    }

    /// Last completion of a conversation.
    #[must_use]
    pub fn completed_at(&self, conversation_id: &ConversationId) -> Option<DateTime<Utc>> {
        self.completions.get(conversation_id).copied()
    }

    // ===== Composer and notifications ======================================

    /// Current composer text.
    #[must_use]
    pub fn composer_text(&self) -> &str {
        &self.composer
    }

    /// Replace the composer text.
    pub fn set_composer_text(&mut self, text: impl Into<String>) {
        self.composer = text.into();
    }

    /// Take the composer text, leaving it empty.
    pub fn take_composer_text(&mut self) -> String {
        std::mem::take(&mut self.composer)
    }

    /// Add a dismissable error.
    pub fn push_notification(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> u64 {
        let id = self.next_notification;
        self.next_notification += 1;
        self.notifications.push(Notification {
            id,
            message: message.into(),
            created_at: now,
        });
        id
    }

    /// Dismiss an error; `false` if unknown.
    pub fn dismiss_notification(&mut self, id: u64) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.id != id);
        before != self.notifications.len()
    }

    /// Visible errors, oldest first.
    #[must_use]
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    // ===== Tasks ===========================================================

    /// Long-running task registry.
    #[must_use]
    pub const fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Mutable long-running task registry.
    pub fn tasks_mut(&mut self) -> &mut TaskRegistry {
        &mut self.tasks
    }

    // ===== Whole-conversation operations ===================================

    /// Re-key every local store from `from` to `to`.
    ///
    /// Does not touch the active pointer.
    pub fn rekey_conversation(&mut self, from: &ConversationId, to: &ConversationId) {
        self.messages.rekey(from, to);
        self.tasks.rekey(from, to);

        if let Some(flight) = self.in_flight.remove(from) {
            self.in_flight.entry(to.clone()).or_insert(flight);
        }
        if let Some(started) = self.remote_streaming.remove(from) {
            self.remote_streaming.entry(to.clone()).or_insert(started);
        }
        if let Some(done) = self.completions.remove(from) {
            self.completions.entry(to.clone()).or_insert(done);
        }
        if let Some(messages) = self.details.pop(from) {
            if !self.details.contains(to) {
                let messages = messages
                    .into_iter()
                    .map(|mut m| {
                        m.conversation_id = to.clone();
                        m
                    })
                    .collect();
                self.details.put(to.clone(), messages);
            }
        }
        if let Some(mut summary) = self.summaries.remove(from) {
            if !self.summaries.contains_key(to) {
                summary.id = to.clone();
                summary.provisional = false;
                self.summaries.insert(to.clone(), summary);
            }
        }
        debug!(from = %from, to = %to, "Re-keyed conversation stores");
    }

    /// Remove a conversation from every local store.
    pub fn remove_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> ConversationSnapshot {
        let was_active = self.active.as_ref() == Some(conversation_id);
        if was_active {
            self.active = None;
        }
        self.messages.clear_conversation(conversation_id);
        self.tasks.remove_conversation(conversation_id);
        self.completions.remove(conversation_id);
        self.remote_streaming.remove(conversation_id);
        ConversationSnapshot {
            summary: self.summaries.remove(conversation_id),
            messages: self.details.pop(conversation_id),
            was_active,
        }
    }

    /// Put back what `remove_conversation` took away.
    pub fn restore_conversation(
        &mut self,
        conversation_id: &ConversationId,
        snapshot: ConversationSnapshot,
    ) {
        if let Some(summary) = snapshot.summary {
            self.summaries.insert(conversation_id.clone(), summary);
        }
        if let Some(messages) = snapshot.messages {
            self.details.put(conversation_id.clone(), messages);
        }
        if snapshot.was_active && self.active.is_none() {
            self.active = Some(conversation_id.clone());
        }
    }

    /// Messages to render for a conversation at `now`.
    #[must_use]
    pub fn rendered_messages(
        &self,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) -> Vec<Message> {
        let input = MergeInput {
            authoritative: self.conversation_messages(conversation_id).unwrap_or(&[]),
            optimistic: self.optimistic_messages(conversation_id),
            completed_at: self.completed_at(conversation_id),
        };
        merge_messages(input, now, &self.timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::message::Role;

    fn state() -> ChatState {
        ChatState::new(&ChatConfig::default()).unwrap()
    }

    fn summary(id: &str, updated_secs: i64) -> ConversationSummary {
        let at = Utc::now() + TimeDelta::seconds(updated_secs);
        ConversationSummary {
            id: ConversationId::durable(id),
            title: id.to_string(),
            created_at: at,
            updated_at: at,
            provisional: false,
        }
    }

    #[test]
    fn begin_streaming_rejects_second_operation() {
        let mut state = state();
        let now = Utc::now();
        let conversation = ConversationId::mint_temporary(now);
        let message = MessageId::mint_temporary(now);

        assert!(state.begin_streaming(
            conversation.clone(),
            OperationId::new(),
            message.clone(),
            now
        ));
        assert!(!state.begin_streaming(conversation.clone(), OperationId::new(), message, now));
        assert!(state.end_streaming(&conversation).is_some());
        assert!(!state.is_streaming(&conversation));
    }

    #[test]
    fn replace_summaries_keeps_provisional_entries() {
        let mut state = state();
        let now = Utc::now();
        let temp = ConversationId::mint_temporary(now);
        state.upsert_summary(ConversationSummary::provisional(temp.clone(), "draft", now));
        state.upsert_summary(summary("stale", 0));

        state.replace_summaries(vec![summary("a", 1), summary("b", 2)]);

        let ids: Vec<String> = state.summaries().iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&temp.to_string()));
        assert!(!ids.contains(&"stale".to_string()));
        assert_eq!(ids[0], "b");
    }

    #[test]
    fn cleanup_is_throttled() {
        let mut state = state();
        let now = Utc::now();
        assert_eq!(state.cleanup_stale_optimistic(now), Some(0));
        assert_eq!(state.cleanup_stale_optimistic(now + TimeDelta::milliseconds(500)), None);
        assert!(state.cleanup_stale_optimistic(now + TimeDelta::milliseconds(1_000)).is_some());
    }

    #[test]
    fn cleanup_drops_expired_optimistic_messages() {
        let mut state = state();
        let now = Utc::now();
        let conversation = ConversationId::durable("c-1");
        state.add_optimistic_message(Message::optimistic_user(conversation.clone(), "lost", now));
        state.add_optimistic_message(Message::optimistic_user(
            conversation.clone(),
            "recent",
            now + TimeDelta::seconds(20),
        ));

        let dropped = state.cleanup_stale_optimistic(now + TimeDelta::seconds(31));

        assert_eq!(dropped, Some(1));
        assert_eq!(state.optimistic_messages(&conversation)[0].content, "recent");
    }

    #[test]
    fn remove_and_restore_round_trip() {
        let mut state = state();
        let id = ConversationId::durable("c-9");
        state.upsert_summary(summary("c-9", 0));
        state.set_conversation_detail(
            id.clone(),
            vec![Message {
                id: MessageId::durable("m1"),
                conversation_id: id.clone(),
                role: Role::User,
                content: "hi".to_string(),
                created_at: Utc::now(),
            }],
        );
        state.set_active_conversation(id.clone());

        let snapshot = state.remove_conversation(&id);
        assert!(state.summary(&id).is_none());
        assert!(state.active_conversation().is_none());

        state.restore_conversation(&id, snapshot);
        assert!(state.summary(&id).is_some());
        assert_eq!(state.conversation_messages(&id).map(<[Message]>::len), Some(1));
        assert_eq!(state.active_conversation(), Some(&id));
    }

    #[test]
    fn notifications_are_dismissable() {
        let mut state = state();
        let id = state.push_notification("Network error", Utc::now());
        assert_eq!(state.notifications().len(), 1);
        assert!(state.dismiss_notification(id));
        assert!(!state.dismiss_notification(id));
        assert!(state.notifications().is_empty());
    }

    #[test]
    fn cleanup_forgets_settled_completions() {
        let mut state = state();
        let id = ConversationId::durable("c-1");
        let done = Utc::now();
        state.mark_completed(id.clone(), done);

        state.cleanup_stale_optimistic(done + TimeDelta::milliseconds(500));
        assert_eq!(state.completed_at(&id), Some(done));

        state.cleanup_stale_optimistic(done + TimeDelta::seconds(2));
        assert_eq!(state.completed_at(&id), None);
    }

    #[test]
    fn stale_remote_streaming_marks_expire() {
        let mut state = state();
        let stale = ConversationId::durable("c-1");
        let live = ConversationId::durable("c-2");
        let start = Utc::now();
        state.set_remote_streaming(stale.clone(), true, start);
        state.set_remote_streaming(live.clone(), true, start + TimeDelta::minutes(4));

        let expired =
            state.expire_remote_streaming(start + TimeDelta::minutes(6), TimeDelta::minutes(5));
        assert_eq!(expired, 1);
        assert!(!state.is_streaming_elsewhere(&stale));
        assert!(state.is_streaming_elsewhere(&live));
    }
}

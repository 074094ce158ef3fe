//! Per-tab chat controller.
//!
//! Drives a submission from the composer to the committed history: stage the
//! optimistic message, stream the reply, migrate the temporary conversation
//! and commit the authoritative messages. Also coordinates deletes, cross-tab
//! events and the background workers of the tab.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::error::ApiResult;
use crate::api::{ChatBackend, ChatReply, SendRequest};
use crate::chat::cache::ConversationCache;
use crate::chat::core::clock::Clock;
use crate::chat::core::config::{ChatConfig, TimingConfig};
use crate::chat::core::conversation::{
    ConversationDetail, ConversationSummary, LongRunningTask, Notification, ProgressEvent,
    title_from_message,
};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{ConversationId, OperationId, TabId};
use crate::chat::core::message::{Message, Role};
use crate::chat::core::shutdown::Shutdown;
use crate::chat::identity::resolver::{
    RejectReason, StagedSubmission, Staging, begin_submission, migrate, rollback,
};
use crate::chat::store::state::ChatState;
use crate::chat::streaming::adapter::{StreamAdapter, StreamResult, StreamStep};
use crate::chat::sync::bus::{SyncBus, SyncEnvelope, SyncEvent};
use crate::chat::tasks::maintenance::{MaintenanceConfig, MaintenanceWorker};

/// Result of a submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// The reply was committed under a durable conversation.
    Committed {
        /// Durable conversation id.
        conversation_id: ConversationId,
    },
    /// Ignored before reaching the backend.
    Rejected(RejectReason),
    /// Rolled back after a backend failure.
    Failed {
        /// Notification describing the failure.
        notification: u64,
    },
    /// The tab shut down before the reply arrived.
    Abandoned,
}

#[derive(Clone, Copy, Debug)]
enum Transport {
    Streaming,
    Blocking,
}

impl From<ChatReply> for StreamResult {
    fn from(reply: ChatReply) -> Self {
        Self {
            conversation_id: reply.conversation_id,
            messages: reply.messages,
        }
    }
}

/// Controller of one tab; clones share the same state.
#[derive(Clone)]
pub struct ChatController {
    tab_id: TabId,
    timing: TimingConfig,
    clock: Clock,
    state: Arc<RwLock<ChatState>>,
    backend: Arc<dyn ChatBackend>,
    bus: SyncBus,
    cache: Option<Arc<dyn ConversationCache>>,
    shutdown: Arc<Shutdown>,
}

impl ChatController {
    /// Create a controller for a new tab.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: &ChatConfig,
        backend: Arc<dyn ChatBackend>,
        bus: SyncBus,
    ) -> ChatResult<Self> {
        config.validate()?;
        let state = ChatState::new(config)?;
        let tab_id = TabId::new();
        info!(tab_id = %tab_id, "Chat controller ready");
        Ok(Self {
            tab_id,
            timing: config.timing.clone(),
            clock: Clock::new(),
            state: Arc::new(RwLock::new(state)),
            backend,
            bus,
            cache: None,
            shutdown: Arc::new(Shutdown::new()),
        })
    }

    /// Use `clock` for every local timestamp.
    #[must_use]
    pub const fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror durable conversation summaries into `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ConversationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Id of this tab on the sync bus.
    #[must_use]
    pub const fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Shared state container of this tab.
    #[must_use]
    pub fn state_handle(&self) -> Arc<RwLock<ChatState>> {
        Arc::clone(&self.state)
    }

    // ===== Conversations ===================================================

    /// Seed the conversation list from the local cache.
    ///
    /// Returns the number of cached summaries.
    pub async fn hydrate_from_cache(&self) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        match cache.load_all().await {
            Ok(summaries) => {
                let count = summaries.len();
                let mut state = self.state.write().await;
                for summary in summaries {
                    if state.summary(&summary.id).is_none() {
                        state.upsert_summary(summary);
                    }
                }
                debug!(count, "Hydrated conversation list from cache");
                count
            }
            Err(err) => {
                warn!(?err, "Conversation cache unavailable");
                0
            }
        }
    }

    /// Fetch the conversation list from the backend.
    ///
    /// # Errors
    /// Returns an error if the backend call fails; a notification is raised too.
    pub async fn load_conversations(&self) -> ChatResult<Vec<ConversationSummary>> {
        match self.refresh_list().await {
            Ok(list) => Ok(list),
            Err(err) => {
                warn!(?err, "Failed to load conversations");
                self.notify(format!("Could not load conversations: {err}")).await;
                Err(err.into())
            }
        }
    }

    async fn refresh_list(&self) -> ApiResult<Vec<ConversationSummary>> {
        let summaries = self.backend.list_conversations().await?;
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.replace_all(summaries.clone()).await {
                warn!(?err, "Failed to refresh conversation cache");
            }
        }
        let mut state = self.state.write().await;
        state.replace_summaries(summaries);
        Ok(state.summaries())
    }

    /// Show a conversation, fetching its history when it is durable.
    ///
    /// # Errors
    /// Returns `NotFound` if the conversation does not exist, or the backend error.
    pub async fn open_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> ChatResult<Vec<Message>> {
        if conversation_id.is_temporary() {
            let mut state = self.state.write().await;
            if state.summary(&conversation_id).is_none() {
                return Err(ChatError::NotFound(conversation_id));
            }
            state.set_active_conversation(conversation_id.clone());
            return Ok(state.rendered_messages(&conversation_id, self.clock.now()));
        }

        self.state.write().await.set_active_conversation(conversation_id.clone());
        match self.backend.get_conversation(conversation_id.clone()).await {
            Ok(detail) => {
                self.store_detail(detail).await;
                Ok(self.rendered_messages(&conversation_id).await)
            }
            Err(err) if err.is_not_found() => {
                self.forget_remote_deleted(&conversation_id).await;
                Err(ChatError::NotFound(conversation_id))
            }
            Err(err) => {
                self.notify(format!("Could not open conversation: {err}")).await;
                Err(err.into())
            }
        }
    }

    /// Show the empty composer; the next message starts a new conversation.
    pub async fn start_new_conversation(&self) {
        self.state.write().await.clear_active_conversation();
    }

    /// Delete a conversation.
    ///
    /// Temporary conversations are only cleared locally. Durable ones leave
    /// the list immediately and come back if the backend refuses the delete.
    ///
    /// # Errors
    /// Returns the backend error after rolling the local removal back.
    pub async fn delete_conversation(&self, conversation_id: ConversationId) -> ChatResult<()> {
        if conversation_id.is_temporary() {
            self.state.write().await.remove_conversation(&conversation_id);
            debug!(conversation_id = %conversation_id, "Cleared temporary conversation");
            return Ok(());
        }

        let snapshot = self.state.write().await.remove_conversation(&conversation_id);
        match self.backend.delete_conversation(conversation_id.clone()).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(conversation_id = %conversation_id, "Conversation already deleted remotely");
            }
            Err(err) => {
                warn!(
                    conversation_id = %conversation_id,
                    ?err,
                    "Delete failed, restoring conversation"
                );
                let mut state = self.state.write().await;
                state.restore_conversation(&conversation_id, snapshot);
                state.push_notification(
                    format!("Could not delete conversation: {err}"),
                    self.clock.now(),
                );
                return Err(err.into());
            }
        }
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.remove(conversation_id.clone()).await {
                warn!(?err, "Failed to remove conversation from cache");
            }
        }
        info!(conversation_id = %conversation_id, "Conversation deleted");
        Ok(())
    }

    // ===== Sending =========================================================

    /// Send a message and stream the reply.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        self.submit(text, Transport::Streaming).await
    }

    /// Send a message and wait for the complete reply.
    pub async fn send_message_blocking(&self, text: &str) -> SendOutcome {
        self.submit(text, Transport::Blocking).await
    }

    async fn submit(&self, text: &str, transport: Transport) -> SendOutcome {
        let staging = {
            let mut state = self.state.write().await;
            let staging = begin_submission(&mut state, text, self.clock.now());
            if matches!(staging, Staging::Staged(_)) {
                state.take_composer_text();
            }
            staging
        };
        let staged = match staging {
            Staging::Staged(staged) => staged,
            Staging::Rejected(reason) => return SendOutcome::Rejected(reason),
        };
        debug!(
            conversation_id = %staged.conversation_id,
            operation = %staged.operation,
            ?transport,
            "Submission staged"
        );
        self.publish(SyncEvent::StreamingStarted {
            conversation_id: staged.conversation_id.clone(),
        });

        let request = SendRequest {
            conversation_id: (!staged.conversation_id.is_temporary())
                .then(|| staged.conversation_id.clone()),
            content: staged.message.content.clone(),
        };
        let result = match transport {
            Transport::Streaming => {
                let promotion = self.spawn_promotion(&staged);
                let result = self.consume_stream(&staged, request).await;
                promotion.abort();
                result
            }
            Transport::Blocking => match self.backend.send_message(request).await {
                Ok(reply) => self.commit(&staged, reply.into()).await,
                Err(err) => Err(err.into()),
            },
        };

        match result {
            Ok(conversation_id) => SendOutcome::Committed { conversation_id },
            Err(ChatError::ShutDown) => SendOutcome::Abandoned,
            Err(err) => SendOutcome::Failed {
                notification: self.fail_submission(&staged, &err).await,
            },
        }
    }

    /// After the promotion delay, list the operation as a long-running task.
    fn spawn_promotion(&self, staged: &StagedSubmission) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let clock = self.clock;
        let delay = self.timing.promotion_delay();
        let operation = staged.operation;
        let message_id = staged.message.id.clone();
        let title = title_from_message(&staged.message.content);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = state.write().await;
            let Some(conversation_id) = state
                .in_flight_for_operation(operation)
                .map(|(id, _)| id.clone())
            else {
                return;
            };
            let step = state.progress_events(&conversation_id).last().map(|e| e.step.clone());
            let task_id = state
                .tasks_mut()
                .promote(conversation_id.clone(), message_id, title, step, clock.now());
            info!(
                task_id = %task_id,
                conversation_id = %conversation_id,
                "Promoted to long-running task"
            );
        })
    }

    async fn consume_stream(
        &self,
        staged: &StagedSubmission,
        request: SendRequest,
    ) -> ChatResult<ConversationId> {
        let mut stream = self.backend.send_message_streaming(request).await?;
        let mut adapter = StreamAdapter::new();
        let mut committed = None;

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                () = self.shutdown.wait() => {
                    info!(operation = %staged.operation, "Stopped consuming stream on shutdown");
                    return committed.ok_or(ChatError::ShutDown);
                }
            };
            let Some(item) = next else {
                break;
            };
            let event = match item {
                Ok(event) => event,
                Err(err) if committed.is_some() => {
                    warn!(?err, "Stream failed after its result");
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            match adapter.accept(event) {
                Ok(StreamStep::Progress { step, status }) => {
                    self.record_progress(staged.operation, step, status).await;
                }
                Ok(StreamStep::Finished(result)) => {
                    committed = Some(self.commit(staged, result).await?);
                }
                Err(err) => warn!(%err, "Ignoring notification after result"),
            }
        }

        adapter.finish()?;
        committed.ok_or(ChatError::StreamEndedWithoutResult)
    }

    async fn record_progress(&self, operation: OperationId, step: String, status: Option<String>) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let Some(conversation_id) =
            state.in_flight_for_operation(operation).map(|(id, _)| id.clone())
        else {
            return;
        };
        state.tasks_mut().update_step(&conversation_id, &step, now);
        debug!(conversation_id = %conversation_id, step = %step, "Progress");
        state.append_progress(ProgressEvent {
            conversation_id,
            step,
            status,
            received_at: now,
        });
    }

    /// Commit a result in one write section, migrating a temporary conversation.
    async fn commit(
        &self,
        staged: &StagedSubmission,
        result: StreamResult,
    ) -> ChatResult<ConversationId> {
        let now = self.clock.now();
        let (durable, migration, summary) = {
            let mut state = self.state.write().await;
            let current = state
                .in_flight_for_operation(staged.operation)
                .map_or_else(|| staged.conversation_id.clone(), |(id, _)| id.clone());
            let durable = match result.conversation_id {
                Some(id) => id,
                None if !current.is_temporary() => current.clone(),
                None => return Err(ChatError::MissingConversationId),
            };

            let migration = migrate(&mut state, &current, &durable);
            state.end_streaming(&current);
            state.end_streaming(&durable);

            let messages: Vec<Message> = result
                .messages
                .into_iter()
                .map(|mut m| {
                    m.conversation_id = durable.clone();
                    m
                })
                .collect();
            let summary = committed_summary(state.summary(&durable), &durable, &messages, now);
            state.upsert_summary(summary.clone());
            state.set_conversation_detail(durable.clone(), messages);
            state.clear_progress(&durable);
            if state.tasks_mut().complete(&durable, now) {
                info!(conversation_id = %durable, "Long-running task completed");
            }
            state.mark_completed(durable.clone(), now);
            state.reconcile_optimistic(&durable, now);
            (durable, migration, summary)
        };

        if let Some(event) = migration.event {
            self.publish(event);
        }
        self.publish(SyncEvent::StreamingStopped {
            conversation_id: durable.clone(),
        });
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.upsert(summary).await {
                warn!(?err, "Failed to cache conversation summary");
            }
        }
        info!(
            conversation_id = %durable,
            view_switched = migration.view_switched,
            "Reply committed"
        );
        Ok(durable)
    }

    async fn fail_submission(&self, staged: &StagedSubmission, err: &ChatError) -> u64 {
        let now = self.clock.now();
        let (conversation_id, notification) = {
            let mut state = self.state.write().await;
            let conversation_id = rollback(&mut state, staged, now);
            let notification = state.push_notification(failure_notice(err), now);
            (conversation_id, notification)
        };
        if err.is_transport() {
            warn!(conversation_id = %conversation_id, error = %err, "Submission failed");
        } else {
            error!(conversation_id = %conversation_id, error = %err, "Submission failed locally");
        }
        self.publish(SyncEvent::StreamingStopped { conversation_id });
        notification
    }

    /// Drop a conversation the backend no longer knows.
    async fn forget_remote_deleted(&self, conversation_id: &ConversationId) {
        let mut state = self.state.write().await;
        state.remove_summary(conversation_id);
        state.remove_conversation_detail(conversation_id);
        if state.active_conversation() == Some(conversation_id) {
            state.clear_active_conversation();
        }
        debug!(conversation_id = %conversation_id, "Conversation gone from backend");
    }

    async fn store_detail(&self, detail: ConversationDetail) {
        let now = self.clock.now();
        let conversation_id = detail.summary.id.clone();
        let mut state = self.state.write().await;
        state.upsert_summary(detail.summary);
        state.set_conversation_detail(conversation_id.clone(), detail.messages);
        state.reconcile_optimistic(&conversation_id, now);
    }

    async fn notify(&self, message: String) -> u64 {
        self.state.write().await.push_notification(message, self.clock.now())
    }

    fn publish(&self, event: SyncEvent) {
        self.bus.publish(self.tab_id, event);
    }

    // ===== Views ===========================================================

    /// Messages to render for a conversation now.
    pub async fn rendered_messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.rendered_messages_at(conversation_id, self.clock.now()).await
    }

    /// Messages to render for a conversation at `now`.
    ///
    /// Also runs the throttled optimistic cleanup.
    pub async fn rendered_messages_at(
        &self,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) -> Vec<Message> {
        let mut state = self.state.write().await;
        if let Some(dropped) = state.cleanup_stale_optimistic(now) {
            if dropped > 0 {
                debug!(dropped, "Dropped settled optimistic messages");
            }
        }
        state.rendered_messages(conversation_id, now)
    }

    /// Progress events of a conversation.
    pub async fn progress_events(&self, conversation_id: &ConversationId) -> Vec<ProgressEvent> {
        self.state.read().await.progress_events(conversation_id).to_vec()
    }

    /// Long-running tasks of this tab.
    pub async fn long_running_tasks(&self) -> Vec<LongRunningTask> {
        self.state.read().await.tasks().tasks().to_vec()
    }

    /// Conversation list, most recent first.
    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.state.read().await.summaries()
    }

    /// Conversation currently shown.
    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.state.read().await.active_conversation().cloned()
    }

    /// Whether this tab is streaming into a conversation.
    pub async fn is_streaming(&self, conversation_id: &ConversationId) -> bool {
        self.state.read().await.is_streaming(conversation_id)
    }

    /// Whether another tab reported streaming into a conversation.
    pub async fn is_streaming_elsewhere(&self, conversation_id: &ConversationId) -> bool {
        self.state.read().await.is_streaming_elsewhere(conversation_id)
    }

    /// Visible errors.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications().to_vec()
    }

    /// Dismiss an error.
    pub async fn dismiss_notification(&self, id: u64) -> bool {
        self.state.write().await.dismiss_notification(id)
    }

    /// Current composer text.
    pub async fn composer_text(&self) -> String {
        self.state.read().await.composer_text().to_string()
    }

    /// Replace the composer text.
    pub async fn set_composer_text(&self, text: impl Into<String>) {
        self.state.write().await.set_composer_text(text);
    }

    // ===== Cross-tab sync and lifecycle ====================================

    /// Apply an event from another tab; returns `false` for own events.
    pub async fn apply_sync_envelope(&self, envelope: SyncEnvelope) -> bool {
        if envelope.origin == self.tab_id {
            return false;
        }
        match envelope.event {
            SyncEvent::ConversationMigrated { temporary, durable } => {
                let mut state = self.state.write().await;
                let outcome = migrate(&mut state, &temporary, &durable);
                debug!(
                    durable = %durable,
                    view_switched = outcome.view_switched,
                    "Applied remote migration"
                );
            }
            SyncEvent::StreamingStarted { conversation_id } => {
                let now = self.clock.now();
                self.state.write().await.set_remote_streaming(conversation_id, true, now);
            }
            SyncEvent::StreamingStopped { conversation_id } => {
                let now = self.clock.now();
                self.state
                    .write()
                    .await
                    .set_remote_streaming(conversation_id.clone(), false, now);
                if !conversation_id.is_temporary() {
                    self.refresh_after_remote_reply(conversation_id).await;
                }
            }
        }
        true
    }

    async fn refresh_after_remote_reply(&self, conversation_id: ConversationId) {
        let known = {
            let state = self.state.read().await;
            state.conversation_messages(&conversation_id).is_some()
                || state.active_conversation() == Some(&conversation_id)
        };
        if known {
            match self.backend.get_conversation(conversation_id.clone()).await {
                Ok(detail) => self.store_detail(detail).await,
                Err(err) if err.is_not_found() => {
                    self.forget_remote_deleted(&conversation_id).await;
                }
                Err(err) => {
                    warn!(
                        conversation_id = %conversation_id,
                        ?err,
                        "Failed to refresh conversation"
                    );
                }
            }
        } else if let Err(err) = self.refresh_list().await {
            warn!(?err, "Failed to refresh conversation list");
        }
    }

    /// Apply bus events from other tabs until shutdown.
    #[must_use]
    pub fn spawn_sync_listener(&self) -> JoinHandle<()> {
        let mut receiver = self.bus.subscribe();
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = receiver.recv() => match received {
                        Ok(envelope) => {
                            controller.apply_sync_envelope(envelope).await;
                        }
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "Sync listener lagged"),
                        Err(RecvError::Closed) => break,
                    },
                    () = controller.shutdown.wait() => break,
                }
            }
            debug!(tab_id = %controller.tab_id, "Sync listener stopped");
        })
    }

    /// Start the periodic task and optimistic-message sweep.
    #[must_use]
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        MaintenanceWorker::new(
            Arc::clone(&self.state),
            self.clock,
            MaintenanceConfig::from_timing(&self.timing),
        )
        .with_shutdown(Arc::clone(&self.shutdown))
        .spawn()
    }

    /// Stop stream consumption and background tasks of this tab.
    ///
    /// In-flight backend operations are not cancelled.
    pub fn shutdown(&self) {
        info!(tab_id = %self.tab_id, "Shutting down chat controller");
        self.shutdown.trigger();
    }
}

/// User-facing text for a failed submission.
fn failure_notice(err: &ChatError) -> String {
    if err.is_retryable() {
        format!("Message could not be sent: {err}. Try sending it again.")
    } else if err.is_transport() {
        format!("Message could not be sent: {err}")
    } else {
        format!("Message failed: {err}")
    }
}

fn committed_summary(
    existing: Option<&ConversationSummary>,
    conversation_id: &ConversationId,
    messages: &[Message],
    now: DateTime<Utc>,
) -> ConversationSummary {
    let updated_at = messages.iter().map(|m| m.created_at).max().unwrap_or(now);
    match existing {
        Some(summary) => ConversationSummary {
            updated_at: updated_at.max(summary.updated_at),
            provisional: false,
            ..summary.clone()
        },
        None => ConversationSummary {
            id: conversation_id.clone(),
            title: messages
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| title_from_message(&m.content))
                .unwrap_or_default(),
            created_at: messages.first().map_or(now, |m| m.created_at),
            updated_at,
            provisional: false,
        },
    }
}

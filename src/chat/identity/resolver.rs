//! Temporary conversation identities and their migration to durable ids.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::chat::core::conversation::ConversationSummary;
use crate::chat::core::ids::{ConversationId, OperationId};
use crate::chat::core::message::Message;
use crate::chat::store::state::ChatState;
use crate::chat::sync::bus::SyncEvent;

/// Why a submission was ignored.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RejectReason {
    /// Nothing to send.
    EmptyMessage,
    /// The conversation already has an operation in flight.
    AlreadyStreaming,
}

/// A user message staged locally and awaiting the backend.
#[derive(Clone, Debug)]
pub struct StagedSubmission {
    /// Conversation the message was staged under (may be temporary).
    pub conversation_id: ConversationId,
    /// Optimistic message.
    pub message: Message,
    /// Operation tracking the backend call.
    pub operation: OperationId,
    /// Whether this submission minted the conversation.
    pub created_conversation: bool,
    /// Raw composer input, restored on failure.
    pub input: String,
}

/// Outcome of staging a submission.
#[derive(Clone, Debug)]
pub enum Staging {
    /// Staged and registered as in flight.
    Staged(StagedSubmission),
    /// Ignored; state untouched.
    Rejected(RejectReason),
}

/// Outcome of a migration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MigrationOutcome {
    /// The active pointer moved to the durable id.
    pub view_switched: bool,
    /// Event to broadcast, `None` when nothing migrated.
    pub event: Option<SyncEvent>,
}

/// Stage a user message, minting a temporary conversation when none is selected.
pub fn begin_submission(state: &mut ChatState, input: &str, now: DateTime<Utc>) -> Staging {
    let content = input.trim();
    if content.is_empty() {
        return Staging::Rejected(RejectReason::EmptyMessage);
    }

    let (conversation_id, created_conversation) = match state.active_conversation() {
        Some(active) => (active.clone(), false),
        None => (ConversationId::mint_temporary(now), true),
    };
    if state.is_streaming(&conversation_id) {
        debug!(conversation_id = %conversation_id, "Ignoring submission while streaming");
        return Staging::Rejected(RejectReason::AlreadyStreaming);
    }

    if created_conversation {
        state.set_active_conversation(conversation_id.clone());
        state.upsert_summary(ConversationSummary::provisional(
            conversation_id.clone(),
            content,
            now,
        ));
    }

    let message = Message::optimistic_user(conversation_id.clone(), content, now);
    let operation = OperationId::new();
    state.add_optimistic_message(message.clone());
    state.begin_streaming(conversation_id.clone(), operation, message.id.clone(), now);

    Staging::Staged(StagedSubmission {
        conversation_id,
        message,
        operation,
        created_conversation,
        input: input.to_string(),
    })
}

/// Move every local reference from `temporary` to `durable`.
///
/// The active pointer follows only if the tab is showing `temporary` right
/// now. Applying the same migration twice is a no-op.
pub fn migrate(
    state: &mut ChatState,
    temporary: &ConversationId,
    durable: &ConversationId,
) -> MigrationOutcome {
    if temporary == durable || !temporary.is_temporary() {
        return MigrationOutcome::default();
    }

    state.rekey_conversation(temporary, durable);

    let view_switched = state.active_conversation() == Some(temporary);
    if view_switched {
        state.set_active_conversation(durable.clone());
    }
    info!(temporary = %temporary, durable = %durable, view_switched, "Migrated conversation");

    MigrationOutcome {
        view_switched,
        event: Some(SyncEvent::ConversationMigrated {
            temporary: temporary.clone(),
            durable: durable.clone(),
        }),
    }
}

/// Undo a staged submission after the backend call failed.
///
/// Returns the conversation the submission ended up under.
pub fn rollback(
    state: &mut ChatState,
    staged: &StagedSubmission,
    now: DateTime<Utc>,
) -> ConversationId {
    let conversation_id = state
        .in_flight_for_operation(staged.operation)
        .map_or_else(|| staged.conversation_id.clone(), |(id, _)| id.clone());

    state.end_streaming(&conversation_id);
    state.remove_optimistic_message(&conversation_id, &staged.message.id);
    state.clear_progress(&conversation_id);
    state.tasks_mut().fail(&conversation_id, now);

    if conversation_id.is_temporary() {
        state.remove_summary(&conversation_id);
        if state.active_conversation() == Some(&conversation_id) {
            state.clear_active_conversation();
        }
    }

    if state.composer_text().is_empty() {
        state.set_composer_text(staged.input.clone());
    }
    debug!(conversation_id = %conversation_id, "Rolled back submission");
    conversation_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::config::ChatConfig;
    use crate::chat::core::conversation::ProgressEvent;
    use crate::chat::core::ids::MessageId;

    fn state() -> ChatState {
        ChatState::new(&ChatConfig::default()).unwrap()
    }

    fn staged(state: &mut ChatState, text: &str) -> StagedSubmission {
        match begin_submission(state, text, Utc::now()) {
            Staging::Staged(staged) => staged,
            Staging::Rejected(reason) => panic!("unexpected rejection: {reason:?}"),
        }
    }

    #[test]
    fn first_message_mints_temporary_conversation() {
        let mut state = state();
        let staged = staged(&mut state, "Find SaaS leads in Berlin");

        assert!(staged.created_conversation);
        assert!(staged.conversation_id.is_temporary());
        assert_eq!(state.active_conversation(), Some(&staged.conversation_id));
        assert_eq!(state.optimistic_messages(&staged.conversation_id).len(), 1);
        assert!(state.summary(&staged.conversation_id).unwrap().provisional);
        assert!(state.is_streaming(&staged.conversation_id));
    }

    #[test]
    fn second_submission_while_streaming_is_rejected() {
        let mut state = state();
        let first = staged(&mut state, "one");

        let second = begin_submission(&mut state, "two", Utc::now());

        assert!(matches!(second, Staging::Rejected(RejectReason::AlreadyStreaming)));
        assert_eq!(state.optimistic_messages(&first.conversation_id).len(), 1);
    }

    #[test]
    fn blank_submission_is_rejected() {
        let mut state = state();
        assert!(matches!(
            begin_submission(&mut state, "   \n", Utc::now()),
            Staging::Rejected(RejectReason::EmptyMessage)
        ));
        assert!(state.active_conversation().is_none());
    }

    #[test]
    fn migration_moves_view_when_still_on_temp() {
        let mut state = state();
        let staged = staged(&mut state, "hi");
        let durable = ConversationId::durable("c-100");
        state.append_progress(ProgressEvent {
            conversation_id: staged.conversation_id.clone(),
            step: "Thinking".to_string(),
            status: None,
            received_at: Utc::now(),
        });
        state.tasks_mut().promote(
            staged.conversation_id.clone(),
            staged.message.id.clone(),
            "hi",
            None,
            Utc::now(),
        );

        let outcome = migrate(&mut state, &staged.conversation_id, &durable);

        assert!(outcome.view_switched);
        assert_eq!(state.active_conversation(), Some(&durable));
        assert_eq!(state.optimistic_messages(&durable).len(), 1);
        assert_eq!(state.progress_events(&durable).len(), 1);
        assert!(state.tasks().task_for_conversation(&durable).is_some());
        assert!(state.is_streaming(&durable));
        assert!(!state.summary(&durable).unwrap().provisional);
        assert!(state.summary(&staged.conversation_id).is_none());
    }

    #[test]
    fn migration_leaves_view_on_other_conversation() {
        let mut state = state();
        let first = staged(&mut state, "hi");
        state.clear_active_conversation();
        let second = staged(&mut state, "another");
        let durable = ConversationId::durable("c-200");

        let outcome = migrate(&mut state, &first.conversation_id, &durable);

        assert!(!outcome.view_switched);
        assert_eq!(state.active_conversation(), Some(&second.conversation_id));
        assert_eq!(state.optimistic_messages(&durable).len(), 1);
    }

    #[test]
    fn migration_is_idempotent() {
        let mut state = state();
        let staged = staged(&mut state, "hi");
        let durable = ConversationId::durable("c-300");

        let first = migrate(&mut state, &staged.conversation_id, &durable);
        let second = migrate(&mut state, &staged.conversation_id, &durable);

        assert!(first.event.is_some());
        assert!(!second.view_switched);
        assert_eq!(state.active_conversation(), Some(&durable));
        assert_eq!(state.optimistic_messages(&durable).len(), 1);
    }

    #[test]
    fn durable_ids_never_migrate() {
        let mut state = state();
        let outcome = migrate(
            &mut state,
            &ConversationId::durable("c-1"),
            &ConversationId::durable("c-2"),
        );
        assert_eq!(outcome, MigrationOutcome::default());
    }

    #[test]
    fn rollback_clears_temp_conversation_and_restores_input() {
        let mut state = state();
        let staged = staged(&mut state, "  draft text ");

        let conversation = rollback(&mut state, &staged, Utc::now());

        assert_eq!(conversation, staged.conversation_id);
        assert!(state.optimistic_messages(&conversation).is_empty());
        assert!(state.summary(&conversation).is_none());
        assert!(state.active_conversation().is_none());
        assert!(!state.is_streaming(&conversation));
        assert_eq!(state.composer_text(), "  draft text ");
    }

    #[test]
    fn rollback_on_durable_conversation_keeps_it_selected() {
        let mut state = state();
        let durable = ConversationId::durable("c-5");
        state.set_active_conversation(durable.clone());
        let staged = staged(&mut state, "follow-up");

        rollback(&mut state, &staged, Utc::now());

        assert_eq!(state.active_conversation(), Some(&durable));
        assert!(state.optimistic_messages(&durable).is_empty());
        assert!(
            state
                .remove_optimistic_message(&durable, &MessageId::durable("none"))
                .is_none()
        );
    }
}

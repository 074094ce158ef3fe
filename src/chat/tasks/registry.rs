//! Registry of long-running tasks promoted from slow streaming operations.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::chat::core::conversation::{LongRunningTask, TaskStatus};
use crate::chat::core::ids::{ConversationId, MessageId, TaskId};

/// Visible background tasks, at most one pending per conversation.
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: Vec<LongRunningTask>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Register a pending task for a conversation, reusing an existing pending one.
    pub fn promote(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
        title: impl Into<String>,
        step: Option<String>,
        now: DateTime<Utc>,
    ) -> TaskId {
        if let Some(existing) = self.pending_mut(&conversation_id) {
            return existing.id;
        }
        let task = LongRunningTask {
            id: TaskId::new(),
            conversation_id,
            message_id,
            title: title.into(),
            step,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        debug!(
            task_id = %task.id,
            conversation_id = %task.conversation_id,
            "Promoted long-running task"
        );
        let id = task.id;
        self.tasks.push(task);
        id
    }

    /// Record the latest step of a pending task.
    pub fn update_step(
        &mut self,
        conversation_id: &ConversationId,
        step: &str,
        now: DateTime<Utc>,
    ) {
        if let Some(task) = self.pending_mut(conversation_id) {
            task.step = Some(step.to_string());
            task.updated_at = now;
        }
    }

    /// Mark the pending task of a conversation as completed.
    pub fn complete(&mut self, conversation_id: &ConversationId, now: DateTime<Utc>) -> bool {
        self.finish(conversation_id, TaskStatus::Completed, now)
    }

    /// Mark the pending task of a conversation as errored.
    pub fn fail(&mut self, conversation_id: &ConversationId, now: DateTime<Utc>) -> bool {
        self.finish(conversation_id, TaskStatus::Errored, now)
    }

    fn finish(
        &mut self,
        conversation_id: &ConversationId,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> bool {
        match self.pending_mut(conversation_id) {
            Some(task) => {
                task.status = status;
                task.updated_at = now;
                true
            }
            None => false,
        }
    }

    /// Move every task of `from` to `to`.
    pub fn rekey(&mut self, from: &ConversationId, to: &ConversationId) -> usize {
        let mut moved = 0;
        for task in self.tasks.iter_mut().filter(|t| &t.conversation_id == from) {
            task.conversation_id = to.clone();
            moved += 1;
        }
        moved
    }

    /// Drop all tasks of a conversation.
    pub fn remove_conversation(&mut self, conversation_id: &ConversationId) {
        self.tasks.retain(|t| &t.conversation_id != conversation_id);
    }

    /// Purge tasks older than `max_age`, whatever their state.
    pub fn sweep(&mut self, now: DateTime<Utc>, max_age: TimeDelta) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| now - t.created_at <= max_age);
        before - self.tasks.len()
    }

    /// Pending task of a conversation.
    #[must_use]
    pub fn task_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Option<&LongRunningTask> {
        self.tasks
            .iter()
            .find(|t| &t.conversation_id == conversation_id && t.status == TaskStatus::Pending)
    }

    /// All tasks in promotion order.
    #[must_use]
    pub fn tasks(&self) -> &[LongRunningTask] {
        &self.tasks
    }

    fn pending_mut(&mut self, conversation_id: &ConversationId) -> Option<&mut LongRunningTask> {
        self.tasks
            .iter_mut()
            .find(|t| &t.conversation_id == conversation_id && t.status == TaskStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ConversationId, MessageId) {
        let now = Utc::now();
        (ConversationId::mint_temporary(now), MessageId::mint_temporary(now))
    }

    #[test]
    fn promote_is_idempotent_while_pending() {
        let (conversation, message) = ids();
        let mut registry = TaskRegistry::new();
        let now = Utc::now();

        let first = registry.promote(conversation.clone(), message.clone(), "Research", None, now);
        let second = registry.promote(conversation, message, "Research", None, now);

        assert_eq!(first, second);
        assert_eq!(registry.tasks().len(), 1);
    }

    #[test]
    fn completion_follows_rekey() {
        let (temp, message) = ids();
        let durable = ConversationId::durable("c-42");
        let mut registry = TaskRegistry::new();
        let now = Utc::now();
        registry.promote(temp.clone(), message, "Research", None, now);

        assert_eq!(registry.rekey(&temp, &durable), 1);
        assert!(!registry.complete(&temp, now));
        assert!(registry.complete(&durable, now));
        assert_eq!(registry.tasks()[0].status, TaskStatus::Completed);
        assert!(registry.task_for_conversation(&durable).is_none());
    }

    #[test]
    fn update_step_touches_pending_only() {
        let (conversation, message) = ids();
        let mut registry = TaskRegistry::new();
        let now = Utc::now();
        registry.promote(conversation.clone(), message, "Research", None, now);
        registry.update_step(&conversation, "Searching companies", now);
        assert_eq!(registry.tasks()[0].step.as_deref(), Some("Searching companies"));

        registry.fail(&conversation, now);
        registry.update_step(&conversation, "late step", now);
        assert_eq!(registry.tasks()[0].step.as_deref(), Some("Searching companies"));
        assert_eq!(registry.tasks()[0].status, TaskStatus::Errored);
    }

    #[test]
    fn sweep_purges_old_tasks_regardless_of_state() {
        let (conversation, message) = ids();
        let mut registry = TaskRegistry::new();
        let start = Utc::now();
        registry.promote(conversation.clone(), message.clone(), "old", None, start);
        registry.promote(
            ConversationId::durable("other"),
            message,
            "fresh",
            None,
            start + TimeDelta::minutes(4),
        );

        let purged = registry.sweep(start + TimeDelta::minutes(6), TimeDelta::minutes(5));

        assert_eq!(purged, 1);
        assert_eq!(registry.tasks().len(), 1);
        assert_eq!(registry.tasks()[0].title, "fresh");
    }
}

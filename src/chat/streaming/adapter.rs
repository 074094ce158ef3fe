//! Contract enforcement for streamed calls: `progress* result`.

use tracing::warn;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::ConversationId;
use crate::chat::core::message::Message;
use crate::chat::streaming::events::StreamEvent;

/// What the caller should do with an accepted notification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamStep {
    /// Record a progress step.
    Progress {
        /// Step label.
        step: String,
        /// Optional status text.
        status: Option<String>,
    },
    /// Commit the final result.
    Finished(StreamResult),
}

/// Terminal payload of a streamed call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamResult {
    /// Durable conversation id, if any.
    pub conversation_id: Option<ConversationId>,
    /// Authoritative message list.
    pub messages: Vec<Message>,
}

/// Tracks one streamed call through its notifications.
#[derive(Debug, Default)]
pub struct StreamAdapter {
    progress_seen: usize,
    finished: bool,
}

impl StreamAdapter {
    /// Start tracking a new call.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            progress_seen: 0,
            finished: false,
        }
    }

    /// Accept the next notification.
    ///
    /// # Errors
    /// Returns an error for any notification after the result.
    pub fn accept(&mut self, event: StreamEvent) -> ChatResult<StreamStep> {
        if self.finished {
            warn!("Notification received after stream result");
            return Err(ChatError::Stream(
                "notification received after result".to_string(),
            ));
        }
        match event {
            StreamEvent::Progress { step, status } => {
                self.progress_seen += 1;
                Ok(StreamStep::Progress { step, status })
            }
            StreamEvent::Result {
                conversation_id,
                messages,
            } => {
                self.finished = true;
                Ok(StreamStep::Finished(StreamResult {
                    conversation_id,
                    messages,
                }))
            }
        }
    }

    /// Close the call once the transport has no more notifications.
    ///
    /// # Errors
    /// Returns an error if no result was received.
    pub fn finish(&self) -> ChatResult<()> {
        if self.finished {
            Ok(())
        } else {
            Err(ChatError::StreamEndedWithoutResult)
        }
    }

    /// Number of progress notifications accepted.
    #[must_use]
    pub const fn progress_seen(&self) -> usize {
        self.progress_seen
    }

    /// Whether the result was accepted.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(step: &str) -> StreamEvent {
        StreamEvent::Progress {
            step: step.to_string(),
            status: None,
        }
    }

    fn result() -> StreamEvent {
        StreamEvent::Result {
            conversation_id: Some(ConversationId::durable("c-1")),
            messages: Vec::new(),
        }
    }

    #[test]
    fn progress_then_result_is_accepted() {
        let mut adapter = StreamAdapter::new();
        assert!(matches!(adapter.accept(progress("a")), Ok(StreamStep::Progress { .. })));
        assert!(matches!(adapter.accept(progress("b")), Ok(StreamStep::Progress { .. })));
        assert!(matches!(adapter.accept(result()), Ok(StreamStep::Finished(_))));
        assert!(adapter.finish().is_ok());
        assert_eq!(adapter.progress_seen(), 2);
    }

    #[test]
    fn result_without_progress_is_accepted() {
        let mut adapter = StreamAdapter::new();
        assert!(matches!(adapter.accept(result()), Ok(StreamStep::Finished(_))));
        assert!(adapter.is_finished());
    }

    #[test]
    fn anything_after_result_is_a_violation() {
        let mut adapter = StreamAdapter::new();
        adapter.accept(result()).unwrap();
        assert!(matches!(adapter.accept(progress("late")), Err(ChatError::Stream(_))));
        assert!(matches!(adapter.accept(result()), Err(ChatError::Stream(_))));
    }

    #[test]
    fn missing_result_is_an_error() {
        let mut adapter = StreamAdapter::new();
        adapter.accept(progress("a")).unwrap();
        assert!(matches!(adapter.finish(), Err(ChatError::StreamEndedWithoutResult)));
    }
}

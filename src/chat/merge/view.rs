//! Merge of authoritative and optimistic messages into the rendered list.
//!
//! The backend is the source of truth. Optimistic messages fill the gap until
//! the backend confirms them; a temp message counts as confirmed when an
//! authoritative message with the same role and content was stamped by the
//! server within the optimistic window after the temp stamp.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};

use crate::chat::core::config::TimingConfig;
use crate::chat::core::message::{Message, Role};

/// What happens to an optimistic message against the authoritative set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OptimisticFate {
    /// Its id is already authoritative, or a durable twin was found.
    Superseded,
    /// Unmatched and older than the window: presumed failed.
    Expired,
    /// Still waiting for confirmation.
    Pending,
}

/// Classify one optimistic message.
#[must_use]
pub fn optimistic_fate(
    optimistic: &Message,
    authoritative: &[Message],
    now: DateTime<Utc>,
    window: TimeDelta,
) -> OptimisticFate {
    if authoritative.iter().any(|m| m.id == optimistic.id) {
        return OptimisticFate::Superseded;
    }
    let Some(local_ts) = optimistic.id.temporary_timestamp() else {
        return OptimisticFate::Pending;
    };

    let matched = authoritative.iter().any(|m| {
        let lag = m.created_at - local_ts;
        m.role == optimistic.role
            && m.content == optimistic.content
            && lag >= TimeDelta::zero()
            && lag <= window
    });
    if matched {
        OptimisticFate::Superseded
    } else if now - local_ts > window {
        OptimisticFate::Expired
    } else {
        OptimisticFate::Pending
    }
}

/// Inputs of one conversation's merge.
#[derive(Clone, Copy, Debug)]
pub struct MergeInput<'a> {
    /// Server-confirmed messages in order.
    pub authoritative: &'a [Message],
    /// Locally staged messages in order.
    pub optimistic: &'a [Message],
    /// When the last completion was recorded for the conversation.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Compute the messages to render for a conversation at `now`.
#[must_use]
pub fn merge_messages(
    input: MergeInput<'_>,
    now: DateTime<Utc>,
    timing: &TimingConfig,
) -> Vec<Message> {
    if input.authoritative.is_empty() {
        return input.optimistic.to_vec();
    }

    let mut rendered = visible_authoritative(input.authoritative, input.completed_at, now, timing);
    if input.optimistic.is_empty() {
        return rendered;
    }

    let window = timing.optimistic_window();
    let survivors = input
        .optimistic
        .iter()
        .filter(|m| optimistic_fate(m, input.authoritative, now, window) == OptimisticFate::Pending)
        .cloned();
    rendered.extend(survivors);

    let mut seen = HashSet::with_capacity(rendered.len());
    rendered.retain(|m| seen.insert(m.id.clone()));
    rendered
}

/// Authoritative messages minus the newest assistant reply during the appear delay.
fn visible_authoritative(
    authoritative: &[Message],
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timing: &TimingConfig,
) -> Vec<Message> {
    let delayed = completed_at
        .filter(|done| now - *done < timing.appear_delay())
        .and_then(|_| authoritative.iter().rposition(|m| m.role == Role::Assistant));

    authoritative
        .iter()
        .enumerate()
        .filter(|(idx, _)| Some(*idx) != delayed)
        .map(|(_, m)| m.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::ids::{ConversationId, MessageId};

    fn conversation() -> ConversationId {
        ConversationId::durable("c-1")
    }

    fn server(id: &str, role: Role, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::durable(id),
            conversation_id: conversation(),
            role,
            content: content.to_string(),
            created_at: at,
        }
    }

    fn input<'a>(authoritative: &'a [Message], optimistic: &'a [Message]) -> MergeInput<'a> {
        MergeInput {
            authoritative,
            optimistic,
            completed_at: None,
        }
    }

    #[test]
    fn optimistic_only_when_no_authoritative() {
        let t = Utc::now();
        let optimistic = vec![Message::optimistic_user(conversation(), "hi", t)];
        let rendered = merge_messages(input(&[], &optimistic), t, &TimingConfig::default());
        assert_eq!(rendered, optimistic);
    }

    #[test]
    fn authoritative_only_when_no_optimistic() {
        let t = Utc::now();
        let authoritative = vec![
            server("m1", Role::User, "hi", t),
            server("m2", Role::Assistant, "hello", t),
        ];
        let rendered = merge_messages(input(&authoritative, &[]), t, &TimingConfig::default());
        assert_eq!(rendered, authoritative);
    }

    #[test]
    fn matched_temp_message_is_superseded() {
        let t = Utc::now();
        let optimistic = vec![Message::optimistic_user(conversation(), "hi", t)];
        let authoritative =
            vec![server("m1", Role::User, "hi", t + TimeDelta::milliseconds(5_000))];

        let rendered = merge_messages(
            input(&authoritative, &optimistic),
            t + TimeDelta::milliseconds(6_000),
            &TimingConfig::default(),
        );

        assert_eq!(rendered, authoritative);
    }

    #[test]
    fn late_server_twin_does_not_match_but_expires() {
        let t = Utc::now();
        let optimistic = vec![Message::optimistic_user(conversation(), "hi", t)];
        let authoritative =
            vec![server("m1", Role::User, "hi", t + TimeDelta::milliseconds(40_000))];
        let window = TimingConfig::default().optimistic_window();

        assert_eq!(
            optimistic_fate(
                &optimistic[0],
                &authoritative,
                t + TimeDelta::milliseconds(10_000),
                window
            ),
            OptimisticFate::Pending
        );
        let rendered = merge_messages(
            input(&authoritative, &optimistic),
            t + TimeDelta::milliseconds(40_000),
            &TimingConfig::default(),
        );
        assert_eq!(rendered, authoritative);
    }

    #[test]
    fn server_twin_before_temp_stamp_does_not_match() {
        let t = Utc::now();
        let optimistic = Message::optimistic_user(conversation(), "hi", t);
        let authoritative = vec![server("m1", Role::User, "hi", t - TimeDelta::milliseconds(1))];
        let window = TimingConfig::default().optimistic_window();

        assert_eq!(
            optimistic_fate(&optimistic, &authoritative, t, window),
            OptimisticFate::Pending
        );
    }

    #[test]
    fn recent_unmatched_message_is_kept_after_authoritative() {
        let t = Utc::now();
        let authoritative = vec![server("m1", Role::User, "first", t)];
        let optimistic = vec![Message::optimistic_user(conversation(), "second", t)];

        let rendered =
            merge_messages(input(&authoritative, &optimistic), t, &TimingConfig::default());

        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[1].content, "second");
    }

    #[test]
    fn optimistic_with_authoritative_id_is_dropped() {
        let t = Utc::now();
        let authoritative = vec![server("m1", Role::User, "hi", t)];
        let optimistic = vec![server("m1", Role::User, "hi (local copy)", t)];

        let rendered =
            merge_messages(input(&authoritative, &optimistic), t, &TimingConfig::default());

        assert_eq!(rendered, authoritative);
    }

    #[test]
    fn newest_assistant_message_waits_for_appear_delay() {
        let t = Utc::now();
        let authoritative = vec![
            server("m1", Role::User, "hi", t),
            server("m2", Role::Assistant, "hello", t),
        ];
        let timing = TimingConfig::default();
        let merge = MergeInput {
            authoritative: &authoritative,
            optimistic: &[],
            completed_at: Some(t),
        };

        let during = merge_messages(merge, t + TimeDelta::milliseconds(500), &timing);
        assert_eq!(during.len(), 1);
        assert_eq!(during[0].id.as_str(), "m1");

        let after = merge_messages(merge, t + TimeDelta::milliseconds(1_000), &timing);
        assert_eq!(after, authoritative);
    }

    #[test]
    fn identical_messages_within_window_are_both_absorbed() {
        // Content+timing matching cannot tell two identical sends apart.
        let t = Utc::now();
        let optimistic = vec![
            Message::optimistic_user(conversation(), "ok", t),
            Message::optimistic_user(conversation(), "ok", t + TimeDelta::milliseconds(2_000)),
        ];
        let authoritative =
            vec![server("m1", Role::User, "ok", t + TimeDelta::milliseconds(3_000))];

        let rendered = merge_messages(
            input(&authoritative, &optimistic),
            t + TimeDelta::milliseconds(3_000),
            &TimingConfig::default(),
        );

        assert_eq!(rendered, authoritative);
    }
}

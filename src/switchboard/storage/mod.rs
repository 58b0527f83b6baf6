//! Conversation persistence keyed by `(user, session, agent)`.
//!
//! Each key names an independent append-only log of timestamped turns.
//! Back-ends enforce three rules, implemented once here and shared:
//!
//! - **Same-role suppression**: a write whose role matches the log's last
//!   stored role is a no-op. Accidental double-appends during dispatch or
//!   streaming must not corrupt the user/assistant alternation.
//! - **Trimming**: when a bound is given, only the most recent
//!   `max_history_size` turns survive, dropping oldest first. The newest
//!   turn is never removed.
//! - **Merged view**: [`fetch_all_chats`](ChatStorage::fetch_all_chats)
//!   unions every per-agent log for a `(user, session)`, tags assistant
//!   turns with `[<agent_id>] `, and sorts by timestamp.
//!
//! Stored form is always timestamped; callers get plain
//! [`ConversationMessage`]s back.

use std::error::Error;

use async_trait::async_trait;

use crate::switchboard::message::{
    ContentBlock, ConversationMessage, ParticipantRole, TimestampedMessage,
};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryChatStorage;
pub use sqlite::SqliteChatStorage;

/// Separator for encoded conversation keys. Must not occur in any key
/// component.
pub const KEY_DELIMITER: char = '#';

/// Encode a `(user, session, agent)` triple as a single storage key.
pub fn conversation_key(user_id: &str, session_id: &str, agent_id: &str) -> String {
    format!(
        "{}{}{}{}{}",
        user_id, KEY_DELIMITER, session_id, KEY_DELIMITER, agent_id
    )
}

/// Split an encoded key back into `(user, session, agent)`.
pub fn split_conversation_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.splitn(3, KEY_DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(u), Some(s), Some(a)) => Some((u, s, a)),
        _ => None,
    }
}

/// True when appending `new_message` would produce two consecutive turns
/// with the same role.
pub fn is_same_role_as_last(
    conversation: &[TimestampedMessage],
    new_message: &ConversationMessage,
) -> bool {
    conversation
        .last()
        .map(|last| last.message.role == new_message.role)
        .unwrap_or(false)
}

/// Keep only the most recent `max_history_size` turns, oldest dropped
/// first. `None` leaves the log untouched.
pub fn trim_conversation(conversation: &mut Vec<TimestampedMessage>, max_history_size: Option<usize>) {
    if let Some(max) = max_history_size {
        if conversation.len() > max {
            let excess = conversation.len() - max;
            conversation.drain(..excess);
        }
    }
}

/// Drop timestamps for the caller-facing form.
pub fn strip_timestamps(conversation: &[TimestampedMessage]) -> Vec<ConversationMessage> {
    conversation.iter().map(|m| m.message.clone()).collect()
}

/// Assemble the cross-agent merged view from per-agent logs.
///
/// Assistant turns with a non-empty first text block get that block
/// rewritten with a `[<agent_id>] ` prefix; user, system and tool turns
/// pass through unchanged. The combined sequence is sorted by timestamp
/// ascending; the sort is stable, so ties keep per-log insertion order.
pub fn merge_timeline<'a, I>(logs: I) -> Vec<ConversationMessage>
where
    I: IntoIterator<Item = (&'a str, &'a [TimestampedMessage])>,
{
    let mut combined: Vec<TimestampedMessage> = Vec::new();
    for (agent_id, messages) in logs {
        for stored in messages {
            let mut message = stored.message.clone();
            if message.role == ParticipantRole::Assistant {
                prefix_first_text_block(&mut message, agent_id);
            }
            combined.push(TimestampedMessage::with_timestamp(
                message,
                stored.timestamp,
            ));
        }
    }
    combined.sort_by_key(|m| m.timestamp);
    strip_timestamps(&combined)
}

fn prefix_first_text_block(message: &mut ConversationMessage, agent_id: &str) {
    for block in &mut message.content {
        if let ContentBlock::Text { text } = block {
            if !text.is_empty() {
                *text = format!("[{}] {}", agent_id, text);
            }
            return;
        }
    }
}

/// Contract every storage back-end must satisfy.
///
/// Writers must evaluate suppression and trimming atomically with the
/// append for a given key; concurrent writes to distinct keys are
/// independent. Read failures are the caller's to absorb (the orchestrator
/// degrades them to an empty history).
#[async_trait]
pub trait ChatStorage: Send + Sync {
    /// Append one turn to `(user_id, session_id, agent_id)` and return the
    /// resulting log. A same-role append is suppressed without error.
    async fn save_message(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        message: ConversationMessage,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>>;

    /// Append several turns. Suppression applies per message, so the log
    /// never ends up with two consecutive same-role turns.
    async fn save_messages(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        messages: Vec<ConversationMessage>,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>>;

    /// Read one agent-scoped log, optionally bounded to the most recent
    /// `max_history_size` turns.
    async fn fetch_chat(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>>;

    /// The time-ordered union of every agent-scoped log for this
    /// `(user, session)`, with assistant turns tagged by agent id.
    async fn fetch_all_chats(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switchboard::message::ParticipantRole;

    fn ts(msg: ConversationMessage, t: i64) -> TimestampedMessage {
        TimestampedMessage::with_timestamp(msg, t)
    }

    #[test]
    fn test_key_round_trip() {
        let key = conversation_key("u1", "s1", "tech");
        assert_eq!(key, "u1#s1#tech");
        assert_eq!(split_conversation_key(&key), Some(("u1", "s1", "tech")));
        assert_eq!(split_conversation_key("no-delimiters"), None);
    }

    #[test]
    fn test_same_role_detection() {
        let log = vec![ts(ConversationMessage::user("a"), 1)];
        assert!(is_same_role_as_last(&log, &ConversationMessage::user("b")));
        assert!(!is_same_role_as_last(
            &log,
            &ConversationMessage::assistant("b")
        ));
        assert!(!is_same_role_as_last(&[], &ConversationMessage::user("a")));
    }

    #[test]
    fn test_trim_drops_oldest_first() {
        let mut log = vec![
            ts(ConversationMessage::user("1"), 1),
            ts(ConversationMessage::assistant("1"), 2),
            ts(ConversationMessage::user("2"), 3),
            ts(ConversationMessage::assistant("2"), 4),
        ];
        trim_conversation(&mut log, Some(2));
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message.first_text(), Some("2"));
        assert_eq!(log[1].message.first_text(), Some("2"));
        assert_eq!(log[1].message.role, ParticipantRole::Assistant);
    }

    #[test]
    fn test_trim_without_bound_is_noop() {
        let mut log = vec![ts(ConversationMessage::user("1"), 1)];
        trim_conversation(&mut log, None);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_merge_prefixes_and_sorts() {
        let a_log = vec![
            ts(ConversationMessage::user("x"), 1),
            ts(ConversationMessage::assistant("z"), 3),
        ];
        let b_log = vec![ts(ConversationMessage::assistant("y"), 2)];

        let merged = merge_timeline(vec![
            ("a", a_log.as_slice()),
            ("b", b_log.as_slice()),
        ]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].first_text(), Some("x"));
        assert_eq!(merged[1].first_text(), Some("[b] y"));
        assert_eq!(merged[2].first_text(), Some("[a] z"));
    }

    #[test]
    fn test_merge_leaves_tool_and_empty_turns_untagged() {
        let log = vec![
            ts(
                ConversationMessage::new(ParticipantRole::Tool, vec![ContentBlock::text("raw")]),
                1,
            ),
            ts(ConversationMessage::new(ParticipantRole::Assistant, vec![]), 2),
            ts(
                ConversationMessage::new(
                    ParticipantRole::Assistant,
                    vec![ContentBlock::Text {
                        text: String::new(),
                    }],
                ),
                3,
            ),
        ];
        let merged = merge_timeline(vec![("a", log.as_slice())]);
        assert_eq!(merged[0].first_text(), Some("raw"));
        assert!(merged[1].content.is_empty());
        assert_eq!(merged[2].first_text(), Some(""));
    }

    #[test]
    fn test_merge_prefixes_first_text_block_only() {
        let log = vec![ts(
            ConversationMessage::new(
                ParticipantRole::Assistant,
                vec![ContentBlock::text("first"), ContentBlock::text("second")],
            ),
            1,
        )];
        let merged = merge_timeline(vec![("tech", log.as_slice())]);
        assert_eq!(merged[0].content[0].as_text(), Some("[tech] first"));
        assert_eq!(merged[0].content[1].as_text(), Some("second"));
    }
}

//! Canonical shapes for conversation turns.
//!
//! Every exchange flowing through the router is expressed as a
//! [`ConversationMessage`]: a participant role plus an ordered sequence of
//! [`ContentBlock`]s. Storage back-ends persist the timestamped form
//! ([`TimestampedMessage`]); callers only ever see the plain form, with
//! timestamps stripped on the way out.
//!
//! The content model mirrors the wire shape used by hosted chat APIs: a
//! text block serialises as `{"text": "..."}`, and the non-text variants
//! (`tool_use`, `tool_result`, `image`) are carried opaquely. The router
//! itself only ever inspects text.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The role attached to every conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// A human end-user turn.
    User,
    /// A turn produced by an agent (or fabricated by the orchestrator).
    Assistant,
    /// A priming or constraint message.
    System,
    /// A tool-result turn correlated with a prior assistant tool call.
    Tool,
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParticipantRole::User => "user",
            ParticipantRole::Assistant => "assistant",
            ParticipantRole::System => "system",
            ParticipantRole::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ParticipantRole::User),
            "assistant" => Ok(ParticipantRole::Assistant),
            "system" => Ok(ParticipantRole::System),
            "tool" => Ok(ParticipantRole::Tool),
            other => Err(format!("unknown participant role: {}", other)),
        }
    }
}

/// One tagged element inside a turn's content sequence.
///
/// The canonical variant is [`ContentBlock::Text`]; the remaining variants
/// are passed through between agents and storage without interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    /// Plain text, serialised as `{"text": "..."}`.
    Text { text: String },
    /// An opaque tool invocation requested by an agent.
    ToolUse { tool_use: serde_json::Value },
    /// An opaque tool result fed back to an agent.
    ToolResult { tool_result: serde_json::Value },
    /// An opaque image payload.
    Image { image: serde_json::Value },
}

impl ContentBlock {
    /// Build a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// The text of this block, if it is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }
}

/// A single conversation turn: a role and an ordered content sequence.
///
/// `content` is always a sequence, even for plain text; an empty sequence
/// means "no textual output".
///
/// # Examples
///
/// ```
/// use switchboard::{ContentBlock, ConversationMessage, ParticipantRole};
///
/// let msg = ConversationMessage::user("hello");
/// assert_eq!(msg.role, ParticipantRole::User);
/// assert_eq!(msg.first_text(), Some("hello"));
///
/// let empty = ConversationMessage::new(ParticipantRole::Assistant, vec![]);
/// assert_eq!(empty.first_text(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: ParticipantRole,
    pub content: Vec<ContentBlock>,
}

impl ConversationMessage {
    pub fn new(role: ParticipantRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// A single-text-block user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ParticipantRole::User, vec![ContentBlock::text(text)])
    }

    /// A single-text-block assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(ParticipantRole::Assistant, vec![ContentBlock::text(text)])
    }

    /// The text of the first text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|b| b.as_text())
    }

    /// All text blocks concatenated in order.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| b.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A [`ConversationMessage`] plus the epoch-millisecond instant it was
/// written. Storage back-ends assign the timestamp at write time via
/// [`now_millis`] when the caller did not provide one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedMessage {
    #[serde(flatten)]
    pub message: ConversationMessage,
    pub timestamp: i64,
}

impl TimestampedMessage {
    /// Stamp a message with the current (monotonic) wall clock.
    pub fn new(message: ConversationMessage) -> Self {
        Self {
            message,
            timestamp: now_millis(),
        }
    }

    /// Wrap a message with an explicit timestamp.
    pub fn with_timestamp(message: ConversationMessage, timestamp: i64) -> Self {
        Self { message, timestamp }
    }
}

impl From<ConversationMessage> for TimestampedMessage {
    fn from(message: ConversationMessage) -> Self {
        TimestampedMessage::new(message)
    }
}

/// Current epoch milliseconds, guaranteed non-decreasing within the
/// process even if the wall clock steps backwards. The merged cross-agent
/// view sorts by these values, so a retreating clock must never reorder
/// writes that already happened.
pub fn now_millis() -> i64 {
    static HIGH_WATER: AtomicI64 = AtomicI64::new(0);
    let wall = Utc::now().timestamp_millis();
    let prev = HIGH_WATER.fetch_max(wall, Ordering::SeqCst);
    prev.max(wall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display_and_parse_round_trip() {
        for role in [
            ParticipantRole::User,
            ParticipantRole::Assistant,
            ParticipantRole::System,
            ParticipantRole::Tool,
        ] {
            let parsed: ParticipantRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("moderator".parse::<ParticipantRole>().is_err());
    }

    #[test]
    fn test_text_block_wire_shape() {
        let block = ContentBlock::text("hi");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hi"}));

        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(back.as_text(), Some("hi"));
    }

    #[test]
    fn test_opaque_blocks_round_trip() {
        let block = ContentBlock::ToolUse {
            tool_use: serde_json::json!({"name": "lookup", "input": {"q": "x"}}),
        };
        let json = serde_json::to_string(&block).unwrap();
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
        assert_eq!(back.as_text(), None);
    }

    #[test]
    fn test_joined_text_skips_non_text_blocks() {
        let msg = ConversationMessage::new(
            ParticipantRole::Assistant,
            vec![
                ContentBlock::text("a"),
                ContentBlock::Image {
                    image: serde_json::json!({}),
                },
                ContentBlock::text("b"),
            ],
        );
        assert_eq!(msg.joined_text(), "ab");
        assert_eq!(msg.first_text(), Some("a"));
    }

    #[test]
    fn test_timestamped_serde_flattens() {
        let ts = TimestampedMessage::with_timestamp(ConversationMessage::user("x"), 42);
        let json = serde_json::to_value(&ts).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["content"][0]["text"], "x");
    }

    #[test]
    fn test_now_millis_is_non_decreasing() {
        let mut last = now_millis();
        for _ in 0..1000 {
            let next = now_millis();
            assert!(next >= last);
            last = next;
        }
    }
}

//! In-process storage back-end.
//!
//! Logs live in a `RwLock`-guarded map from encoded conversation key to a
//! vector of timestamped turns. The write lock spans the whole
//! read-modify-write of a save, so suppression and trimming are evaluated
//! atomically per key.

use std::collections::HashMap;
use std::error::Error;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::switchboard::message::{ConversationMessage, TimestampedMessage};
use crate::switchboard::storage::{
    conversation_key, is_same_role_as_last, merge_timeline, split_conversation_key,
    strip_timestamps, trim_conversation, ChatStorage,
};

/// Volatile storage suitable for tests, demos, and single-process
/// deployments. Logs are created lazily on first write and never deleted.
#[derive(Default)]
pub struct InMemoryChatStorage {
    conversations: RwLock<HashMap<String, Vec<TimestampedMessage>>>,
}

impl InMemoryChatStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStorage for InMemoryChatStorage {
    async fn save_message(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        message: ConversationMessage,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>> {
        let key = conversation_key(user_id, session_id, agent_id);
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.entry(key).or_default();

        if is_same_role_as_last(conversation, &message) {
            log::debug!(
                "consecutive {} message for agent {}, not saving",
                message.role,
                agent_id
            );
            return Ok(strip_timestamps(conversation));
        }

        conversation.push(TimestampedMessage::new(message));
        trim_conversation(conversation, max_history_size);
        Ok(strip_timestamps(conversation))
    }

    async fn save_messages(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        messages: Vec<ConversationMessage>,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>> {
        let key = conversation_key(user_id, session_id, agent_id);
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.entry(key).or_default();

        for message in messages {
            if is_same_role_as_last(conversation, &message) {
                log::debug!(
                    "consecutive {} message for agent {}, not saving",
                    message.role,
                    agent_id
                );
                continue;
            }
            conversation.push(TimestampedMessage::new(message));
        }
        trim_conversation(conversation, max_history_size);
        Ok(strip_timestamps(conversation))
    }

    async fn fetch_chat(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>> {
        let key = conversation_key(user_id, session_id, agent_id);
        let conversations = self.conversations.read().await;
        let mut conversation = conversations.get(&key).cloned().unwrap_or_default();
        trim_conversation(&mut conversation, max_history_size);
        Ok(strip_timestamps(&conversation))
    }

    async fn fetch_all_chats(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>> {
        let conversations = self.conversations.read().await;
        let logs = conversations.iter().filter_map(|(key, messages)| {
            match split_conversation_key(key) {
                Some((u, s, agent_id)) if u == user_id && s == session_id => {
                    Some((agent_id, messages.as_slice()))
                }
                _ => None,
            }
        });
        Ok(merge_timeline(logs))
    }
}

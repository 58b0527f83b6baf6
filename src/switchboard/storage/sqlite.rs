//! Durable storage back-end on SQLite.
//!
//! One row per turn, keyed by the `(user, session, agent)` triple plus a
//! monotonically increasing rowid that preserves per-log insertion order.
//! Content blocks are stored as their JSON wire form. The connection sits
//! behind a `Mutex`, so suppression, append, and trim for a key happen
//! under one critical section; writers to distinct keys still serialize on
//! the connection, which SQLite requires anyway.

use std::error::Error;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;

use crate::switchboard::message::{
    ContentBlock, ConversationMessage, ParticipantRole, TimestampedMessage,
};
use crate::switchboard::storage::{merge_timeline, ChatStorage};

/// Initialise the conversations table. Safe to call on every startup.
fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            session_id TEXT NOT NULL,
            agent_id   TEXT NOT NULL,
            role       TEXT NOT NULL,
            content    TEXT NOT NULL,
            timestamp  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_key
            ON conversations(user_id, session_id, agent_id, id);",
    )
}

/// SQLite-backed [`ChatStorage`].
pub struct SqliteChatStorage {
    conn: Mutex<Connection>,
}

impl SqliteChatStorage {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private in-memory database, handy for tests.
    pub fn open_in_memory() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn last_role(
        conn: &Connection,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
    ) -> rusqlite::Result<Option<String>> {
        let result = conn.query_row(
            "SELECT role FROM conversations
             WHERE user_id = ?1 AND session_id = ?2 AND agent_id = ?3
             ORDER BY id DESC LIMIT 1",
            rusqlite::params![user_id, session_id, agent_id],
            |row| row.get(0),
        );
        match result {
            Ok(role) => Ok(Some(role)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn insert_message(
        conn: &Connection,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        message: &TimestampedMessage,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let content = serde_json::to_string(&message.message.content)?;
        conn.execute(
            "INSERT INTO conversations (user_id, session_id, agent_id, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                user_id,
                session_id,
                agent_id,
                message.message.role.to_string(),
                content,
                message.timestamp,
            ],
        )?;
        Ok(())
    }

    fn trim_log(
        conn: &Connection,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        max_history_size: Option<usize>,
    ) -> rusqlite::Result<()> {
        if let Some(max) = max_history_size {
            conn.execute(
                "DELETE FROM conversations
                 WHERE user_id = ?1 AND session_id = ?2 AND agent_id = ?3
                   AND id NOT IN (
                       SELECT id FROM conversations
                       WHERE user_id = ?1 AND session_id = ?2 AND agent_id = ?3
                       ORDER BY id DESC LIMIT ?4
                   )",
                rusqlite::params![user_id, session_id, agent_id, max as i64],
            )?;
        }
        Ok(())
    }

    fn read_log(
        conn: &Connection,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
    ) -> Result<Vec<TimestampedMessage>, Box<dyn Error + Send + Sync>> {
        let mut stmt = conn.prepare(
            "SELECT role, content, timestamp FROM conversations
             WHERE user_id = ?1 AND session_id = ?2 AND agent_id = ?3
             ORDER BY id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user_id, session_id, agent_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;

        let mut log = Vec::new();
        for row in rows {
            let (role, content, timestamp) = row?;
            log.push(decode_row(&role, &content, timestamp)?);
        }
        Ok(log)
    }
}

fn decode_row(
    role: &str,
    content: &str,
    timestamp: i64,
) -> Result<TimestampedMessage, Box<dyn Error + Send + Sync>> {
    let role: ParticipantRole = role.parse().map_err(Box::<dyn Error + Send + Sync>::from)?;
    let content: Vec<ContentBlock> = serde_json::from_str(content)?;
    Ok(TimestampedMessage::with_timestamp(
        ConversationMessage::new(role, content),
        timestamp,
    ))
}

#[async_trait]
impl ChatStorage for SqliteChatStorage {
    async fn save_message(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        message: ConversationMessage,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>> {
        let conn = self.conn.lock().unwrap();
        let last = Self::last_role(&conn, user_id, session_id, agent_id)?;
        if last.as_deref() == Some(message.role.to_string().as_str()) {
            log::debug!(
                "consecutive {} message for agent {}, not saving",
                message.role,
                agent_id
            );
        } else {
            Self::insert_message(
                &conn,
                user_id,
                session_id,
                agent_id,
                &TimestampedMessage::new(message),
            )?;
            Self::trim_log(&conn, user_id, session_id, agent_id, max_history_size)?;
        }
        let log = Self::read_log(&conn, user_id, session_id, agent_id)?;
        Ok(log.into_iter().map(|m| m.message).collect())
    }

    async fn save_messages(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        messages: Vec<ConversationMessage>,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>> {
        let conn = self.conn.lock().unwrap();
        for message in messages {
            let last = Self::last_role(&conn, user_id, session_id, agent_id)?;
            if last.as_deref() == Some(message.role.to_string().as_str()) {
                log::debug!(
                    "consecutive {} message for agent {}, not saving",
                    message.role,
                    agent_id
                );
                continue;
            }
            Self::insert_message(
                &conn,
                user_id,
                session_id,
                agent_id,
                &TimestampedMessage::new(message),
            )?;
        }
        Self::trim_log(&conn, user_id, session_id, agent_id, max_history_size)?;
        let log = Self::read_log(&conn, user_id, session_id, agent_id)?;
        Ok(log.into_iter().map(|m| m.message).collect())
    }

    async fn fetch_chat(
        &self,
        user_id: &str,
        session_id: &str,
        agent_id: &str,
        max_history_size: Option<usize>,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>> {
        let conn = self.conn.lock().unwrap();
        let mut log = Self::read_log(&conn, user_id, session_id, agent_id)?;
        if let Some(max) = max_history_size {
            if log.len() > max {
                log.drain(..log.len() - max);
            }
        }
        Ok(log.into_iter().map(|m| m.message).collect())
    }

    async fn fetch_all_chats(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<ConversationMessage>, Box<dyn Error + Send + Sync>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT agent_id, role, content, timestamp FROM conversations
             WHERE user_id = ?1 AND session_id = ?2
             ORDER BY agent_id, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        // Group rows into per-agent logs, preserving insertion order within
        // each log so merge ties stay stable.
        let mut logs: Vec<(String, Vec<TimestampedMessage>)> = Vec::new();
        for row in rows {
            let (agent_id, role, content, timestamp) = row?;
            let message = decode_row(&role, &content, timestamp)?;
            let same_agent = logs.last().map_or(false, |(id, _)| *id == agent_id);
            if same_agent {
                if let Some((_, messages)) = logs.last_mut() {
                    messages.push(message);
                }
            } else {
                logs.push((agent_id, vec![message]));
            }
        }

        Ok(merge_timeline(
            logs.iter().map(|(id, msgs)| (id.as_str(), msgs.as_slice())),
        ))
    }
}

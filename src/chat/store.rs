//! Persistence for conversations and avatars.

use super::models::{Avatar, ChatMessage, Conversation, MessageRole};
use crate::persistence::{open_versioned, SqlType, Table, VersionedSchema};
use crate::sqlite_column;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

pub trait ConversationStore: Send + Sync {
    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Inserts or fully replaces a conversation, messages included.
    fn save_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Appends one message. Returns false if the conversation is gone.
    fn append_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<bool>;

    /// Conversations owned by `owner`, most recently updated first.
    fn list_conversations(&self, owner: &str) -> Result<Vec<Conversation>>;

    fn delete_conversation(&self, id: &str) -> Result<bool>;

    fn get_avatar(&self, id: &str) -> Result<Option<Avatar>>;

    /// Inserts or fully replaces an avatar.
    fn save_avatar(&self, avatar: &Avatar) -> Result<()>;

    fn delete_avatar(&self, id: &str) -> Result<bool>;

    /// Public avatars plus the ones owned by `user`, newest first.
    fn list_avatars_visible_to(&self, user: &str) -> Result<Vec<Avatar>>;
}

// =============================================================================
// SQLite
// =============================================================================

const CONVERSATIONS_TABLE_V1: Table = Table {
    name: "conversations",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("title", SqlType::Text, non_null = true),
        sqlite_column!("model_id", SqlType::Text, non_null = true),
        sqlite_column!("avatar_ids", SqlType::Text, non_null = true),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_conversations_user_updated", "user_id, updated_at DESC")],
};

const MESSAGES_TABLE_V1: Table = Table {
    name: "messages",
    columns: &[
        sqlite_column!("id", SqlType::Integer, is_primary_key = true),
        sqlite_column!("conversation_id", SqlType::Text, non_null = true),
        sqlite_column!("role", SqlType::Text, non_null = true),
        sqlite_column!("content", SqlType::Text, non_null = true),
        sqlite_column!("timestamp", SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_messages_conversation", "conversation_id, id")],
};

const AVATARS_TABLE_V1: Table = Table {
    name: "avatars",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("name", SqlType::Text, non_null = true),
        sqlite_column!("description", SqlType::Text, non_null = true),
        sqlite_column!("story", SqlType::Text, non_null = true),
        sqlite_column!("persona", SqlType::Text, non_null = true),
        sqlite_column!("profile_image_url", SqlType::Text, non_null = true),
        sqlite_column!("is_public", SqlType::Integer, non_null = true),
        sqlite_column!("owner_id", SqlType::Text, non_null = true),
        sqlite_column!("creator_nickname", SqlType::Text, non_null = true),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_avatars_owner", "owner_id")],
};

const CHAT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[CONVERSATIONS_TABLE_V1, MESSAGES_TABLE_V1, AVATARS_TABLE_V1],
    migration: None,
}];

pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConversationStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), CHAT_VERSIONED_SCHEMAS, "chat")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let mut stmt = conn.prepare(
            "SELECT role, content, timestamp FROM messages WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, timestamp) = row?;
            messages.push(ChatMessage {
                role: parse_role(&role)?,
                content,
                timestamp,
            });
        }
        Ok(messages)
    }

    fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<(Conversation, String)> {
        let avatar_ids: String = row.get("avatar_ids")?;
        Ok((
            Conversation {
                id: row.get("id")?,
                owner: row.get("user_id")?,
                title: row.get("title")?,
                created_at: row.get("created_at")?,
                updated_at: row.get("updated_at")?,
                messages: Vec::new(),
                model_id: row.get("model_id")?,
                avatar_ids: Vec::new(),
            },
            avatar_ids,
        ))
    }

    fn hydrate(conn: &Connection, (mut conversation, avatar_ids): (Conversation, String)) -> Result<Conversation> {
        conversation.avatar_ids = serde_json::from_str(&avatar_ids)
            .with_context(|| format!("Corrupt avatar list on conversation {}", conversation.id))?;
        conversation.messages = Self::load_messages(conn, &conversation.id)?;
        Ok(conversation)
    }

    fn row_to_avatar(row: &rusqlite::Row) -> rusqlite::Result<Avatar> {
        Ok(Avatar {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            story: row.get("story")?,
            persona: row.get("persona")?,
            profile_image_url: row.get("profile_image_url")?,
            is_public: row.get::<_, i64>("is_public")? != 0,
            owner: row.get("owner_id")?,
            creator_nickname: row.get("creator_nickname")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

fn parse_role(value: &str) -> Result<MessageRole> {
    match value {
        "system" => Ok(MessageRole::System),
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        other => anyhow::bail!("Unknown message role '{}'", other),
    }
}

impl ConversationStore for SqliteConversationStore {
    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT * FROM conversations WHERE id = ?1",
                params![id],
                Self::row_to_conversation,
            )
            .optional()?;
        row.map(|row| Self::hydrate(&conn, row)).transpose()
    }

    fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, user_id, title, model_id, avatar_ids, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                model_id = excluded.model_id,
                avatar_ids = excluded.avatar_ids,
                updated_at = excluded.updated_at",
            params![
                conversation.id,
                conversation.owner,
                conversation.title,
                conversation.model_id,
                serde_json::to_string(&conversation.avatar_ids)?,
                conversation.created_at,
                conversation.updated_at,
            ],
        )?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation.id],
        )?;
        for message in &conversation.messages {
            tx.execute(
                "INSERT INTO messages (conversation_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![
                    conversation.id,
                    message.role.as_str(),
                    message.content,
                    message.timestamp
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn append_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE conversations SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
            params![conversation_id, message.timestamp],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO messages (conversation_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation_id,
                message.role.as_str(),
                message.content,
                message.timestamp
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn list_conversations(&self, owner: &str) -> Result<Vec<Conversation>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM conversations WHERE user_id = ?1 ORDER BY updated_at DESC, id",
        )?;
        let rows = stmt
            .query_map(params![owner], Self::row_to_conversation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|row| Self::hydrate(&conn, row)).collect()
    }

    fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn get_avatar(&self, id: &str) -> Result<Option<Avatar>> {
        let conn = self.lock();
        Ok(conn
            .query_row(
                "SELECT * FROM avatars WHERE id = ?1",
                params![id],
                Self::row_to_avatar,
            )
            .optional()?)
    }

    fn save_avatar(&self, avatar: &Avatar) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO avatars
             (id, name, description, story, persona, profile_image_url, is_public, owner_id, creator_nickname, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                avatar.id,
                avatar.name,
                avatar.description,
                avatar.story,
                avatar.persona,
                avatar.profile_image_url,
                avatar.is_public as i64,
                avatar.owner,
                avatar.creator_nickname,
                avatar.created_at,
                avatar.updated_at,
            ],
        )?;
        Ok(())
    }

    fn delete_avatar(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        Ok(conn.execute("DELETE FROM avatars WHERE id = ?1", params![id])? > 0)
    }

    fn list_avatars_visible_to(&self, user: &str) -> Result<Vec<Avatar>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM avatars WHERE is_public = 1 OR owner_id = ?1 ORDER BY created_at DESC, id",
        )?;
        let avatars = stmt
            .query_map(params![user], Self::row_to_avatar)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(avatars)
    }
}

// =============================================================================
// In memory
// =============================================================================

/// Volatile store, used when no database directory is configured.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    avatars: RwLock<HashMap<String, Avatar>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conversations = self.conversations.read().unwrap_or_else(|e| e.into_inner());
        Ok(conversations.get(id).cloned())
    }

    fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.conversations.write().unwrap_or_else(|e| e.into_inner());
        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    fn append_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<bool> {
        let mut conversations = self.conversations.write().unwrap_or_else(|e| e.into_inner());
        match conversations.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.push(message.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_conversations(&self, owner: &str) -> Result<Vec<Conversation>> {
        let conversations = self.conversations.read().unwrap_or_else(|e| e.into_inner());
        let mut owned: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    fn delete_conversation(&self, id: &str) -> Result<bool> {
        let mut conversations = self.conversations.write().unwrap_or_else(|e| e.into_inner());
        Ok(conversations.remove(id).is_some())
    }

    fn get_avatar(&self, id: &str) -> Result<Option<Avatar>> {
        let avatars = self.avatars.read().unwrap_or_else(|e| e.into_inner());
        Ok(avatars.get(id).cloned())
    }

    fn save_avatar(&self, avatar: &Avatar) -> Result<()> {
        let mut avatars = self.avatars.write().unwrap_or_else(|e| e.into_inner());
        avatars.insert(avatar.id.clone(), avatar.clone());
        Ok(())
    }

    fn delete_avatar(&self, id: &str) -> Result<bool> {
        let mut avatars = self.avatars.write().unwrap_or_else(|e| e.into_inner());
        Ok(avatars.remove(id).is_some())
    }

    fn list_avatars_visible_to(&self, user: &str) -> Result<Vec<Avatar>> {
        let avatars = self.avatars.read().unwrap_or_else(|e| e.into_inner());
        let mut visible: Vec<Avatar> = avatars
            .values()
            .filter(|a| a.is_visible_to(user))
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(visible)
    }
}

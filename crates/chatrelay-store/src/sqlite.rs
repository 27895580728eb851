//! SQLite backend built on `sqlx`.

use std::str::FromStr;

use async_trait::async_trait;
use chatrelay_common::{new_id, ChatSummary, ConversationId, Role, StoreError, StoredMessage};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::{now_millis, title_from_prompt, ChatStore, MessageStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS chats (
        id TEXT PRIMARY KEY,
        title TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chats_updated_at ON chats(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_chat_created ON messages(chat_id, created_at)",
];

type ChatRow = (String, Option<String>, i64, i64);
type MessageRow = (String, String, String, String, i64);

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn chat_from_row((id, title, created_at, updated_at): ChatRow) -> ChatSummary {
    ChatSummary {
        id: ConversationId::from(id),
        title,
        created_at,
        updated_at,
    }
}

fn message_from_row(
    (id, chat_id, role, content, created_at): MessageRow,
) -> Result<StoredMessage, StoreError> {
    let role = Role::from_str(&role).map_err(StoreError::Database)?;
    Ok(StoredMessage {
        id,
        conversation_id: ConversationId::from(chat_id),
        role,
        content,
        created_at,
    })
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    ///
    /// In-memory URLs get a single pinned connection so every query sees
    /// the same database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await.map_err(db_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        info!(url, "database ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

/// Insert one message and bump its chat's `updated_at`. Fails with
/// `NotFound` if the chat does not exist.
async fn insert_message(
    conn: &mut SqliteConnection,
    id: &ConversationId,
    role: Role,
    content: &str,
) -> Result<StoredMessage, StoreError> {
    let now = now_millis();
    let updated = sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(id.as_str())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound(id.to_string()));
    }

    let message = StoredMessage {
        id: new_id(),
        conversation_id: id.clone(),
        role,
        content: content.to_string(),
        created_at: now,
    };
    sqlx::query("INSERT INTO messages (id, chat_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&message.id)
        .bind(id.as_str())
        .bind(role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(message)
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let message = insert_message(&mut tx, conversation_id, role, content).await?;
        tx.commit().await.map_err(db_err)?;
        debug!(conversation = %conversation_id, role = %role, len = content.len(), "message appended");
        Ok(message)
    }

    async fn conversation_exists(&self, conversation_id: &ConversationId) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM chats WHERE id = ?")
            .bind(conversation_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_chat(&self) -> Result<ChatSummary, StoreError> {
        let now = now_millis();
        let chat = ChatSummary {
            id: ConversationId::new(new_id()),
            title: None,
            created_at: now,
            updated_at: now,
        };
        sqlx::query("INSERT INTO chats (id, title, created_at, updated_at) VALUES (?, NULL, ?, ?)")
            .bind(chat.id.as_str())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        info!(conversation = %chat.id, "chat created");
        Ok(chat)
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, StoreError> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT id, title, created_at, updated_at FROM chats ORDER BY updated_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(chat_from_row).collect())
    }

    async fn delete_chat(&self, id: &ConversationId) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        info!(conversation = %id, "chat deleted");
        Ok(())
    }

    async fn history(&self, id: &ConversationId) -> Result<Vec<StoredMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, role, content, created_at FROM messages
             WHERE chat_id = ? ORDER BY created_at, rowid",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn record_prompt(&self, id: &ConversationId, text: &str) -> Result<StoredMessage, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let message = insert_message(&mut tx, id, Role::User, text).await?;
        sqlx::query("UPDATE chats SET title = ? WHERE id = ? AND (title IS NULL OR title = '')")
            .bind(title_from_prompt(text))
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(message)
    }
}

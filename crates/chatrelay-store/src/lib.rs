//! Conversation and message persistence.
//!
//! [`SqliteStore`] is the production backend; [`MemoryStore`] keeps
//! everything in process for tests and throwaway runs. Both implement the
//! core's [`MessageStore`] plus the chat CRUD the transport needs.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub use chatrelay_core::MessageStore;

use async_trait::async_trait;
use chatrelay_common::{ChatSummary, ConversationId, StoreError, StoredMessage};

/// Characters of the first prompt kept as a chat's title.
pub const TITLE_CHARS: usize = 50;

/// Chat-level operations on top of [`MessageStore`].
#[async_trait]
pub trait ChatStore: MessageStore {
    /// Create an untitled chat with a fresh id.
    async fn create_chat(&self) -> Result<ChatSummary, StoreError>;

    /// All chats, most recently updated first.
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, StoreError>;

    /// Delete a chat and its messages.
    async fn delete_chat(&self, id: &ConversationId) -> Result<(), StoreError>;

    /// Messages of a chat in the order they were written.
    async fn history(&self, id: &ConversationId) -> Result<Vec<StoredMessage>, StoreError>;

    /// Save a user prompt, titling the chat after it if it has no title yet.
    async fn record_prompt(&self, id: &ConversationId, text: &str) -> Result<StoredMessage, StoreError>;
}

/// Current time in unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn title_from_prompt(text: &str) -> String {
    text.chars().take(TITLE_CHARS).collect()
}

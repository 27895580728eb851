//! Persistence seam used by the session coordinator.

use async_trait::async_trait;
use chatrelay_common::{ConversationId, Role, StoreError, StoredMessage};

/// The two store operations a finished generation needs.
///
/// Implemented by the SQLite store for production and by in-memory
/// doubles in tests.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message and bump the conversation's `updated_at`.
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Whether the conversation still exists. A conversation deleted while
    /// a generation was running is skipped at persistence time.
    async fn conversation_exists(&self, conversation_id: &ConversationId) -> Result<bool, StoreError>;
}

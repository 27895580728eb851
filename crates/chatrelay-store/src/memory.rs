//! In-process store. Nothing survives the process.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chatrelay_common::{new_id, ChatSummary, ConversationId, Role, StoreError, StoredMessage};

use crate::{now_millis, title_from_prompt, ChatStore, MessageStore};

#[derive(Default)]
struct MemoryState {
    /// Insertion order; the last element is the newest chat.
    chats: Vec<ChatSummary>,
    messages: Vec<StoredMessage>,
}

impl MemoryState {
    fn chat_mut(&mut self, id: &ConversationId) -> Result<&mut ChatSummary, StoreError> {
        self.chats
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn push_message(&mut self, id: &ConversationId, role: Role, content: &str) -> Result<StoredMessage, StoreError> {
        let now = now_millis();
        self.chat_mut(id)?.updated_at = now;
        let message = StoredMessage {
            id: new_id(),
            conversation_id: id.clone(),
            role,
            content: content.to_string(),
            created_at: now,
        };
        self.messages.push(message.clone());
        Ok(message)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chat under a caller-chosen id. Returns the existing chat if
    /// the id is taken.
    pub fn create_chat_with_id(&self, id: impl Into<ConversationId>) -> ChatSummary {
        let id = id.into();
        let mut state = self.lock();
        if let Some(existing) = state.chats.iter().find(|c| c.id == id) {
            return existing.clone();
        }
        let now = now_millis();
        let chat = ChatSummary {
            id,
            title: None,
            created_at: now,
            updated_at: now,
        };
        state.chats.push(chat.clone());
        chat
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        self.lock().push_message(conversation_id, role, content)
    }

    async fn conversation_exists(&self, conversation_id: &ConversationId) -> Result<bool, StoreError> {
        Ok(self.lock().chats.iter().any(|c| &c.id == conversation_id))
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_chat(&self) -> Result<ChatSummary, StoreError> {
        Ok(self.create_chat_with_id(new_id()))
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, StoreError> {
        let mut chats: Vec<_> = self.lock().chats.iter().rev().cloned().collect();
        // Stable: ties keep newest-created first.
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn delete_chat(&self, id: &ConversationId) -> Result<(), StoreError> {
        let mut state = self.lock();
        let before = state.chats.len();
        state.chats.retain(|c| &c.id != id);
        if state.chats.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        state.messages.retain(|m| &m.conversation_id != id);
        Ok(())
    }

    async fn history(&self, id: &ConversationId) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| &m.conversation_id == id)
            .cloned()
            .collect())
    }

    async fn record_prompt(&self, id: &ConversationId, text: &str) -> Result<StoredMessage, StoreError> {
        let mut state = self.lock();
        let message = state.push_message(id, Role::User, text)?;
        let chat = state.chat_mut(id)?;
        if chat.title.as_deref().map_or(true, str::is_empty) {
            chat.title = Some(title_from_prompt(text));
        }
        Ok(message)
    }
}

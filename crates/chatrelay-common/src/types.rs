use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::id::ConversationId;
use crate::protocol::HistoryMessage;

/// Author of a persisted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// A message row owned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl StoredMessage {
    pub fn into_history(self) -> HistoryMessage {
        HistoryMessage {
            id: self.id,
            role: self.role,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// Listing entry for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ConversationId,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

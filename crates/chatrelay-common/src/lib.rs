pub mod errors;
pub mod id;
pub mod protocol;
pub mod types;

pub use errors::{ChatRelayError, ConfigError, RunnerError, SessionError, StoreError};
pub use id::{new_id, ConversationId, ViewerId};
pub use protocol::{ClientMessage, HistoryMessage, ServerMessage};
pub use types::{ChatSummary, Role, StoredMessage};

pub type Result<T> = std::result::Result<T, ChatRelayError>;

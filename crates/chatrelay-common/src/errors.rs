use std::path::PathBuf;

use crate::id::ConversationId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("conversation not found: {0}")]
    NotFound(String),
}

/// Failures of a single generator process invocation.
///
/// The `Display` output is what viewers see in the `error` frame, so the
/// exit variant carries its final message verbatim.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to launch generator: {0}")]
    Spawn(String),

    #[error("Failed to capture stdout")]
    StdoutUnavailable,

    #[error("{0}")]
    Read(String),

    #[error("{message}")]
    Exit { code: Option<i32>, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a response is already being generated for conversation {0}")]
    AlreadyActive(ConversationId),
}

#[derive(Debug, thiserror::Error)]
pub enum ChatRelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),
}

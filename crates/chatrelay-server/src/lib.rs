//! chatrelay server: HTTP and WebSocket transport plus the CLI around the
//! session coordinator.
//!
//! Viewers connect to `/ws/<chat_id>`, receive the chat's history, join any
//! running generation and send `prompt`/`cancel` frames. Chats are created,
//! listed and deleted under `/api/chats`, and `/api/chats/streaming` answers
//! with the ids of conversations currently generating.

pub mod cli;
pub mod connection;
pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{app, serve, AppState};

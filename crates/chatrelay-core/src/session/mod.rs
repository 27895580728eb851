//! Streaming session coordinator.
//!
//! At most one generation runs per conversation. Its events fan out to
//! every subscribed viewer in production order, exactly one terminal event
//! (`done`, `error` or `cancelled`) is delivered, and the result is
//! persisted before `done` goes out.

mod manager;
mod types;

pub use manager::{ArgsBuilder, SessionManager, SAVE_FAILED};
pub use types::{Session, Subscription, Viewer};

#[cfg(test)]
mod tests;

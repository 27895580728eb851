//! Streaming session coordinator for line-oriented generator processes.
//!
//! - [`parser`] turns one stdout line into a viewer-facing event.
//! - [`runner`] launches the generator and streams its parsed events.
//! - [`session`] owns active sessions, fans events out and persists results.

pub mod parser;
pub mod runner;
pub mod session;
pub mod store;

pub use parser::parse_line;
pub use runner::{LineBuffer, ProcessRunner, RunResult, RunSummary};
pub use session::{ArgsBuilder, Session, SessionManager, Subscription, Viewer, SAVE_FAILED};
pub use store::MessageStore;

use std::io::Write;
use std::path::PathBuf;

use chatrelay_common::{ChatRelayError, ConversationId};
use chatrelay_store::ChatStore;
use clap::{Parser, Subcommand};

/// chatrelay: streams a local generator's output to chat viewers over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "chatrelay", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (debug, info, warn, error, or a full filter).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the WebSocket server (default).
    Serve {
        /// Address to bind, overriding `server.host`.
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on, overriding `server.port`.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage chats in the configured database.
    Chats {
        #[command(subcommand)]
        action: ChatsAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ChatsAction {
    /// List chats, most recently updated first.
    List,
    /// Create an empty chat and print its id.
    Create,
    /// Delete a chat and all of its messages.
    Delete { id: String },
}

pub fn parse() -> Args {
    Args::parse()
}

/// Expand a bare level like `debug` into a filter for our crates.
pub fn log_directive(level: &str) -> String {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => format!("chatrelay={level}"),
        other => other.to_string(),
    }
}

/// Run one offline `chats` action, writing its output to `out`.
pub async fn run_chats(
    action: &ChatsAction,
    store: &dyn ChatStore,
    out: &mut impl Write,
) -> Result<(), ChatRelayError> {
    match action {
        ChatsAction::List => {
            let chats = store.list_chats().await?;
            if chats.is_empty() {
                writeln!(out, "no chats")?;
            }
            for chat in chats {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    chat.id,
                    chat.updated_at,
                    chat.title.as_deref().unwrap_or("(untitled)")
                )?;
            }
        }
        ChatsAction::Create => {
            let chat = store.create_chat().await?;
            writeln!(out, "{}", chat.id)?;
        }
        ChatsAction::Delete { id } => {
            let id = ConversationId::new(id.as_str());
            store.delete_chat(&id).await?;
            writeln!(out, "deleted {id}")?;
        }
    }
    Ok(())
}

use std::process::ExitCode;
use std::sync::Arc;

use chatrelay_common::ChatRelayError;
use chatrelay_config::ChatRelayConfig;
use chatrelay_server::cli::{self, Command};
use chatrelay_server::{serve, AppState};
use chatrelay_store::SqliteStore;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();

    let loaded = match args.config {
        Some(ref path) => chatrelay_config::load_config_from(path),
        None => chatrelay_config::load_config(),
    };

    // Initialize logging: --log-level, then RUST_LOG, then the config file.
    let fallback = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "chatrelay=info".into());
    let filter = match args.log_level.as_deref() {
        Some(level) => EnvFilter::new(cli::log_directive(level)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&fallback)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("chatrelay v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(ref path) = args.config {
        tracing::info!("Using config override: {}", path.display());
    }
    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!("Config load failed, using defaults: {e}");
        ChatRelayConfig::default()
    });
    tracing::debug!("Effective config: {}", chatrelay_config::config_to_json(&config));

    let result = match args.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => run_server(config, host, port).await,
        Command::Chats { action } => run_chats(&config, &action).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("chatrelay: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(
    mut config: ChatRelayConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), ChatRelayError> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let store = Arc::new(SqliteStore::connect(&config.database.url).await?);
    let state = AppState::from_config(&config, store)?;
    tracing::info!(program = %config.generator.program, "generator configured");

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ChatRelayError::Network(format!("failed to bind {addr}: {e}")))?;

    serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl-C received");
    })
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_chats(config: &ChatRelayConfig, action: &cli::ChatsAction) -> Result<(), ChatRelayError> {
    let store = SqliteStore::connect(&config.database.url).await?;
    cli::run_chats(action, &store, &mut std::io::stdout()).await
}

//! Shared state, middleware and the serve loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::Router;
use chatrelay_common::{ChatRelayError, ConfigError};
use chatrelay_config::ChatRelayConfig;
use chatrelay_core::{ArgsBuilder, MessageStore, ProcessRunner, SessionManager};
use chatrelay_store::ChatStore;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// How long shutdown waits for cancelled sessions to persist.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything a handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub store: Arc<dyn ChatStore>,
    /// Allowed CORS origin; any origin when `None`.
    pub cors_origin: Option<HeaderValue>,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, runner: ProcessRunner, args_builder: ArgsBuilder) -> Self
    where
        S: ChatStore + 'static,
    {
        let messages: Arc<dyn MessageStore> = store.clone();
        Self {
            sessions: SessionManager::new(runner, messages, args_builder),
            store,
            cors_origin: None,
        }
    }

    /// Wire the generator and CORS policy described by `config` to `store`.
    pub fn from_config<S>(config: &ChatRelayConfig, store: Arc<S>) -> Result<Self, ChatRelayError>
    where
        S: ChatStore + 'static,
    {
        let generator = config.generator.clone();
        let runner = ProcessRunner::new(&generator.program)
            .with_working_dir(generator.working_dir.clone())
            .with_strip_env(generator.strip_env.clone());
        let args_builder: ArgsBuilder = Arc::new(move |prompt: &str| generator.build_args(prompt));

        let mut state = Self::new(store, runner, args_builder);
        if let Some(ref origin) = config.server.cors_origin {
            let origin = HeaderValue::from_str(origin).map_err(|e| {
                ConfigError::ValidationError(format!("server.cors_origin = '{origin}': {e}"))
            })?;
            state.cors_origin = Some(origin);
        }
        Ok(state)
    }
}

/// The full application: routes plus CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let cors = match state.cors_origin.clone() {
        Some(origin) => CorsLayer::new().allow_origin(origin),
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves, then cancel every running generation
/// and give it a moment to persist.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("chatrelay listening on http://{}", addr);
    }

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown)
        .await?;

    let running: Vec<_> = state
        .sessions
        .active_session_ids()
        .iter()
        .filter_map(|id| state.sessions.get(id))
        .collect();
    let cancelled = state.sessions.cancel_all();
    tracing::info!(cancelled, "shutting down");

    for session in running {
        if tokio::time::timeout(SHUTDOWN_GRACE, session.wait()).await.is_err() {
            tracing::warn!(conversation = %session.id(), "session did not finish before shutdown");
        }
    }
    Ok(())
}

//! The active-session map and the task that drives each generation.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chatrelay_common::{ConversationId, Role, SessionError, ViewerId};
use tracing::{debug, error, info, warn};

use super::types::{lock, ActiveGuard, Session, SessionMap, Subscription, Viewer};
use crate::runner::ProcessRunner;
use crate::store::MessageStore;

/// Sent when the generated result could not be written to the store.
pub const SAVE_FAILED: &str = "Failed to save assistant response. Please try again.";

const PROMPT_PREVIEW_CHARS: usize = 80;

/// Turns a prompt into the generator's argument vector.
pub type ArgsBuilder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Owns every active session. Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct SessionManager {
    sessions: SessionMap,
    runner: Arc<ProcessRunner>,
    store: Arc<dyn MessageStore>,
    args_builder: ArgsBuilder,
}

impl SessionManager {
    pub fn new(runner: ProcessRunner, store: Arc<dyn MessageStore>, args_builder: ArgsBuilder) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            runner: Arc::new(runner),
            store,
            args_builder,
        }
    }

    /// Start a generation for `id`, failing if one is already running.
    ///
    /// Must be called from within a tokio runtime. Returns as soon as the
    /// drive task is spawned.
    pub fn start_stream(
        &self,
        id: ConversationId,
        prompt: impl Into<String>,
    ) -> Result<Arc<Session>, SessionError> {
        self.launch(id, prompt.into(), None)
            .map(|sub| Arc::clone(sub.session()))
    }

    /// Like [`start_stream`](Self::start_stream), with `viewer` subscribed
    /// before the first event can be produced.
    pub fn start_stream_subscribed(
        &self,
        id: ConversationId,
        prompt: impl Into<String>,
        viewer: &Viewer,
    ) -> Result<Subscription, SessionError> {
        self.launch(id, prompt.into(), Some(viewer))
    }

    fn launch(
        &self,
        id: ConversationId,
        prompt: String,
        viewer: Option<&Viewer>,
    ) -> Result<Subscription, SessionError> {
        let session = {
            let mut map = lock(&self.sessions);
            match map.entry(id.clone()) {
                Entry::Occupied(_) => {
                    debug!(conversation = %id, "rejecting prompt, generation already running");
                    return Err(SessionError::AlreadyActive(id));
                }
                Entry::Vacant(slot) => {
                    let session = Arc::new(Session::new(id.clone()));
                    if let Some(viewer) = viewer {
                        session.add_viewer(viewer);
                    }
                    slot.insert(Arc::clone(&session));
                    session
                }
            }
        };

        let preview: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
        info!(conversation = %id, len = prompt.len(), %preview, "starting generation");

        let guard = ActiveGuard::new(Arc::clone(&self.sessions), Arc::clone(&session));
        let manager = self.clone();
        let driven = Arc::clone(&session);
        tokio::spawn(async move {
            let _guard = guard;
            manager.drive(&driven, &prompt).await;
        });

        Ok(Subscription::new(session, String::new()))
    }

    /// Run the generator, persist its result, then release the terminal event.
    async fn drive(&self, session: &Session, prompt: &str) {
        let args = (self.args_builder)(prompt);
        let outcome = self
            .runner
            .run(&args, session.cancel_token(), |msg| session.broadcast(msg))
            .await;

        match outcome {
            Ok(summary) => {
                debug!(conversation = %session.id(), pid = ?summary.pid, exit_code = ?summary.exit_code, cancelled = summary.cancelled, "generator finished");
            }
            Err(e) => {
                warn!(conversation = %session.id(), error = %e, "generation failed");
                session.fail(e.to_string());
            }
        }

        self.persist(session).await;
        session.finish();
        info!(
            conversation = %session.id(),
            elapsed_ms = session.elapsed().as_millis() as u64,
            "generation complete"
        );
    }

    async fn persist(&self, session: &Session) {
        let id = session.id();
        let text = session.final_text();
        if text.is_empty() {
            warn!(conversation = %id, "no assistant text to save");
            return;
        }

        match self.store.conversation_exists(id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(conversation = %id, "conversation deleted during generation, discarding result");
                return;
            }
            Err(e) => {
                error!(conversation = %id, error = %e, "failed to look up conversation");
                session.fail(SAVE_FAILED);
                return;
            }
        }

        match self.store.append_message(id, Role::Assistant, &text).await {
            Ok(stored) => debug!(conversation = %id, message_id = %stored.id, len = text.len(), "assistant message saved"),
            Err(e) => {
                error!(conversation = %id, error = %e, "failed to save assistant message");
                session.fail(SAVE_FAILED);
            }
        }
    }

    /// Cancel the generation for `id`. Returns `false` if none was running.
    ///
    /// Viewers get `cancelled` immediately; the process is reaped in the
    /// background.
    pub fn cancel_stream(&self, id: &ConversationId) -> bool {
        let Some(session) = self.get(id) else {
            debug!(conversation = %id, "cancel for idle conversation ignored");
            return false;
        };
        info!(conversation = %id, "cancelling generation");
        session.cancel();
        true
    }

    /// Attach `viewer` to the running session for `id`, if any.
    pub fn subscribe(&self, id: &ConversationId, viewer: &Viewer) -> Option<Subscription> {
        let session = self.get(id)?;
        let snapshot = session.add_viewer(viewer)?;
        debug!(conversation = %id, viewer = %viewer.id(), resumed_len = snapshot.len(), "viewer joined running session");
        Some(Subscription::new(session, snapshot))
    }

    /// Detach a viewer. The session keeps running without it.
    pub fn unsubscribe(&self, id: &ConversationId, viewer_id: &ViewerId) -> bool {
        self.get(id)
            .map(|session| session.remove_viewer(viewer_id))
            .unwrap_or(false)
    }

    /// Ids of every running session, sorted.
    pub fn active_session_ids(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = lock(&self.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &ConversationId) -> Option<Arc<Session>> {
        lock(&self.sessions).get(id).cloned()
    }

    pub fn is_active(&self, id: &ConversationId) -> bool {
        lock(&self.sessions).contains_key(id)
    }

    /// Cancel every running session, returning how many there were.
    pub fn cancel_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = lock(&self.sessions).values().cloned().collect();
        for session in &sessions {
            session.cancel();
        }
        sessions.len()
    }
}

//! Per-conversation session state, viewer handles and the removal guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chatrelay_common::{ConversationId, ServerMessage, ViewerId};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sent when the drive task ends without having delivered a terminal event.
pub(crate) const STREAM_FAILED: &str = "Stream failed. Please try again.";

pub(crate) type SessionMap = Arc<Mutex<HashMap<ConversationId, Arc<Session>>>>;

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One connected viewer: an id plus the channel its socket drains.
#[derive(Debug, Clone)]
pub struct Viewer {
    id: ViewerId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Viewer {
    pub fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: ViewerId::new(),
            tx,
        }
    }

    /// A fresh viewer together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> &ViewerId {
        &self.id
    }
}

#[derive(Default)]
pub(crate) struct SessionState {
    log: Vec<ServerMessage>,
    accumulated_text: String,
    subscribers: HashMap<ViewerId, mpsc::UnboundedSender<ServerMessage>>,
    /// The generator's `done`, held back until the result is persisted.
    pending_done: Option<String>,
    terminated: bool,
}

impl SessionState {
    /// Forward one event to every subscriber and record it.
    ///
    /// Nothing is delivered after the first terminal event. Viewers whose
    /// receiver is gone are pruned here.
    fn deliver(&mut self, msg: ServerMessage) {
        if self.terminated {
            debug!("dropping event after terminal");
            return;
        }
        if msg.is_terminal() {
            self.terminated = true;
        }
        self.subscribers.retain(|_, tx| tx.send(msg.clone()).is_ok());
        self.log.push(msg);
    }
}

/// A single in-flight generation for one conversation.
pub struct Session {
    id: ConversationId,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
    finished: watch::Sender<bool>,
    started_at: Instant,
}

impl Session {
    pub(crate) fn new(id: ConversationId) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            id,
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::default()),
            finished,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Concatenation of every `text_delta` so far.
    pub fn accumulated_text(&self) -> String {
        lock(&self.state).accumulated_text.clone()
    }

    /// Every event delivered so far, in order.
    pub fn log(&self) -> Vec<ServerMessage> {
        lock(&self.state).log.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the terminal event has gone out.
    pub fn is_terminated(&self) -> bool {
        lock(&self.state).terminated
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Resolves once the session has been removed from the active map.
    pub async fn wait(&self) {
        let mut rx = self.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sink for runner events.
    pub(crate) fn broadcast(&self, msg: ServerMessage) {
        let mut state = lock(&self.state);
        if state.terminated {
            return;
        }
        match msg {
            ServerMessage::Done { result } => state.pending_done = Some(result),
            msg => {
                if let ServerMessage::TextDelta { text } = &msg {
                    state.accumulated_text.push_str(text);
                }
                state.deliver(msg);
            }
        }
    }

    /// Trip the cancellation token and tell current viewers right away.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
        lock(&self.state).deliver(ServerMessage::Cancelled);
    }

    /// Deliver an `error`, unless a terminal event already went out.
    pub(crate) fn fail(&self, message: impl Into<String>) {
        lock(&self.state).deliver(ServerMessage::error(message));
    }

    /// Release the held-back `done` once persistence has settled.
    pub(crate) fn finish(&self) {
        let mut state = lock(&self.state);
        let result = state.pending_done.take().unwrap_or_default();
        state.deliver(ServerMessage::Done { result });
    }

    /// Text to persist: accumulated deltas, else the `done` result.
    pub(crate) fn final_text(&self) -> String {
        let state = lock(&self.state);
        if !state.accumulated_text.is_empty() {
            return state.accumulated_text.clone();
        }
        state.pending_done.clone().unwrap_or_default()
    }

    /// Register a viewer and snapshot the text it has missed, both under
    /// the state lock so no delta falls between the two.
    ///
    /// Returns `None` once the terminal event has gone out.
    pub(crate) fn add_viewer(&self, viewer: &Viewer) -> Option<String> {
        let mut state = lock(&self.state);
        if state.terminated {
            return None;
        }
        state.subscribers.insert(viewer.id.clone(), viewer.tx.clone());
        Some(state.accumulated_text.clone())
    }

    pub(crate) fn remove_viewer(&self, viewer_id: &ViewerId) -> bool {
        lock(&self.state).subscribers.remove(viewer_id).is_some()
    }

    fn mark_finished(&self) {
        self.finished.send_replace(true);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A viewer's handle on a running session, with the catch-up snapshot
/// taken when it joined.
#[derive(Debug, Clone)]
pub struct Subscription {
    session: Arc<Session>,
    accumulated_text: String,
}

impl Subscription {
    pub(crate) fn new(session: Arc<Session>, accumulated_text: String) -> Self {
        Self {
            session,
            accumulated_text,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// The frame a late joiner gets before live events.
    pub fn catch_up(&self) -> ServerMessage {
        if self.accumulated_text.is_empty() {
            ServerMessage::StreamActive
        } else {
            ServerMessage::StreamResume {
                accumulated_text: self.accumulated_text.clone(),
            }
        }
    }
}

/// Removes a session from the active map when its drive task ends, however
/// it ends.
pub(crate) struct ActiveGuard {
    sessions: SessionMap,
    session: Arc<Session>,
}

impl ActiveGuard {
    pub(crate) fn new(sessions: SessionMap, session: Arc<Session>) -> Self {
        Self { sessions, session }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if !self.session.is_terminated() {
            warn!(conversation = %self.session.id, "session ended without a terminal event");
            self.session.fail(STREAM_FAILED);
        }

        {
            let mut map = lock(&self.sessions);
            if map
                .get(&self.session.id)
                .is_some_and(|current| Arc::ptr_eq(current, &self.session))
            {
                map.remove(&self.session.id);
            }
        }

        self.session.mark_finished();
    }
}

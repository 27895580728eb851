//! Session manager tests. The generator is `sh -c <prompt>`, so each
//! prompt is a script that prints stream-json lines.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatrelay_common::{
    ConversationId, Role, ServerMessage, SessionError, StoreError, StoredMessage, ViewerId,
};
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::runner::ProcessRunner;
use crate::store::MessageStore;

#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Vec<(ConversationId, Role, String)>>,
    deleted: Mutex<HashSet<ConversationId>>,
    lookups: Mutex<usize>,
}

impl RecordingStore {
    fn saved(&self) -> Vec<(ConversationId, Role, String)> {
        self.saved.lock().unwrap().clone()
    }

    fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        self.saved
            .lock()
            .unwrap()
            .push((conversation_id.clone(), role, content.to_string()));
        Ok(StoredMessage {
            id: chatrelay_common::new_id(),
            conversation_id: conversation_id.clone(),
            role,
            content: content.to_string(),
            created_at: 0,
        })
    }

    async fn conversation_exists(&self, conversation_id: &ConversationId) -> Result<bool, StoreError> {
        *self.lookups.lock().unwrap() += 1;
        Ok(!self.deleted.lock().unwrap().contains(conversation_id))
    }
}

struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn append_message(
        &self,
        _conversation_id: &ConversationId,
        _role: Role,
        _content: &str,
    ) -> Result<StoredMessage, StoreError> {
        Err(StoreError::Database("disk I/O error".into()))
    }

    async fn conversation_exists(&self, _conversation_id: &ConversationId) -> Result<bool, StoreError> {
        Ok(true)
    }
}

fn sh_args() -> ArgsBuilder {
    Arc::new(|script: &str| vec!["-c".to_string(), script.to_string()])
}

fn manager(store: Arc<dyn MessageStore>) -> SessionManager {
    SessionManager::new(ProcessRunner::new("sh"), store, sh_args())
}

fn recording() -> (SessionManager, Arc<RecordingStore>) {
    let store = Arc::new(RecordingStore::default());
    (manager(store.clone()), store)
}

fn delta(text: &str) -> String {
    format!(
        r#"echo '{{"type":"content_block_delta","delta":{{"type":"text_delta","text":"{text}"}}}}'"#
    )
}

fn result(text: &str) -> String {
    format!(r#"echo '{{"type":"result","subtype":"success","result":"{text}"}}'"#)
}

fn script(lines: &[String]) -> String {
    lines.join("\n")
}

fn gate_path() -> PathBuf {
    std::env::temp_dir().join(format!("chatrelay-gate-{}", ViewerId::new()))
}

/// Shell loop that blocks until `gate` exists.
fn wait_for(gate: &Path) -> String {
    format!("while [ ! -e '{}' ]; do sleep 0.02; done", gate.display())
}

fn open(gate: &Path) {
    std::fs::write(gate, b"").unwrap();
}

async fn next(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("viewer channel closed")
}

async fn settle(session: &Session) {
    tokio::time::timeout(Duration::from_secs(10), session.wait())
        .await
        .expect("session did not finish");
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut events = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        events.push(msg);
    }
    events
}

fn terminal_count(events: &[ServerMessage]) -> usize {
    events.iter().filter(|m| m.is_terminal()).count()
}

#[cfg(unix)]
#[tokio::test]
async fn streams_deltas_then_done_and_persists_concatenation() {
    let (manager, store) = recording();
    let id = ConversationId::new("c1");
    let (viewer, mut rx) = Viewer::channel();

    let prompt = script(&[delta("Hel"), delta("lo"), result("Hello, world")]);
    let sub = manager
        .start_stream_subscribed(id.clone(), prompt, &viewer)
        .unwrap();
    settle(sub.session()).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            ServerMessage::TextDelta { text: "Hel".into() },
            ServerMessage::TextDelta { text: "lo".into() },
            ServerMessage::Done {
                result: "Hello, world".into()
            },
        ]
    );
    assert_eq!(store.saved(), vec![(id.clone(), Role::Assistant, "Hello".into())]);
    assert!(!manager.is_active(&id));
}

#[cfg(unix)]
#[tokio::test]
async fn done_result_is_persisted_when_there_are_no_deltas() {
    let (manager, store) = recording();
    let id = ConversationId::new("c1");

    let session = manager.start_stream(id.clone(), result("42")).unwrap();
    settle(&session).await;

    assert_eq!(store.saved(), vec![(id, Role::Assistant, "42".into())]);
    assert_eq!(session.log(), vec![ServerMessage::Done { result: "42".into() }]);
}

#[cfg(unix)]
#[tokio::test]
async fn empty_result_makes_no_store_call() {
    let (manager, store) = recording();
    let id = ConversationId::new("quiet");
    let (viewer, mut rx) = Viewer::channel();

    let sub = manager
        .start_stream_subscribed(id, "true", &viewer)
        .unwrap();
    settle(sub.session()).await;

    assert!(store.saved().is_empty());
    assert_eq!(store.lookups(), 0);
    assert_eq!(drain(&mut rx), vec![ServerMessage::Done { result: String::new() }]);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_admit_exactly_one() {
    let (manager, _store) = recording();
    let id = ConversationId::new("race");

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let manager = manager.clone();
        let id = id.clone();
        tasks.spawn(async move { manager.start_stream(id, "exec sleep 30") });
    }

    let mut started = Vec::new();
    let mut rejected = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(session) => started.push(session),
            Err(SessionError::AlreadyActive(rejected_id)) => {
                assert_eq!(rejected_id, id);
                rejected += 1;
            }
        }
    }

    assert_eq!(started.len(), 1);
    assert_eq!(rejected, 15);
    assert_eq!(manager.active_session_ids(), vec![id.clone()]);

    assert!(manager.cancel_stream(&id));
    settle(&started[0]).await;
    assert!(manager.active_session_ids().is_empty());
}

#[tokio::test]
async fn cancel_of_absent_conversation_is_a_noop() {
    let (manager, store) = recording();
    assert!(!manager.cancel_stream(&ConversationId::new("nobody")));
    assert!(manager.active_session_ids().is_empty());
    assert!(store.saved().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn cancel_delivers_exactly_one_cancelled_to_each_viewer() {
    let (manager, store) = recording();
    let id = ConversationId::new("cancel-me");
    let (first, mut first_rx) = Viewer::channel();
    let (second, mut second_rx) = Viewer::channel();

    let prompt = script(&[delta("partial"), "exec sleep 30".to_string()]);
    let sub = manager
        .start_stream_subscribed(id.clone(), prompt, &first)
        .unwrap();
    assert_eq!(
        next(&mut first_rx).await,
        ServerMessage::TextDelta {
            text: "partial".into()
        }
    );

    let late = manager.subscribe(&id, &second).unwrap();
    assert_eq!(
        late.catch_up(),
        ServerMessage::StreamResume {
            accumulated_text: "partial".into()
        }
    );

    assert!(manager.cancel_stream(&id));
    manager.cancel_stream(&id);
    settle(sub.session()).await;

    let first_events = drain(&mut first_rx);
    let second_events = drain(&mut second_rx);
    assert_eq!(first_events, vec![ServerMessage::Cancelled]);
    assert_eq!(second_events, vec![ServerMessage::Cancelled]);
    assert_eq!(terminal_count(&first_events), 1);
    assert!(manager.active_session_ids().is_empty());

    // Partial text survives a cancel.
    assert_eq!(store.saved(), vec![(id, Role::Assistant, "partial".into())]);
}

#[cfg(unix)]
#[tokio::test]
async fn zero_exit_with_stderr_is_not_an_error() {
    let (manager, _store) = recording();
    let (viewer, mut rx) = Viewer::channel();

    let prompt = script(&["echo 'deprecated flag' >&2".to_string(), result("fine")]);
    let sub = manager
        .start_stream_subscribed(ConversationId::new("c"), prompt, &viewer)
        .unwrap();
    settle(sub.session()).await;

    assert_eq!(drain(&mut rx), vec![ServerMessage::Done { result: "fine".into() }]);
}

#[cfg(unix)]
#[tokio::test]
async fn nonzero_exit_is_the_only_terminal_event() {
    let (manager, store) = recording();
    let (viewer, mut rx) = Viewer::channel();

    let sub = manager
        .start_stream_subscribed(ConversationId::new("c"), "echo 'bad model' >&2; exit 2", &viewer)
        .unwrap();
    settle(sub.session()).await;

    assert_eq!(drain(&mut rx), vec![ServerMessage::error("bad model")]);
    assert!(store.saved().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn persistence_failure_replaces_done_with_error() {
    let manager = manager(Arc::new(FailingStore));
    let id = ConversationId::new("c");
    let (viewer, mut rx) = Viewer::channel();

    let prompt = script(&[delta("shown"), result("shown")]);
    let sub = manager
        .start_stream_subscribed(id.clone(), prompt, &viewer)
        .unwrap();
    settle(sub.session()).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            ServerMessage::TextDelta {
                text: "shown".into()
            },
            ServerMessage::error(SAVE_FAILED),
        ]
    );
    assert!(!manager.is_active(&id));

    // The conversation is free for the next prompt.
    let again = manager.start_stream(id, "true").unwrap();
    settle(&again).await;
}

#[cfg(unix)]
#[tokio::test]
async fn deleted_conversation_discards_result() {
    let (manager, store) = recording();
    let id = ConversationId::new("gone");
    store.deleted.lock().unwrap().insert(id.clone());
    let (viewer, mut rx) = Viewer::channel();

    let sub = manager
        .start_stream_subscribed(id, result("orphan"), &viewer)
        .unwrap();
    settle(sub.session()).await;

    assert!(store.saved().is_empty());
    assert_eq!(drain(&mut rx), vec![ServerMessage::Done { result: "orphan".into() }]);
}

#[cfg(unix)]
#[tokio::test]
async fn late_subscriber_gets_snapshot_then_only_new_events() {
    let (manager, store) = recording();
    let id = ConversationId::new("late");
    let gate = gate_path();
    let (early, mut early_rx) = Viewer::channel();
    let (late, mut late_rx) = Viewer::channel();

    let prompt = script(&[delta("a"), wait_for(&gate), delta("b"), result("ab")]);
    let sub = manager
        .start_stream_subscribed(id.clone(), prompt, &early)
        .unwrap();
    assert_eq!(next(&mut early_rx).await, ServerMessage::TextDelta { text: "a".into() });

    let joined = manager.subscribe(&id, &late).unwrap();
    assert_eq!(joined.accumulated_text(), "a");
    open(&gate);
    settle(sub.session()).await;
    let _ = std::fs::remove_file(&gate);

    assert_eq!(
        drain(&mut late_rx),
        vec![
            ServerMessage::TextDelta { text: "b".into() },
            ServerMessage::Done { result: "ab".into() },
        ]
    );
    assert_eq!(
        drain(&mut early_rx),
        vec![
            ServerMessage::TextDelta { text: "b".into() },
            ServerMessage::Done { result: "ab".into() },
        ]
    );
    assert_eq!(store.saved(), vec![(id, Role::Assistant, "ab".into())]);
}

#[cfg(unix)]
#[tokio::test]
async fn session_without_viewers_runs_to_completion() {
    let (manager, store) = recording();
    let id = ConversationId::new("unwatched");
    let gate = gate_path();
    let (viewer, _rx) = Viewer::channel();

    let prompt = script(&[wait_for(&gate), delta("kept")]);
    let session = manager.start_stream(id.clone(), prompt).unwrap();

    let sub = manager.subscribe(&id, &viewer).unwrap();
    assert_eq!(sub.catch_up(), ServerMessage::StreamActive);
    assert!(manager.unsubscribe(&id, viewer.id()));
    assert_eq!(session.subscriber_count(), 0);

    open(&gate);
    settle(&session).await;
    let _ = std::fs::remove_file(&gate);

    assert_eq!(store.saved(), vec![(id.clone(), Role::Assistant, "kept".into())]);
    assert!(manager.subscribe(&id, &viewer).is_none());
}

#[tokio::test]
async fn launch_failure_is_a_single_error() {
    let store = Arc::new(RecordingStore::default());
    let manager = SessionManager::new(
        ProcessRunner::new("/nonexistent/chatrelay-generator"),
        store.clone(),
        sh_args(),
    );
    let id = ConversationId::new("c");
    let (viewer, mut rx) = Viewer::channel();

    let sub = manager
        .start_stream_subscribed(id.clone(), "anything", &viewer)
        .unwrap();
    settle(sub.session()).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ServerMessage::Error { message } => assert!(message.starts_with("failed to launch generator")),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(!manager.is_active(&id));
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn unsubscribe_unknown_viewer_or_conversation() {
    let (manager, _store) = recording();
    let viewer = ViewerId::new();
    assert!(!manager.unsubscribe(&ConversationId::new("none"), &viewer));
    assert!(manager.subscribe(&ConversationId::new("none"), &Viewer::channel().0).is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn cancel_all_stops_every_session() {
    let (manager, _store) = recording();
    let a = manager.start_stream(ConversationId::new("b"), "exec sleep 30").unwrap();
    let b = manager.start_stream(ConversationId::new("a"), "exec sleep 30").unwrap();

    assert_eq!(
        manager.active_session_ids(),
        vec![ConversationId::new("a"), ConversationId::new("b")]
    );
    assert_eq!(manager.cancel_all(), 2);
    settle(&a).await;
    settle(&b).await;

    assert!(a.is_cancelled() && b.is_cancelled());
    assert!(manager.active_session_ids().is_empty());
    assert_eq!(a.log(), vec![ServerMessage::Cancelled]);
}

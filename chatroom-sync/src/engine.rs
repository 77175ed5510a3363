//! Polling synchronization engine.
//!
//! One engine per client. All clients share one document in a key-value
//! store that offers no push channel and no compare-and-swap, so the engine:
//!
//! - polls the document and rebuilds the local view from it,
//! - applies local intents (join, send, typing, leave) as read-modify-write
//!   cycles over the whole document,
//! - reduces every store failure to a `connected = false` flag.
//!
//! ```text
//!   intent ──► read_modify_write ──► store.get ─► transform ─► store.set
//!                                                                  │
//!   timer  ──► poll ◄──────────────────────────────────────────────┘
//!                │    (forced re-poll after each local mutation)
//!                ▼
//!          ViewState ──► SyncEvent::ViewChanged ──► rendering layer
//! ```
//!
//! Cycles from different clients race freely: a write that lands between
//! another client's read and write is overwritten (last writer wins).
//! Cycles of the same engine are serialized by an async mutex, and a poll
//! whose read predates this engine's latest write or leave is discarded.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::document::{CodecError, Document, Message};
use crate::message_log::MessageLog;
use crate::presence::PresenceTracker;
use crate::session::SessionState;
use crate::storage::{KvStore, StoreError};

/// Engine errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Blank name or message, rejected before touching the store
    #[error("Input is blank")]
    EmptyInput,
    /// Intent not valid in the current session state
    #[error("Invalid session state: {0:?}")]
    InvalidState(SessionState),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Derived state handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    /// Last observed message log, oldest first.
    pub messages: Vec<Message>,
    /// Other participants currently typing.
    pub active_typers: BTreeSet<String>,
    /// Whether the last store access succeeded.
    pub connected: bool,
}

impl Default for ViewState {
    /// Empty view, optimistically live until a store access fails.
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            active_typers: BTreeSet::new(),
            connected: true,
        }
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// After every poll, failed mutation and leave.
    ViewChanged(ViewState),
    /// Session controller moved to a new state.
    SessionChanged(SessionState),
}

/// View plus what the last poll saw of the log.
#[derive(Debug, Default)]
struct LocalState {
    view: ViewState,
    observed_count: Option<usize>,
    observed_tail: Option<Message>,
}

impl LocalState {
    /// Whether `messages` differs from what was last observed.
    ///
    /// Count first; at equal count the newest entry decides, which catches
    /// appends to a log saturated at its maximum length.
    fn log_changed(&self, messages: &[Message]) -> bool {
        match self.observed_count {
            Some(count) if count == messages.len() => self.observed_tail.as_ref() != messages.last(),
            _ => true,
        }
    }

    fn replace_messages(&mut self, messages: Vec<Message>) {
        self.observed_count = Some(messages.len());
        self.observed_tail = messages.last().cloned();
        self.view.messages = messages;
    }

    /// Force the next poll to replace the view.
    fn forget_observed(&mut self) {
        self.observed_count = None;
        self.observed_tail = None;
    }
}

/// The per-client synchronization engine.
pub struct SyncEngine<S: KvStore, C: Clock = SystemClock> {
    /// Distinguishes engines in logs (display names may collide)
    client_id: Uuid,
    store: S,
    clock: C,
    config: SyncConfig,
    log: MessageLog,
    presence: PresenceTracker,
    /// Display name, set by join and cleared by leave
    identity: RwLock<Option<String>>,
    local: RwLock<LocalState>,
    /// Serializes this engine's read-modify-write cycles
    cycle: Mutex<()>,
    /// Bumped after each own write and on leave; polls read before a bump are stale
    generation: AtomicU64,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl<S: KvStore> SyncEngine<S, SystemClock> {
    /// Create an engine on the system clock.
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self::with_clock(store, SystemClock, config)
    }
}

impl<S: KvStore, C: Clock> SyncEngine<S, C> {
    pub fn with_clock(store: S, clock: C, config: SyncConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let mut presence = PresenceTracker::new(config.presence_ttl);
        if let Some(after) = config.prune_presence_after {
            presence = presence.with_pruning(after);
        }

        Self {
            client_id: Uuid::new_v4(),
            store,
            clock,
            log: MessageLog::new(config.max_log),
            presence,
            config,
            identity: RwLock::new(None),
            local: RwLock::new(LocalState::default()),
            cycle: Mutex::new(()),
            generation: AtomicU64::new(0),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current display name, if joined.
    pub async fn identity(&self) -> Option<String> {
        self.identity.read().await.clone()
    }

    /// Snapshot of the local view.
    pub async fn view(&self) -> ViewState {
        self.local.read().await.view.clone()
    }

    // ─── Polling ──────────────────────────────────────────────────────

    /// Read the document and rebuild the view.
    ///
    /// On failure the previous view stays in place with `connected = false`.
    /// A result read before one of this engine's own writes (or its leave)
    /// completed is dropped, since a newer poll already covers it. Returns
    /// the connectivity flag.
    pub async fn poll(&self) -> bool {
        let generation = self.generation.load(Ordering::SeqCst);
        let exclude = self.identity().await;
        let fetched = self.fetch().await;
        let now = self.clock.now_millis();

        let snapshot = {
            let mut local = self.local.write().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                log::debug!("Discarding stale poll (client {})", self.client_id);
                return local.view.connected;
            }
            match fetched {
                Ok(doc) => {
                    local.view.active_typers =
                        self.presence.view_active(&doc, now, exclude.as_deref());
                    if local.log_changed(&doc.messages) {
                        local.replace_messages(doc.messages);
                    }
                    local.view.connected = true;
                }
                Err(e) => {
                    log::warn!("Poll failed (client {}): {e}", self.client_id);
                    local.view.connected = false;
                }
            }
            local.view.clone()
        };

        log::debug!(
            "Polled room: {} messages, {} typing, connected={}",
            snapshot.messages.len(),
            snapshot.active_typers.len(),
            snapshot.connected
        );
        let connected = snapshot.connected;
        self.notify(SyncEvent::ViewChanged(snapshot));
        connected
    }

    /// Read the current document; absent or malformed values are empty.
    async fn fetch(&self) -> Result<Document, StoreError> {
        let raw = self.store.get(&self.config.store_key).await?;
        Ok(Document::from_stored(raw.as_deref()))
    }

    // ─── Read-modify-write ────────────────────────────────────────────

    /// Read the document, apply `transform`, write the whole document back.
    ///
    /// Not atomic with respect to other clients. `transform` receives the
    /// document and the current time in ms.
    pub async fn read_modify_write<F>(&self, transform: F) -> Result<Document, SyncError>
    where
        F: FnOnce(Document, u64) -> Document + Send,
    {
        let _cycle = self.cycle.lock().await;

        let doc = self.fetch().await?;
        let now = self.clock.now_millis();
        let (doc, pruned) = self.presence.prune_stale(transform(doc, now), now);
        if !pruned.is_empty() {
            log::debug!("Pruned {} stale presence entries: {:?}", pruned.len(), pruned);
        }

        let value = doc.encode()?;
        self.store.set(&self.config.store_key, value).await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(doc)
    }

    // ─── Intents ──────────────────────────────────────────────────────

    /// Announce `name` in the room and adopt it as the local identity.
    ///
    /// The only intent that surfaces store errors.
    pub async fn join(&self, name: &str) -> Result<(), SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::EmptyInput);
        }

        let log = self.log;
        let notice = format!("{name} joined");
        let result = self
            .read_modify_write(move |doc, now| log.append(doc, Message::notice(notice, now)))
            .await;

        match result {
            Ok(doc) => {
                *self.identity.write().await = Some(name.to_string());
                {
                    let mut local = self.local.write().await;
                    *local = LocalState::default();
                    local.replace_messages(doc.messages);
                }
                self.poll().await;
                Ok(())
            }
            Err(e) => {
                self.mark_disconnected(&e).await;
                Err(e)
            }
        }
    }

    /// Append a chat message from the local identity.
    ///
    /// Blank text is ignored. A failed send is not retried. Returns whether
    /// the message was written.
    pub async fn send(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            log::debug!("Ignoring blank message");
            return false;
        }
        let Some(name) = self.identity().await else {
            log::debug!("Ignoring message sent before join");
            return false;
        };

        let log = self.log;
        let presence = self.presence;
        let body = text.to_string();
        let result = self
            .read_modify_write(move |doc, now| {
                let doc = log.append(doc, Message::chat(name.clone(), body, now));
                presence.set_typing(doc, &name, false, now)
            })
            .await;

        match result {
            Ok(_) => {
                self.local.write().await.forget_observed();
                self.poll().await;
                true
            }
            Err(e) => {
                self.mark_disconnected(&e).await;
                false
            }
        }
    }

    /// Publish or withdraw the local typing signal.
    pub async fn set_typing(&self, active: bool) -> bool {
        let Some(name) = self.identity().await else {
            return false;
        };

        let presence = self.presence;
        let result = self
            .read_modify_write(move |doc, now| presence.set_typing(doc, &name, active, now))
            .await;

        match result {
            Ok(_) => {
                self.poll().await;
                true
            }
            Err(e) => {
                self.mark_disconnected(&e).await;
                false
            }
        }
    }

    /// Announce departure, drop the presence entry and clear the identity.
    ///
    /// Best effort: the identity and view are cleared even when the final
    /// write fails. Returns whether the write succeeded.
    pub async fn leave(&self) -> bool {
        let Some(name) = self.identity.write().await.take() else {
            return false;
        };

        let log = self.log;
        let presence = self.presence;
        let result = self
            .read_modify_write(move |doc, now| {
                let doc = log.append(doc, Message::notice(format!("{name} left"), now));
                presence.set_typing(doc, &name, false, now)
            })
            .await;

        let snapshot = {
            let mut local = self.local.write().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
            *local = LocalState::default();
            local.view.clone()
        };
        self.notify(SyncEvent::ViewChanged(snapshot));

        match result {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Leave notice not written (client {}): {e}", self.client_id);
                false
            }
        }
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    async fn mark_disconnected(&self, error: &SyncError) {
        log::warn!("Store access failed (client {}): {error}", self.client_id);
        let snapshot = {
            let mut local = self.local.write().await;
            local.view.connected = false;
            local.view.clone()
        };
        self.notify(SyncEvent::ViewChanged(snapshot));
    }

    /// Deliver an event without waiting; a full channel drops it.
    pub(crate) fn notify(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => log::debug!("Event channel full, dropping event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    const START: u64 = 1_700_000_000_000;

    fn engine(store: &Arc<MemoryStore>, clock: &ManualClock) -> SyncEngine<Arc<MemoryStore>, ManualClock> {
        SyncEngine::with_clock(Arc::clone(store), clock.clone(), SyncConfig::for_testing())
    }

    async fn stored(store: &MemoryStore) -> Document {
        let raw = store.peek(&SyncConfig::for_testing().store_key).await;
        Document::from_stored(raw.as_deref())
    }

    #[tokio::test]
    async fn test_initial_view() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, &ManualClock::new(START));

        let view = engine.view().await;
        assert!(view.messages.is_empty());
        assert!(view.connected);
        assert_eq!(engine.identity().await, None);
    }

    #[tokio::test]
    async fn test_join_writes_notice_and_sets_identity() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, &ManualClock::new(START));

        engine.join("  Ana ").await.unwrap();

        assert_eq!(engine.identity().await.as_deref(), Some("Ana"));
        let doc = stored(&store).await;
        assert_eq!(doc.messages, vec![Message::notice("Ana joined", START)]);
        assert_eq!(engine.view().await.messages, doc.messages);
    }

    #[tokio::test]
    async fn test_join_blank_name_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, &ManualClock::new(START));

        assert!(matches!(engine.join("   ").await, Err(SyncError::EmptyInput)));
        assert_eq!(store.read_count(), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_join_store_failure_surfaces() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let engine = engine(&store, &ManualClock::new(START));

        assert!(matches!(engine.join("Ana").await, Err(SyncError::Store(_))));
        assert_eq!(engine.identity().await, None);
        assert!(!engine.view().await.connected);
    }

    #[tokio::test]
    async fn test_send_before_join_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, &ManualClock::new(START));

        assert!(!engine.send("oi").await);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_send_blank_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, &ManualClock::new(START));
        engine.join("Ana").await.unwrap();
        let writes = store.write_count();

        assert!(!engine.send(" \n\t ").await);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_send_appends_and_clears_own_typing() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(START);
        let engine = engine(&store, &clock);
        engine.join("Ana").await.unwrap();
        engine.set_typing(true).await;
        assert!(stored(&store).await.typing.contains_key("Ana"));

        clock.advance(Duration::from_millis(10));
        assert!(engine.send(" oi ").await);

        let doc = stored(&store).await;
        assert_eq!(doc.messages.last(), Some(&Message::chat("Ana", "oi", START + 10)));
        assert!(doc.typing.is_empty());
        assert_eq!(engine.view().await.messages, doc.messages);
    }

    #[tokio::test]
    async fn test_send_failure_downgrades_connected_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, &ManualClock::new(START));
        engine.join("Ana").await.unwrap();
        let before = engine.view().await.messages;

        store.set_available(false);
        assert!(!engine.send("lost").await);
        let view = engine.view().await;
        assert!(!view.connected);
        assert_eq!(view.messages, before);

        store.set_available(true);
        assert!(engine.poll().await);
        assert!(!stored(&store).await.messages.iter().any(|m| m.text() == "lost"));
    }

    #[tokio::test]
    async fn test_poll_failure_keeps_stale_view() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, &ManualClock::new(START));
        engine.join("Ana").await.unwrap();
        let before = engine.view().await;

        store.set_available(false);
        assert!(!engine.poll().await);

        let after = engine.view().await;
        assert!(!after.connected);
        assert_eq!(after.messages, before.messages);
    }

    #[tokio::test]
    async fn test_poll_sees_saturated_log_changes() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(START);
        let config = SyncConfig {
            max_log: 3,
            ..SyncConfig::for_testing()
        };
        let ana = SyncEngine::with_clock(Arc::clone(&store), clock.clone(), config.clone());
        let ben = SyncEngine::with_clock(Arc::clone(&store), clock.clone(), config);

        ana.join("Ana").await.unwrap();
        ben.join("Ben").await.unwrap();
        ana.send("one").await;
        ben.poll().await;
        assert_eq!(ben.view().await.messages.len(), 3);

        ana.send("two").await;
        ben.poll().await;
        let view = ben.view().await;
        assert_eq!(view.messages.len(), 3);
        assert_eq!(view.messages.last().map(Message::text), Some("two"));
    }

    #[tokio::test]
    async fn test_poll_excludes_own_typing() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(START);
        let ana = engine(&store, &clock);
        let ben = engine(&store, &clock);
        ana.join("Ana").await.unwrap();
        ben.join("Ben").await.unwrap();

        ana.set_typing(true).await;
        ben.set_typing(true).await;
        ana.poll().await;

        let typers = ana.view().await.active_typers;
        assert!(typers.contains("Ben"));
        assert!(!typers.contains("Ana"));
    }

    #[tokio::test]
    async fn test_leave_clears_identity_and_presence() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(START);
        let engine = engine(&store, &clock);
        engine.join("Ana").await.unwrap();
        engine.set_typing(true).await;

        assert!(engine.leave().await);

        let doc = stored(&store).await;
        assert_eq!(doc.messages.last(), Some(&Message::notice("Ana left", START)));
        assert!(doc.typing.is_empty());
        assert_eq!(engine.identity().await, None);
        assert!(engine.view().await.messages.is_empty());
        assert!(!engine.leave().await);
    }

    #[tokio::test]
    async fn test_leave_failure_still_clears_identity() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, &ManualClock::new(START));
        engine.join("Ana").await.unwrap();

        store.set_available(false);
        assert!(!engine.leave().await);
        assert_eq!(engine.identity().await, None);
    }

    #[tokio::test]
    async fn test_pruning_applies_on_write() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(START);
        let config = SyncConfig {
            prune_presence_after: Some(Duration::from_secs(60)),
            ..SyncConfig::for_testing()
        };
        let ghost = SyncEngine::with_clock(Arc::clone(&store), clock.clone(), config.clone());
        let ana = SyncEngine::with_clock(Arc::clone(&store), clock.clone(), config);

        ghost.join("Ghost").await.unwrap();
        ghost.set_typing(true).await;
        clock.advance(Duration::from_secs(120));

        ana.join("Ana").await.unwrap();
        assert!(!stored(&store).await.typing.contains_key("Ghost"));
    }

    #[tokio::test]
    async fn test_events_follow_polls() {
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(&store, &ManualClock::new(START));
        let mut events = engine.take_event_rx().unwrap();
        assert!(engine.take_event_rx().is_none());

        engine.poll().await;
        match events.try_recv() {
            Ok(SyncEvent::ViewChanged(view)) => assert!(view.connected),
            other => panic!("Expected ViewChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_event_channel_does_not_block() {
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            event_capacity: 1,
            ..SyncConfig::for_testing()
        };
        let engine = SyncEngine::with_clock(Arc::clone(&store), ManualClock::new(START), config);

        for _ in 0..5 {
            engine.poll().await;
        }
        assert_eq!(store.read_count(), 5);
    }
}

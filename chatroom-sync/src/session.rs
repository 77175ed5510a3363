//! Session controller: lifecycle and timers around one engine.
//!
//! ```text
//!  Disconnected ──join──► Connecting ──ok──► Connected ──leave──► Disconnected
//!        ▲                    │
//!        └──── store error ───┘
//! ```
//!
//! While connected the session owns two timers, both cancelled on leave
//! and on drop:
//! - the poll timer, firing every `poll_interval`,
//! - the typing-expiry timer, withdrawing the typing signal after
//!   `typing_idle` without a new `set_typing(true)`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncError, SyncEvent, ViewState};
use crate::storage::KvStore;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A client's participation in the room.
pub struct Session<S: KvStore, C: Clock = SystemClock> {
    engine: Arc<SyncEngine<S, C>>,
    state: SessionState,
    /// Fresh for every join
    session_id: Option<Uuid>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    poll_task: Option<JoinHandle<()>>,
    typing_task: Option<JoinHandle<()>>,
}

impl<S: KvStore> Session<S, SystemClock> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self::with_clock(store, SystemClock, config)
    }
}

impl<S: KvStore, C: Clock> Session<S, C> {
    pub fn with_clock(store: S, clock: C, config: SyncConfig) -> Self {
        let mut engine = SyncEngine::with_clock(store, clock, config);
        let event_rx = engine.take_event_rx();
        Self {
            engine: Arc::new(engine),
            state: SessionState::Disconnected,
            session_id: None,
            event_rx,
            poll_task: None,
            typing_task: None,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn engine(&self) -> &Arc<SyncEngine<S, C>> {
        &self.engine
    }

    pub async fn view(&self) -> ViewState {
        self.engine.view().await
    }

    /// Enter the room as `name` and start polling.
    ///
    /// Blank names are rejected without touching the store. On store
    /// failure the session falls back to `Disconnected` and the error is
    /// returned.
    pub async fn join(&mut self, name: &str) -> Result<(), SyncError> {
        if self.state != SessionState::Disconnected {
            return Err(SyncError::InvalidState(self.state));
        }
        if name.trim().is_empty() {
            return Err(SyncError::EmptyInput);
        }

        self.transition(SessionState::Connecting);
        if let Err(e) = self.engine.join(name).await {
            log::warn!("Join as {:?} failed: {e}", name.trim());
            self.transition(SessionState::Disconnected);
            return Err(e);
        }

        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.start_polling();
        self.transition(SessionState::Connected);
        log::info!(
            "Joined room as {:?} (session {session_id}, client {})",
            name.trim(),
            self.engine.client_id()
        );
        Ok(())
    }

    /// Send a chat message. Returns whether it was written.
    pub async fn send(&mut self, text: &str) -> bool {
        if self.state != SessionState::Connected {
            return false;
        }
        let sent = self.engine.send(text).await;
        if sent {
            // The send cycle already cleared our typing entry
            self.cancel_typing_timer();
        }
        sent
    }

    /// Publish (`true`) or withdraw (`false`) the typing signal.
    ///
    /// Publishing re-arms the typing-expiry timer.
    pub async fn set_typing(&mut self, active: bool) -> bool {
        if self.state != SessionState::Connected {
            return false;
        }
        self.cancel_typing_timer();
        if active {
            self.arm_typing_timer();
        }
        self.engine.set_typing(active).await
    }

    /// Leave the room.
    ///
    /// Stops both timers, then makes one best-effort write of the leave
    /// notice. The session ends up `Disconnected` either way; the returned
    /// flag tells whether the notice was written.
    pub async fn leave(&mut self) -> Result<bool, SyncError> {
        if self.state != SessionState::Connected {
            return Err(SyncError::InvalidState(self.state));
        }

        self.stop_timers();
        let written = self.engine.leave().await;

        let session_id = self.session_id.take();
        self.transition(SessionState::Disconnected);
        log::info!("Left room (session {session_id:?}, notice written: {written})");
        Ok(written)
    }

    // ─── Timers ───────────────────────────────────────────────────────

    fn start_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }

        let engine = Arc::clone(&self.engine);
        let period = engine.config().effective_poll_interval();
        self.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.poll().await;
            }
        }));
    }

    fn arm_typing_timer(&mut self) {
        let engine = Arc::clone(&self.engine);
        let idle = engine.config().typing_idle;
        self.typing_task = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            engine.set_typing(false).await;
        }));
    }

    fn cancel_typing_timer(&mut self) {
        if let Some(task) = self.typing_task.take() {
            task.abort();
        }
    }

    fn stop_timers(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        self.cancel_typing_timer();
    }

    fn transition(&mut self, state: SessionState) {
        self.state = state;
        self.engine.notify(SyncEvent::SessionChanged(state));
    }
}

impl<S: KvStore, C: Clock> Drop for Session<S, C> {
    fn drop(&mut self) {
        self.stop_timers();
    }
}

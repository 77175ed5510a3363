//! # chatroom-sync: Polling chat room over a shared key-value document
//!
//! Every client keeps one JSON document in a shared store in sync: a
//! bounded message log plus a typing-presence map. The store only offers
//! `get` and `set`, so clients poll for changes and write back whole
//! documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   intents    ┌─────────────┐  get / set   ┌─────────────┐
//! │ Session     │ ───────────► │ SyncEngine  │ ───────────► │ KvStore     │
//! │ (timers)    │   poll tick  │ (per client)│ ◄─────────── │ (shared)    │
//! └──────┬──────┘              └──────┬──────┘   Document   └─────────────┘
//!        │                            │
//!        │ SessionChanged             │ ViewChanged
//!        ▼                            ▼
//! ┌───────────────────────────────────────────┐
//! │ mpsc::Receiver<SyncEvent> (rendering)     │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`]: Document model and JSON codec
//! - [`message_log`]: Bounded append and display grouping
//! - [`presence`]: Typing presence with time-to-live
//! - [`engine`]: Polling and read-modify-write cycles
//! - [`session`]: Join/leave lifecycle, poll and typing timers
//! - [`storage`]: `KvStore` trait, in-memory and RocksDB stores
//! - [`config`] / [`clock`]: Tunables and time source
//!
//! ## Consistency
//!
//! Last writer wins. Two cycles from different clients that overlap
//! lose the earlier write; nothing detects or repairs it.

pub mod clock;
pub mod config;
pub mod document;
pub mod engine;
pub mod message_log;
pub mod presence;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SyncConfig, DEFAULT_STORE_KEY, POLL_INTERVAL, TYPING_IDLE};
pub use document::{CodecError, Document, Message};
pub use engine::{SyncEngine, SyncError, SyncEvent, ViewState};
pub use message_log::{group_messages, BlockEntry, MessageGroup, MessageLog, MAX_LOG};
pub use presence::{PresenceTracker, PRESENCE_TTL};
pub use session::{Session, SessionState};
pub use storage::{KeyMetadata, KvStore, MemoryStore, RocksStore, StoreConfig, StoreError};

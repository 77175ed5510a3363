//! Engine configuration.

use std::time::Duration;

use crate::message_log::MAX_LOG;
use crate::presence::PRESENCE_TTL;

/// Default poll interval (3 s).
pub const POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Default idle time after which the local typing signal is withdrawn.
pub const TYPING_IDLE: Duration = Duration::from_millis(2500);

/// Default store key holding the shared document.
pub const DEFAULT_STORE_KEY: &str = "room-chat-v3";

/// Synchronization engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Key of the shared document in the store
    pub store_key: String,
    /// Interval between scheduled polls (default: 3s)
    pub poll_interval: Duration,
    /// Window after which a typing signal is stale (default: 5s)
    pub presence_ttl: Duration,
    /// Maximum number of retained messages (default: 150)
    pub max_log: usize,
    /// Typing-expiry timer armed by `Session::set_typing(true)` (default: 2.5s)
    pub typing_idle: Duration,
    /// Capacity of the engine event channel (default: 256)
    pub event_capacity: usize,
    /// Drop presence entries older than this on every write (default: off)
    pub prune_presence_after: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_key: DEFAULT_STORE_KEY.to_string(),
            poll_interval: POLL_INTERVAL,
            presence_ttl: PRESENCE_TTL,
            max_log: MAX_LOG,
            typing_idle: TYPING_IDLE,
            event_capacity: 256,
            prune_presence_after: None,
        }
    }
}

impl SyncConfig {
    /// Create config for testing (fast timers, small event buffer).
    pub fn for_testing() -> Self {
        Self {
            store_key: "room-chat-test".to_string(),
            poll_interval: Duration::from_millis(50),
            presence_ttl: PRESENCE_TTL,
            max_log: MAX_LOG,
            typing_idle: Duration::from_millis(100),
            event_capacity: 64,
            prune_presence_after: None,
        }
    }

    /// Poll interval clamped to a period `tokio::time::interval` accepts.
    pub(crate) fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(Duration::from_millis(1))
    }
}

//! Typing presence stored in the shared document.
//!
//! Each client owns one entry of `Document::typing`, keyed by its display
//! name and holding the time of its last keystroke. Readers never delete
//! other clients' entries; they filter them by age:
//!
//! ```text
//! typing = { "Ana": t₀, "Ben": t₁ }
//!                 │
//!                 ▼
//! view_active(doc, now, exclude = "Ben")
//!                 │  keep name ≠ exclude  ∧  now − t < ttl
//!                 ▼
//!            { "Ana" }     (if Ana typed within the last 5s)
//! ```
//!
//! Entries left behind by clients that vanished without leaving stay in the
//! document unless pruning is enabled (`SyncConfig::prune_presence_after`).

use std::collections::BTreeSet;
use std::time::Duration;

use crate::document::Document;

/// Window after which a typing signal is stale.
pub const PRESENCE_TTL: Duration = Duration::from_millis(5000);

/// Presence rules applied to the document's typing map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceTracker {
    ttl: Duration,
    prune_after: Option<Duration>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self {
            ttl: PRESENCE_TTL,
            prune_after: None,
        }
    }
}

impl PresenceTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            prune_after: None,
        }
    }

    /// Also drop entries older than `after` whenever `prune_stale` runs.
    pub fn with_pruning(mut self, after: Duration) -> Self {
        self.prune_after = Some(after);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Set or clear `name`'s typing entry.
    ///
    /// Overwrites only that entry; the rest of the map is whatever the
    /// surrounding read-modify-write cycle read.
    pub fn set_typing(&self, mut doc: Document, name: &str, active: bool, now: u64) -> Document {
        if active {
            doc.typing.insert(name.to_string(), now);
        } else {
            doc.typing.remove(name);
        }
        doc
    }

    /// Names currently typing, excluding `exclude`.
    pub fn view_active(&self, doc: &Document, now: u64, exclude: Option<&str>) -> BTreeSet<String> {
        doc.typing
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != exclude)
            .filter(|(_, last)| self.is_fresh(**last, now))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether an entry written at `last_active` is still within the TTL.
    ///
    /// Entries stamped in the future (clock skew between clients) count as fresh.
    pub fn is_fresh(&self, last_active: u64, now: u64) -> bool {
        u128::from(now.saturating_sub(last_active)) < self.ttl.as_millis()
    }

    /// Remove entries older than the pruning horizon.
    ///
    /// Returns the pruned document and the removed names. A no-op when
    /// pruning is disabled.
    pub fn prune_stale(&self, mut doc: Document, now: u64) -> (Document, Vec<String>) {
        let Some(horizon) = self.prune_after else {
            return (doc, Vec::new());
        };

        let stale: Vec<String> = doc
            .typing
            .iter()
            .filter(|(_, last)| u128::from(now.saturating_sub(**last)) >= horizon.as_millis())
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            doc.typing.remove(name);
        }

        (doc, stale)
    }
}

//! In-process store shared by several engines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::RwLock;

use super::{KvStore, StoreError};

/// Shared in-memory map with switchable availability.
///
/// Wrap it in an `Arc` and hand clones to each engine to simulate several
/// clients on one store.
#[derive(Debug)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
    available: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Make every subsequent access succeed (`true`) or fail (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Successful reads so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw value under `key`, bypassing availability and counters.
    pub async fn peek(&self, key: &str) -> Option<String> {
        self.values.read().await.get(key).cloned()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }
}

impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let value = self.values.read().await.get(key).cloned();
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.check()?;
        self.values.write().await.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_absent_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("room").await.unwrap(), None);
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("room", "{}".into()).await.unwrap();
        assert_eq!(store.get("room").await.unwrap(), Some("{}".to_string()));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_store_fails_both_ways() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(store.get("room").await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.set("room", "{}".into()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.peek("room").await, None);

        store.set_available(true);
        store.set("room", "{}".into()).await.unwrap();
    }

    #[tokio::test]
    async fn test_arc_shares_values() {
        let store = Arc::new(MemoryStore::new());
        let other = Arc::clone(&store);

        store.set("room", "a".into()).await.unwrap();
        assert_eq!(other.get("room").await.unwrap(), Some("a".to_string()));
    }
}

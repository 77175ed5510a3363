//! Key-value stores holding the shared document.
//!
//! ```text
//! ┌─────────────┐  get(key) / set(key, value)  ┌──────────────────────┐
//! │ SyncEngine  │ ───────────────────────────► │ KvStore              │
//! │ (per client)│                              │  ├─ MemoryStore      │
//! └─────────────┘                              │  └─ RocksStore (LZ4) │
//!                                              └──────────────────────┘
//! ```
//!
//! Stores are atomic per key and nothing more: no transactions, no
//! compare-and-swap, no change notifications.

pub mod memory;
pub mod rocks;

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

pub use memory::MemoryStore;
pub use rocks::{KeyMetadata, RocksStore, StoreConfig};

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// RocksDB internal error
    #[error("Database error: {0}")]
    Database(String),
    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),
    /// Stored bytes are not UTF-8 text
    #[error("Encoding error: {0}")]
    Encoding(String),
    /// Metadata record could not be encoded or decoded
    #[error("Metadata error: {0}")]
    Metadata(String),
}

/// Minimal key-value API consumed by the engine.
pub trait KvStore: Send + Sync + 'static {
    /// Read the value under `key`, `None` if it was never written.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Replace the value under `key`.
    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<T: KvStore> KvStore for Arc<T> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).set(key, value)
    }
}

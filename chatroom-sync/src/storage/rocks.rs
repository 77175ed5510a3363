//! RocksDB-backed key-value store.
//!
//! Column families:
//! - `values`  : Document values (UTF-8, LZ4 compressed), keyed by store key
//! - `metadata`: Per-key write statistics (bincode), keyed by store key
//!
//! A value and its metadata are written in one `WriteBatch`, so readers
//! never see a value without the matching metadata record.
//!
//! Reference: Kleppmann, DDIA, Chapter 3 (LSM Trees, SSTables)

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{KvStore, StoreError};

/// Column family names.
const CF_VALUES: &str = "values";
const CF_METADATA: &str = "metadata";

/// All column family names for initialization.
const COLUMN_FAMILIES: &[&str] = &[CF_VALUES, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("chatroom_data"),
            block_cache_size: 32 * 1024 * 1024, // 32MB
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, given directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024, // 4MB
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024, // 1MB
        }
    }
}

/// Write statistics stored alongside each value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Number of successful writes to this key
    pub writes: u64,
    /// Uncompressed value size in bytes
    pub raw_size: u64,
    /// Compressed value size in bytes
    pub compressed_size: u64,
    /// First write (seconds since epoch)
    pub created_at: u64,
    /// Last write (seconds since epoch)
    pub updated_at: u64,
}

impl KeyMetadata {
    fn new() -> Self {
        let now = now_secs();
        Self {
            writes: 0,
            raw_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Metadata(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Metadata(e.to_string()))?;
        Ok(meta)
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// RocksDB-backed store.
///
/// One database can serve several engines in the same process; share it
/// through an `Arc`.
pub struct RocksStore {
    /// RocksDB instance (single-threaded mode, shared through tokio tasks)
    db: DBWithThreadMode<SingleThreaded>,
    /// Store configuration
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened room store at {}", config.path.display());
        Ok(Self { db, config })
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Values are LZ4 compressed before they reach RocksDB
            CF_VALUES => opts.set_compression_type(DBCompressionType::None),
            _ => opts.set_compression_type(DBCompressionType::Lz4),
        }
        opts.optimize_for_point_lookup(config.block_cache_size as u64);

        opts
    }

    /// Read and decompress the value under `key`.
    pub fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf(CF_VALUES)?;
        let Some(compressed) = self.db.get_cf(cf, key.as_bytes())? else {
            return Ok(None);
        };

        let raw = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        String::from_utf8(raw)
            .map(Some)
            .map_err(|e| StoreError::Encoding(e.to_string()))
    }

    /// Compress and store `value` under `key`, updating its metadata.
    pub fn save(&self, key: &str, value: &str) -> Result<KeyMetadata, StoreError> {
        let cf_values = self.cf(CF_VALUES)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(value.as_bytes());

        let mut meta = self.load_metadata(key)?.unwrap_or_else(KeyMetadata::new);
        meta.writes += 1;
        meta.raw_size = value.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = now_secs();

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_values, key.as_bytes(), &compressed);
        batch.put_cf(cf_meta, key.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    /// Load write statistics for `key`.
    pub fn load_metadata(&self, key: &str) -> Result<Option<KeyMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => KeyMetadata::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// List every key that holds a value.
    pub fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut keys = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Encoding(e.to_string()))?;
            keys.push(key);
        }

        Ok(keys)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl KvStore for RocksStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.load(key)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.save(key, &value).map(|_| ())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

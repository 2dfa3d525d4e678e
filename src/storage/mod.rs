//! Storage layer: the session contract every backend implements, plus the
//! bundled backends.
//!
//! ## Architecture
//!
//! - `CacheStorage` - one connected backend; opens a session per cache
//! - `StorageSession` - CRUD primitives for a single cache
//! - `Backend` - the bundled backends, selected by connection URI scheme
//!
//! The orchestrator never interprets backend errors; it propagates them.

pub mod memory;
pub mod mongo;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::cache::{CacheKey, CacheValue, StoredRecord};
use crate::error::{CacheError, Result};

pub use memory::MemoryStorage;
pub use mongo::MongoStorage;

/// CRUD session against one cache's records.
///
/// Implementations decide their own atomicity; the orchestrator adds no
/// locking on top of a session.
#[async_trait]
pub trait StorageSession<K, V>: Send + Sync
where
    K: CacheKey,
    V: CacheValue,
{
    async fn contains_key(&self, key: &K) -> Result<bool>;

    async fn get(&self, key: &K) -> Result<Option<StoredRecord<K, V>>>;

    /// Records for the given keys; keys without a record are skipped.
    async fn get_all(&self, keys: &[K]) -> Result<Vec<StoredRecord<K, V>>>;

    /// Every record in the cache.
    async fn all(&self) -> Result<Vec<StoredRecord<K, V>>>;

    /// Insert or overwrite.
    async fn put(&self, record: &StoredRecord<K, V>) -> Result<()>;

    async fn put_all(&self, records: &[StoredRecord<K, V>]) -> Result<()>;

    /// Overwrite an existing record. Returns `false` when the key is absent.
    async fn update(&self, record: &StoredRecord<K, V>) -> Result<bool>;

    /// Persist `record.expires_at` for an existing key; absent keys are ignored.
    async fn update_expiry(&self, record: &StoredRecord<K, V>) -> Result<()>;

    async fn remove(&self, key: &K) -> Result<bool>;

    /// Returns the number of records removed.
    async fn remove_all(&self, keys: &[K]) -> Result<u64>;

    /// Remove every record. Returns the number removed.
    async fn clear(&self) -> Result<u64>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A connected storage backend.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    /// Open the session backing cache `name`.
    async fn open_session<K, V>(&self, name: &str) -> Result<Arc<dyn StorageSession<K, V>>>
    where
        K: CacheKey,
        V: CacheValue;

    /// Whether a cache name may hold only one key/value type pair.
    fn is_fixed_types(&self) -> bool;

    fn close(&self);
}

/// The bundled backends.
#[derive(Debug, Clone)]
pub enum Backend {
    Memory(MemoryStorage),
    Mongo(MongoStorage),
}

impl Backend {
    /// Connect to the backend named by `uri`.
    ///
    /// - `memory://<label>[?capacity=N&fixed_types=true]`
    /// - `mongodb://...` or `mongodb+srv://...`
    ///
    /// # Errors
    /// Returns a configuration error for unknown schemes and propagates
    /// connection failures.
    pub async fn connect(uri: &str) -> Result<Self> {
        let backend = if uri.starts_with("memory://") {
            Self::Memory(MemoryStorage::from_uri(uri)?)
        } else if uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://") {
            Self::Mongo(MongoStorage::connect(uri).await?)
        } else {
            return Err(CacheError::config(format!(
                "unsupported storage URI \"{}\" (expected memory:// or mongodb://)",
                uri
            )));
        };

        info!("Connected storage backend for {}", backend.kind());
        Ok(backend)
    }

    /// Short backend name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Mongo(_) => "mongodb",
        }
    }
}

#[async_trait]
impl CacheStorage for Backend {
    async fn open_session<K, V>(&self, name: &str) -> Result<Arc<dyn StorageSession<K, V>>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        match self {
            Self::Memory(storage) => storage.open_session(name).await,
            Self::Mongo(storage) => storage.open_session(name).await,
        }
    }

    fn is_fixed_types(&self) -> bool {
        match self {
            Self::Memory(storage) => storage.is_fixed_types(),
            Self::Mongo(storage) => storage.is_fixed_types(),
        }
    }

    fn close(&self) {
        match self {
            Self::Memory(storage) => CacheStorage::close(storage),
            Self::Mongo(storage) => CacheStorage::close(storage),
        }
    }
}

//! In-memory backend built on Moka.
//!
//! Each cache identity gets its own bounded Moka cache. Stores outlive the
//! sessions that use them, so destroying and re-creating a cache under the
//! same identity sees the earlier records, as a database backend would.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use tracing::debug;

use super::{CacheStorage, StorageSession};
use crate::cache::{CacheIdentity, CacheKey, CacheValue, StoredRecord};
use crate::error::{CacheError, Result, StorageError};

/// Default per-cache capacity.
const DEFAULT_CAPACITY: u64 = 100_000;

/// In-memory storage backend.
#[derive(Clone)]
pub struct MemoryStorage {
    label: Arc<str>,
    capacity: u64,
    fixed_types: bool,
    stores: Arc<DashMap<CacheIdentity, Arc<dyn Any + Send + Sync>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Create an empty backend with the default capacity.
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            capacity: DEFAULT_CAPACITY,
            fixed_types: false,
            stores: Arc::new(DashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Parse `memory://<label>[?capacity=N&fixed_types=bool]`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let parsed = url::Url::parse(uri)
            .map_err(|e| CacheError::config(format!("malformed URI \"{}\": {}", uri, e)))?;

        let label = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .unwrap_or("default")
            .to_string();
        let mut storage = Self::new(label);

        for (param, value) in parsed.query_pairs() {
            match param.as_ref() {
                "capacity" => {
                    let capacity = value.parse::<u64>().map_err(|_| {
                        CacheError::config(format!("capacity must be an integer, got \"{}\"", value))
                    })?;
                    storage = storage.capacity(capacity);
                }
                "fixed_types" => {
                    let fixed = value.parse::<bool>().map_err(|_| {
                        CacheError::config(format!(
                            "fixed_types must be true or false, got \"{}\"",
                            value
                        ))
                    })?;
                    storage = storage.fixed_types(fixed);
                }
                other => {
                    return Err(CacheError::config(format!(
                        "unknown memory storage parameter \"{}\"",
                        other
                    )));
                }
            }
        }

        Ok(storage)
    }

    /// Set the per-cache capacity (builder pattern).
    #[must_use]
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Allow only one key/value type pair per cache name.
    #[must_use]
    pub fn fixed_types(mut self, fixed: bool) -> Self {
        self.fixed_types = fixed;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn store<K, V>(&self, name: &str) -> Result<Arc<MemoryStore<K, V>>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        let identity = CacheIdentity::of::<K, V>(name);
        let erased = self
            .stores
            .entry(identity)
            .or_insert_with(|| {
                debug!("Creating in-memory store: {}", name);
                Arc::new(MemoryStore::<K, V>::new(self.capacity)) as Arc<dyn Any + Send + Sync>
            })
            .clone();

        erased.downcast::<MemoryStore<K, V>>().map_err(|_| {
            StorageError::Malformed(format!("in-memory store \"{}\" holds other types", name))
                .into()
        })
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("fixed_types", &self.fixed_types)
            .field("store_count", &self.stores.len())
            .finish()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open_session<K, V>(&self, name: &str) -> Result<Arc<dyn StorageSession<K, V>>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::closed(format!("memory storage \"{}\"", self.label)));
        }
        let store = self.store::<K, V>(name)?;
        Ok(Arc::new(MemorySession {
            store,
            closed: AtomicBool::new(false),
        }))
    }

    fn is_fixed_types(&self) -> bool {
        self.fixed_types
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Records of one cache.
struct MemoryStore<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    inner: Cache<K, StoredRecord<K, V>>,
}

impl<K, V> MemoryStore<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::builder().max_capacity(capacity).build(),
        }
    }
}

/// Session over a shared [`MemoryStore`].
struct MemorySession<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    store: Arc<MemoryStore<K, V>>,
    closed: AtomicBool,
}

impl<K, V> MemorySession<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn assert_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::closed("storage session"));
        }
        Ok(())
    }

    // Every mutation goes through `and_compute_with`, which serializes
    // operations on the same key.

    fn write(&self, record: &StoredRecord<K, V>) {
        let mut stored = record.clone();
        stored.previous_value = None;
        self.store
            .inner
            .entry(record.key.clone())
            .and_compute_with(|_| Op::Put(stored));
    }

    fn remove_key(&self, key: &K) -> bool {
        let outcome = self
            .store
            .inner
            .entry(key.clone())
            .and_compute_with(|current| match current {
                Some(_) => Op::Remove,
                None => Op::Nop,
            });
        matches!(outcome, CompResult::Removed(_))
    }

    fn remove_keys(&self, keys: &[K]) -> u64 {
        keys.iter().filter(|key| self.remove_key(key)).count() as u64
    }
}

#[async_trait]
impl<K, V> StorageSession<K, V> for MemorySession<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    async fn contains_key(&self, key: &K) -> Result<bool> {
        self.assert_open()?;
        Ok(self.store.inner.contains_key(key))
    }

    async fn get(&self, key: &K) -> Result<Option<StoredRecord<K, V>>> {
        self.assert_open()?;
        Ok(self.store.inner.get(key))
    }

    async fn get_all(&self, keys: &[K]) -> Result<Vec<StoredRecord<K, V>>> {
        self.assert_open()?;
        Ok(keys.iter().filter_map(|k| self.store.inner.get(k)).collect())
    }

    async fn all(&self) -> Result<Vec<StoredRecord<K, V>>> {
        self.assert_open()?;
        Ok(self.store.inner.iter().map(|(_, record)| record).collect())
    }

    async fn put(&self, record: &StoredRecord<K, V>) -> Result<()> {
        self.assert_open()?;
        self.write(record);
        Ok(())
    }

    async fn put_all(&self, records: &[StoredRecord<K, V>]) -> Result<()> {
        self.assert_open()?;
        for record in records {
            self.write(record);
        }
        Ok(())
    }

    async fn update(&self, record: &StoredRecord<K, V>) -> Result<bool> {
        self.assert_open()?;
        let mut stored = record.clone();
        stored.previous_value = None;

        let outcome = self
            .store
            .inner
            .entry(record.key.clone())
            .and_compute_with(|current| match current {
                Some(_) => Op::Put(stored),
                None => Op::Nop,
            });
        Ok(matches!(outcome, CompResult::ReplacedWith(_)))
    }

    async fn update_expiry(&self, record: &StoredRecord<K, V>) -> Result<()> {
        self.assert_open()?;
        let expires_at = record.expires_at;

        self.store
            .inner
            .entry(record.key.clone())
            .and_compute_with(|current| match current {
                Some(entry) => {
                    let mut stored = entry.into_value();
                    stored.expires_at = expires_at;
                    Op::Put(stored)
                }
                None => Op::Nop,
            });
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        self.assert_open()?;
        Ok(self.remove_key(key))
    }

    async fn remove_all(&self, keys: &[K]) -> Result<u64> {
        self.assert_open()?;
        Ok(self.remove_keys(keys))
    }

    async fn clear(&self) -> Result<u64> {
        self.assert_open()?;
        let keys: Vec<K> = self
            .store
            .inner
            .iter()
            .map(|(key, _)| K::clone(&key))
            .collect();
        Ok(self.remove_keys(&keys))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

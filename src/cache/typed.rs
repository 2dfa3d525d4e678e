//! Typed cache: the per-cache CRUD orchestrator.
//!
//! Every operation follows the same order: read from the session, let the
//! expiry evaluator judge the record, mutate the session, forward to the
//! write-through source, then dispatch the collected events once.
//!
//! There is no per-key lock. Read-then-write operations (`put_if_absent`,
//! `replace_if`, `remove_if`, ...) can race with other writers between the
//! read and the write.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::completion::CompletionListener;
use super::entry::{EntryHandler, MutableEntry};
use super::expiry::{Action, Evaluation, ExpiryPolicy, PolicyEvaluator};
use super::identity::CacheIdentity;
use super::proxy::ProxySource;
use super::registry::ManagedCache;
use super::stats::{CacheStatistics, CacheStatus, StatisticsSnapshot};
use super::{CacheConfig, CacheKey, CacheValue, EntryFactory, StoredRecord};
use crate::error::{BoxError, CacheError, Result};
use crate::events::{
    CacheEntryEvent, EventBatch, EventDispatcher, EventType, ListenerConfiguration,
};
use crate::executor::BackgroundExecutor;
use crate::storage::StorageSession;

/// A cache of `V` values addressed by `K` keys.
///
/// Cloning is cheap and shares the same underlying cache.
pub struct TypedCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    inner: Arc<CacheInner<K, V>>,
}

struct CacheInner<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    identity: CacheIdentity,
    name: Arc<str>,
    session: Arc<dyn StorageSession<K, V>>,
    factory: EntryFactory<K, V>,
    evaluator: PolicyEvaluator<K, V>,
    proxy: ProxySource<K, V>,
    dispatcher: EventDispatcher<K, V>,
    executor: Arc<BackgroundExecutor>,
    stats: CacheStatistics,
    closed: AtomicBool,
}

// Manual Clone implementation that doesn't require K: Clone, V: Clone
impl<K, V> Clone for TypedCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> TypedCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Assemble a cache over an open session.
    ///
    /// `default_expiry` applies when the config names no policy.
    pub fn new(
        name: &str,
        session: Arc<dyn StorageSession<K, V>>,
        config: CacheConfig<K, V>,
        default_expiry: ExpiryPolicy,
        executor: Arc<BackgroundExecutor>,
    ) -> Result<Self> {
        config.validate()?;

        let name: Arc<str> = Arc::from(name);
        let policy = config.expiry.clone().unwrap_or(default_expiry);
        let dispatcher = EventDispatcher::new(Arc::clone(&name), Arc::clone(&executor));
        for listener in config.listeners.iter().cloned() {
            dispatcher.register(listener)?;
        }

        Ok(Self {
            inner: Arc::new(CacheInner {
                identity: CacheIdentity::of::<K, V>(name.as_ref()),
                evaluator: PolicyEvaluator::new(Arc::clone(&session), policy),
                proxy: config.proxy_source(),
                stats: CacheStatistics::new(config.statistics_enabled),
                factory: EntryFactory::new(),
                closed: AtomicBool::new(false),
                name,
                session,
                dispatcher,
                executor,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn identity(&self) -> &CacheIdentity {
        &self.inner.identity
    }

    pub fn expiry_policy(&self) -> &ExpiryPolicy {
        self.inner.evaluator.policy()
    }

    fn assert_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::closed(format!("cache \"{}\"", self.inner.name)));
        }
        Ok(())
    }

    fn event(&self, kind: EventType, key: K, value: Option<V>, old: Option<V>) -> CacheEntryEvent<K, V> {
        CacheEntryEvent::new(Arc::clone(&self.inner.name), kind, key, value, old)
    }

    fn expired_event(&self, record: StoredRecord<K, V>) -> CacheEntryEvent<K, V> {
        let value = record.value;
        self.event(EventType::Expired, record.key, Some(value.clone()), Some(value))
    }

    /// Session read plus evaluation; expired records become an event.
    async fn live_record(
        &self,
        key: &K,
        action: Action,
        batch: &mut EventBatch<'_, K, V>,
    ) -> Result<Option<StoredRecord<K, V>>> {
        let record = self.inner.session.get(key).await?;
        match self.inner.evaluator.evaluate(record, action).await? {
            Evaluation::Live(record) => Ok(Some(record)),
            Evaluation::Expired(record) => {
                self.inner.stats.record_expirations(1);
                batch.store_event(self.expired_event(record));
                Ok(None)
            }
            Evaluation::Absent => Ok(None),
        }
    }

    /// Create-evaluate and store a new record. Returns `false` when the
    /// policy expired it immediately.
    async fn insert(&self, key: K, value: V, batch: &mut EventBatch<'_, K, V>) -> Result<bool> {
        let record = self.inner.factory.create(key, value, None);
        let Some(record) = self
            .inner
            .evaluator
            .evaluate(Some(record), Action::Create)
            .await?
            .into_live()
        else {
            debug!("Record expired on creation in {}", self.inner.name);
            return Ok(false);
        };

        self.inner.session.put(&record).await?;
        self.inner.proxy.write(&record.key, &record.value).await?;
        self.inner.stats.record_puts(1);
        batch.store_event(self.event(EventType::Created, record.key, Some(record.value), None));
        Ok(true)
    }

    /// Update-evaluate and overwrite `current` with `value`, keeping its
    /// deadline unless the policy moves it.
    async fn update_record(
        &self,
        current: StoredRecord<K, V>,
        value: V,
        batch: &mut EventBatch<'_, K, V>,
    ) -> Result<bool> {
        let mut record =
            self.inner
                .factory
                .create(current.key.clone(), value, Some(current.value.clone()));
        record.expires_at = current.expires_at;

        match self.inner.evaluator.evaluate(Some(record), Action::Update).await? {
            Evaluation::Live(record) => {
                if !self.inner.session.update(&record).await? {
                    return Ok(false);
                }
                self.inner.proxy.write(&record.key, &record.value).await?;
                self.inner.stats.record_puts(1);
                batch.store_event(self.event(
                    EventType::Updated,
                    record.key,
                    Some(record.value),
                    record.previous_value,
                ));
                Ok(true)
            }
            Evaluation::Expired(_) => {
                self.inner.stats.record_expirations(1);
                batch.store_event(self.expired_event(current));
                Ok(false)
            }
            Evaluation::Absent => Ok(false),
        }
    }

    /// Get a value, loading it through the read-through source when there is
    /// no record at all. Loaded values are not stored.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let record = self.inner.session.get(key).await?;
        let value = match self.inner.evaluator.evaluate(record, Action::Access).await? {
            Evaluation::Live(record) => {
                self.inner.stats.record_hits(1);
                Some(record.value)
            }
            Evaluation::Expired(record) => {
                self.inner.stats.record_misses(1);
                self.inner.stats.record_expirations(1);
                batch.store_event(self.expired_event(record));
                None
            }
            Evaluation::Absent => {
                self.inner.stats.record_misses(1);
                self.inner.proxy.load(key).await?
            }
        };

        batch.dispatch()?;
        Ok(value)
    }

    /// Values for `keys`. Keys without any record are loaded through the
    /// read-through source in one call.
    pub async fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let records = self.inner.session.get_all(keys).await?;
        let mut found = HashMap::with_capacity(keys.len());
        let mut stored: HashSet<K> = HashSet::with_capacity(records.len());

        for record in records {
            stored.insert(record.key.clone());
            match self.inner.evaluator.evaluate(Some(record), Action::Access).await? {
                Evaluation::Live(record) => {
                    self.inner.stats.record_hits(1);
                    found.insert(record.key, record.value);
                }
                Evaluation::Expired(record) => {
                    self.inner.stats.record_misses(1);
                    self.inner.stats.record_expirations(1);
                    batch.store_event(self.expired_event(record));
                }
                Evaluation::Absent => {}
            }
        }

        let missing: Vec<K> = keys
            .iter()
            .filter(|k| !stored.contains(*k))
            .cloned()
            .collect();
        self.inner.stats.record_misses(missing.len() as u64);
        if !missing.is_empty() {
            found.extend(self.inner.proxy.load_all(&missing).await?);
        }

        batch.dispatch()?;
        Ok(found)
    }

    /// Whether a live record exists. Expired records are removed.
    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();
        let exists = self.live_record(key, Action::Check, &mut batch).await?.is_some();
        batch.dispatch()?;
        Ok(exists)
    }

    pub async fn put(&self, key: K, value: V) -> Result<()> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();
        self.insert(key, value, &mut batch).await?;
        batch.dispatch()
    }

    /// Store `value`, returning the value it replaced.
    pub async fn get_and_put(&self, key: K, value: V) -> Result<Option<V>> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let previous = match self.live_record(&key, Action::Access, &mut batch).await? {
            Some(current) => {
                let old = current.value.clone();
                self.update_record(current, value, &mut batch).await?;
                Some(old)
            }
            None => {
                self.insert(key, value, &mut batch).await?;
                None
            }
        };

        batch.dispatch()?;
        Ok(previous)
    }

    /// Store `value` only when there is no live record. Not atomic across
    /// the storage boundary.
    pub async fn put_if_absent(&self, key: K, value: V) -> Result<bool> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let stored = if self.live_record(&key, Action::Check, &mut batch).await?.is_some() {
            false
        } else {
            self.insert(key, value, &mut batch).await?
        };

        batch.dispatch()?;
        Ok(stored)
    }

    /// Store every entry with one session write, one write-through call and
    /// one dispatch.
    pub async fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let mut records = Vec::new();
        for (key, value) in entries {
            let record = self.inner.factory.create(key, value, None);
            if let Some(record) = self
                .inner
                .evaluator
                .evaluate(Some(record), Action::Create)
                .await?
                .into_live()
            {
                records.push(record);
            }
        }
        if records.is_empty() {
            return Ok(());
        }

        self.inner.session.put_all(&records).await?;
        self.inner.proxy.write_all(&records).await?;
        self.inner.stats.record_puts(records.len() as u64);

        for record in records {
            batch.store_event(self.event(EventType::Created, record.key, Some(record.value), None));
        }
        batch.dispatch()
    }

    /// Remove `key`. The delete is always forwarded to the write-through
    /// source; a `Removed` event is emitted only if a live record was
    /// removed. A record past its deadline counts as absent and is reported
    /// as `Expired`.
    pub async fn remove(&self, key: &K) -> Result<bool> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let removed = match self.live_record(key, Action::Check, &mut batch).await? {
            Some(_) => self.inner.session.remove(key).await?,
            None => false,
        };
        self.inner.proxy.delete(key).await?;
        if removed {
            self.inner.stats.record_removals(1);
            batch.store_event(self.event(EventType::Removed, key.clone(), None, None));
        }

        batch.dispatch()?;
        Ok(removed)
    }

    /// Remove `key` only while it holds `expected`.
    pub async fn remove_if(&self, key: &K, expected: &V) -> Result<bool> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let removed = match self.live_record(key, Action::Check, &mut batch).await? {
            Some(current) if current.value == *expected => {
                self.remove_current(current, &mut batch).await?
            }
            _ => false,
        };

        batch.dispatch()?;
        Ok(removed)
    }

    /// Remove `key`, returning the value it held.
    pub async fn get_and_remove(&self, key: &K) -> Result<Option<V>> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let previous = match self.live_record(key, Action::Access, &mut batch).await? {
            Some(current) => {
                let value = current.value.clone();
                self.remove_current(current, &mut batch).await?;
                Some(value)
            }
            None => None,
        };

        batch.dispatch()?;
        Ok(previous)
    }

    async fn remove_current(
        &self,
        current: StoredRecord<K, V>,
        batch: &mut EventBatch<'_, K, V>,
    ) -> Result<bool> {
        if !self.inner.session.remove(&current.key).await? {
            return Ok(false);
        }
        self.inner.proxy.delete(&current.key).await?;
        self.inner.stats.record_removals(1);
        let value = current.value;
        batch.store_event(self.event(
            EventType::Removed,
            current.key,
            Some(value.clone()),
            Some(value),
        ));
        Ok(true)
    }

    /// Replace the value of `key` only while it holds `expected`.
    pub async fn replace_if(&self, key: K, expected: &V, value: V) -> Result<bool> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let replaced = match self.live_record(&key, Action::Check, &mut batch).await? {
            Some(current) if current.value == *expected => {
                self.update_record(current, value, &mut batch).await?
            }
            _ => false,
        };

        batch.dispatch()?;
        Ok(replaced)
    }

    /// Replace the value of `key` if it has a live record.
    pub async fn replace(&self, key: K, value: V) -> Result<bool> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let replaced = match self.live_record(&key, Action::Check, &mut batch).await? {
            Some(current) => self.update_record(current, value, &mut batch).await?,
            None => false,
        };

        batch.dispatch()?;
        Ok(replaced)
    }

    /// Replace the value of `key` if present, returning the old value.
    pub async fn get_and_replace(&self, key: K, value: V) -> Result<Option<V>> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let previous = match self.live_record(&key, Action::Access, &mut batch).await? {
            Some(current) => {
                let old = current.value.clone();
                self.update_record(current, value, &mut batch).await?;
                Some(old)
            }
            None => None,
        };

        batch.dispatch()?;
        Ok(previous)
    }

    /// Remove `keys` with one session call, one write-through call and one
    /// dispatch. Returns the number of records removed.
    pub async fn remove_all_keys(&self, keys: &[K]) -> Result<u64> {
        self.assert_open()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let existing = self.inner.session.get_all(keys).await?;
        self.remove_records(keys, existing).await
    }

    /// Remove every record, with events and write-through. Returns the count.
    pub async fn remove_all(&self) -> Result<u64> {
        self.assert_open()?;
        let existing = self.inner.session.all().await?;
        if existing.is_empty() {
            return Ok(0);
        }
        let keys: Vec<K> = existing.iter().map(|r| r.key.clone()).collect();
        self.remove_records(&keys, existing).await
    }

    async fn remove_records(&self, keys: &[K], existing: Vec<StoredRecord<K, V>>) -> Result<u64> {
        let mut batch = self.inner.dispatcher.begin();

        let removed = self.inner.session.remove_all(keys).await?;
        self.inner.proxy.delete_all(keys).await?;
        self.inner.stats.record_removals(removed);

        for record in existing {
            if record.is_expired() {
                self.inner.stats.record_expirations(1);
                batch.store_event(self.expired_event(record));
            } else {
                let value = record.value;
                batch.store_event(self.event(
                    EventType::Removed,
                    record.key,
                    Some(value.clone()),
                    Some(value),
                ));
            }
        }

        batch.dispatch()?;
        Ok(removed)
    }

    /// Empty the cache without events or write-through.
    pub async fn clear(&self) -> Result<u64> {
        self.assert_open()?;
        let cleared = self.inner.session.clear().await?;
        debug!("Cleared {} records from {}", cleared, self.inner.name);
        Ok(cleared)
    }

    /// Every live key/value pair.
    pub async fn entries(&self) -> Result<Vec<(K, V)>> {
        self.assert_open()?;
        let mut batch = self.inner.dispatcher.begin();

        let records = self.inner.session.all().await?;
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            match self.inner.evaluator.evaluate(Some(record), Action::Check).await? {
                Evaluation::Live(record) => entries.push((record.key, record.value)),
                Evaluation::Expired(record) => {
                    self.inner.stats.record_expirations(1);
                    batch.store_event(self.expired_event(record));
                }
                Evaluation::Absent => {}
            }
        }

        batch.dispatch()?;
        Ok(entries)
    }

    /// Run `processor` against a mutable view of `key`'s entry.
    pub async fn invoke<T, A, F, Fut>(&self, key: K, processor: F, args: A) -> Result<T>
    where
        F: FnOnce(MutableEntry<K, V>, A) -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        self.assert_open()?;
        let value = self.get(&key).await?;
        let entry = MutableEntry::new(key, value, self.handler());
        processor(entry, args)
            .await
            .map_err(|e| CacheError::Processor(e.to_string()))
    }

    /// Run `processor` once per key; failures are reported per key.
    pub async fn invoke_all<T, A, F, Fut>(
        &self,
        keys: &[K],
        processor: F,
        args: A,
    ) -> Result<HashMap<K, Result<T>>>
    where
        A: Clone,
        F: Fn(MutableEntry<K, V>, A) -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        self.assert_open()?;
        let mut values = self.get_all(keys).await?;
        let mut results = HashMap::with_capacity(keys.len());

        for key in keys {
            if results.contains_key(key) {
                continue;
            }
            let entry = MutableEntry::new(key.clone(), values.remove(key), self.handler());
            let outcome = processor(entry, args.clone())
                .await
                .map_err(|e| CacheError::Processor(e.to_string()));
            results.insert(key.clone(), outcome);
        }
        Ok(results)
    }

    fn handler(&self) -> Arc<dyn EntryHandler<K, V>> {
        Arc::new(self.clone())
    }

    /// Load `keys` from the read-through source on the background executor.
    ///
    /// With `replace_existing` every loaded value overwrites the local one;
    /// otherwise only keys without a live record are filled. `completion`
    /// gets `on_exception` on failure and `on_completion` in every case,
    /// unless the task is still running when the manager's shutdown grace
    /// period ends: an aborted load reports neither callback.
    pub fn load_all(
        &self,
        keys: Vec<K>,
        replace_existing: bool,
        completion: Arc<dyn CompletionListener>,
    ) -> Result<()> {
        self.assert_open()?;
        let cache = self.clone();
        let task = format!("load_all:{}", self.inner.name);

        self.inner.executor.execute(&task, async move {
            if let Err(e) = cache.load_into(&keys, replace_existing).await {
                warn!("Background load for {} failed: {}", cache.inner.name, e);
                completion.on_exception(&e);
            }
            completion.on_completion();
            Ok(())
        })
    }

    async fn load_into(&self, keys: &[K], replace_existing: bool) -> Result<()> {
        self.assert_open()?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut loaded = self.inner.proxy.load_all(keys).await?;
        if !replace_existing {
            for record in self.inner.session.get_all(keys).await? {
                if !record.is_expired() {
                    loaded.remove(&record.key);
                }
            }
        }

        let mut records = Vec::with_capacity(loaded.len());
        for (key, value) in loaded {
            let record = self.inner.factory.create(key, value, None);
            if let Some(record) = self
                .inner
                .evaluator
                .evaluate(Some(record), Action::Create)
                .await?
                .into_live()
            {
                records.push(record);
            }
        }

        if !records.is_empty() {
            self.inner.session.put_all(&records).await?;
        }
        debug!("Loaded {} records into {}", records.len(), self.inner.name);
        Ok(())
    }

    /// # Errors
    /// Returns a configuration error if an equal listener is registered.
    pub fn register_listener(&self, config: ListenerConfiguration<K, V>) -> Result<()> {
        self.assert_open()?;
        self.inner.dispatcher.register(config)
    }

    pub fn deregister_listener(&self, config: &ListenerConfiguration<K, V>) -> bool {
        self.inner.dispatcher.deregister(config)
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn set_statistics_enabled(&self, enabled: bool) {
        self.inner.stats.set_enabled(enabled);
    }

    pub fn status(&self) -> CacheStatus {
        let types = self.inner.identity.types();
        CacheStatus {
            name: self.inner.name.to_string(),
            key_type: types.key.name(),
            value_type: types.value.name(),
            closed: self.is_closed(),
            expiry_policy: self.expiry_policy().to_string(),
            read_through: self.inner.proxy.is_read_through(),
            write_through: self.inner.proxy.is_write_through(),
            listeners: self.inner.dispatcher.registrations().len(),
            statistics: self
                .inner
                .stats
                .is_enabled()
                .then(|| self.inner.stats.snapshot()),
        }
    }

    /// Close the storage session. Later operations fail with `Closed`.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.session.close();
            info!("Closed cache {}", self.inner.identity);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.session.is_closed()
    }
}

#[async_trait]
impl<K, V> EntryHandler<K, V> for TypedCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    async fn remove(&self, key: &K) -> Result<bool> {
        TypedCache::remove(self, key).await
    }

    async fn replace(&self, key: K, value: V) -> Result<bool> {
        TypedCache::replace(self, key, value).await
    }

    async fn put(&self, key: K, value: V) -> Result<()> {
        TypedCache::put(self, key, value).await
    }
}

impl<K, V> ManagedCache for TypedCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn identity(&self) -> &CacheIdentity {
        &self.inner.identity
    }

    fn close(&self) -> Result<()> {
        TypedCache::close(self);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        TypedCache::is_closed(self)
    }

    fn status(&self) -> CacheStatus {
        TypedCache::status(self)
    }

    fn set_statistics_enabled(&self, enabled: bool) {
        TypedCache::set_statistics_enabled(self, enabled);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<K, V> std::fmt::Debug for TypedCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedCache")
            .field("identity", &self.inner.identity)
            .field("policy", self.expiry_policy())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CompletionWaiter;
    use crate::error::ListenerError;
    use crate::events::EntryListener;
    use crate::storage::{CacheStorage, MemoryStorage};
    use crate::cache::{CacheLoader, CacheWriter};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    type Batches = Arc<Mutex<Vec<(EventType, Vec<String>)>>>;

    async fn cache_with(config: CacheConfig<String, String>) -> TypedCache<String, String> {
        let storage = MemoryStorage::new("typed");
        let session = storage.open_session::<String, String>("c").await.unwrap();
        let executor = Arc::new(BackgroundExecutor::new(1).unwrap());
        TypedCache::new("c", session, config, ExpiryPolicy::Eternal, executor).unwrap()
    }

    async fn cache() -> TypedCache<String, String> {
        cache_with(CacheConfig::new()).await
    }

    fn recorder() -> (ListenerConfiguration<String, String>, Batches) {
        let batches: Batches = Arc::default();
        let sink = Arc::clone(&batches);
        let listener = EntryListener::<String, String>::new().on_all(move |events| {
            let keys = events.iter().map(|e| e.key().clone()).collect();
            sink.lock().push((events[0].event_type(), keys));
            Ok(())
        });
        (
            ListenerConfiguration::new(listener)
                .synchronous(true)
                .old_value_required(true),
            batches,
        )
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    struct SourceLoader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheLoader<String, String> for SourceLoader {
        async fn load(&self, key: &String) -> std::result::Result<Option<String>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key == "broken" {
                return Err("source unavailable".into());
            }
            Ok(key.starts_with("db").then(|| format!("loaded-{}", key)))
        }
    }

    #[derive(Default)]
    struct LogWriter {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CacheWriter<String, String> for Arc<LogWriter> {
        async fn write(&self, key: &String, value: &String) -> std::result::Result<(), BoxError> {
            self.log.lock().push(format!("write {}={}", key, value));
            Ok(())
        }

        async fn delete(&self, key: &String) -> std::result::Result<(), BoxError> {
            self.log.lock().push(format!("delete {}", key));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = cache().await;
        cache.put(s("a"), s("1")).await.unwrap();
        assert_eq!(cache.get(&s("a")).await.unwrap(), Some(s("1")));
        assert_eq!(cache.get(&s("b")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_creation_expiry_never_stores() {
        let (listener, batches) = recorder();
        let cache = cache_with(
            CacheConfig::new()
                .expiry(ExpiryPolicy::Created(Duration::ZERO))
                .listener(listener),
        )
        .await;

        cache.put(s("a"), s("1")).await.unwrap();
        assert_eq!(cache.get(&s("a")).await.unwrap(), None);
        assert!(batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_remove_of_expired_record_reports_expiry() {
        let (listener, batches) = recorder();
        let writer = Arc::new(LogWriter::default());
        let cache = cache_with(
            CacheConfig::new()
                .expiry(ExpiryPolicy::Created(Duration::from_millis(20)))
                .writer(Arc::clone(&writer))
                .listener(listener),
        )
        .await;

        cache.put(s("k"), s("v")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!cache.remove(&s("k")).await.unwrap());
        let kinds: Vec<EventType> = batches.lock().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![EventType::Created, EventType::Expired]);
        assert_eq!(writer.log.lock().last(), Some(&s("delete k")));
        assert!(!cache.contains_key(&s("k")).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_then_contains() {
        let (listener, batches) = recorder();
        let cache = cache_with(CacheConfig::new().listener(listener)).await;

        cache.put(s("a"), s("1")).await.unwrap();
        assert!(cache.remove(&s("a")).await.unwrap());
        assert!(!cache.contains_key(&s("a")).await.unwrap());

        assert!(!cache.remove(&s("a")).await.unwrap());
        let batches = batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1], (EventType::Removed, vec![s("a")]));
    }

    #[tokio::test]
    async fn test_put_all_dispatches_one_batch() {
        let (listener, batches) = recorder();
        let cache = cache_with(CacheConfig::new().listener(listener)).await;

        cache
            .put_all(vec![(s("k1"), s("v1")), (s("k2"), s("v2"))])
            .await
            .unwrap();
        let all = cache.get_all(&[s("k1"), s("k2")]).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&s("k2")], s("v2"));

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, EventType::Created);
        assert_eq!(batches[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_all_is_idempotent() {
        let cache = cache().await;
        cache
            .put_all(vec![(s("a"), s("1")), (s("b"), s("2"))])
            .await
            .unwrap();

        assert_eq!(cache.remove_all().await.unwrap(), 2);
        assert!(cache.entries().await.unwrap().is_empty());
        assert_eq!(cache.remove_all().await.unwrap(), 0);
        assert!(cache.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_access_expiry_scenario() {
        let (listener, batches) = recorder();
        let cache = cache_with(
            CacheConfig::new()
                .expiry(ExpiryPolicy::Accessed(Duration::from_millis(200)))
                .listener(listener),
        )
        .await;

        cache.put(s("k"), s("v")).await.unwrap();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert_eq!(cache.get(&s("k")).await.unwrap(), Some(s("v")));
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.get(&s("k")).await.unwrap(), None);
        assert_eq!(
            batches.lock().last(),
            Some(&(EventType::Expired, vec![s("k")]))
        );
    }

    #[tokio::test]
    async fn test_listener_isolation() {
        let (second, batches) = recorder();
        let first = ListenerConfiguration::new(
            EntryListener::new().on_created(|_| Err(ListenerError::new("first listener broke"))),
        )
        .synchronous(true);
        let cache = cache_with(CacheConfig::new().listener(first).listener(second)).await;

        let err = cache.put(s("a"), s("1")).await.unwrap_err();
        assert!(matches!(err, CacheError::Listener(_)));
        assert_eq!(batches.lock().len(), 1);
        // The write itself went through.
        assert_eq!(cache.get(&s("a")).await.unwrap(), Some(s("1")));
    }

    #[tokio::test]
    async fn test_read_through_is_not_written_back() {
        let loader = SourceLoader {
            calls: AtomicUsize::new(0),
        };
        let cache = cache_with(CacheConfig::new().loader(loader)).await;

        assert_eq!(cache.get(&s("db1")).await.unwrap(), Some(s("loaded-db1")));
        assert!(!cache.contains_key(&s("db1")).await.unwrap());

        cache.put(s("db2"), s("local")).await.unwrap();
        let all = cache.get_all(&[s("db2"), s("db3"), s("other")]).await.unwrap();
        assert_eq!(all[&s("db2")], s("local"));
        assert_eq!(all[&s("db3")], s("loaded-db3"));
        assert!(!all.contains_key(&s("other")));

        assert!(matches!(
            cache.get(&s("broken")).await,
            Err(CacheError::Loader(_))
        ));
    }

    #[tokio::test]
    async fn test_write_through_mirrors_mutations() {
        let writer = Arc::new(LogWriter::default());
        let cache = cache_with(CacheConfig::new().writer(Arc::clone(&writer))).await;

        cache.put(s("a"), s("1")).await.unwrap();
        assert!(cache.replace(s("a"), s("2")).await.unwrap());
        cache.remove(&s("missing")).await.unwrap();
        cache.remove_all_keys(&[s("a")]).await.unwrap();

        assert_eq!(
            *writer.log.lock(),
            vec![
                s("write a=1"),
                s("write a=2"),
                s("delete missing"),
                s("delete a"),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_and_put_reports_previous_value() {
        let (listener, batches) = recorder();
        let cache = cache_with(CacheConfig::new().listener(listener)).await;

        assert_eq!(cache.get_and_put(s("a"), s("1")).await.unwrap(), None);
        assert_eq!(cache.get_and_put(s("a"), s("2")).await.unwrap(), Some(s("1")));
        assert_eq!(cache.get(&s("a")).await.unwrap(), Some(s("2")));

        let kinds: Vec<EventType> = batches.lock().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![EventType::Created, EventType::Updated]);
    }

    #[tokio::test]
    async fn test_conditional_operations() {
        let (listener, batches) = recorder();
        let cache = cache_with(CacheConfig::new().listener(listener)).await;

        assert!(cache.put_if_absent(s("a"), s("1")).await.unwrap());
        assert!(!cache.put_if_absent(s("a"), s("9")).await.unwrap());

        assert!(!cache.replace_if(s("a"), &s("0"), s("2")).await.unwrap());
        assert!(cache.replace_if(s("a"), &s("1"), s("2")).await.unwrap());
        assert!(!cache.replace(s("zzz"), s("2")).await.unwrap());
        assert_eq!(cache.get_and_replace(s("a"), s("3")).await.unwrap(), Some(s("2")));

        assert!(!cache.remove_if(&s("a"), &s("2")).await.unwrap());
        assert!(cache.remove_if(&s("a"), &s("3")).await.unwrap());

        let batches = batches.lock();
        let removed: Vec<_> = batches
            .iter()
            .filter(|(k, _)| *k == EventType::Removed)
            .collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].1, vec![s("a")]);
    }

    #[tokio::test]
    async fn test_get_and_remove() {
        let cache = cache().await;
        cache.put(s("a"), s("1")).await.unwrap();
        assert_eq!(cache.get_and_remove(&s("a")).await.unwrap(), Some(s("1")));
        assert_eq!(cache.get_and_remove(&s("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_all_keys_counts_existing_only() {
        let (listener, batches) = recorder();
        let cache = cache_with(CacheConfig::new().listener(listener)).await;
        cache
            .put_all(vec![(s("a"), s("1")), (s("b"), s("2"))])
            .await
            .unwrap();

        let removed = cache
            .remove_all_keys(&[s("a"), s("b"), s("c")])
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let batches = batches.lock();
        assert_eq!(batches.last().map(|(_, keys)| keys.len()), Some(2));
    }

    #[tokio::test]
    async fn test_clear_emits_no_events() {
        let (listener, batches) = recorder();
        let cache = cache_with(CacheConfig::new().listener(listener)).await;
        cache.put(s("a"), s("1")).await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert_eq!(batches.lock().len(), 1);
        assert!(!cache.contains_key(&s("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_invoke_updates_through_entry() {
        let cache = cache().await;
        cache.put(s("a"), s("1")).await.unwrap();

        let previous = cache
            .invoke(
                s("a"),
                |mut entry, suffix: &'static str| async move {
                    let previous = entry.value().cloned();
                    let next = format!("{}{}", previous.clone().unwrap_or_default(), suffix);
                    entry.set_value(next).await?;
                    Ok::<_, BoxError>(previous)
                },
                "!",
            )
            .await
            .unwrap();
        assert_eq!(previous, Some(s("1")));
        assert_eq!(cache.get(&s("a")).await.unwrap(), Some(s("1!")));

        let created = cache
            .invoke(
                s("new"),
                |mut entry, ()| async move {
                    let existed = entry.exists();
                    entry.set_value(s("fresh")).await?;
                    Ok::<_, BoxError>(existed)
                },
                (),
            )
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(cache.get(&s("new")).await.unwrap(), Some(s("fresh")));

        let err = cache
            .invoke(s("a"), |_, ()| async { Err::<(), BoxError>("nope".into()) }, ())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Processor(_)));
    }

    #[tokio::test]
    async fn test_invoke_all_reports_per_key() {
        let cache = cache().await;
        cache.put(s("a"), s("1")).await.unwrap();

        let results = cache
            .invoke_all(
                &[s("a"), s("b")],
                |mut entry, ()| async move {
                    if !entry.exists() {
                        return Err::<bool, BoxError>("missing".into());
                    }
                    entry.remove().await?;
                    Ok(true)
                },
                (),
            )
            .await
            .unwrap();

        assert!(matches!(results[&s("a")], Ok(true)));
        assert!(matches!(results[&s("b")], Err(CacheError::Processor(_))));
        assert!(!cache.contains_key(&s("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_all_modes() {
        let loader = SourceLoader {
            calls: AtomicUsize::new(0),
        };
        let cache = cache_with(CacheConfig::new().loader(loader)).await;
        cache.put(s("db1"), s("local")).await.unwrap();

        let waiter = Arc::new(CompletionWaiter::new());
        cache
            .load_all(vec![s("db1"), s("db2")], false, waiter.clone())
            .unwrap();
        waiter.wait().await;
        assert!(waiter.error().is_none());
        assert_eq!(cache.get(&s("db1")).await.unwrap(), Some(s("local")));
        assert_eq!(cache.get(&s("db2")).await.unwrap(), Some(s("loaded-db2")));
        assert!(cache.contains_key(&s("db2")).await.unwrap());

        let waiter = Arc::new(CompletionWaiter::new());
        cache.load_all(vec![s("db1")], true, waiter.clone()).unwrap();
        waiter.wait().await;
        assert_eq!(cache.get(&s("db1")).await.unwrap(), Some(s("loaded-db1")));

        let waiter = Arc::new(CompletionWaiter::new());
        cache.load_all(vec![s("broken")], true, waiter.clone()).unwrap();
        waiter.wait().await;
        assert!(waiter.error().unwrap().contains("source unavailable"));
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_operations() {
        let cache = cache().await;
        cache.close();
        assert!(cache.is_closed());
        assert!(cache.get(&s("a")).await.unwrap_err().is_closed());
        assert!(cache.put(s("a"), s("1")).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_statistics_and_status() {
        let cache = cache_with(CacheConfig::new().statistics(true)).await;
        cache.put(s("a"), s("1")).await.unwrap();
        cache.get(&s("a")).await.unwrap();
        cache.get(&s("b")).await.unwrap();

        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses, stats.puts), (1, 1, 1));

        let status = cache.status();
        assert_eq!(status.name, "c");
        assert_eq!(status.expiry_policy, "eternal");
        assert!(status.statistics.is_some());
    }
}

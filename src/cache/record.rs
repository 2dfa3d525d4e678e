//! Stored records and the factory that stamps them.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bounds every cache key satisfies.
pub trait CacheKey:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CacheKey for T where
    T: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bounds every cached value satisfies.
pub trait CacheValue:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CacheValue for T where
    T: Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A key/value pair as held by a storage session.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<K, V> {
    pub key: K,
    pub value: V,
    /// Value this record replaced, when the write path knew it.
    pub previous_value: Option<V>,
    pub saved_at: DateTime<Utc>,
    /// `None` never expires by policy.
    pub expires_at: Option<DateTime<Utc>>,
}

impl<K, V> StoredRecord<K, V> {
    /// A record whose deadline is at or before `now` is logically gone.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Builds records for one key/value type pair.
#[derive(Debug)]
pub struct EntryFactory<K, V> {
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> EntryFactory<K, V> {
    pub fn new() -> Self {
        Self {
            _types: PhantomData,
        }
    }

    /// Stamp `now` as the save time and leave the expiry unset.
    pub fn create(&self, key: K, value: V, previous_value: Option<V>) -> StoredRecord<K, V> {
        StoredRecord {
            key,
            value,
            previous_value,
            saved_at: Utc::now(),
            expires_at: None,
        }
    }
}

impl<K, V> Default for EntryFactory<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for EntryFactory<K, V> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

//! Mutable entry view handed to `invoke` processors.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CacheKey, CacheValue};
use crate::error::Result;

/// The cache operations a [`MutableEntry`] may redirect to.
#[async_trait]
pub trait EntryHandler<K, V>: Send + Sync
where
    K: CacheKey,
    V: CacheValue,
{
    async fn remove(&self, key: &K) -> Result<bool>;

    /// Returns `false` when there was no live entry to replace.
    async fn replace(&self, key: K, value: V) -> Result<bool>;

    async fn put(&self, key: K, value: V) -> Result<()>;
}

/// Key, value snapshot and a handle back to the owning cache.
///
/// Changes go straight to the cache; the snapshot is updated to match.
pub struct MutableEntry<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    key: K,
    value: Option<V>,
    handler: Arc<dyn EntryHandler<K, V>>,
}

impl<K, V> MutableEntry<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new(key: K, value: Option<V>, handler: Arc<dyn EntryHandler<K, V>>) -> Self {
        Self {
            key,
            value,
            handler,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Remove the entry from the cache.
    pub async fn remove(&mut self) -> Result<bool> {
        let removed = self.handler.remove(&self.key).await?;
        self.value = None;
        Ok(removed)
    }

    /// Replace the entry's value, creating it when absent.
    pub async fn set_value(&mut self, value: V) -> Result<()> {
        if !self.handler.replace(self.key.clone(), value.clone()).await? {
            self.handler.put(self.key.clone(), value.clone()).await?;
        }
        self.value = Some(value);
        Ok(())
    }
}

impl<K, V> std::fmt::Debug for MutableEntry<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish()
    }
}

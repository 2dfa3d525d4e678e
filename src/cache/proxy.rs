//! Read-through / write-through bridge to an external data source.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CacheKey, CacheValue, StoredRecord};
use crate::error::{BoxError, CacheError, Result};

/// Loads values the cache does not hold.
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync
where
    K: CacheKey,
    V: CacheValue,
{
    /// Load one value. `None` means the source has nothing for `key`.
    async fn load(&self, key: &K) -> std::result::Result<Option<V>, BoxError>;

    /// Load many values; keys the source does not know are left out.
    async fn load_all(&self, keys: &[K]) -> std::result::Result<HashMap<K, V>, BoxError> {
        let mut loaded = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(key).await? {
                loaded.insert(key.clone(), value);
            }
        }
        Ok(loaded)
    }
}

/// Mirrors cache mutations to an external store.
#[async_trait]
pub trait CacheWriter<K, V>: Send + Sync
where
    K: CacheKey,
    V: CacheValue,
{
    async fn write(&self, key: &K, value: &V) -> std::result::Result<(), BoxError>;

    async fn write_all(&self, entries: &[(K, V)]) -> std::result::Result<(), BoxError> {
        for (key, value) in entries {
            self.write(key, value).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &K) -> std::result::Result<(), BoxError>;

    async fn delete_all(&self, keys: &[K]) -> std::result::Result<(), BoxError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// Optional loader and writer of one cache. Missing halves are no-ops.
pub struct ProxySource<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
}

impl<K, V> ProxySource<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new(
        loader: Option<Arc<dyn CacheLoader<K, V>>>,
        writer: Option<Arc<dyn CacheWriter<K, V>>>,
    ) -> Self {
        Self { loader, writer }
    }

    /// A source that loads nothing and writes nowhere.
    pub fn none() -> Self {
        Self::new(None, None)
    }

    pub fn is_read_through(&self) -> bool {
        self.loader.is_some()
    }

    pub fn is_write_through(&self) -> bool {
        self.writer.is_some()
    }

    pub async fn load(&self, key: &K) -> Result<Option<V>> {
        let Some(loader) = &self.loader else {
            return Ok(None);
        };
        let loaded = loader.load(key).await.map_err(CacheError::Loader)?;
        debug!("Read-through load for {:?}: hit={}", key, loaded.is_some());
        Ok(loaded)
    }

    pub async fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        match &self.loader {
            Some(loader) if !keys.is_empty() => {
                loader.load_all(keys).await.map_err(CacheError::Loader)
            }
            _ => Ok(HashMap::new()),
        }
    }

    pub async fn write(&self, key: &K, value: &V) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.write(key, value).await.map_err(CacheError::Writer)?;
        }
        Ok(())
    }

    pub async fn write_all(&self, records: &[StoredRecord<K, V>]) -> Result<()> {
        if let Some(writer) = &self.writer
            && !records.is_empty()
        {
            let entries: Vec<(K, V)> = records
                .iter()
                .map(|r| (r.key.clone(), r.value.clone()))
                .collect();
            writer.write_all(&entries).await.map_err(CacheError::Writer)?;
        }
        Ok(())
    }

    pub async fn delete(&self, key: &K) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.delete(key).await.map_err(CacheError::Writer)?;
        }
        Ok(())
    }

    pub async fn delete_all(&self, keys: &[K]) -> Result<()> {
        if let Some(writer) = &self.writer
            && !keys.is_empty()
        {
            writer.delete_all(keys).await.map_err(CacheError::Writer)?;
        }
        Ok(())
    }
}

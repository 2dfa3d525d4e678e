//! Per-cache configuration.

use std::sync::Arc;

use super::expiry::ExpiryPolicy;
use super::proxy::{CacheLoader, CacheWriter, ProxySource};
use super::{CacheKey, CacheValue};
use crate::error::{CacheError, Result};
use crate::events::ListenerConfiguration;

/// Configuration for a cache instance.
pub struct CacheConfig<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Expiry policy. `None` uses the manager's default.
    pub expiry: Option<ExpiryPolicy>,

    /// Load missing values through `loader` on `get`/`get_all`.
    pub read_through: bool,
    pub loader: Option<Arc<dyn CacheLoader<K, V>>>,

    /// Mirror mutations to `writer`.
    pub write_through: bool,
    pub writer: Option<Arc<dyn CacheWriter<K, V>>>,

    /// Listeners registered when the cache is created.
    pub listeners: Vec<ListenerConfiguration<K, V>>,

    pub statistics_enabled: bool,
}

impl<K, V> Default for CacheConfig<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn default() -> Self {
        Self {
            expiry: None,
            read_through: false,
            loader: None,
            write_through: false,
            writer: None,
            listeners: Vec::new(),
            statistics_enabled: false,
        }
    }
}

impl<K, V> Clone for CacheConfig<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn clone(&self) -> Self {
        Self {
            expiry: self.expiry.clone(),
            read_through: self.read_through,
            loader: self.loader.clone(),
            write_through: self.write_through,
            writer: self.writer.clone(),
            listeners: self.listeners.clone(),
            statistics_enabled: self.statistics_enabled,
        }
    }
}

impl<K, V> CacheConfig<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Set expiry policy (builder pattern).
    #[must_use]
    pub fn expiry(mut self, policy: ExpiryPolicy) -> Self {
        self.expiry = Some(policy);
        self
    }

    /// Enable read-through with `loader`.
    #[must_use]
    pub fn loader(mut self, loader: impl CacheLoader<K, V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self.read_through = true;
        self
    }

    /// Enable write-through with `writer`.
    #[must_use]
    pub fn writer(mut self, writer: impl CacheWriter<K, V> + 'static) -> Self {
        self.writer = Some(Arc::new(writer));
        self.write_through = true;
        self
    }

    #[must_use]
    pub fn read_through(mut self, enabled: bool) -> Self {
        self.read_through = enabled;
        self
    }

    #[must_use]
    pub fn write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: ListenerConfiguration<K, V>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub fn statistics(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    /// Reject inconsistent settings before anything is created.
    pub fn validate(&self) -> Result<()> {
        if self.read_through && self.loader.is_none() {
            return Err(CacheError::config("read-through is enabled without a loader"));
        }
        if self.write_through && self.writer.is_none() {
            return Err(CacheError::config("write-through is enabled without a writer"));
        }
        for (i, listener) in self.listeners.iter().enumerate() {
            if self.listeners[..i].contains(listener) {
                return Err(CacheError::config("the same listener is configured twice"));
            }
        }
        Ok(())
    }

    /// Loader and writer that are actually enabled.
    pub(crate) fn proxy_source(&self) -> ProxySource<K, V> {
        ProxySource::new(
            self.loader.clone().filter(|_| self.read_through),
            self.writer.clone().filter(|_| self.write_through),
        )
    }
}

impl<K, V> std::fmt::Debug for CacheConfig<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("expiry", &self.expiry)
            .field("read_through", &self.read_through)
            .field("write_through", &self.write_through)
            .field("listeners", &self.listeners.len())
            .field("statistics_enabled", &self.statistics_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::events::EntryListener;
    use async_trait::async_trait;

    struct NullLoader;

    #[async_trait]
    impl CacheLoader<u8, u8> for NullLoader {
        async fn load(&self, _key: &u8) -> std::result::Result<Option<u8>, BoxError> {
            Ok(None)
        }
    }

    #[test]
    fn test_read_through_requires_loader() {
        let config = CacheConfig::<u8, u8>::new().read_through(true);
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));

        let config = CacheConfig::<u8, u8>::new().loader(NullLoader);
        assert!(config.read_through);
        assert!(config.validate().is_ok());
        assert!(config.proxy_source().is_read_through());

        let disabled = config.read_through(false);
        assert!(!disabled.proxy_source().is_read_through());
    }

    #[test]
    fn test_write_through_requires_writer() {
        let config = CacheConfig::<u8, u8>::new().write_through(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        let listener = ListenerConfiguration::new(EntryListener::<u8, u8>::new());
        let config = CacheConfig::new()
            .listener(listener.clone())
            .listener(listener);
        assert!(config.validate().is_err());
    }
}

//! Cache manager: creates, looks up and destroys the caches of one storage
//! backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{
    CacheConfig, CacheKey, CacheRegistry, CacheStatus, CacheValue, ManagedCache, TypePair,
    TypedCache,
};
use crate::config::ManagerConfig;
use crate::error::{CacheError, Result};
use crate::executor::BackgroundExecutor;
use crate::storage::{Backend, CacheStorage};

/// Owner of every cache created against one connection URI.
pub struct CacheManager {
    uri: String,
    backend: Backend,
    registry: CacheRegistry,
    executor: Arc<BackgroundExecutor>,
    config: ManagerConfig,
    /// Serializes cache creation so check-then-register is atomic.
    creation: Mutex<()>,
    closed: AtomicBool,
}

impl CacheManager {
    /// Connect the backend named by `uri` and start the background executor.
    ///
    /// # Errors
    /// Fails on unsupported URIs, unreachable backends or a zero worker count.
    pub async fn connect(uri: &str, config: ManagerConfig) -> Result<Self> {
        let backend = Backend::connect(uri).await?;
        let executor = Arc::new(BackgroundExecutor::new(config.workers)?);
        let registry = CacheRegistry::new(backend.is_fixed_types());

        info!(
            "Cache manager ready for {} ({} backend, {} worker(s))",
            uri,
            backend.kind(),
            config.workers
        );
        Ok(Self {
            uri: uri.to_string(),
            backend,
            registry,
            executor,
            config,
            creation: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn assert_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::closed(format!("cache manager for {}", self.uri)));
        }
        Ok(())
    }

    /// Create and register cache `name` holding `V` values under `K` keys.
    ///
    /// # Errors
    /// - `Configuration` for a blank name or an invalid config
    /// - `AlreadyExists` when the identity (or, under fixed types, the name)
    ///   is taken
    pub async fn create_cache<K, V>(
        &self,
        name: &str,
        config: CacheConfig<K, V>,
    ) -> Result<TypedCache<K, V>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        self.assert_open()?;
        if name.trim().is_empty() {
            return Err(CacheError::config("cache name must not be blank"));
        }
        config.validate()?;

        let _guard = self.creation.lock().await;
        self.assert_open()?;

        let types = TypePair::of::<K, V>();
        if self.registry.exists(name, Some(types)) {
            return Err(CacheError::AlreadyExists {
                name: name.to_string(),
                key_type: types.key.name(),
                value_type: types.value.name(),
                fixed_types: self.registry.is_fixed_types(),
            });
        }

        let session = self.backend.open_session::<K, V>(name).await?;
        let cache = TypedCache::new(
            name,
            session,
            config,
            self.config.default_expiry.clone(),
            Arc::clone(&self.executor),
        )?;
        self.registry.register(Arc::new(cache.clone()))?;

        info!("Created cache {}", cache.identity());
        Ok(cache)
    }

    /// Look up cache `name` by name alone.
    ///
    /// # Errors
    /// - `AmbiguousName` when several type pairs share the name
    /// - `TypeMismatch` when the cache holds other types
    pub fn get_cache<K, V>(&self, name: &str) -> Result<Option<TypedCache<K, V>>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        self.assert_open()?;
        match self.registry.lookup(name, None)? {
            Some(cache) => downcast(name, cache.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    /// Look up cache `name` by its exact identity.
    ///
    /// # Errors
    /// Returns `TypeMismatch` when a fixed-types backend holds the name under
    /// other types.
    pub fn get_cache_with_types<K, V>(&self, name: &str) -> Result<Option<TypedCache<K, V>>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        self.assert_open()?;
        match self.registry.lookup(name, Some(TypePair::of::<K, V>()))? {
            Some(cache) => downcast(name, cache.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    /// Unregister and close every cache named `name`. Close failures are
    /// logged, not returned.
    pub fn destroy_cache(&self, name: &str) -> Result<()> {
        self.assert_open()?;
        let caches = self.registry.unregister(name);
        if caches.is_empty() {
            debug!("No cache named {} to destroy", name);
        }
        close_all(caches);
        Ok(())
    }

    /// Names of every live cache, sorted.
    pub fn cache_names(&self) -> Result<Vec<String>> {
        self.assert_open()?;
        Ok(self.registry.names())
    }

    /// Turn statistics on or off for every cache named `name`.
    pub fn enable_statistics(&self, name: &str, enabled: bool) -> Result<()> {
        self.assert_open()?;
        for cache in self
            .registry
            .all()
            .into_iter()
            .filter(|c| c.identity().name() == name)
        {
            cache.set_statistics_enabled(enabled);
        }
        Ok(())
    }

    /// Status of every live cache, ordered by name.
    pub fn status(&self) -> Result<Vec<CacheStatus>> {
        self.assert_open()?;
        let mut statuses: Vec<CacheStatus> =
            self.registry.all().iter().map(|c| c.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key_type.cmp(b.key_type)));
        Ok(statuses)
    }

    /// Close every cache, drain the executor and close the backend.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _guard = self.creation.lock().await;
        for name in self.registry.names() {
            close_all(self.registry.unregister(&name));
        }
        self.executor.shutdown(self.config.shutdown_grace).await;
        self.backend.close();
        info!("Closed cache manager for {}", self.uri);
    }
}

fn downcast<K, V>(name: &str, cache: &dyn ManagedCache) -> Result<TypedCache<K, V>>
where
    K: CacheKey,
    V: CacheValue,
{
    cache
        .as_any()
        .downcast_ref::<TypedCache<K, V>>()
        .cloned()
        .ok_or_else(|| CacheError::TypeMismatch {
            name: name.to_string(),
            registered: cache.identity().types().to_string(),
            requested: TypePair::of::<K, V>().to_string(),
        })
}

fn close_all(caches: Vec<Arc<dyn ManagedCache>>) {
    for cache in caches {
        if let Err(e) = cache.close() {
            warn!("Error closing cache {}: {}", cache.identity(), e);
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("uri", &self.uri)
            .field("backend", &self.backend.kind())
            .field("registry", &self.registry)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager(uri: &str) -> CacheManager {
        CacheManager::connect(uri, ManagerConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let manager = manager("memory://create").await;
        let cache = manager
            .create_cache::<u64, String>("users", CacheConfig::new())
            .await
            .unwrap();
        cache.put(1, "alice".to_string()).await.unwrap();

        let found = manager.get_cache::<u64, String>("users").unwrap().unwrap();
        assert_eq!(found.get(&1).await.unwrap(), Some("alice".to_string()));
        assert!(manager.get_cache::<u64, String>("nobody").unwrap().is_none());
        assert_eq!(manager.cache_names().unwrap(), vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let manager = manager("memory://blank").await;
        let err = manager
            .create_cache::<u8, u8>("  ", CacheConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_ambiguous_lookup() {
        let manager = manager("memory://ambiguous").await;
        manager
            .create_cache::<u64, String>("x", CacheConfig::new())
            .await
            .unwrap();
        manager
            .create_cache::<String, String>("x", CacheConfig::new())
            .await
            .unwrap();

        assert!(matches!(
            manager.get_cache::<u64, String>("x"),
            Err(CacheError::AmbiguousName(_))
        ));
        let exact = manager
            .get_cache_with_types::<String, String>("x")
            .unwrap()
            .unwrap();
        assert_eq!(exact.identity().types(), TypePair::of::<String, String>());

        let err = manager
            .create_cache::<u64, String>("x", CacheConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_fixed_types_backend() {
        let manager = manager("memory://fixed?fixed_types=true").await;
        manager
            .create_cache::<u64, String>("x", CacheConfig::new())
            .await
            .unwrap();

        let err = manager
            .create_cache::<String, String>("x", CacheConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::AlreadyExists { fixed_types: true, .. }));

        assert!(matches!(
            manager.get_cache::<String, String>("x"),
            Err(CacheError::TypeMismatch { .. })
        ));
        assert!(matches!(
            manager.get_cache_with_types::<String, String>("x"),
            Err(CacheError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_destroy_closes_every_type_pair() {
        let manager = manager("memory://destroy").await;
        let first = manager
            .create_cache::<u64, String>("x", CacheConfig::new())
            .await
            .unwrap();
        let second = manager
            .create_cache::<String, String>("x", CacheConfig::new())
            .await
            .unwrap();

        manager.destroy_cache("x").unwrap();
        assert!(first.is_closed() && second.is_closed());
        assert!(manager.get_cache::<u64, String>("x").unwrap().is_none());
        assert!(manager.cache_names().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_statistics_and_status() {
        let manager = manager("memory://status").await;
        let cache = manager
            .create_cache::<u64, u64>("counters", CacheConfig::new())
            .await
            .unwrap();

        manager.enable_statistics("counters", true).unwrap();
        cache.put(1, 1).await.unwrap();

        let status = manager.status().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].statistics.map(|s| s.puts), Some(1));
    }

    #[tokio::test]
    async fn test_default_expiry_applies() {
        let config = ManagerConfig {
            default_expiry: "created:1h".parse().unwrap(),
            ..ManagerConfig::default()
        };
        let manager = CacheManager::connect("memory://defaults", config).await.unwrap();
        let cache = manager
            .create_cache::<u8, u8>("c", CacheConfig::new())
            .await
            .unwrap();
        assert_eq!(cache.expiry_policy().to_string(), "created:1h");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let manager = manager("memory://close").await;
        let cache = manager
            .create_cache::<u8, u8>("c", CacheConfig::new())
            .await
            .unwrap();

        manager.close().await;
        manager.close().await;

        assert!(manager.is_closed());
        assert!(cache.is_closed());
        assert!(manager.cache_names().unwrap_err().is_closed());
        assert!(
            manager
                .create_cache::<u8, u8>("d", CacheConfig::new())
                .await
                .unwrap_err()
                .is_closed()
        );
        assert!(manager.destroy_cache("c").unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_unsupported_uri() {
        let err = CacheManager::connect("redis://localhost", ManagerConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}

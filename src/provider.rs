//! Caching provider: caller-owned map from connection URI to cache manager.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::manager::CacheManager;

/// Hands out one [`CacheManager`] per URI.
pub struct CachingProvider {
    config: ManagerConfig,
    managers: DashMap<String, Arc<CacheManager>>,
}

impl CachingProvider {
    /// New managers are created with `config`.
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            managers: DashMap::new(),
        }
    }

    /// The open manager for `uri`, connecting one if needed.
    pub async fn get_cache_manager(&self, uri: &str) -> Result<Arc<CacheManager>> {
        if let Some(existing) = self.managers.get(uri)
            && !existing.is_closed()
        {
            return Ok(Arc::clone(existing.value()));
        }

        let manager = Arc::new(CacheManager::connect(uri, self.config.clone()).await?);

        // Another task may have connected the same URI meanwhile.
        let raced = match self.managers.entry(uri.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => Some(Arc::clone(entry.get())),
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::clone(&manager));
                None
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&manager));
                None
            }
        };

        match raced {
            Some(winner) => {
                debug!("Discarding duplicate manager for {}", uri);
                manager.close().await;
                Ok(winner)
            }
            None => Ok(manager),
        }
    }

    /// Close and forget the manager for `uri`, if any.
    pub async fn close_cache_manager(&self, uri: &str) {
        if let Some((_, manager)) = self.managers.remove(uri) {
            manager.close().await;
        }
    }

    /// URIs with an open manager.
    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .managers
            .iter()
            .filter(|m| !m.is_closed())
            .map(|m| m.key().clone())
            .collect();
        uris.sort();
        uris
    }

    /// Close every manager.
    pub async fn close(&self) {
        let uris: Vec<String> = self.managers.iter().map(|m| m.key().clone()).collect();
        for uri in &uris {
            self.close_cache_manager(uri).await;
        }
        info!("Closed {} cache manager(s)", uris.len());
    }
}

impl Default for CachingProvider {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl std::fmt::Debug for CachingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingProvider")
            .field("managers", &self.managers.len())
            .finish()
    }
}

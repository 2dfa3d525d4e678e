//! Cache registry - identity-addressed table of live caches.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::identity::{CacheIdentity, TypePair};
use super::stats::CacheStatus;
use crate::error::{CacheError, Result};

/// Type-erased view of a cache the registry and manager can drive.
pub trait ManagedCache: Send + Sync + 'static {
    fn identity(&self) -> &CacheIdentity;

    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn status(&self) -> CacheStatus;

    fn set_statistics_enabled(&self, enabled: bool);

    /// For downcasting to the concrete cache type.
    fn as_any(&self) -> &dyn Any;
}

type SharedCache = Arc<dyn ManagedCache>;

#[derive(Default)]
struct RegistryState {
    caches: HashMap<CacheIdentity, SharedCache>,
    by_name: HashMap<String, Vec<CacheIdentity>>,
}

/// Central registry of live caches.
///
/// Under fixed types a name holds at most one type pair; otherwise the full
/// identity is the key and several type pairs may share a name.
pub struct CacheRegistry {
    fixed_types: bool,
    state: RwLock<RegistryState>,
}

impl CacheRegistry {
    pub fn new(fixed_types: bool) -> Self {
        Self {
            fixed_types,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn is_fixed_types(&self) -> bool {
        self.fixed_types
    }

    /// Whether a cache is registered under `name` (and `types`, when given
    /// and the registry is multi-typed).
    pub fn exists(&self, name: &str, types: Option<TypePair>) -> bool {
        let state = self.state.read();
        match types {
            Some(types) if !self.fixed_types => state
                .caches
                .contains_key(&CacheIdentity::new(name, types)),
            _ => state.by_name.get(name).is_some_and(|ids| !ids.is_empty()),
        }
    }

    /// # Errors
    /// Returns `AlreadyExists` if the identity (or, under fixed types, the
    /// name) is taken.
    pub fn register(&self, cache: SharedCache) -> Result<()> {
        let identity = cache.identity().clone();
        let mut state = self.state.write();

        let taken = if self.fixed_types {
            state.by_name.contains_key(identity.name())
        } else {
            state.caches.contains_key(&identity)
        };
        if taken {
            let types = identity.types();
            return Err(CacheError::AlreadyExists {
                name: identity.name().to_string(),
                key_type: types.key.name(),
                value_type: types.value.name(),
                fixed_types: self.fixed_types,
            });
        }

        state
            .by_name
            .entry(identity.name().to_string())
            .or_default()
            .push(identity.clone());
        debug!("Registered cache: {}", identity);
        state.caches.insert(identity, cache);
        Ok(())
    }

    /// Remove every cache registered under `name`.
    pub fn unregister(&self, name: &str) -> Vec<SharedCache> {
        let mut state = self.state.write();
        let Some(ids) = state.by_name.remove(name) else {
            return Vec::new();
        };
        let removed: Vec<SharedCache> = ids
            .iter()
            .filter_map(|id| state.caches.remove(id))
            .collect();
        debug!("Unregistered {} cache(s) named {}", removed.len(), name);
        removed
    }

    /// Find a cache by name and optionally its type pair.
    ///
    /// Without types, a multi-typed registry resolves only when exactly one
    /// type pair is registered under the name. Under fixed types the name
    /// alone decides; a type pair that does not match is left to the caller.
    ///
    /// # Errors
    /// Returns `AmbiguousName` when the name alone matches several caches.
    pub fn lookup(&self, name: &str, types: Option<TypePair>) -> Result<Option<SharedCache>> {
        let state = self.state.read();
        if let Some(types) = types
            && !self.fixed_types
        {
            return Ok(state.caches.get(&CacheIdentity::new(name, types)).cloned());
        }

        match state.by_name.get(name).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([only]) => Ok(state.caches.get(only).cloned()),
            Some(_) => Err(CacheError::AmbiguousName(name.to_string())),
        }
    }

    /// Registered cache names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every registered cache.
    pub fn all(&self) -> Vec<SharedCache> {
        self.state.read().caches.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().caches.is_empty()
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CacheRegistry")
            .field("fixed_types", &self.fixed_types)
            .field("cache_count", &state.caches.len())
            .field("cache_names", &state.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubCache {
        identity: CacheIdentity,
        closed: AtomicBool,
    }

    impl StubCache {
        fn shared<K: 'static, V: 'static>(name: &str) -> SharedCache {
            Arc::new(Self {
                identity: CacheIdentity::of::<K, V>(name),
                closed: AtomicBool::new(false),
            })
        }
    }

    impl ManagedCache for StubCache {
        fn identity(&self) -> &CacheIdentity {
            &self.identity
        }

        fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn status(&self) -> CacheStatus {
            let types = self.identity.types();
            CacheStatus {
                name: self.identity.name().to_string(),
                key_type: types.key.name(),
                value_type: types.value.name(),
                closed: self.is_closed(),
                expiry_policy: "eternal".to_string(),
                read_through: false,
                write_through: false,
                listeners: 0,
                statistics: None,
            }
        }

        fn set_statistics_enabled(&self, _enabled: bool) {}

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_multi_typed_lookup() {
        let registry = CacheRegistry::new(false);
        registry.register(StubCache::shared::<u64, String>("x")).unwrap();
        assert!(registry.lookup("x", None).unwrap().is_some());

        registry.register(StubCache::shared::<String, String>("x")).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(matches!(
            registry.lookup("x", None),
            Err(CacheError::AmbiguousName(_))
        ));

        let exact = registry
            .lookup("x", Some(TypePair::of::<String, String>()))
            .unwrap()
            .unwrap();
        assert_eq!(exact.identity(), &CacheIdentity::of::<String, String>("x"));
        assert!(registry.exists("x", Some(TypePair::of::<u64, String>())));
        assert!(!registry.exists("x", Some(TypePair::of::<u8, u8>())));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let registry = CacheRegistry::new(false);
        registry.register(StubCache::shared::<u64, String>("x")).unwrap();
        let err = registry
            .register(StubCache::shared::<u64, String>("x"))
            .unwrap_err();
        assert!(matches!(err, CacheError::AlreadyExists { fixed_types: false, .. }));
    }

    #[test]
    fn test_fixed_types_rejects_second_type_pair() {
        let registry = CacheRegistry::new(true);
        registry.register(StubCache::shared::<u64, String>("x")).unwrap();
        let err = registry
            .register(StubCache::shared::<String, String>("x"))
            .unwrap_err();
        assert!(matches!(err, CacheError::AlreadyExists { fixed_types: true, .. }));

        // Name alone decides under fixed types.
        assert!(registry.exists("x", Some(TypePair::of::<u8, u8>())));
        assert!(registry.lookup("x", Some(TypePair::of::<u8, u8>())).unwrap().is_some());
    }

    #[test]
    fn test_unregister_removes_all_type_pairs() {
        let registry = CacheRegistry::new(false);
        registry.register(StubCache::shared::<u64, String>("x")).unwrap();
        registry.register(StubCache::shared::<String, String>("x")).unwrap();
        registry.register(StubCache::shared::<u8, u8>("y")).unwrap();

        assert_eq!(registry.unregister("x").len(), 2);
        assert!(registry.unregister("x").is_empty());
        assert_eq!(registry.names(), vec!["y".to_string()]);
        assert!(!registry.exists("x", None));
    }
}

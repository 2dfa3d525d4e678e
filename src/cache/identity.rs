//! Cache identity: a name plus the key and value types it stores.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime tag for a Rust type.
///
/// Equality and hashing use the `TypeId` only; the name is kept for messages.
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Key and value type pair of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypePair {
    pub key: TypeTag,
    pub value: TypeTag,
}

impl TypePair {
    pub fn of<K: 'static, V: 'static>() -> Self {
        Self {
            key: TypeTag::of::<K>(),
            value: TypeTag::of::<V>(),
        }
    }
}

impl fmt::Display for TypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.key, self.value)
    }
}

/// Uniquely identifies one cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIdentity {
    name: String,
    types: TypePair,
}

impl CacheIdentity {
    pub fn new(name: impl Into<String>, types: TypePair) -> Self {
        Self {
            name: name.into(),
            types,
        }
    }

    pub fn of<K: 'static, V: 'static>(name: impl Into<String>) -> Self {
        Self::new(name, TypePair::of::<K, V>())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> TypePair {
        self.types
    }
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.name, self.types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality_uses_types() {
        let a = CacheIdentity::of::<u64, String>("x");
        let b = CacheIdentity::of::<u64, String>("x");
        let c = CacheIdentity::of::<String, String>("x");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display() {
        let id = CacheIdentity::of::<u32, bool>("flags");
        assert_eq!(id.to_string(), "flags<u32, bool>");
    }
}

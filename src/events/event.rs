//! Cache entry events.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Kind of change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Removed,
    Expired,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// One change to one entry of a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntryEvent<K, V> {
    cache_name: Arc<str>,
    event_type: EventType,
    key: K,
    value: Option<V>,
    old_value: Option<V>,
}

impl<K: Clone, V: Clone> CacheEntryEvent<K, V> {
    pub fn new(
        cache_name: Arc<str>,
        event_type: EventType,
        key: K,
        value: Option<V>,
        old_value: Option<V>,
    ) -> Self {
        Self {
            cache_name,
            event_type,
            key,
            value,
            old_value,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// New value for created/updated events, last value for removed/expired.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Only populated for listeners registered with old values required.
    pub fn old_value(&self) -> Option<&V> {
        self.old_value.as_ref()
    }

    /// Copy of this event with the old value stripped.
    pub(crate) fn without_old_value(&self) -> Self {
        Self {
            cache_name: Arc::clone(&self.cache_name),
            event_type: self.event_type,
            key: self.key.clone(),
            value: self.value.clone(),
            old_value: None,
        }
    }
}

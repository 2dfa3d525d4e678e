//! Listener callbacks and their registration settings.

use std::fmt;
use std::sync::Arc;

use super::{CacheEntryEvent, EventType};
use crate::error::ListenerError;

/// Callback receiving one batch of events of a single kind.
pub type ListenerFn<K, V> =
    Arc<dyn Fn(&[CacheEntryEvent<K, V>]) -> Result<(), ListenerError> + Send + Sync>;

/// Predicate deciding whether a listener sees an event.
pub type EventFilter<K, V> = Arc<dyn Fn(&CacheEntryEvent<K, V>) -> bool + Send + Sync>;

/// A listener with one optional callback per event kind.
///
/// Kinds without a callback are never buffered for this listener.
pub struct EntryListener<K, V> {
    on_created: Option<ListenerFn<K, V>>,
    on_updated: Option<ListenerFn<K, V>>,
    on_removed: Option<ListenerFn<K, V>>,
    on_expired: Option<ListenerFn<K, V>>,
}

impl<K, V> EntryListener<K, V> {
    pub fn new() -> Self {
        Self {
            on_created: None,
            on_updated: None,
            on_removed: None,
            on_expired: None,
        }
    }

    #[must_use]
    pub fn on_created<F>(mut self, f: F) -> Self
    where
        F: Fn(&[CacheEntryEvent<K, V>]) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on_created = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_updated<F>(mut self, f: F) -> Self
    where
        F: Fn(&[CacheEntryEvent<K, V>]) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on_updated = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_removed<F>(mut self, f: F) -> Self
    where
        F: Fn(&[CacheEntryEvent<K, V>]) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on_removed = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_expired<F>(mut self, f: F) -> Self
    where
        F: Fn(&[CacheEntryEvent<K, V>]) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on_expired = Some(Arc::new(f));
        self
    }

    /// Register the same callback for every kind.
    #[must_use]
    pub fn on_all<F>(self, f: F) -> Self
    where
        F: Fn(&[CacheEntryEvent<K, V>]) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let f: ListenerFn<K, V> = Arc::new(f);
        Self {
            on_created: Some(Arc::clone(&f)),
            on_updated: Some(Arc::clone(&f)),
            on_removed: Some(Arc::clone(&f)),
            on_expired: Some(f),
        }
    }

    pub fn callback(&self, kind: EventType) -> Option<&ListenerFn<K, V>> {
        match kind {
            EventType::Created => self.on_created.as_ref(),
            EventType::Updated => self.on_updated.as_ref(),
            EventType::Removed => self.on_removed.as_ref(),
            EventType::Expired => self.on_expired.as_ref(),
        }
    }

    pub fn handles(&self, kind: EventType) -> bool {
        self.callback(kind).is_some()
    }
}

impl<K, V> Default for EntryListener<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for EntryListener<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryListener")
            .field("created", &self.on_created.is_some())
            .field("updated", &self.on_updated.is_some())
            .field("removed", &self.on_removed.is_some())
            .field("expired", &self.on_expired.is_some())
            .finish()
    }
}

/// How a listener is attached to a cache.
///
/// Two configurations are equal when they share the same listener and filter
/// instances and the same flags.
pub struct ListenerConfiguration<K, V> {
    listener: Arc<EntryListener<K, V>>,
    filter: Option<EventFilter<K, V>>,
    old_value_required: bool,
    synchronous: bool,
}

impl<K, V> ListenerConfiguration<K, V> {
    /// Asynchronous, unfiltered, without old values.
    pub fn new(listener: EntryListener<K, V>) -> Self {
        Self::shared(Arc::new(listener))
    }

    /// Configuration around an already shared listener.
    pub fn shared(listener: Arc<EntryListener<K, V>>) -> Self {
        Self {
            listener,
            filter: None,
            old_value_required: false,
            synchronous: false,
        }
    }

    #[must_use]
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&CacheEntryEvent<K, V>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn old_value_required(mut self, required: bool) -> Self {
        self.old_value_required = required;
        self
    }

    /// Deliver on the mutating task instead of the background executor.
    #[must_use]
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn listener(&self) -> &Arc<EntryListener<K, V>> {
        &self.listener
    }

    pub fn is_old_value_required(&self) -> bool {
        self.old_value_required
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Whether the filter (if any) lets `event` through.
    pub fn accepts(&self, event: &CacheEntryEvent<K, V>) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(event))
    }
}

impl<K, V> Clone for ListenerConfiguration<K, V> {
    fn clone(&self) -> Self {
        Self {
            listener: Arc::clone(&self.listener),
            filter: self.filter.clone(),
            old_value_required: self.old_value_required,
            synchronous: self.synchronous,
        }
    }
}

impl<K, V> PartialEq for ListenerConfiguration<K, V> {
    fn eq(&self, other: &Self) -> bool {
        let same_filter = match (&self.filter, &other.filter) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        Arc::ptr_eq(&self.listener, &other.listener)
            && same_filter
            && self.old_value_required == other.old_value_required
            && self.synchronous == other.synchronous
    }
}

impl<K, V> Eq for ListenerConfiguration<K, V> {}

impl<K, V> fmt::Debug for ListenerConfiguration<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConfiguration")
            .field("listener", &self.listener)
            .field("filtered", &self.filter.is_some())
            .field("old_value_required", &self.old_value_required)
            .field("synchronous", &self.synchronous)
            .finish()
    }
}

//! Per-cache event dispatcher.
//!
//! Every mutating operation opens an [`EventBatch`], stores the events it
//! produces and dispatches once at the end. The batch buffers events per
//! listener and per kind, so a listener receives one callback per kind per
//! operation.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{CacheEntryEvent, EventType, ListenerConfiguration};
use crate::error::{CacheError, ListenerError, Result};
use crate::executor::BackgroundExecutor;

type Registration<K, V> = Arc<ListenerConfiguration<K, V>>;

/// Listener registrations of one cache.
pub struct EventDispatcher<K, V> {
    cache_name: Arc<str>,
    registrations: RwLock<Vec<Registration<K, V>>>,
    executor: Arc<BackgroundExecutor>,
}

impl<K, V> EventDispatcher<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache_name: Arc<str>, executor: Arc<BackgroundExecutor>) -> Self {
        Self {
            cache_name,
            registrations: RwLock::new(Vec::new()),
            executor,
        }
    }

    /// # Errors
    /// Returns a configuration error if an equal configuration is already
    /// registered.
    pub fn register(&self, config: ListenerConfiguration<K, V>) -> Result<()> {
        let mut registrations = self.registrations.write();
        if registrations.iter().any(|r| **r == config) {
            return Err(CacheError::config(format!(
                "listener is already registered on cache \"{}\"",
                self.cache_name
            )));
        }
        registrations.push(Arc::new(config));
        debug!(
            "Registered listener on {} ({} total)",
            self.cache_name,
            registrations.len()
        );
        Ok(())
    }

    /// Returns `false` when no equal configuration was registered.
    pub fn deregister(&self, config: &ListenerConfiguration<K, V>) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| **r != *config);
        before != registrations.len()
    }

    pub fn registrations(&self) -> Vec<ListenerConfiguration<K, V>> {
        self.registrations
            .read()
            .iter()
            .map(|r| ListenerConfiguration::clone(r))
            .collect()
    }

    pub fn has_listeners(&self) -> bool {
        !self.registrations.read().is_empty()
    }

    /// Start collecting the events of one operation.
    pub fn begin(&self) -> EventBatch<'_, K, V> {
        EventBatch {
            dispatcher: self,
            buffers: Vec::new(),
        }
    }
}

/// Events of one kind buffered for one listener, in arrival order.
type KindBuffer<K, V> = (EventType, Vec<CacheEntryEvent<K, V>>);

/// Events collected by a single operation.
pub struct EventBatch<'a, K, V> {
    dispatcher: &'a EventDispatcher<K, V>,
    buffers: Vec<(Registration<K, V>, Vec<KindBuffer<K, V>>)>,
}

impl<K, V> EventBatch<'_, K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Buffer `event` for every current listener that handles its kind and
    /// whose filter accepts it.
    pub fn store_event(&mut self, event: CacheEntryEvent<K, V>) {
        let registrations = self.dispatcher.registrations.read();
        for registration in registrations.iter() {
            if !registration.listener().handles(event.event_type())
                || !registration.accepts(&event)
            {
                continue;
            }

            let buffered = if registration.is_old_value_required() {
                event.clone()
            } else {
                event.without_old_value()
            };

            let index = match self
                .buffers
                .iter()
                .position(|(r, _)| Arc::ptr_eq(r, registration))
            {
                Some(index) => index,
                None => {
                    self.buffers.push((Arc::clone(registration), Vec::new()));
                    self.buffers.len() - 1
                }
            };
            let kinds = &mut self.buffers[index].1;

            let kind = buffered.event_type();
            match kinds.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, events)) => events.push(buffered),
                None => kinds.push((kind, vec![buffered])),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Deliver everything buffered.
    ///
    /// Synchronous listeners run before this returns; asynchronous ones are
    /// handed to the background executor. Every listener is delivered to even
    /// if one fails; the first synchronous failure is returned.
    pub fn dispatch(self) -> Result<()> {
        let mut first_error: Option<ListenerError> = None;

        for (registration, kinds) in self.buffers {
            if registration.is_synchronous() {
                if let Err(e) = deliver(&registration, &kinds) {
                    warn!(
                        "Synchronous listener on {} failed: {}",
                        self.dispatcher.cache_name, e
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                continue;
            }

            let task = format!("listener:{}", self.dispatcher.cache_name);
            let queued = self.dispatcher.executor.execute(&task, async move {
                deliver(&registration, &kinds).map_err(CacheError::from)
            });
            if let Err(e) = queued {
                warn!(
                    "Dropped events for asynchronous listener on {}: {}",
                    self.dispatcher.cache_name, e
                );
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Invoke the listener once per buffered kind, returning the first failure.
fn deliver<K, V>(
    registration: &ListenerConfiguration<K, V>,
    kinds: &[KindBuffer<K, V>],
) -> std::result::Result<(), ListenerError> {
    let mut first_error = None;
    for (kind, events) in kinds {
        if let Some(callback) = registration.listener().callback(*kind)
            && let Err(e) = callback(events.as_slice())
            && first_error.is_none()
        {
            first_error = Some(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

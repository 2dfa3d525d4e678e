//! Cache entry events and their delivery.
//!
//! ## Architecture
//!
//! - `CacheEntryEvent` - one change to one entry
//! - `EntryListener` - optional callback per event kind
//! - `ListenerConfiguration` - listener plus filter and delivery flags
//! - `EventDispatcher` - per-cache registrations; hands out `EventBatch`es

mod dispatcher;
mod event;
mod listener;

pub use dispatcher::{EventBatch, EventDispatcher};
pub use event::{CacheEntryEvent, EventType};
pub use listener::{EntryListener, EventFilter, ListenerConfiguration, ListenerFn};

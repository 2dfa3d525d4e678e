//! Larder - embeddable cache engine
//!
//! Typed caches over pluggable storage sessions, with expiry policies,
//! read-through / write-through proxies and batched entry listeners.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `storage` - Storage sessions and the bundled backends (memory, MongoDB)
//! - `cache` - Typed caches, expiry, proxies and the cache registry
//! - `events` - Entry events, listeners and batched dispatch
//! - `executor` - Bounded background executor
//! - `manager` - Cache manager per connection URI
//! - `provider` - URI to manager map
//! - `utils` - Utility functions

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod manager;
pub mod provider;
pub mod storage;
pub mod utils;

pub use cache::{CacheConfig, ExpiryPolicy, TypedCache};
pub use config::{Config, ManagerConfig};
pub use error::{CacheError, Result};
pub use manager::CacheManager;
pub use provider::CachingProvider;

//! Cache module - typed caches over pluggable storage sessions.
//!
//! ## Architecture
//!
//! The cache system follows a registry pattern:
//! - `CacheRegistry` - identity-addressed table of live caches
//! - `TypedCache` - per-cache orchestrator (session, expiry, proxy, events)
//! - `CacheConfig` - builder for per-cache settings
//! - `ExpiryPolicy` / `PolicyEvaluator` - deadline rules and their evaluation
//! - `ProxySource` - read-through loader and write-through writer
//!
//! ## Usage
//!
//! ```rust,ignore
//! let users = manager
//!     .create_cache::<u64, String>("users", CacheConfig::new())
//!     .await?;
//!
//! users.put(42, "alice".to_string()).await?;
//! let user = users.get(&42).await?;
//! ```

mod completion;
mod config;
mod entry;
mod expiry;
mod identity;
mod proxy;
mod record;
mod registry;
mod stats;
mod typed;

pub use completion::{CompletionListener, CompletionWaiter, NoopCompletion};
pub use config::CacheConfig;
pub use entry::{EntryHandler, MutableEntry};
pub use expiry::{Action, Evaluation, Expiry, ExpiryPolicy, ExpiryRules, PolicyEvaluator};
pub use identity::{CacheIdentity, TypePair, TypeTag};
pub use proxy::{CacheLoader, CacheWriter, ProxySource};
pub use record::{CacheKey, CacheValue, EntryFactory, StoredRecord};
pub use registry::{CacheRegistry, ManagedCache};
pub use stats::{CacheStatistics, CacheStatus, StatisticsSnapshot};
pub use typed::TypedCache;

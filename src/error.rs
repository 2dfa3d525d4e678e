//! Error types shared by every layer of the cache engine.

use thiserror::Error;

/// Boxed error returned by user-supplied collaborators (loaders, writers,
/// custom storage sessions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Every failure a cache operation can report.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Invalid configuration, detected before any state was touched.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Operation attempted on a closed cache, manager or executor.
    #[error("{0} is closed")]
    Closed(String),

    /// A cache with the same identity is already registered.
    #[error(
        "cache \"{name}\" with types <{key_type}, {value_type}> already exists (fixed types: {fixed_types})"
    )]
    AlreadyExists {
        name: String,
        key_type: &'static str,
        value_type: &'static str,
        fixed_types: bool,
    },

    /// Lookup by name alone matched more than one type pair.
    #[error(
        "more than one cache is registered under \"{0}\"; look it up with explicit key and value types"
    )]
    AmbiguousName(String),

    /// The name resolved to a cache holding different key/value types.
    #[error("cache \"{name}\" holds <{registered}>, requested <{requested}>")]
    TypeMismatch {
        name: String,
        registered: String,
        requested: String,
    },

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The read-through loader failed.
    #[error("cache loader failed: {0}")]
    Loader(#[source] BoxError),

    /// The write-through writer failed.
    #[error("cache writer failed: {0}")]
    Writer(#[source] BoxError),

    /// A synchronous listener rejected a batch of events.
    #[error("listener failed: {0}")]
    Listener(#[from] ListenerError),

    /// An entry processor passed to `invoke` failed.
    #[error("entry processor failed: {0}")]
    Processor(String),
}

impl CacheError {
    /// Shorthand for [`CacheError::Closed`].
    pub fn closed(resource: impl Into<String>) -> Self {
        Self::Closed(resource.into())
    }

    /// Shorthand for [`CacheError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error reports a closed resource.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("failed to decode record: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    /// A stored document is missing a required field or has the wrong shape.
    #[error("malformed stored record: {0}")]
    Malformed(String),

    /// Error from a custom backend implementation.
    #[error(transparent)]
    Backend(BoxError),
}

impl From<mongodb::error::Error> for CacheError {
    fn from(e: mongodb::error::Error) -> Self {
        Self::Storage(StorageError::Mongo(e))
    }
}

impl From<mongodb::bson::ser::Error> for CacheError {
    fn from(e: mongodb::bson::ser::Error) -> Self {
        Self::Storage(StorageError::Encode(e))
    }
}

impl From<mongodb::bson::de::Error> for CacheError {
    fn from(e: mongodb::bson::de::Error) -> Self {
        Self::Storage(StorageError::Decode(e))
    }
}

/// Error raised by a listener callback.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_message_names_types() {
        let err = CacheError::AlreadyExists {
            name: "users".to_string(),
            key_type: "u64",
            value_type: "alloc::string::String",
            fixed_types: false,
        };
        let text = err.to_string();
        assert!(text.contains("\"users\""));
        assert!(text.contains("<u64, alloc::string::String>"));
    }

    #[test]
    fn test_listener_error_converts() {
        let err: CacheError = ListenerError::new("boom").into();
        assert!(matches!(err, CacheError::Listener(_)));
        assert_eq!(err.to_string(), "listener failed: boom");
    }

    #[test]
    fn test_closed_helper() {
        let err = CacheError::closed("cache \"x\"");
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "cache \"x\" is closed");
    }
}

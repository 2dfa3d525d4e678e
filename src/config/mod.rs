//! Configuration module for Larder.
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::cache::ExpiryPolicy;
use crate::error::{CacheError, Result};
use crate::utils::parse_duration;

const DEFAULT_URI: &str = "memory://default";
const DEFAULT_WORKERS: usize = 1;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage connection URI (`memory://...` or `mongodb://...`).
    pub uri: String,

    /// Manager-wide settings.
    pub manager: ManagerConfig,
}

/// Settings shared by every cache of one manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Concurrent background tasks (async listeners, `load_all`).
    pub workers: usize,

    /// How long `close()` waits for background tasks before aborting them.
    pub shutdown_grace: Duration,

    /// Policy for caches whose config names none.
    pub default_expiry: ExpiryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            default_expiry: ExpiryPolicy::Eternal,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `LARDER_URI` (default `memory://default`)
    /// - `LARDER_EXECUTOR_WORKERS` (default 1)
    /// - `LARDER_SHUTDOWN_GRACE` (default `5s`)
    /// - `LARDER_DEFAULT_EXPIRY` (default `eternal`)
    ///
    /// # Errors
    /// Returns a configuration error for malformed values.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let uri = var("LARDER_URI").unwrap_or_else(|| DEFAULT_URI.to_string());

        let workers = match var("LARDER_EXECUTOR_WORKERS") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    CacheError::config(format!(
                        "LARDER_EXECUTOR_WORKERS must be a positive integer, got \"{}\"",
                        raw
                    ))
                })?,
            None => DEFAULT_WORKERS,
        };

        let shutdown_grace = match var("LARDER_SHUTDOWN_GRACE") {
            Some(raw) => parse_duration(&raw).ok_or_else(|| {
                CacheError::config(format!(
                    "LARDER_SHUTDOWN_GRACE must be a duration like 5s, got \"{}\"",
                    raw
                ))
            })?,
            None => DEFAULT_SHUTDOWN_GRACE,
        };

        let default_expiry = match var("LARDER_DEFAULT_EXPIRY") {
            Some(raw) => raw.parse::<ExpiryPolicy>()?,
            None => ExpiryPolicy::Eternal,
        };

        Ok(Self {
            uri,
            manager: ManagerConfig {
                workers,
                shutdown_grace,
                default_expiry,
            },
        })
    }
}

//! Larder demo binary.
//!
//! Connects the backend named by `LARDER_URI`, creates a cache with a
//! logging listener, runs a few operations and prints the cache status.

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use larder::cache::{CacheConfig, ExpiryPolicy};
use larder::events::{EntryListener, ListenerConfiguration};
use larder::{CachingProvider, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("larder=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Larder demo...");

    let config = Config::from_env()?;
    info!("Configuration loaded, storage: {}", config.uri);

    let provider = CachingProvider::new(config.manager.clone());
    let manager = provider.get_cache_manager(&config.uri).await?;

    let listener = EntryListener::<String, u64>::new().on_all(|events| {
        for event in events {
            info!(
                "[{}] {} {} -> {:?}",
                event.cache_name(),
                event.event_type(),
                event.key(),
                event.value()
            );
        }
        Ok(())
    });

    let visits = manager
        .create_cache::<String, u64>(
            "visits",
            CacheConfig::new()
                .expiry(ExpiryPolicy::Accessed(Duration::from_secs(60)))
                .listener(ListenerConfiguration::new(listener).synchronous(true))
                .statistics(true),
        )
        .await?;

    visits.put("home".to_string(), 1).await?;
    visits
        .put_all([("about".to_string(), 3), ("blog".to_string(), 7)])
        .await?;
    let previous = visits.get_and_put("home".to_string(), 2).await?;
    info!("home was {:?}, now {:?}", previous, visits.get(&"home".to_string()).await?);
    visits.remove(&"about".to_string()).await?;

    println!("{}", serde_json::to_string_pretty(&manager.status()?)?);

    provider.close().await;
    info!("Larder demo finished");

    Ok(())
}

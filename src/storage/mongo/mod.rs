//! MongoDB backend.
//!
//! Every cache maps to one collection named after the cache, so a name can
//! hold only one key/value type pair. Documents carry the serialized key and
//! value plus the save date and expiry deadline; see [`document`] for the
//! exact layout.

pub mod document;
mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mongodb::bson::{Document, doc};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::{debug, info};

use super::{CacheStorage, StorageSession};
use crate::cache::{CacheKey, CacheValue};
use crate::error::{CacheError, Result};

pub use session::MongoStorageSession;

/// Database used when the connection URI names none.
pub const DEFAULT_DATABASE: &str = "larder";

/// MongoDB storage backend.
#[derive(Debug, Clone)]
pub struct MongoStorage {
    client: Client,
    db: mongodb::Database,
    closed: Arc<AtomicBool>,
}

impl MongoStorage {
    /// Connect with the given URI.
    ///
    /// The database is taken from the URI path (`mongodb://host/<db>`),
    /// falling back to [`DEFAULT_DATABASE`].
    ///
    /// # Errors
    /// Returns error if the URI is invalid or the server does not answer a ping.
    pub async fn connect(uri: &str) -> Result<Self> {
        let options = ClientOptions::parse(uri).await?;
        let db_name = options
            .default_database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        let client = Client::with_options(options)?;

        // Ping the database to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        info!("Successfully connected to MongoDB (database: {})", db_name);

        Ok(Self::from_client(client, &db_name))
    }

    /// Wrap an already configured client without contacting the server.
    pub fn from_client(client: Client, db_name: &str) -> Self {
        let db = client.database(db_name);
        Self {
            client,
            db,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a reference to the underlying MongoDB client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &mongodb::Database {
        &self.db
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }
}

#[async_trait]
impl CacheStorage for MongoStorage {
    async fn open_session<K, V>(&self, name: &str) -> Result<Arc<dyn StorageSession<K, V>>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::closed(format!(
                "mongodb storage \"{}\"",
                self.db.name()
            )));
        }

        let collection = self.collection(name);
        let index = IndexModel::builder()
            .keys(doc! { document::FIELD_KEY: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        collection.create_index(index).await?;
        debug!("Opened MongoDB session for collection {}", name);

        Ok(Arc::new(MongoStorageSession::new(collection)))
    }

    /// One collection per name: a second type pair would share its documents.
    fn is_fixed_types(&self) -> bool {
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

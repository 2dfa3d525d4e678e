//! Storage session over one MongoDB collection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::Collection;
use mongodb::bson::{Document, doc};
use mongodb::options::{FindOptions, ReplaceOptions};
use tracing::{debug, warn};

use super::document::{self, FIELD_KEY};
use crate::cache::{CacheKey, CacheValue, StoredRecord};
use crate::error::{CacheError, Result};
use crate::storage::StorageSession;

/// Session backed by a `Collection<Document>`.
pub struct MongoStorageSession {
    collection: Collection<Document>,
    closed: AtomicBool,
}

impl MongoStorageSession {
    pub(super) fn new(collection: Collection<Document>) -> Self {
        Self {
            collection,
            closed: AtomicBool::new(false),
        }
    }

    fn assert_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::closed(format!(
                "storage session for \"{}\"",
                self.collection.name()
            )));
        }
        Ok(())
    }

    async fn find_records<K, V>(&self, filter: Document) -> Result<Vec<StoredRecord<K, V>>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        let mut cursor = self.collection.find(filter).await?;
        let mut records = Vec::new();

        while let Some(result) = cursor.next().await {
            let raw = result?;
            match document::from_document(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping undecodable document in {}: {}",
                    self.collection.name(),
                    e
                ),
            }
        }
        Ok(records)
    }

    async fn present_keys<K: CacheKey>(&self, keys: &[K]) -> Result<HashSet<K>> {
        let options = FindOptions::builder()
            .projection(doc! { FIELD_KEY: 1, "_id": 0 })
            .build();
        let mut cursor = self
            .collection
            .find(document::keys_filter(keys)?)
            .with_options(options)
            .await?;

        let mut present = HashSet::new();
        while let Some(result) = cursor.next().await {
            present.insert(document::key_from_document(&result?)?);
        }
        Ok(present)
    }
}

#[async_trait]
impl<K, V> StorageSession<K, V> for MongoStorageSession
where
    K: CacheKey,
    V: CacheValue,
{
    async fn contains_key(&self, key: &K) -> Result<bool> {
        self.assert_open()?;
        let count = self
            .collection
            .count_documents(document::key_filter(key)?)
            .await?;
        Ok(count > 0)
    }

    async fn get(&self, key: &K) -> Result<Option<StoredRecord<K, V>>> {
        self.assert_open()?;
        let result = self
            .collection
            .find_one(document::key_filter(key)?)
            .await?;
        result.as_ref().map(document::from_document).transpose()
    }

    async fn get_all(&self, keys: &[K]) -> Result<Vec<StoredRecord<K, V>>> {
        self.assert_open()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.find_records(document::keys_filter(keys)?).await
    }

    async fn all(&self) -> Result<Vec<StoredRecord<K, V>>> {
        self.assert_open()?;
        self.find_records(doc! {}).await
    }

    async fn put(&self, record: &StoredRecord<K, V>) -> Result<()> {
        self.assert_open()?;
        let options = ReplaceOptions::builder().upsert(true).build();

        self.collection
            .replace_one(document::key_filter(&record.key)?, document::to_document(record)?)
            .with_options(options)
            .await?;

        debug!("Saved record in {}", self.collection.name());
        Ok(())
    }

    async fn put_all(&self, records: &[StoredRecord<K, V>]) -> Result<()> {
        self.assert_open()?;
        if records.is_empty() {
            return Ok(());
        }

        // Last write wins for duplicate keys within one batch.
        let mut latest: HashMap<&K, &StoredRecord<K, V>> = HashMap::with_capacity(records.len());
        for record in records {
            latest.insert(&record.key, record);
        }

        let keys: Vec<K> = latest.keys().map(|k| K::clone(k)).collect();
        let present = self.present_keys(&keys).await?;

        let mut inserts = Vec::new();
        for (key, record) in latest {
            if present.contains(key) {
                self.collection
                    .update_one(document::key_filter(key)?, document::value_update(record)?)
                    .await?;
            } else {
                inserts.push(document::to_document(record)?);
            }
        }

        if !inserts.is_empty() {
            self.collection.insert_many(inserts).await?;
        }
        Ok(())
    }

    async fn update(&self, record: &StoredRecord<K, V>) -> Result<bool> {
        self.assert_open()?;
        let result = self
            .collection
            .update_one(
                document::key_filter(&record.key)?,
                document::value_update(record)?,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn update_expiry(&self, record: &StoredRecord<K, V>) -> Result<()> {
        self.assert_open()?;
        self.collection
            .update_one(
                document::key_filter(&record.key)?,
                document::expiry_update(record),
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        self.assert_open()?;
        let result = self
            .collection
            .delete_one(document::key_filter(key)?)
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn remove_all(&self, keys: &[K]) -> Result<u64> {
        self.assert_open()?;
        if keys.is_empty() {
            return Ok(0);
        }
        let result = self
            .collection
            .delete_many(document::keys_filter(keys)?)
            .await?;
        Ok(result.deleted_count)
    }

    async fn clear(&self) -> Result<u64> {
        self.assert_open()?;
        let result = self.collection.delete_many(doc! {}).await?;
        debug!(
            "Cleared {} records from {}",
            result.deleted_count,
            self.collection.name()
        );
        Ok(result.deleted_count)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

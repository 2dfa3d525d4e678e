//! Mapping between [`StoredRecord`] and the stored BSON document.
//!
//! ```text
//! { key: <bson>, value: <bson>, save_date: <date>, expire_timestamp: <i64 millis | null> }
//! ```

use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, Document, doc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::StoredRecord;
use crate::error::{Result, StorageError};

pub const FIELD_KEY: &str = "key";
pub const FIELD_VALUE: &str = "value";
pub const FIELD_SAVE_DATE: &str = "save_date";
pub const FIELD_EXPIRE: &str = "expire_timestamp";

/// Filter matching one key.
pub fn key_filter<K: Serialize>(key: &K) -> Result<Document> {
    Ok(doc! { FIELD_KEY: bson::to_bson(key)? })
}

/// Filter matching any of `keys`.
pub fn keys_filter<K: Serialize>(keys: &[K]) -> Result<Document> {
    let keys = keys
        .iter()
        .map(bson::to_bson)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(doc! { FIELD_KEY: { "$in": keys } })
}

fn expire_bson(deadline: Option<DateTime<Utc>>) -> Bson {
    match deadline {
        Some(at) => Bson::Int64(at.timestamp_millis()),
        None => Bson::Null,
    }
}

/// Full document for `record`. The previous value is never persisted.
pub fn to_document<K, V>(record: &StoredRecord<K, V>) -> Result<Document>
where
    K: Serialize,
    V: Serialize,
{
    Ok(doc! {
        FIELD_KEY: bson::to_bson(&record.key)?,
        FIELD_VALUE: bson::to_bson(&record.value)?,
        FIELD_SAVE_DATE: bson::DateTime::from_millis(record.saved_at.timestamp_millis()),
        FIELD_EXPIRE: expire_bson(record.expires_at),
    })
}

/// `$set` update that rewrites value, save date and expiry.
pub fn value_update<K, V: Serialize>(record: &StoredRecord<K, V>) -> Result<Document> {
    Ok(doc! {
        "$set": {
            FIELD_VALUE: bson::to_bson(&record.value)?,
            FIELD_SAVE_DATE: bson::DateTime::from_millis(record.saved_at.timestamp_millis()),
            FIELD_EXPIRE: expire_bson(record.expires_at),
        }
    })
}

/// `$set` update that rewrites the expiry only.
pub fn expiry_update<K, V>(record: &StoredRecord<K, V>) -> Document {
    doc! { "$set": { FIELD_EXPIRE: expire_bson(record.expires_at) } }
}

/// Decode just the key of a stored document.
pub fn key_from_document<K: DeserializeOwned>(document: &Document) -> Result<K> {
    let raw = document
        .get(FIELD_KEY)
        .cloned()
        .ok_or_else(|| StorageError::Malformed(format!("missing \"{}\"", FIELD_KEY)))?;
    Ok(bson::from_bson(raw)?)
}

/// Decode a stored document back into a record.
pub fn from_document<K, V>(document: &Document) -> Result<StoredRecord<K, V>>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let key = key_from_document(document)?;
    let value = document
        .get(FIELD_VALUE)
        .cloned()
        .ok_or_else(|| StorageError::Malformed(format!("missing \"{}\"", FIELD_VALUE)))?;

    let saved_at = match document.get(FIELD_SAVE_DATE) {
        Some(Bson::DateTime(at)) => millis_to_utc(at.timestamp_millis())?,
        Some(other) => {
            return Err(StorageError::Malformed(format!(
                "\"{}\" is not a date: {}",
                FIELD_SAVE_DATE, other
            ))
            .into());
        }
        None => Utc::now(),
    };

    let expires_at = match document.get(FIELD_EXPIRE) {
        Some(Bson::Int64(ms)) => Some(millis_to_utc(*ms)?),
        Some(Bson::Int32(ms)) => Some(millis_to_utc(i64::from(*ms))?),
        Some(Bson::Null) | None => None,
        Some(other) => {
            return Err(StorageError::Malformed(format!(
                "\"{}\" is not a timestamp: {}",
                FIELD_EXPIRE, other
            ))
            .into());
        }
    };

    Ok(StoredRecord {
        key,
        value: bson::from_bson(value)?,
        previous_value: None,
        saved_at,
        expires_at,
    })
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Malformed(format!("timestamp {} out of range", ms)).into())
}

//! Cache entry encoding.
//!
//! An entry is the serialized result of one query: a single record or an
//! ordered sequence, with eager-loaded associations already attached, plus
//! the time it was written.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use verso_core::{CacheError, Timestamp};

use crate::record::CachedRecord;

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum PayloadRef<'a, R> {
    Record(&'a R),
    Records(&'a [R]),
}

#[derive(Serialize)]
struct EntryRef<'a, R> {
    cached_at: Timestamp,
    payload: PayloadRef<'a, R>,
}

/// Decoded entry payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload<R> {
    Record(R),
    Records(Vec<R>),
}

/// A decoded cache entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheEntry<R> {
    pub cached_at: Timestamp,
    pub payload: Payload<R>,
}

impl<R: CachedRecord> CacheEntry<R> {
    /// Encode one record as an entry written now.
    pub fn encode_record(record: &R) -> Result<(Vec<u8>, Timestamp), CacheError> {
        encode(PayloadRef::Record(record))
    }

    /// Encode an ordered sequence as an entry written now.
    pub fn encode_records(records: &[R]) -> Result<(Vec<u8>, Timestamp), CacheError> {
        encode(PayloadRef::Records(records))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization {
            reason: e.to_string(),
        })
    }

    /// Unwrap a single-record payload.
    pub fn into_record(self) -> Result<(R, Timestamp), CacheError> {
        match self.payload {
            Payload::Record(record) => Ok((record, self.cached_at)),
            Payload::Records(_) => Err(CacheError::Deserialization {
                reason: "expected a single record entry, found a sequence".to_string(),
            }),
        }
    }

    /// Unwrap a sequence payload.
    pub fn into_records(self) -> Result<(Vec<R>, Timestamp), CacheError> {
        match self.payload {
            Payload::Records(records) => Ok((records, self.cached_at)),
            Payload::Record(_) => Err(CacheError::Deserialization {
                reason: "expected a record sequence entry, found a single record".to_string(),
            }),
        }
    }
}

fn encode<R: CachedRecord>(payload: PayloadRef<'_, R>) -> Result<(Vec<u8>, Timestamp), CacheError> {
    let cached_at = Utc::now();
    let bytes = serde_json::to_vec(&EntryRef { cached_at, payload }).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })?;
    Ok((bytes, cached_at))
}

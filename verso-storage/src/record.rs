//! Cacheable record traits.

use serde::{de::DeserializeOwned, Serialize};
use verso_core::{FieldValue, RecordId, RecordType};

/// Marker trait for record types that can be served through the cache.
///
/// # Implementation Requirements
///
/// - `record_type()` must return the same value for all instances
/// - `record_id()` must return the primary key of this instance
/// - `associations()` lists every association an eager load may name
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned` for
///   cache storage; eager-loaded associations must be part of the serialized
///   form so a cache hit returns the hydrated graph
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait CachedRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the record type for this cacheable.
    fn record_type() -> RecordType;

    /// Get the primary key of this record.
    fn record_id(&self) -> RecordId;

    /// Associations that may be eager-loaded with this record type.
    fn associations() -> &'static [&'static str] {
        &[]
    }
}

/// Field-level access used by stores that evaluate predicates in process.
pub trait FieldAccess {
    /// Read a field. `None` when the record has no such field.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Write a field. Returns false when the field is unknown or the value
    /// has the wrong kind.
    fn set_field(&mut self, name: &str, value: FieldValue) -> bool;
}

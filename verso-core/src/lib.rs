//! VERSO Core - Data Types
//!
//! Pure data structures shared by every VERSO crate: record identities,
//! versions, version metadata, query descriptors, per-record-type settings
//! and the error taxonomy. No I/O lives here.

pub mod config;
pub mod error;
pub mod identity;
pub mod query;
pub mod version;

pub use config::{CacheFailurePolicy, RecordTypeSettings, DEFAULT_VERSION_FIELD};
pub use error::{
    CacheError, ConfigError, StorageError, ValidationError, VersoError, VersoResult,
};
pub use identity::{compute_digest, Association, Digest, RecordId, RecordType, Timestamp};
pub use query::{
    FieldValue, FilterExpr, FilterOperator, OrderBy, Predicate, QueryDescriptor, Selection,
    SortDirection,
};
pub use version::{AggregateProbe, Version, VersionChecksum, VersionMetadata};

//! Persistent record store traits.
//!
//! The cache layer never talks to a database directly. Everything it needs
//! from the store is expressed here: a cheap version probe, full loads, an
//! optional association loader, and the explicit version bump.

use std::collections::BTreeSet;

use async_trait::async_trait;
use verso_core::{AggregateProbe, Association, Predicate, RecordId, Version, VersoResult};

use crate::record::CachedRecord;

/// Read access to a persistent store for one record type.
///
/// Reads must observe committed data only (read-committed or better).
/// Errors should surface as `StorageError::ProbeFailed` or
/// `StorageError::LoadFailed`; the cache passes them through unchanged.
#[async_trait]
pub trait RecordStore<R: CachedRecord>: Send + Sync {
    /// Read `(id, version)` for one record, never the full row.
    ///
    /// `None` when no record has this id.
    async fn probe_single(
        &self,
        version_field: &str,
        id: &RecordId,
    ) -> VersoResult<Option<(RecordId, Version)>>;

    /// Read `max(version)`, `count` and the version checksum over the rows
    /// the scope selects.
    ///
    /// The scope carries filters and, for refined id selections, an id
    /// restriction matched against the primary key. The checksum must
    /// combine one [`VersionChecksum::of`](verso_core::VersionChecksum::of)
    /// per row; [`AggregateProbe::observe`] does exactly that. A store that
    /// computes it in SQL may use any order-independent sum of per-row
    /// hashes, as long as it is deterministic.
    ///
    /// The version column should be indexed, otherwise this is a full scan
    /// on every cached read.
    async fn probe_aggregate(
        &self,
        version_field: &str,
        scope: &Predicate,
    ) -> VersoResult<AggregateProbe>;

    /// Load one full record.
    async fn load_single(&self, id: &RecordId) -> VersoResult<Option<R>>;

    /// Load the records a predicate selects, honoring the id restriction,
    /// order, limit and offset.
    async fn load_many(&self, predicate: &Predicate) -> VersoResult<Vec<R>>;
}

/// Write hook used to advance a record's version without changing data.
#[async_trait]
pub trait VersionToucher<R: CachedRecord>: Send + Sync {
    /// Advance the version and return the new value.
    ///
    /// Counters advance by one; timestamps move to `max(now, current + 1µs)`.
    async fn touch(&self, id: &RecordId, version_field: &str) -> VersoResult<Version>;
}

/// Loads eager associations onto already-loaded records.
#[async_trait]
pub trait AssociationLoader<R: CachedRecord>: Send + Sync {
    /// Attach the named associations to every record in place.
    async fn attach(&self, records: &mut [R], includes: &BTreeSet<Association>)
        -> VersoResult<()>;
}

/// Loader that attaches nothing. Useful for record types without
/// associations that still want to go through a configured policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssociations;

#[async_trait]
impl<R: CachedRecord> AssociationLoader<R> for NoAssociations {
    async fn attach(
        &self,
        _records: &mut [R],
        _includes: &BTreeSet<Association>,
    ) -> VersoResult<()> {
        Ok(())
    }
}

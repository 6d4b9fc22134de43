//! Version metadata probe.
//!
//! The probe is the only store read on a cache hit, so it must stay cheap:
//! it reads `(id, version)` for a single record or `(max(version), count,
//! checksum)` over a set, never full rows.

use std::marker::PhantomData;

use verso_core::{Predicate, RecordId, VersionMetadata, VersoResult};

use crate::record::CachedRecord;
use crate::store::RecordStore;

/// Reads current version state for one record type.
pub struct VersionMetadataProbe<'a, R, S: ?Sized> {
    store: &'a S,
    version_field: &'a str,
    _record: PhantomData<fn() -> R>,
}

impl<'a, R, S> VersionMetadataProbe<'a, R, S>
where
    R: CachedRecord,
    S: RecordStore<R> + ?Sized,
{
    pub fn new(store: &'a S, version_field: &'a str) -> Self {
        Self {
            store,
            version_field,
            _record: PhantomData,
        }
    }

    /// Metadata for one record, or `Empty` when it does not exist.
    pub async fn record(&self, id: &RecordId) -> VersoResult<VersionMetadata> {
        let probe = self.store.probe_single(self.version_field, id).await?;
        Ok(VersionMetadata::record(probe))
    }

    /// Metadata for the rows a predicate selects, or `Empty` when none match.
    ///
    /// Only the filters take part; ordering and the limit/offset window are
    /// stripped before probing.
    pub async fn set(&self, predicate: &Predicate) -> VersoResult<VersionMetadata> {
        let probe = self
            .store
            .probe_aggregate(self.version_field, &predicate.scope())
            .await?;
        Ok(VersionMetadata::aggregate(probe))
    }
}

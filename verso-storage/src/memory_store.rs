//! In-memory record store.
//!
//! A reference [`RecordStore`] over a `BTreeMap`, evaluating predicates
//! through [`FieldAccess`]. It counts every call and can be told to fail, so
//! tests can observe exactly what the cache layer asked of the store.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use verso_core::{
    AggregateProbe, FieldValue, Predicate, RecordId, SortDirection, StorageError, Version,
    VersoResult,
};

use crate::record::{CachedRecord, FieldAccess};
use crate::store::{RecordStore, VersionToucher};

/// Number of calls made against an [`InMemoryRecordStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub probe_single: u64,
    pub probe_aggregate: u64,
    pub load_single: u64,
    pub load_many: u64,
    pub touch: u64,
}

impl StoreCallCounts {
    /// Total number of full loads.
    pub fn loads(&self) -> u64 {
        self.load_single + self.load_many
    }

    /// Total number of version probes.
    pub fn probes(&self) -> u64 {
        self.probe_single + self.probe_aggregate
    }
}

#[derive(Debug, Default)]
struct Counters {
    probe_single: AtomicU64,
    probe_aggregate: AtomicU64,
    load_single: AtomicU64,
    load_many: AtomicU64,
    touch: AtomicU64,
}

/// Record store kept entirely in memory.
pub struct InMemoryRecordStore<R> {
    records: RwLock<BTreeMap<RecordId, R>>,
    counters: Counters,
    fail_probes: AtomicBool,
    fail_loads: AtomicBool,
    _record: PhantomData<fn() -> R>,
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            counters: Counters::default(),
            fail_probes: AtomicBool::new(false),
            fail_loads: AtomicBool::new(false),
            _record: PhantomData,
        }
    }
}

impl<R> InMemoryRecordStore<R>
where
    R: CachedRecord + FieldAccess,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given records.
    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
    {
        let map = records
            .into_iter()
            .map(|record| (record.record_id(), record))
            .collect();
        Self {
            records: RwLock::new(map),
            ..Self::default()
        }
    }

    /// Insert or replace a record. Returns the previous record, if any.
    pub async fn upsert(&self, record: R) -> Option<R> {
        self.records.write().await.insert(record.record_id(), record)
    }

    /// Apply a change to a stored record. Returns false if it does not exist.
    ///
    /// The closure is responsible for advancing the version field; this
    /// mirrors an application write path.
    pub async fn update<F>(&self, id: &RecordId, change: F) -> bool
    where
        F: FnOnce(&mut R),
    {
        match self.records.write().await.get_mut(id) {
            Some(record) => {
                change(record);
                true
            }
            None => false,
        }
    }

    /// Delete a record. Returns the removed record, if any.
    pub async fn remove(&self, id: &RecordId) -> Option<R> {
        self.records.write().await.remove(id)
    }

    /// Read a record without touching the call counters.
    pub async fn get(&self, id: &RecordId) -> Option<R> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Make every probe fail until switched back.
    pub fn fail_probes(&self, fail: bool) {
        self.fail_probes.store(fail, AtomicOrdering::SeqCst);
    }

    /// Make every load fail until switched back.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, AtomicOrdering::SeqCst);
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> StoreCallCounts {
        StoreCallCounts {
            probe_single: self.counters.probe_single.load(AtomicOrdering::SeqCst),
            probe_aggregate: self.counters.probe_aggregate.load(AtomicOrdering::SeqCst),
            load_single: self.counters.load_single.load(AtomicOrdering::SeqCst),
            load_many: self.counters.load_many.load(AtomicOrdering::SeqCst),
            touch: self.counters.touch.load(AtomicOrdering::SeqCst),
        }
    }

    /// Reset the call counters to zero.
    pub fn reset_calls(&self) {
        self.counters.probe_single.store(0, AtomicOrdering::SeqCst);
        self.counters.probe_aggregate.store(0, AtomicOrdering::SeqCst);
        self.counters.load_single.store(0, AtomicOrdering::SeqCst);
        self.counters.load_many.store(0, AtomicOrdering::SeqCst);
        self.counters.touch.store(0, AtomicOrdering::SeqCst);
    }

    fn check_probe(&self) -> VersoResult<()> {
        if self.fail_probes.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::ProbeFailed {
                record_type: R::record_type(),
                reason: "probe failure injected".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn check_load(&self) -> VersoResult<()> {
        if self.fail_loads.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::LoadFailed {
                record_type: R::record_type(),
                reason: "load failure injected".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn version_of(record: &R, version_field: &str) -> VersoResult<Version> {
        record
            .field(version_field)
            .as_ref()
            .and_then(Version::from_field)
            .ok_or_else(|| {
                StorageError::VersionFieldMissing {
                    record_type: R::record_type(),
                    id: record.record_id(),
                    field: version_field.to_string(),
                }
                .into()
            })
    }
}

/// Compare two records by the predicate's ordering terms, then by id.
fn compare_records<R>(predicate: &Predicate, a: &R, b: &R) -> Ordering
where
    R: CachedRecord + FieldAccess,
{
    for term in predicate.ordering() {
        let left = a.field(&term.field).unwrap_or(FieldValue::Null);
        let right = b.field(&term.field).unwrap_or(FieldValue::Null);
        let ord = match term.direction {
            SortDirection::Asc => left.cmp(&right),
            SortDirection::Desc => right.cmp(&left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.record_id().cmp(&b.record_id())
}

fn matches<R: CachedRecord + FieldAccess>(predicate: &Predicate, record: &R) -> bool {
    predicate.admits(&record.record_id()) && predicate.matches(|field| record.field(field))
}

#[async_trait]
impl<R> RecordStore<R> for InMemoryRecordStore<R>
where
    R: CachedRecord + FieldAccess,
{
    async fn probe_single(
        &self,
        version_field: &str,
        id: &RecordId,
    ) -> VersoResult<Option<(RecordId, Version)>> {
        self.counters.probe_single.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_probe()?;

        let records = self.records.read().await;
        match records.get(id) {
            Some(record) => {
                let version = Self::version_of(record, version_field)?;
                Ok(Some((id.clone(), version)))
            }
            None => Ok(None),
        }
    }

    async fn probe_aggregate(
        &self,
        version_field: &str,
        scope: &Predicate,
    ) -> VersoResult<AggregateProbe> {
        self.counters
            .probe_aggregate
            .fetch_add(1, AtomicOrdering::SeqCst);
        self.check_probe()?;

        let records = self.records.read().await;
        let mut probe = AggregateProbe::default();
        for (id, record) in records.iter().filter(|(_, r)| matches(scope, *r)) {
            probe.observe(id, Self::version_of(record, version_field)?);
        }
        Ok(probe)
    }

    async fn load_single(&self, id: &RecordId) -> VersoResult<Option<R>> {
        self.counters.load_single.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_load()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn load_many(&self, predicate: &Predicate) -> VersoResult<Vec<R>> {
        self.counters.load_many.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_load()?;

        let records = self.records.read().await;
        let mut selected: Vec<R> = records
            .values()
            .filter(|r| matches(predicate, *r))
            .cloned()
            .collect();
        selected.sort_by(|a, b| compare_records(predicate, a, b));

        let offset = predicate
            .row_offset()
            .map(|o| usize::try_from(o).unwrap_or(usize::MAX))
            .unwrap_or(0);
        let limit = predicate
            .row_limit()
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(selected.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl<R> VersionToucher<R> for InMemoryRecordStore<R>
where
    R: CachedRecord + FieldAccess,
{
    async fn touch(&self, id: &RecordId, version_field: &str) -> VersoResult<Version> {
        self.counters.touch.fetch_add(1, AtomicOrdering::SeqCst);

        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| StorageError::TouchFailed {
            record_type: R::record_type(),
            id: id.clone(),
            reason: "record not found".to_string(),
        })?;

        let next = Self::version_of(record, version_field)?.bumped();
        if !record.set_field(version_field, next.to_field()) {
            return Err(StorageError::VersionFieldMissing {
                record_type: R::record_type(),
                id: id.clone(),
                field: version_field.to_string(),
            }
            .into());
        }
        Ok(next)
    }
}

//! Cache-aside fetcher.
//!
//! Every read goes probe → key → cache lookup → (on miss) load → cache
//! write → return. The probe is the only store read on a hit. Two
//! strategies share that shape:
//!
//! - **Single-record** (`find_with_cache`, `find_many_with_cache`): one
//!   `(id, version)` probe and one key per id. Ids the probe cannot find
//!   come back as `None` without a load and without a cache write.
//! - **Multi-record** (`all_with_cache`, `query`, `first_with_cache`): one
//!   `(max(version), count)` probe over the filters, one key for the whole
//!   descriptor including its order and window. Any insert, update or
//!   delete within the filters moves either the maximum or the count.
//!
//! Concurrent misses on one key both load and both write; the last write
//! wins. There is no request coalescing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use verso_core::{
    Association, CacheError, ConfigError, Predicate, QueryDescriptor, RecordId,
    RecordTypeSettings, Selection, Timestamp, ValidationError, Version, VersoResult,
};

use super::association::AssociationLoadPolicy;
use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::handle::{CachedQuery, Deferred};
use super::key::{CacheKey, CacheKeyBuilder};
use super::memory_backend::InMemoryCacheStore;
use super::metrics::{CacheMetrics, CacheMetricsSnapshot};
use super::probe::VersionMetadataProbe;
use super::read::{CacheRead, RecordSet};
use super::traits::CacheStore;
use crate::record::CachedRecord;
use crate::store::{AssociationLoader, RecordStore, VersionToucher};

/// Entry point of the cache-aside layer.
///
/// Holds the cache store, the configuration and the shared metrics. Create
/// one per application and derive a [`RecordCache`] per record type and
/// store with [`records`](Self::records).
///
/// # Example
///
/// ```ignore
/// let aside = CacheAside::new(Arc::new(InMemoryCacheStore::new()), config)?;
/// let items = aside.records::<Item, _>(&store);
///
/// let item = items.find_with_cache(1).await?;
/// let page = items
///     .all_with_cache(Predicate::new().where_eq("category", "tools"))
///     .order_by("name", SortDirection::Asc)
///     .limit(20)
///     .await?;
/// ```
pub struct CacheAside<C: ?Sized> {
    cache: Arc<C>,
    keys: CacheKeyBuilder,
    config: CacheConfig,
    metrics: Arc<CacheMetrics>,
}

impl<C: ?Sized> Clone for CacheAside<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            keys: self.keys.clone(),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<C: CacheStore + ?Sized> CacheAside<C> {
    /// Create a cache-aside layer over a cache store.
    ///
    /// The configuration is validated first.
    pub fn new(cache: Arc<C>, config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = CacheKeyBuilder::new(config.namespace.clone()).map_err(|e| {
            ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: config.namespace.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            cache,
            keys,
            config,
            metrics: Arc::new(CacheMetrics::new()),
        })
    }

    /// Create a cache-aside layer with default configuration.
    pub fn with_defaults(cache: Arc<C>) -> Self {
        Self {
            cache,
            keys: CacheKeyBuilder::default(),
            config: CacheConfig::default(),
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a reference to the cache store.
    pub fn backend(&self) -> &C {
        &self.cache
    }

    pub fn keys(&self) -> &CacheKeyBuilder {
        &self.keys
    }

    /// Snapshot of the counters shared by every record cache from this layer.
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cached reads of one record type from one store.
    pub fn records<'a, R, S>(&'a self, store: &'a S) -> RecordCache<'a, R, S, C>
    where
        R: CachedRecord,
        S: RecordStore<R> + ?Sized,
    {
        RecordCache {
            aside: self,
            store,
            settings: self.config.settings_for(&R::record_type()),
            associations: AssociationLoadPolicy::none(),
            includes: BTreeSet::new(),
        }
    }
}

impl CacheAside<InMemoryCacheStore> {
    /// Create a cache-aside layer over the process-wide in-memory store.
    pub fn with_shared_cache(config: CacheConfig) -> Result<Self, ConfigError> {
        Self::new(InMemoryCacheStore::shared(), config)
    }
}

/// Cached reads for one record type.
///
/// Cheap to clone; every handle it returns owns a clone.
pub struct RecordCache<'a, R, S: ?Sized, C: ?Sized> {
    aside: &'a CacheAside<C>,
    store: &'a S,
    settings: RecordTypeSettings,
    associations: AssociationLoadPolicy<'a, R>,
    includes: BTreeSet<Association>,
}

impl<R, S: ?Sized, C: ?Sized> Clone for RecordCache<'_, R, S, C> {
    fn clone(&self) -> Self {
        Self {
            aside: self.aside,
            store: self.store,
            settings: self.settings.clone(),
            associations: self.associations,
            includes: self.includes.clone(),
        }
    }
}

impl<'a, R, S, C> RecordCache<'a, R, S, C>
where
    R: CachedRecord,
    S: RecordStore<R> + ?Sized + 'a,
    C: CacheStore + ?Sized + 'a,
{
    /// Use a loader for eager associations.
    pub fn with_associations(mut self, loader: &'a dyn AssociationLoader<R>) -> Self {
        self.associations = AssociationLoadPolicy::with_loader(loader);
        self
    }

    /// Eager-load these associations on every read from this handle.
    pub fn including<I, A>(mut self, associations: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Association>,
    {
        self.includes
            .extend(associations.into_iter().map(Into::into));
        self
    }

    /// Replace the settings resolved from the configuration.
    pub fn with_settings(mut self, settings: RecordTypeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &RecordTypeSettings {
        &self.settings
    }

    /// Read one record by id.
    ///
    /// Resolves to `None` when the record does not exist.
    pub fn find_with_cache(
        &self,
        id: impl Into<RecordId>,
    ) -> Deferred<'a, Option<CacheRead<Arc<R>>>> {
        let this = self.clone();
        let id = id.into();
        Deferred::new(async move {
            let mut found = this
                .fetch_records(std::slice::from_ref(&id), &this.includes)
                .await?;
            Ok(found.pop().flatten())
        })
    }

    /// Read several records by id, in request order.
    ///
    /// Each slot is `None` when that record does not exist.
    pub fn find_many_with_cache<I>(&self, ids: I) -> Deferred<'a, Vec<Option<CacheRead<Arc<R>>>>>
    where
        I: IntoIterator,
        I::Item: Into<RecordId>,
    {
        let this = self.clone();
        let ids: Vec<RecordId> = ids.into_iter().map(Into::into).collect();
        Deferred::new(async move { this.fetch_records(&ids, &this.includes).await })
    }

    /// Records matching a predicate, refinable before it runs.
    pub fn all_with_cache(&self, predicate: Predicate) -> CachedQuery<'a, R, S, C> {
        let descriptor = QueryDescriptor::matching(R::record_type(), predicate)
            .with_includes(self.includes.iter().cloned());
        CachedQuery::new(self.clone(), descriptor)
    }

    /// Every record of the type, refinable before it runs.
    pub fn query(&self) -> CachedQuery<'a, R, S, C> {
        self.all_with_cache(Predicate::new())
    }

    /// Run an arbitrary descriptor for this record type.
    ///
    /// An id selection is served by the single-record strategy and the
    /// records that exist are returned in id order.
    pub fn fetch(&self, descriptor: QueryDescriptor) -> CachedQuery<'a, R, S, C> {
        let descriptor = descriptor.with_includes(self.includes.iter().cloned());
        CachedQuery::new(self.clone(), descriptor)
    }

    /// First record matching a predicate (by the predicate's order).
    pub fn first_with_cache(&self, predicate: Predicate) -> Deferred<'a, Option<CacheRead<Arc<R>>>> {
        self.all_with_cache(predicate).first_with_cache()
    }

    /// Advance a record's version without changing its data.
    ///
    /// Every cached entry that covers the record is orphaned: its
    /// single-record key and the key of every set whose filters include it.
    /// Call this from the write path of an associated record to refresh an
    /// owner whose cached graph embeds it.
    pub async fn bump_version(&self, id: impl Into<RecordId>) -> VersoResult<Version>
    where
        S: VersionToucher<R>,
    {
        let id = id.into();
        let version = self
            .store
            .touch(&id, &self.settings.version_field)
            .await?;
        tracing::info!(
            record_type = %R::record_type(),
            id = %id,
            version = ?version,
            "Bumped record version"
        );
        Ok(version)
    }

    /// Single-record strategy.
    ///
    /// A cache failure marks only the reads for the ids it affected as
    /// degraded.
    pub(crate) async fn fetch_records(
        &self,
        ids: &[RecordId],
        includes: &BTreeSet<Association>,
    ) -> VersoResult<Vec<Option<CacheRead<Arc<R>>>>> {
        R::record_type().validate()?;
        self.associations.check(includes)?;

        if !self.settings.enabled {
            return self.load_records_direct(ids, includes).await;
        }

        let probe = VersionMetadataProbe::<R, S>::new(self.store, &self.settings.version_field);
        let mut degraded: BTreeSet<RecordId> = BTreeSet::new();
        let mut seen: BTreeSet<RecordId> = BTreeSet::new();
        let mut resolved: BTreeMap<RecordId, Option<CacheRead<Arc<R>>>> = BTreeMap::new();
        let mut pending: Vec<(RecordId, CacheKey)> = Vec::new();

        for id in ids {
            if !seen.insert(id.clone()) {
                continue;
            }

            self.aside.metrics.record_probe();
            let metadata = probe.record(id).await?;
            if metadata.is_empty() {
                tracing::debug!(
                    record_type = %R::record_type(),
                    id = %id,
                    "Record absent at probe"
                );
                resolved.insert(id.clone(), None);
                continue;
            }

            let descriptor = QueryDescriptor::find(R::record_type(), id.clone())
                .with_includes(includes.iter().cloned());
            let key = self.aside.keys.build(&descriptor, &metadata)?;

            let mut lookup_degraded = false;
            let found = self
                .lookup(&key, &mut lookup_degraded, CacheEntry::into_record)
                .await?;
            if lookup_degraded {
                degraded.insert(id.clone());
            }
            match found {
                Some((record, cached_at)) => {
                    let read = CacheRead::from_cache(Arc::new(record), key, cached_at);
                    resolved.insert(id.clone(), Some(read));
                }
                None => pending.push((id.clone(), key)),
            }
        }

        let mut loaded: Vec<R> = Vec::with_capacity(pending.len());
        let mut loaded_keys: Vec<(RecordId, CacheKey)> = Vec::with_capacity(pending.len());
        for (id, key) in pending {
            self.aside.metrics.record_load();
            match self.store.load_single(&id).await? {
                Some(record) => {
                    loaded.push(record);
                    loaded_keys.push((id, key));
                }
                None => {
                    tracing::debug!(
                        record_type = %R::record_type(),
                        id = %id,
                        "Record removed between probe and load, not caching"
                    );
                    resolved.insert(id, None);
                }
            }
        }

        self.associations.hydrate(&mut loaded, includes).await?;

        for (record, (id, key)) in loaded.into_iter().zip(loaded_keys) {
            let mut write_degraded = false;
            self.write_entry(&key, CacheEntry::encode_record(&record), &mut write_degraded)
                .await?;
            if write_degraded {
                degraded.insert(id.clone());
            }
            let read = CacheRead::from_storage(Arc::new(record), Some(key));
            resolved.insert(id, Some(read));
        }

        Ok(ids
            .iter()
            .map(|id| {
                resolved
                    .get(id)
                    .cloned()
                    .flatten()
                    .map(|read| read.with_degraded(degraded.contains(id)))
            })
            .collect())
    }

    /// Multi-record strategy.
    pub(crate) async fn fetch_set(
        &self,
        descriptor: QueryDescriptor,
    ) -> VersoResult<CacheRead<RecordSet<R>>> {
        self.check_descriptor(&descriptor)?;

        let predicate = match descriptor.selection() {
            Selection::Predicate(predicate) => predicate.clone(),
            Selection::Ids(ids) => {
                let ids: Vec<RecordId> = ids.iter().cloned().collect();
                return self.collect_ids(&ids, descriptor.includes()).await;
            }
        };

        if !self.settings.enabled {
            tracing::debug!(
                record_type = %R::record_type(),
                "Caching disabled for record type, loading directly"
            );
            self.aside.metrics.record_load();
            let mut records = self.store.load_many(&predicate).await?;
            self.associations
                .hydrate(&mut records, descriptor.includes())
                .await?;
            return Ok(CacheRead::from_storage(RecordSet::new(records), None));
        }

        self.aside.metrics.record_probe();
        let metadata = VersionMetadataProbe::<R, S>::new(self.store, &self.settings.version_field)
            .set(&predicate)
            .await?;
        let key = self.aside.keys.build(&descriptor, &metadata)?;

        let mut degraded = false;
        if let Some((records, cached_at)) = self
            .lookup(&key, &mut degraded, CacheEntry::into_records)
            .await?
        {
            return Ok(CacheRead::from_cache(
                RecordSet::new(records),
                key,
                cached_at,
            ));
        }

        self.aside.metrics.record_load();
        let mut records = self.store.load_many(&predicate).await?;
        self.associations
            .hydrate(&mut records, descriptor.includes())
            .await?;
        self.write_entry(&key, CacheEntry::encode_records(&records), &mut degraded)
            .await?;

        Ok(CacheRead::from_storage(RecordSet::new(records), Some(key)).with_degraded(degraded))
    }

    fn check_descriptor(&self, descriptor: &QueryDescriptor) -> VersoResult<()> {
        descriptor.validate()?;
        let expected = R::record_type();
        if descriptor.record_type() != &expected {
            return Err(ValidationError::InvalidRecordType {
                name: descriptor.record_type().to_string(),
                reason: format!("expected record type {}", expected),
            }
            .into());
        }
        self.associations.check(descriptor.includes())?;
        Ok(())
    }

    /// Serve an id selection through the single-record strategy and collect
    /// the records that exist into one set.
    async fn collect_ids(
        &self,
        ids: &[RecordId],
        includes: &BTreeSet<Association>,
    ) -> VersoResult<CacheRead<RecordSet<R>>> {
        let found: Vec<CacheRead<Arc<R>>> = self
            .fetch_records(ids, includes)
            .await?
            .into_iter()
            .flatten()
            .collect();

        let all_hits = !found.is_empty() && found.iter().all(CacheRead::was_cache_hit);
        let degraded = found.iter().any(CacheRead::degraded);
        let cached_at = found
            .iter()
            .map(CacheRead::cached_at)
            .min()
            .unwrap_or_else(Utc::now);
        let records: Vec<R> = found
            .into_iter()
            .map(|read| {
                let record = read.into_value();
                Arc::try_unwrap(record).unwrap_or_else(|shared| (*shared).clone())
            })
            .collect();

        Ok(CacheRead::composed(RecordSet::new(records), all_hits, cached_at).with_degraded(degraded))
    }

    async fn load_records_direct(
        &self,
        ids: &[RecordId],
        includes: &BTreeSet<Association>,
    ) -> VersoResult<Vec<Option<CacheRead<Arc<R>>>>> {
        tracing::debug!(
            record_type = %R::record_type(),
            "Caching disabled for record type, loading directly"
        );

        let mut records: Vec<R> = Vec::with_capacity(ids.len());
        let mut slots: Vec<Option<usize>> = Vec::with_capacity(ids.len());
        for id in ids {
            self.aside.metrics.record_load();
            match self.store.load_single(id).await? {
                Some(record) => {
                    slots.push(Some(records.len()));
                    records.push(record);
                }
                None => slots.push(None),
            }
        }

        self.associations.hydrate(&mut records, includes).await?;

        let mut records: Vec<Option<R>> = records.into_iter().map(Some).collect();
        Ok(slots
            .into_iter()
            .map(|slot| {
                slot.and_then(|i| records[i].take())
                    .map(|record| CacheRead::from_storage(Arc::new(record), None))
            })
            .collect())
    }

    /// Look a key up and decode the entry.
    ///
    /// `None` is a miss. Under the degrade policy a failed get or an
    /// undecodable entry is also a miss.
    async fn lookup<T: Send>(
        &self,
        key: &CacheKey,
        degraded: &mut bool,
        unwrap: fn(CacheEntry<R>) -> Result<(T, Timestamp), CacheError>,
    ) -> VersoResult<Option<(T, Timestamp)>> {
        let bytes = match self.aside.cache.get(key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.absorb(err, "get", key)?;
                *degraded = true;
                None
            }
        };

        let found = match bytes {
            Some(bytes) => match CacheEntry::<R>::decode(&bytes).and_then(unwrap) {
                Ok(found) => Some(found),
                Err(err) => {
                    self.absorb(err, "decode", key)?;
                    *degraded = true;
                    None
                }
            },
            None => None,
        };

        if found.is_some() {
            self.aside.metrics.record_hit();
            tracing::debug!(record_type = %R::record_type(), key = %key, "Cache hit");
        } else {
            self.aside.metrics.record_miss();
            tracing::debug!(record_type = %R::record_type(), key = %key, "Cache miss");
        }
        Ok(found)
    }

    async fn write_entry(
        &self,
        key: &CacheKey,
        encoded: Result<(Vec<u8>, Timestamp), CacheError>,
        degraded: &mut bool,
    ) -> VersoResult<()> {
        let result = match encoded {
            Ok((bytes, _)) => self.aside.cache.put(key, bytes, self.settings.ttl).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                self.aside.metrics.record_write();
                Ok(())
            }
            Err(err) => {
                self.absorb(err, "put", key)?;
                *degraded = true;
                Ok(())
            }
        }
    }

    /// Apply the failure policy to a cache error.
    fn absorb(&self, err: CacheError, operation: &'static str, key: &CacheKey) -> VersoResult<()> {
        if !self.aside.config.on_cache_failure.degrades() {
            return Err(err.into());
        }
        self.aside.metrics.record_degraded();
        tracing::warn!(
            record_type = %R::record_type(),
            key = %key,
            operation,
            error = %err,
            "Cache operation failed, serving from store"
        );
        Ok(())
    }
}

//! Deferred result handles.
//!
//! Every `_with_cache` call hands back a handle instead of a value. Nothing
//! runs (no probe, no cache lookup, no load) until the handle is awaited or
//! [`resolve`](Deferred::resolve)d, so a caller can refine a query further
//! or drop it without paying for any I/O.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use verso_core::{Association, FieldValue, FilterExpr, QueryDescriptor, SortDirection, VersoResult};

use super::fetcher::RecordCache;
use super::read::{CacheRead, RecordSet};
use super::traits::CacheStore;
use crate::record::CachedRecord;
use crate::store::RecordStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A pending cache-aside read.
#[must_use = "a deferred read does nothing until awaited"]
pub struct Deferred<'a, T> {
    future: BoxFuture<'a, VersoResult<T>>,
}

impl<'a, T> Deferred<'a, T> {
    pub(crate) fn new<F>(future: F) -> Self
    where
        F: Future<Output = VersoResult<T>> + Send + 'a,
    {
        Self {
            future: Box::pin(future),
        }
    }

    /// Run the read and return its value.
    pub async fn resolve(self) -> VersoResult<T> {
        self.future.await
    }
}

impl<'a, T> IntoFuture for Deferred<'a, T> {
    type Output = VersoResult<T>;
    type IntoFuture = BoxFuture<'a, VersoResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

impl<T> std::fmt::Debug for Deferred<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

/// A multi-record query that can still be refined.
///
/// Awaiting it runs the multi-record strategy and yields the ordered,
/// shared result set. Refinements change the descriptor, and with it the
/// cache key, so one page is never served for another.
#[must_use = "a cached query does nothing until awaited"]
pub struct CachedQuery<'a, R, S: ?Sized, C: ?Sized> {
    records: RecordCache<'a, R, S, C>,
    descriptor: QueryDescriptor,
}

impl<'a, R, S, C> CachedQuery<'a, R, S, C>
where
    R: CachedRecord,
    S: RecordStore<R> + ?Sized + 'a,
    C: CacheStore + ?Sized + 'a,
{
    pub(crate) fn new(records: RecordCache<'a, R, S, C>, descriptor: QueryDescriptor) -> Self {
        Self {
            records,
            descriptor,
        }
    }

    /// The descriptor as refined so far.
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn filter(mut self, expr: FilterExpr) -> Self {
        self.descriptor = self.descriptor.filter(expr);
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(FilterExpr::eq(field, value))
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.descriptor = self.descriptor.order_by(field, direction);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.descriptor = self.descriptor.limit(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.descriptor = self.descriptor.offset(offset);
        self
    }

    pub fn include(mut self, association: impl Into<Association>) -> Self {
        self.descriptor = self.descriptor.include(association);
        self
    }

    /// First record of the query.
    ///
    /// Runs the multi-record strategy over the query limited to one row, so
    /// it is cached under its own key and never collides with the full
    /// query's entry.
    pub fn first_with_cache(self) -> Deferred<'a, Option<CacheRead<Arc<R>>>> {
        let records = self.records;
        let descriptor = self.descriptor.limit(1);
        Deferred::new(async move {
            let read = records.fetch_set(descriptor).await?;
            let first = read.value().first().cloned();
            Ok(first.map(|record| read.map(|_| Arc::new(record))))
        })
    }

    /// Run the query and return the result set.
    pub async fn resolve(self) -> VersoResult<CacheRead<RecordSet<R>>> {
        self.into_future().await
    }
}

impl<'a, R, S, C> IntoFuture for CachedQuery<'a, R, S, C>
where
    R: CachedRecord,
    S: RecordStore<R> + ?Sized + 'a,
    C: CacheStore + ?Sized + 'a,
{
    type Output = VersoResult<CacheRead<RecordSet<R>>>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        let CachedQuery {
            records,
            descriptor,
        } = self;
        Box::pin(async move { records.fetch_set(descriptor).await })
    }
}

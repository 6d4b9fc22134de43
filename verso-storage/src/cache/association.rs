//! Eager association loading for cached records.
//!
//! Associations are hydrated on the miss path before the entry is written,
//! so a hit returns the full graph without touching the store.
//!
//! # Staleness boundary
//!
//! Only the owner's version takes part in the cache key. Updating an
//! associated record does not change the owner's version, so a cached owner
//! keeps serving the old association until the owner's own version moves.
//! The write path of the associated record must call
//! [`RecordCache::bump_version`](super::RecordCache::bump_version) on the
//! owner when that matters.

use std::collections::BTreeSet;

use verso_core::{Association, ValidationError, VersoResult};

use crate::record::CachedRecord;
use crate::store::AssociationLoader;

/// Validates requested associations and hydrates them.
pub struct AssociationLoadPolicy<'a, R> {
    loader: Option<&'a dyn AssociationLoader<R>>,
}

impl<R> Clone for AssociationLoadPolicy<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for AssociationLoadPolicy<'_, R> {}

impl<R> Default for AssociationLoadPolicy<'_, R> {
    fn default() -> Self {
        Self { loader: None }
    }
}

impl<'a, R: CachedRecord> AssociationLoadPolicy<'a, R> {
    /// A policy without a loader. Any requested association is an error.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_loader(loader: &'a dyn AssociationLoader<R>) -> Self {
        Self {
            loader: Some(loader),
        }
    }

    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    /// Reject associations the record type does not declare, and any
    /// request when no loader is configured.
    pub fn check(&self, includes: &BTreeSet<Association>) -> Result<(), ValidationError> {
        if includes.is_empty() {
            return Ok(());
        }

        let declared = R::associations();
        if let Some(unknown) = includes
            .iter()
            .find(|a| !declared.contains(&a.as_str()))
        {
            return Err(ValidationError::UnknownAssociation {
                record_type: R::record_type(),
                association: unknown.as_str().to_string(),
            });
        }

        if self.loader.is_none() {
            return Err(ValidationError::AssociationLoaderMissing {
                record_type: R::record_type(),
            });
        }

        Ok(())
    }

    /// Attach the requested associations in place.
    pub async fn hydrate(
        &self,
        records: &mut [R],
        includes: &BTreeSet<Association>,
    ) -> VersoResult<()> {
        if includes.is_empty() || records.is_empty() {
            return Ok(());
        }
        self.check(includes)?;
        match self.loader {
            Some(loader) => loader.attach(records, includes).await,
            None => Ok(()),
        }
    }
}

//! Record versions and the metadata derived from them.
//!
//! A version is read from one designated field per record type and must be
//! monotonically non-decreasing on every update. The cache never tracks
//! invalidations itself: a changed version produces a changed cache key.
//!
//! # Staleness boundaries
//!
//! - Timestamp versions are only as precise as the store keeps them. A store
//!   that truncates to whole seconds makes two writes within one second
//!   indistinguishable, and the second write is served stale until the next
//!   version change. Prefer microsecond columns.
//! - Counters are usually per record, so a set's maximum does not move when
//!   a row below it is updated. Set metadata therefore also carries a
//!   [`VersionChecksum`] over every `(id, version)` pair in the scope.
//! - Versions of eager-loaded associations are not part of the owner's
//!   metadata (see the association policy in `verso-storage`).

use chrono::Duration as ChronoDuration;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::identity::{compute_digest, RecordId, Timestamp};
use crate::query::FieldValue;

/// A record version: a counter or a modification timestamp.
///
/// Ordering is total. Mixing variants within one record type is a schema
/// error; if it happens, every `Counter` sorts before every `Timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Version {
    Counter(i64),
    Timestamp(Timestamp),
}

impl Version {
    /// Read a version out of a field value.
    ///
    /// Integers become counters and timestamps stay timestamps; every other
    /// value is not a version.
    pub fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int(n) => Some(Self::Counter(*n)),
            FieldValue::Timestamp(ts) => Some(Self::Timestamp(*ts)),
            _ => None,
        }
    }

    /// The field value to write back when this version is stored.
    pub fn to_field(&self) -> FieldValue {
        match self {
            Self::Counter(n) => FieldValue::Int(*n),
            Self::Timestamp(ts) => FieldValue::Timestamp(*ts),
        }
    }

    /// The next version after this one, as of `now`.
    ///
    /// Always strictly greater than `self`: counters advance by one and
    /// timestamps move to `max(now, self + 1µs)`, so a bump within the same
    /// clock tick still changes the version.
    pub fn bumped_at(&self, now: Timestamp) -> Self {
        match self {
            Self::Counter(n) => Self::Counter(n.saturating_add(1)),
            Self::Timestamp(ts) => {
                let floor = *ts + ChronoDuration::microseconds(1);
                Self::Timestamp(now.max(floor))
            }
        }
    }

    /// The next version after this one, as of the current time.
    pub fn bumped(&self) -> Self {
        self.bumped_at(Utc::now())
    }
}

/// Order-independent fingerprint of the `(id, version)` pairs in a set.
///
/// Each pair contributes the first eight bytes of its SHA-256 digest and
/// contributions combine by wrapping addition, so row order does not matter
/// while any single changed, added or removed pair changes the result.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionChecksum(u64);

impl VersionChecksum {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Contribution of one row.
    pub fn of(id: &RecordId, version: &Version) -> Self {
        // Version first: its encoding has a fixed length per tag, so the
        // variable-length id that follows cannot be confused with it.
        let mut material = Vec::with_capacity(48);
        match version {
            Version::Counter(n) => {
                material.push(0);
                material.extend_from_slice(&n.to_be_bytes());
            }
            Version::Timestamp(ts) => {
                material.push(1);
                material.extend_from_slice(&ts.timestamp().to_be_bytes());
                material.extend_from_slice(&ts.timestamp_subsec_nanos().to_be_bytes());
            }
        }
        match id {
            RecordId::Int(n) => {
                material.push(0);
                material.extend_from_slice(&n.to_be_bytes());
            }
            RecordId::Uuid(u) => {
                material.push(1);
                material.extend_from_slice(u.as_bytes());
            }
            RecordId::Text(s) => {
                material.push(2);
                material.extend_from_slice(s.as_bytes());
            }
        }

        let digest = compute_digest(&material);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(head))
    }

    pub fn combine(self, other: Self) -> Self {
        Self(self.0.wrapping_add(other.0))
    }
}

/// Raw result of an aggregate probe over a scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateProbe {
    pub max_version: Option<Version>,
    pub row_count: u64,
    pub checksum: VersionChecksum,
}

impl AggregateProbe {
    pub fn new(max_version: Option<Version>, row_count: u64) -> Self {
        Self {
            max_version,
            row_count,
            checksum: VersionChecksum::default(),
        }
    }

    pub fn with_checksum(mut self, checksum: VersionChecksum) -> Self {
        self.checksum = checksum;
        self
    }

    /// Fold one row of the scope into the probe.
    pub fn observe(&mut self, id: &RecordId, version: Version) {
        self.max_version = Some(match self.max_version {
            Some(current) => current.max(version),
            None => version,
        });
        self.row_count += 1;
        self.checksum = self.checksum.combine(VersionChecksum::of(id, &version));
    }
}

/// Current version state for a query, as reported by the probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionMetadata {
    /// One existing record.
    Record { id: RecordId, version: Version },
    /// A non-empty record set.
    Aggregate {
        max_version: Version,
        row_count: u64,
        checksum: VersionChecksum,
    },
    /// Sentinel for "nothing matched". Fixed, so repeated empty results
    /// derive the same cache key.
    Empty,
}

impl VersionMetadata {
    /// Metadata for a single-record probe result.
    pub fn record(probe: Option<(RecordId, Version)>) -> Self {
        match probe {
            Some((id, version)) => Self::Record { id, version },
            None => Self::Empty,
        }
    }

    /// Metadata for an aggregate probe result.
    ///
    /// A zero count (or a missing maximum) folds to the `Empty` sentinel.
    pub fn aggregate(probe: AggregateProbe) -> Self {
        match probe.max_version {
            Some(max_version) if probe.row_count > 0 => Self::Aggregate {
                max_version,
                row_count: probe.row_count,
                checksum: probe.checksum,
            },
            _ => Self::Empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The governing version, if any.
    pub fn version(&self) -> Option<Version> {
        match self {
            Self::Record { version, .. } => Some(*version),
            Self::Aggregate { max_version, .. } => Some(*max_version),
            Self::Empty => None,
        }
    }
}

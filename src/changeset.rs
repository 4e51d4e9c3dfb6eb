//! Change sets: immutable diff records returned by every mutation.
//!
//! Each mutating operation reports exactly what it did so the embedder can
//! fan out side effects (open a probe to a newly admitted peer, drop the
//! connection to an evicted one) without diffing the table itself. An empty
//! change set is the `NO_CHANGE` sentinel: the operation was legal but the
//! table decided to keep what it had.
//!
//! Change sets are plain values. They are built fresh per operation and
//! never alias internal state.

use crate::node::Activity;

/// What one operation did to a single activity set.
///
/// No entry appears in more than one list. `updated` carries refreshes of
/// entries that were already present (same id and link, new timestamp).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActivityChangeSet {
    pub added: Vec<Activity>,
    pub removed: Vec<Activity>,
    pub updated: Vec<Activity>,
}

impl ActivityChangeSet {
    /// The `NO_CHANGE` sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single admission.
    pub fn added(entry: Activity) -> Self {
        Self {
            added: vec![entry],
            ..Self::default()
        }
    }

    /// Zero or more evictions.
    pub fn removed(entries: Vec<Activity>) -> Self {
        Self {
            removed: entries,
            ..Self::default()
        }
    }

    /// A single in-place refresh.
    pub fn updated(entry: Activity) -> Self {
        Self {
            updated: vec![entry],
            ..Self::default()
        }
    }

    /// Whether this is the `NO_CHANGE` sentinel.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// What one operation did to a k-bucket: the live set's half and the
/// replacement cache's half.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KBucketChangeSet {
    pub live: ActivityChangeSet,
    pub cache: ActivityChangeSet,
}

impl KBucketChangeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.cache.is_empty()
    }
}

/// What one router operation did: the owning bucket's half and the near
/// set's half.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterChangeSet {
    pub tree: KBucketChangeSet,
    pub near: ActivityChangeSet,
}

impl RouterChangeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty() && self.near.is_empty()
    }
}

//! # K-Buckets
//!
//! A [`KBucket`] tracks the peers whose ids share a given bit prefix with
//! the local id. It pairs two bounded sets:
//!
//! - **live**: a [`NodeLeastRecentSet`] of size k. Long-lived peers stay;
//!   a full bucket rejects fresh newcomers.
//! - **cache**: a [`NodeMostRecentSet`] of size c. Peers that bounced off a
//!   full live set wait here, newest retained, ready to replace a live
//!   entry that goes stale.
//!
//! A peer is never in both halves at once. Marking a live peer stale
//! removes it and promotes the most recent cache entry in its place; with
//! an empty cache the id is locked instead, so later touches of that id are
//! diverted to the cache until it is unlocked.
//!
//! Per-id state within a bucket:
//!
//! ```text
//! absent -> live -> (stale) -> replaced-by-cache
//!                         \-> locked -> (unlock) -> absent
//! absent -> cache              (live full or id locked)
//! ```
//!
//! All operations are all-or-nothing: link conflicts are checked against
//! both halves before anything is mutated.

use std::collections::HashSet;

use tracing::debug;

use crate::changeset::{ActivityChangeSet, KBucketChangeSet};
use crate::error::{Result, RouteError};
use crate::id::{BitString, Id};
use crate::node::{Activity, Node, Timestamp};
use crate::sets::{NodeLeastRecentSet, NodeMostRecentSet};

/// One bucket of the routing tree: a live set, a replacement cache, and
/// the lock bookkeeping that ties them together.
#[derive(Clone, Debug)]
pub struct KBucket {
    base_id: Id,
    prefix: BitString,
    live: NodeLeastRecentSet,
    cache: NodeMostRecentSet,
    locked: HashSet<Id>,
    last_update_time: Option<Timestamp>,
    last_touch_time: Option<Timestamp>,
}

impl KBucket {
    /// Create an empty bucket covering ids that start with `prefix`.
    pub fn new(base_id: Id, prefix: BitString, bucket_cap: usize, cache_cap: usize) -> Self {
        assert!(
            prefix.len() <= base_id.bit_len(),
            "bucket prefix cannot be longer than the id space"
        );
        Self {
            live: NodeLeastRecentSet::new(base_id.clone(), bucket_cap),
            cache: NodeMostRecentSet::new(base_id.clone(), cache_cap),
            base_id,
            prefix,
            locked: HashSet::new(),
            last_update_time: None,
            last_touch_time: None,
        }
    }

    /// The bit prefix this bucket covers.
    pub fn prefix(&self) -> &BitString {
        &self.prefix
    }

    /// Time of the last touch that changed live or cache contents.
    pub fn last_update_time(&self) -> Option<Timestamp> {
        self.last_update_time
    }

    /// Time of the last touch, changed contents or not.
    pub fn last_touch_time(&self) -> Option<Timestamp> {
        self.last_touch_time
    }

    /// Whether the live set is at capacity.
    pub fn is_live_full(&self) -> bool {
        self.live.len() >= self.live.max_len()
    }

    /// Whether `id` currently occupies a live slot.
    pub fn contains_live(&self, id: &Id) -> bool {
        self.live.contains_id(id)
    }

    /// Whether `id` is locked out of the live set.
    pub fn is_locked(&self, id: &Id) -> bool {
        self.locked.contains(id)
    }

    /// Copy out the live entries, oldest first.
    pub fn dump_live(&self) -> Vec<Activity> {
        self.live.dump()
    }

    /// Copy out the cache entries, oldest first.
    pub fn dump_cache(&self) -> Vec<Activity> {
        self.cache.dump()
    }

    /// Fail with `LinkConflict` if either half tracks `node`'s id under a
    /// different link. Pure query, used to keep mutations all-or-nothing.
    pub(crate) fn ensure_no_conflict(&self, node: &Node) -> Result<()> {
        self.live.contains(node)?;
        self.cache.contains(node)?;
        Ok(())
    }

    /// Record an observation of `node` at `time`.
    ///
    /// Locked ids go straight to the cache. Everyone else is offered to the
    /// live set first and falls through to the cache when rejected; a peer
    /// the live set admits is purged from the cache so it never appears in
    /// both halves.
    pub fn touch(&mut self, time: Timestamp, node: &Node) -> Result<KBucketChangeSet> {
        self.validate(node)?;
        debug_assert!(
            self.prefix.is_prefix_of(node.id()),
            "peer {} routed to bucket with prefix {}",
            node.id(),
            self.prefix
        );
        self.ensure_no_conflict(node)?;
        self.last_touch_time = Some(time);

        if self.locked.contains(node.id()) {
            let cache_change = self.cache.touch(time, node)?;
            if !cache_change.is_empty() {
                self.last_update_time = Some(time);
            }
            return Ok(KBucketChangeSet {
                live: ActivityChangeSet::empty(),
                cache: cache_change,
            });
        }

        let live_change = self.live.touch(time, node)?;
        let cache_change = if live_change.is_empty() {
            // Live set full and the newcomer was not competitive.
            self.cache.touch(time, node)?
        } else if !live_change.added.is_empty() {
            self.cache.remove(node)?
        } else {
            ActivityChangeSet::empty()
        };

        if !live_change.is_empty() || !cache_change.is_empty() {
            self.last_update_time = Some(time);
        }
        Ok(KBucketChangeSet {
            live: live_change,
            cache: cache_change,
        })
    }

    /// Mark a live peer unresponsive.
    ///
    /// The peer leaves the live set. The most recent cache entry, if any,
    /// is promoted into the freed slot at its cache timestamp; otherwise
    /// the id is locked so later touches of it bypass the live set.
    pub fn stale(&mut self, node: &Node) -> Result<KBucketChangeSet> {
        self.validate(node)?;
        if !self.live.contains(node)? {
            return Err(RouteError::NotInBucket { node: node.clone() });
        }

        let removed = self.live.remove(node)?;
        let cache_change = self.cache.remove_most_recent(1);
        if let Some(promoted) = cache_change.removed.first().cloned() {
            let promotion = self.live.touch(promoted.time(), promoted.node())?;
            debug_assert_eq!(promotion.added.len(), 1);
            debug!(
                stale = %node.id(),
                promoted = %promoted.node().id(),
                "stale peer replaced by cache entry"
            );
            Ok(KBucketChangeSet {
                live: ActivityChangeSet {
                    added: promotion.added,
                    removed: removed.removed,
                    updated: Vec::new(),
                },
                cache: cache_change,
            })
        } else {
            self.locked.insert(node.id().clone());
            debug!(stale = %node.id(), "stale peer removed, id locked");
            Ok(KBucketChangeSet {
                live: removed,
                cache: ActivityChangeSet::empty(),
            })
        }
    }

    /// Remove a live peer and lock its id until [`unlock`](Self::unlock).
    ///
    /// Unlike [`stale`](Self::stale), no cache entry is promoted, so
    /// unlock restores exactly the pre-lock admission behaviour.
    pub fn lock(&mut self, node: &Node) -> Result<KBucketChangeSet> {
        self.validate(node)?;
        if !self.live.contains(node)? {
            return Err(RouteError::NotInBucket { node: node.clone() });
        }

        let removed = self.live.remove(node)?;
        self.locked.insert(node.id().clone());
        debug!(id = %node.id(), "peer locked out of live set");
        Ok(KBucketChangeSet {
            live: removed,
            cache: ActivityChangeSet::empty(),
        })
    }

    /// Clear a lock placed by [`lock`](Self::lock) or a cache-less
    /// [`stale`](Self::stale).
    pub fn unlock(&mut self, node: &Node) -> Result<KBucketChangeSet> {
        self.validate(node)?;
        if self.locked.remove(node.id()) {
            debug!(id = %node.id(), "peer unlocked");
            Ok(KBucketChangeSet::empty())
        } else {
            Err(RouteError::NotInBucket { node: node.clone() })
        }
    }

    /// Split this bucket into its two children along the next bit.
    ///
    /// Each child inherits the live and cache entries whose id matches its
    /// extra prefix bit, in unchanged order and with unchanged timestamps,
    /// plus the locked ids on its side. The zero-bit child is returned
    /// first.
    pub fn split(self) -> (KBucket, KBucket) {
        debug_assert!(
            self.prefix.len() < self.base_id.bit_len(),
            "bucket covering a single id cannot split"
        );
        let bit_pos = self.prefix.len();

        let (live_zero, live_one) = self.live.partition(|entry| !entry.node().id().bit(bit_pos));
        let (cache_zero, cache_one) = self.cache.partition(|entry| !entry.node().id().bit(bit_pos));
        let (locked_zero, locked_one): (HashSet<_>, HashSet<_>) =
            self.locked.into_iter().partition(|id| !id.bit(bit_pos));

        let zero = KBucket {
            base_id: self.base_id.clone(),
            prefix: self.prefix.with_bit(false),
            live: live_zero,
            cache: cache_zero,
            locked: locked_zero,
            last_update_time: self.last_update_time,
            last_touch_time: self.last_touch_time,
        };
        let one = KBucket {
            base_id: self.base_id,
            prefix: self.prefix.with_bit(true),
            live: live_one,
            cache: cache_one,
            locked: locked_one,
            last_update_time: self.last_update_time,
            last_touch_time: self.last_touch_time,
        };
        (zero, one)
    }

    fn validate(&self, node: &Node) -> Result<()> {
        if node.id().bit_len() != self.base_id.bit_len() {
            return Err(RouteError::LengthMismatch {
                expected: self.base_id.bit_len(),
                actual: node.id().bit_len(),
            });
        }
        if node.id() == &self.base_id {
            return Err(RouteError::SelfEntry {
                id: node.id().clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BITS: usize = 4;

    fn base() -> Id {
        Id::from_u64(0b0000, BITS)
    }

    fn node(bits: u64) -> Node {
        Node::new(Id::from_u64(bits, BITS), format!("{bits:04b}"))
    }

    fn t(nanos: u64) -> Timestamp {
        Timestamp::from_nanos(nanos)
    }

    fn ids(entries: &[Activity]) -> Vec<Id> {
        entries.iter().map(|e| e.node().id().clone()).collect()
    }

    fn bucket(bucket_cap: usize, cache_cap: usize) -> KBucket {
        KBucket::new(base(), BitString::empty(), bucket_cap, cache_cap)
    }

    #[test]
    fn overflow_lands_in_the_replacement_cache() {
        let mut b = bucket(1, 2);
        b.touch(t(1), &node(0b1000)).unwrap();

        let change = b.touch(t(2), &node(0b1001)).unwrap();
        assert!(change.live.is_empty());
        assert_eq!(ids(&change.cache.added), vec![Id::from_u64(0b1001, BITS)]);
        assert_eq!(ids(&b.dump_live()), vec![Id::from_u64(0b1000, BITS)]);
        assert_eq!(ids(&b.dump_cache()), vec![Id::from_u64(0b1001, BITS)]);
        assert_eq!(b.last_update_time(), Some(t(2)));
    }

    #[test]
    fn uncompetitive_touch_still_updates_touch_time() {
        let mut b = bucket(1, 0);
        b.touch(t(1), &node(0b1000)).unwrap();

        // Live is full and there is no cache, so nothing can change.
        let change = b.touch(t(2), &node(0b1001)).unwrap();
        assert!(change.live.is_empty() && change.cache.is_empty());
        assert_eq!(b.last_touch_time(), Some(t(2)));
        assert_eq!(b.last_update_time(), Some(t(1)));
    }

    #[test]
    fn stale_promotes_the_most_recent_cache_entry() {
        let mut b = bucket(1, 1);
        b.touch(t(1), &node(0b1000)).unwrap();
        b.touch(t(2), &node(0b1001)).unwrap();

        let change = b.stale(&node(0b1000)).unwrap();
        assert_eq!(ids(&change.live.removed), vec![Id::from_u64(0b1000, BITS)]);
        assert_eq!(ids(&change.live.added), vec![Id::from_u64(0b1001, BITS)]);
        assert_eq!(ids(&change.cache.removed), vec![Id::from_u64(0b1001, BITS)]);

        let live = b.dump_live();
        assert_eq!(ids(&live), vec![Id::from_u64(0b1001, BITS)]);
        // The promotion keeps the cache timestamp.
        assert_eq!(live[0].time(), t(2));
        assert!(b.dump_cache().is_empty());
        assert!(!b.is_locked(&Id::from_u64(0b1000, BITS)));
    }

    #[test]
    fn stale_with_empty_cache_locks_the_id() {
        let mut b = bucket(1, 1);
        b.touch(t(1), &node(0b1000)).unwrap();

        b.stale(&node(0b1000)).unwrap();
        assert!(b.dump_live().is_empty());
        assert!(b.is_locked(&Id::from_u64(0b1000, BITS)));

        // The locked id is diverted to the cache despite the free live slot.
        let change = b.touch(t(2), &node(0b1000)).unwrap();
        assert!(change.live.is_empty());
        assert_eq!(ids(&change.cache.added), vec![Id::from_u64(0b1000, BITS)]);
        assert!(b.dump_live().is_empty());

        // Unlock restores normal admission.
        b.unlock(&node(0b1000)).unwrap();
        let change = b.touch(t(3), &node(0b1000)).unwrap();
        assert_eq!(ids(&change.live.added), vec![Id::from_u64(0b1000, BITS)]);
        assert_eq!(ids(&change.cache.removed), vec![Id::from_u64(0b1000, BITS)]);
    }

    #[test]
    fn stale_of_peer_not_in_live_fails() {
        let mut b = bucket(1, 1);
        b.touch(t(1), &node(0b1000)).unwrap();
        b.touch(t(2), &node(0b1001)).unwrap(); // cache only

        let err = b.stale(&node(0b1001)).unwrap_err();
        assert!(matches!(err, RouteError::NotInBucket { .. }));
        let err = b.stale(&node(0b1111)).unwrap_err();
        assert!(matches!(err, RouteError::NotInBucket { .. }));
    }

    #[test]
    fn lock_frees_a_slot_without_promoting_the_cache() {
        let mut b = bucket(2, 2);
        b.touch(t(1), &node(0b1000)).unwrap();
        b.touch(t(2), &node(0b0100)).unwrap();
        b.touch(t(3), &node(0b1110)).unwrap(); // cache

        let change = b.lock(&node(0b1000)).unwrap();
        assert_eq!(ids(&change.live.removed), vec![Id::from_u64(0b1000, BITS)]);
        assert!(change.cache.is_empty());
        assert_eq!(ids(&b.dump_cache()), vec![Id::from_u64(0b1110, BITS)]);

        // A cached peer can claim the freed slot through a fresh touch,
        // and leaves the cache as it does.
        let change = b.touch(t(4), &node(0b1110)).unwrap();
        assert_eq!(ids(&change.live.added), vec![Id::from_u64(0b1110, BITS)]);
        assert_eq!(ids(&change.cache.removed), vec![Id::from_u64(0b1110, BITS)]);
        assert!(b.dump_cache().is_empty());
    }

    #[test]
    fn unlock_of_unlocked_id_fails() {
        let mut b = bucket(2, 2);
        b.touch(t(1), &node(0b1000)).unwrap();
        let err = b.unlock(&node(0b1000)).unwrap_err();
        assert!(matches!(err, RouteError::NotInBucket { .. }));
    }

    #[test]
    fn link_conflict_in_either_half_leaves_the_bucket_unchanged() {
        let mut b = bucket(1, 1);
        b.touch(t(1), &Node::new(Id::from_u64(0b1000, BITS), "a"))
            .unwrap();
        b.touch(t(2), &Node::new(Id::from_u64(0b1001, BITS), "b"))
            .unwrap(); // cache

        let live_before = b.dump_live();
        let cache_before = b.dump_cache();
        let touch_before = b.last_touch_time();

        let err = b
            .touch(t(3), &Node::new(Id::from_u64(0b1000, BITS), "other"))
            .unwrap_err();
        assert!(matches!(err, RouteError::LinkConflict { .. }));
        let err = b
            .touch(t(3), &Node::new(Id::from_u64(0b1001, BITS), "other"))
            .unwrap_err();
        assert!(matches!(err, RouteError::LinkConflict { .. }));

        assert_eq!(b.dump_live(), live_before);
        assert_eq!(b.dump_cache(), cache_before);
        assert_eq!(b.last_touch_time(), touch_before);
    }

    #[test]
    fn split_partitions_live_cache_and_locks_by_the_next_bit() {
        let mut b = bucket(2, 2);
        b.touch(t(1), &node(0b1000)).unwrap();
        b.touch(t(2), &node(0b0100)).unwrap();
        b.touch(t(3), &node(0b1110)).unwrap(); // cache
        b.touch(t(4), &node(0b0111)).unwrap(); // cache
        b.lock(&node(0b1000)).unwrap();
        b.touch(t(5), &node(0b1011)).unwrap(); // takes the freed slot

        let (zero, one) = b.split();
        assert_eq!(zero.prefix().to_string(), "0");
        assert_eq!(one.prefix().to_string(), "1");

        assert_eq!(ids(&zero.dump_live()), vec![Id::from_u64(0b0100, BITS)]);
        assert_eq!(ids(&zero.dump_cache()), vec![Id::from_u64(0b0111, BITS)]);
        assert!(!zero.is_locked(&Id::from_u64(0b1000, BITS)));

        assert_eq!(ids(&one.dump_live()), vec![Id::from_u64(0b1011, BITS)]);
        assert_eq!(ids(&one.dump_cache()), vec![Id::from_u64(0b1110, BITS)]);
        assert!(one.is_locked(&Id::from_u64(0b1000, BITS)));

        // Timestamps survive the move.
        assert_eq!(zero.dump_live()[0].time(), t(2));
        assert_eq!(one.dump_cache()[0].time(), t(3));
    }

    #[test]
    fn split_preserves_every_entry() {
        let mut b = bucket(3, 3);
        for (i, bits) in [0b1000, 0b0100, 0b1100].into_iter().enumerate() {
            b.touch(t(i as u64 + 1), &node(bits)).unwrap();
        }
        let mut before = ids(&b.dump_live());
        before.sort();

        let (zero, one) = b.split();
        let mut after = ids(&zero.dump_live());
        after.extend(ids(&one.dump_live()));
        after.sort();
        assert_eq!(before, after);
    }
}

//! # The Router
//!
//! [`Router`] is the public face of the routing core. It composes a
//! [`KBucketTree`] with a near set of the globally XOR-closest peers
//! observed, and answers the one question Kademlia keeps asking: which of
//! the peers you know are closest to this id?
//!
//! ## Why a Near Set
//!
//! Bucket admission is first-come: once the bucket covering some region
//! fills with long-lived peers, later discoveries in that region bounce to
//! the cache no matter how close they are to the local id. The near set
//! runs the opposite policy, membership by closeness alone, so the overall
//! closest peers are retained even when their bucket had no room for them.
//! `find` merges both sources, deduplicates by id, and orders by XOR
//! distance.
//!
//! The near set is observational: `stale` and `lock` act on the tree only.
//!
//! ## Driving the Router
//!
//! The transport layer calls [`touch`](Router::touch) on every successful
//! interaction with a peer, [`stale`](Router::stale) when a directed probe
//! goes unanswered, and [`find`](Router::find) to seed iterative lookups.
//! Returned change sets say exactly which peers entered and left, so the
//! embedder can open or tear down connections without diffing the table.
//! Time is always supplied by the caller; the router never reads a clock
//! and is fully deterministic.

use std::collections::HashSet;

use tracing::trace;

use crate::changeset::{ActivityChangeSet, RouterChangeSet};
use crate::error::{Result, RouteError};
use crate::id::Id;
use crate::node::{Activity, Node, Timestamp};
use crate::sets::NodeClosestSet;
use crate::tree::KBucketTree;

/// The routing table of one Kademlia node.
#[derive(Clone, Debug)]
pub struct Router {
    base_id: Id,
    tree: KBucketTree,
    near: NodeClosestSet,
}

impl Router {
    /// Create a router for the node with id `base_id`.
    ///
    /// `bucket_cap` is k (live peers per bucket), `cache_cap` is the
    /// replacement cache size per bucket, `near_cap` is the near set size.
    pub fn new(base_id: Id, bucket_cap: usize, cache_cap: usize, near_cap: usize) -> Self {
        Self {
            tree: KBucketTree::new(base_id.clone(), bucket_cap, cache_cap),
            near: NodeClosestSet::new(base_id.clone(), near_cap),
            base_id,
        }
    }

    /// The local id.
    pub fn base_id(&self) -> &Id {
        &self.base_id
    }

    /// The bucket tree, for inspection.
    pub fn tree(&self) -> &KBucketTree {
        &self.tree
    }

    /// The near set's entries, closest to the local id first.
    pub fn near_peers(&self) -> Vec<Activity> {
        self.near.dump()
    }

    /// Record an observation of `node` at `time`.
    ///
    /// The peer is offered to its bucket and to the near set
    /// independently; the change set carries both outcomes. Observing the
    /// local node itself is a no-op.
    pub fn touch(&mut self, time: Timestamp, node: &Node) -> Result<RouterChangeSet> {
        self.validate_len(node.id())?;
        if node.id() == &self.base_id {
            return Ok(RouterChangeSet::empty());
        }
        // The near set's conflicts are checked up front: the tree must not
        // be left touched when the near set refuses the peer.
        self.near.contains(node)?;

        let tree_change = self.tree.touch(time, node)?;
        let near_change = self.near.touch(time, node)?;
        trace!(
            id = %node.id(),
            in_bucket = !tree_change.is_empty(),
            in_near = !near_change.is_empty(),
            "peer touched"
        );
        Ok(RouterChangeSet {
            tree: tree_change,
            near: near_change,
        })
    }

    /// Mark a peer unresponsive in its bucket. The near set is unaffected.
    pub fn stale(&mut self, node: &Node) -> Result<RouterChangeSet> {
        Ok(RouterChangeSet {
            tree: self.tree.stale(node)?,
            near: ActivityChangeSet::empty(),
        })
    }

    /// Lock a live peer's bucket slot. The near set is unaffected.
    pub fn lock(&mut self, node: &Node) -> Result<RouterChangeSet> {
        Ok(RouterChangeSet {
            tree: self.tree.lock(node)?,
            near: ActivityChangeSet::empty(),
        })
    }

    /// Clear a lock placed by [`lock`](Self::lock) or a cache-less stale.
    pub fn unlock(&mut self, node: &Node) -> Result<RouterChangeSet> {
        Ok(RouterChangeSet {
            tree: self.tree.unlock(node)?,
            near: ActivityChangeSet::empty(),
        })
    }

    /// Up to `max` known peers, closest to `id` first.
    ///
    /// Merges the bucket tree with the near set, deduplicates by id, and
    /// orders by XOR distance from `id` (ties fall back to the lower id).
    /// With `include_stale`, replacement-cache entries are candidates too.
    pub fn find(&self, id: &Id, max: usize, include_stale: bool) -> Result<Vec<Node>> {
        let mut candidates = self.tree.find(id, max, include_stale)?;
        candidates.extend(self.near.dump());
        candidates.sort_by(|a, b| {
            a.node()
                .id()
                .distance_cmp(b.node().id(), id)
                .then_with(|| a.node().id().cmp(b.node().id()))
        });

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entry in candidates {
            if out.len() == max {
                break;
            }
            if seen.insert(entry.node().id().clone()) {
                out.push(entry.into_node());
            }
        }
        Ok(out)
    }

    fn validate_len(&self, id: &Id) -> Result<()> {
        if id.bit_len() != self.base_id.bit_len() {
            return Err(RouteError::LengthMismatch {
                expected: self.base_id.bit_len(),
                actual: id.bit_len(),
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

    #[test]
    fn touching_the_local_id_is_a_noop() {
        let mut router = Router::new(base(), 2, 2, 2);
        let change = router.touch(t(1), &Node::new(base(), "self")).unwrap();
        assert!(change.is_empty());
        assert!(router.find(&Id::from_u64(0b1000, BITS), 10, false).unwrap().is_empty());
    }

    #[test]
    fn touch_reports_bucket_and_near_admissions() {
        let mut router = Router::new(base(), 2, 2, 2);
        let change = router.touch(t(1), &node(0b1000)).unwrap();
        assert_eq!(change.tree.live.added.len(), 1);
        assert_eq!(change.near.added.len(), 1);
    }

    #[test]
    fn link_conflict_leaves_both_halves_unchanged() {
        let mut router = Router::new(base(), 2, 2, 2);
        router
            .touch(t(1), &Node::new(Id::from_u64(0b1000, BITS), "a"))
            .unwrap();

        let err = router
            .touch(t(2), &Node::new(Id::from_u64(0b1000, BITS), "b"))
            .unwrap_err();
        assert!(matches!(err, RouteError::LinkConflict { .. }));

        let tree_dump = router.tree().dump();
        assert_eq!(tree_dump.len(), 1);
        assert_eq!(tree_dump[0].node().link(), "a");
        assert_eq!(tree_dump[0].time(), t(1));
        let near = router.near_peers();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].node().link(), "a");
    }

    #[test]
    fn find_deduplicates_peers_known_to_both_halves() {
        let mut router = Router::new(base(), 2, 2, 2);
        router.touch(t(1), &node(0b0001)).unwrap();
        router.touch(t(2), &node(0b0010)).unwrap();

        let found = router.find(&Id::from_u64(0b0001, BITS), 10, false).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id(), &Id::from_u64(0b0001, BITS));
        assert_eq!(found[1].id(), &Id::from_u64(0b0010, BITS));
    }

    #[test]
    fn find_with_max_zero_returns_nothing() {
        let mut router = Router::new(base(), 2, 2, 2);
        router.touch(t(1), &node(0b0001)).unwrap();
        assert!(router.find(&Id::from_u64(0b0001, BITS), 0, false).unwrap().is_empty());
    }

    #[test]
    fn stale_and_lock_do_not_disturb_the_near_set() {
        let mut router = Router::new(base(), 1, 1, 4);
        router.touch(t(1), &node(0b1000)).unwrap();
        router.touch(t(2), &node(0b1001)).unwrap(); // cache of the 1xxx bucket

        router.stale(&node(0b1000)).unwrap();
        let near_ids: Vec<_> = router
            .near_peers()
            .iter()
            .map(|e| e.node().id().clone())
            .collect();
        assert!(near_ids.contains(&Id::from_u64(0b1000, BITS)));
        assert!(near_ids.contains(&Id::from_u64(0b1001, BITS)));
    }

    #[test]
    fn stale_of_unknown_peer_is_refused() {
        let mut router = Router::new(base(), 2, 2, 2);
        let err = router.stale(&node(0b1000)).unwrap_err();
        assert!(matches!(err, RouteError::NotInBucket { .. }));
    }
}

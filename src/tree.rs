//! # The Bucket Tree
//!
//! A [`KBucketTree`] is a binary prefix tree whose leaves are
//! [`KBucket`]s. Together the leaf prefixes partition the id space:
//! descending by the bits of a peer's id always ends at exactly one
//! bucket.
//!
//! ## Splitting Only Along the Local Path
//!
//! The tree starts as a single bucket with the empty prefix. When a touch
//! would add a new peer to a full bucket, the bucket is split into its two
//! children and the touch retried, but only if the bucket's prefix is a
//! prefix of the local id. Buckets on the other side of any branch never
//! split; their overflow goes to the replacement cache. This is the
//! standard Kademlia refinement: the table stays O(L·k) while resolution
//! increases toward the local id, where this node is the authority.
//!
//! Because splits happen only on the local path, the tree is deep on one
//! side: every internal node has one child that keeps refining toward the
//! local id and one that is (the root of) the far side.
//!
//! ## Lookup Order
//!
//! [`find`](KBucketTree::find) walks leaves in XOR-closeness order of
//! their prefixes to the target: at each internal node the child matching
//! the target's next bit is visited first. Entries from an earlier leaf
//! are always closer to the target than entries from a later one, so the
//! walk can stop as soon as enough candidates are gathered.
//!
//! Tree nodes carry no parent pointers; descent passes the depth down.

use tracing::debug;

use crate::changeset::KBucketChangeSet;
use crate::error::{Result, RouteError};
use crate::id::{BitString, Id};
use crate::kbucket::KBucket;
use crate::node::{Activity, Node, Timestamp};

/// One position in the bucket tree: either a refined branch or a bucket.
#[derive(Clone, Debug)]
pub(crate) enum RouteTreeNode {
    Internal {
        zero: Box<RouteTreeNode>,
        one: Box<RouteTreeNode>,
    },
    Leaf {
        bucket: KBucket,
    },
}

/// The routing tree: all buckets of the table, addressed by id prefix.
///
/// Capacities live in the buckets themselves; children inherit them from
/// the bucket they were split out of.
#[derive(Clone, Debug)]
pub struct KBucketTree {
    base_id: Id,
    root: RouteTreeNode,
}

impl KBucketTree {
    /// Create a tree with a single all-covering bucket.
    pub fn new(base_id: Id, bucket_cap: usize, cache_cap: usize) -> Self {
        let root = RouteTreeNode::Leaf {
            bucket: KBucket::new(base_id.clone(), BitString::empty(), bucket_cap, cache_cap),
        };
        Self { base_id, root }
    }

    /// The local id the tree is organized around.
    pub fn base_id(&self) -> &Id {
        &self.base_id
    }

    /// Record an observation of `node` at `time` in its bucket, splitting
    /// full buckets along the local path as needed.
    pub fn touch(&mut self, time: Timestamp, node: &Node) -> Result<KBucketChangeSet> {
        self.validate_len(node.id())?;
        Self::touch_node(&mut self.root, 0, &self.base_id, time, node)
    }

    /// Mark a peer unresponsive in its bucket.
    pub fn stale(&mut self, node: &Node) -> Result<KBucketChangeSet> {
        self.validate_len(node.id())?;
        Self::leaf_for_mut(&mut self.root, 0, node.id()).stale(node)
    }

    /// Lock a live peer's slot in its bucket.
    pub fn lock(&mut self, node: &Node) -> Result<KBucketChangeSet> {
        self.validate_len(node.id())?;
        Self::leaf_for_mut(&mut self.root, 0, node.id()).lock(node)
    }

    /// Clear a lock in the peer's bucket.
    pub fn unlock(&mut self, node: &Node) -> Result<KBucketChangeSet> {
        self.validate_len(node.id())?;
        Self::leaf_for_mut(&mut self.root, 0, node.id()).unlock(node)
    }

    /// Up to `max` tracked peers, closest to `id` first.
    ///
    /// Live entries only, unless `include_stale` also pulls in the
    /// replacement caches.
    pub fn find(&self, id: &Id, max: usize, include_stale: bool) -> Result<Vec<Activity>> {
        self.validate_len(id)?;
        let mut out = Vec::new();
        if max == 0 {
            return Ok(out);
        }
        Self::collect_closest(&self.root, 0, id, max, include_stale, &mut out);
        out.sort_by(|a, b| {
            a.node()
                .id()
                .distance_cmp(b.node().id(), id)
                .then_with(|| a.node().id().cmp(b.node().id()))
        });
        out.truncate(max);
        Ok(out)
    }

    /// The bucket that covers `id`.
    pub fn bucket_for(&self, id: &Id) -> Result<&KBucket> {
        self.validate_len(id)?;
        Ok(Self::leaf_for(&self.root, 0, id))
    }

    /// All buckets, in prefix order (zero branch first).
    pub fn leaves(&self) -> Vec<&KBucket> {
        let mut out = Vec::new();
        Self::collect_leaves(&self.root, &mut out);
        out
    }

    /// All live entries, in leaf order.
    pub fn dump(&self) -> Vec<Activity> {
        self.leaves()
            .into_iter()
            .flat_map(|bucket| bucket.dump_live())
            .collect()
    }

    /// All cache entries, in leaf order.
    pub fn dump_cache(&self) -> Vec<Activity> {
        self.leaves()
            .into_iter()
            .flat_map(|bucket| bucket.dump_cache())
            .collect()
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

    fn touch_node(
        tree: &mut RouteTreeNode,
        depth: usize,
        base_id: &Id,
        time: Timestamp,
        node: &Node,
    ) -> Result<KBucketChangeSet> {
        match tree {
            RouteTreeNode::Internal { zero, one } => {
                let child = if node.id().bit(depth) { one } else { zero };
                return Self::touch_node(child, depth + 1, base_id, time, node);
            }
            RouteTreeNode::Leaf { bucket } => {
                bucket.ensure_no_conflict(node)?;
                if !Self::splittable(bucket, depth, base_id, node) {
                    return bucket.touch(time, node);
                }
            }
        }

        // The leaf is full and sits on the local id's path: refine it and
        // retry at the same depth, now through the new internal node.
        Self::split_leaf(tree, base_id);
        Self::touch_node(tree, depth, base_id, time, node)
    }

    /// Whether touching `node` calls for splitting this leaf first: the
    /// live set is full, the peer is a genuine newcomer to it, and the
    /// leaf covers the local id so splitting is legal.
    fn splittable(bucket: &KBucket, depth: usize, base_id: &Id, node: &Node) -> bool {
        depth < base_id.bit_len()
            && bucket.prefix().is_prefix_of(base_id)
            && bucket.is_live_full()
            && !bucket.contains_live(node.id())
            && !bucket.is_locked(node.id())
    }

    fn split_leaf(tree: &mut RouteTreeNode, base_id: &Id) {
        // Swap in a throwaway leaf to take the bucket by value.
        let detached = std::mem::replace(
            tree,
            RouteTreeNode::Leaf {
                bucket: KBucket::new(base_id.clone(), BitString::empty(), 0, 0),
            },
        );
        let RouteTreeNode::Leaf { bucket } = detached else {
            unreachable!("only leaves are split");
        };
        debug!(prefix = %bucket.prefix(), "splitting bucket along the local-id path");
        let (zero, one) = bucket.split();
        *tree = RouteTreeNode::Internal {
            zero: Box::new(RouteTreeNode::Leaf { bucket: zero }),
            one: Box::new(RouteTreeNode::Leaf { bucket: one }),
        };
    }

    fn leaf_for<'a>(tree: &'a RouteTreeNode, depth: usize, id: &Id) -> &'a KBucket {
        match tree {
            RouteTreeNode::Leaf { bucket } => bucket,
            RouteTreeNode::Internal { zero, one } => {
                Self::leaf_for(if id.bit(depth) { one } else { zero }, depth + 1, id)
            }
        }
    }

    fn leaf_for_mut<'a>(tree: &'a mut RouteTreeNode, depth: usize, id: &Id) -> &'a mut KBucket {
        match tree {
            RouteTreeNode::Leaf { bucket } => bucket,
            RouteTreeNode::Internal { zero, one } => {
                Self::leaf_for_mut(if id.bit(depth) { one } else { zero }, depth + 1, id)
            }
        }
    }

    fn collect_closest(
        tree: &RouteTreeNode,
        depth: usize,
        id: &Id,
        max: usize,
        include_stale: bool,
        out: &mut Vec<Activity>,
    ) {
        if out.len() >= max {
            return;
        }
        match tree {
            RouteTreeNode::Leaf { bucket } => {
                out.extend(bucket.dump_live());
                if include_stale {
                    out.extend(bucket.dump_cache());
                }
            }
            RouteTreeNode::Internal { zero, one } => {
                let (near, far) = if id.bit(depth) {
                    (one, zero)
                } else {
                    (zero, one)
                };
                Self::collect_closest(near, depth + 1, id, max, include_stale, out);
                Self::collect_closest(far, depth + 1, id, max, include_stale, out);
            }
        }
    }

    fn collect_leaves<'a>(tree: &'a RouteTreeNode, out: &mut Vec<&'a KBucket>) {
        match tree {
            RouteTreeNode::Leaf { bucket } => out.push(bucket),
            RouteTreeNode::Internal { zero, one } => {
                Self::collect_leaves(zero, out);
                Self::collect_leaves(one, out);
            }
        }
    }
}

//! Peers and timestamped peer observations.
//!
//! A [`Node`] binds an [`Id`] to an opaque transport link (typically an
//! address string). The pair is the peer's identity within the table: the
//! same id reappearing under a different link is a link conflict and is
//! refused everywhere.
//!
//! An [`Activity`] is one observation of a peer at a caller-supplied
//! [`Timestamp`]. The core never reads a clock; whoever drives the router
//! decides what time it is, which keeps every operation deterministic.

use serde::{Deserialize, Serialize};

use crate::id::Id;

/// A caller-supplied point in time, in nanoseconds.
///
/// Only ordering matters; the origin is whatever the embedder uses. Equal
/// timestamps are allowed and keep existing entries ahead of newcomers.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Wrap a nanosecond count.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// The wrapped nanosecond count.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

/// A peer: an id plus the opaque link it was seen on.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Node {
    id: Id,
    link: String,
}

impl Node {
    /// Create a peer record.
    ///
    /// # Panics
    /// Panics if `link` is empty; a peer without a link is unreachable and
    /// has no identity within the table.
    pub fn new(id: Id, link: impl Into<String>) -> Self {
        let link = link.into();
        assert!(!link.is_empty(), "a node's link must be non-empty");
        Self { id, link }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn link(&self) -> &str {
        &self.link
    }
}

/// One observation of a peer at a point in time.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Activity {
    node: Node,
    time: Timestamp,
}

impl Activity {
    pub fn new(node: Node, time: Timestamp) -> Self {
        Self { node, time }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Discard the timestamp and keep the peer.
    pub fn into_node(self) -> Node {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_order_by_value() {
        assert!(Timestamp::from_nanos(1) < Timestamp::from_nanos(2));
        assert_eq!(Timestamp::from(7u64).as_nanos(), 7);
    }

    #[test]
    #[should_panic(expected = "link must be non-empty")]
    fn empty_link_is_refused() {
        let _ = Node::new(Id::from_u64(0b0001, 4), "");
    }

    #[test]
    fn activity_carries_node_and_time() {
        let node = Node::new(Id::from_u64(0b0001, 4), "peer-1");
        let activity = Activity::new(node.clone(), Timestamp::from_nanos(5));
        assert_eq!(activity.node(), &node);
        assert_eq!(activity.time(), Timestamp::from_nanos(5));
        assert_eq!(activity.into_node(), node);
    }
}

//! # Kadmium - Kademlia Routing Core
//!
//! Kadmium is the in-memory routing table of a Kademlia node: the data
//! structure a peer uses to remember other peers, keep that memory
//! bounded, and answer "give me the peers you know that are closest to
//! this id".
//!
//! - **K-buckets**: bounded per-prefix peer lists with the classic
//!   long-lived-peers-stay admission policy
//! - **Replacement caches**: recently seen peers standing by to replace
//!   live entries that go stale
//! - **Prefix tree**: buckets split along the local id's path only, keeping
//!   the table O(L·k) while resolution increases near the local id
//! - **Near set**: the globally XOR-closest peers observed, retained even
//!   when their bucket is full
//!
//! ## Determinism
//!
//! The core is single-threaded, synchronous, and performs no I/O. Time is
//! supplied by the caller on every `touch`; the structure never reads a
//! clock. Two routers fed the same operations are identical. Concurrency
//! is the embedder's business: wrap the router in whatever exclusion the
//! surrounding process uses.
//!
//! Every mutation is all-or-nothing and returns a change set describing
//! the admissions, evictions, and refreshes it performed, so the transport
//! layer can mirror the table's state without diffing it.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `id` | `Id` and `BitString`: identifiers and XOR-metric ordering |
//! | `node` | `Node`, `Activity`, `Timestamp`: peers and observations |
//! | `changeset` | Diff records returned by every mutation |
//! | `error` | `RouteError` and the crate `Result` alias |
//! | `sets` | The three bounded peer sets backing buckets and the near set |
//! | `kbucket` | `KBucket`: live set + replacement cache + lock machinery |
//! | `tree` | `KBucketTree`: the prefix tree of buckets |
//! | `router` | `Router`: the public touch/stale/lock/unlock/find API |
//!
//! ## Example
//!
//! ```
//! use kadmium::{Id, Node, Router, Timestamp};
//!
//! let local = Id::from_u64(0b0000, 4);
//! let mut router = Router::new(local, 2, 2, 2);
//!
//! let peer = Node::new(Id::from_u64(0b1010, 4), "10.0.0.7:9001");
//! let change = router.touch(Timestamp::from_nanos(1), &peer).unwrap();
//! assert!(!change.is_empty());
//!
//! let closest = router.find(&Id::from_u64(0b1000, 4), 20, false).unwrap();
//! assert_eq!(closest[0], peer);
//! ```

mod changeset;
mod error;
mod id;
mod kbucket;
mod node;
mod router;
mod sets;
mod tree;

pub use changeset::{ActivityChangeSet, KBucketChangeSet, RouterChangeSet};
pub use error::{Result, RouteError};
pub use id::{BitString, Id};
pub use kbucket::KBucket;
pub use node::{Activity, Node, Timestamp};
pub use router::Router;
pub use sets::{NodeClosestSet, NodeLeastRecentSet, NodeMostRecentSet};
pub use tree::KBucketTree;

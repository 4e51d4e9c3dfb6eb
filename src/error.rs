//! Error types for routing table operations.
//!
//! Every failing operation leaves the structure it was invoked on unchanged;
//! callers can retry or discard at will. `NO_CHANGE` outcomes (a full bucket
//! rejecting an uncompetitive newcomer, removing an absent peer) are not
//! errors and are reported as empty change sets instead.

use crate::id::Id;
use crate::node::Node;

/// Result alias for routing operations.
pub type Result<T> = std::result::Result<T, RouteError>;

/// Reasons a routing operation may be refused.
///
/// `LinkConflict` is the only variant expected during normal operation: it
/// fires when a peer id reappears bound to a different transport link, which
/// would otherwise allow silent identity hijacking. The remaining variants
/// indicate caller mistakes (wrong id width, self-insertion, stale/lock
/// targets that are not live).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The referenced id is already tracked under a different link.
    LinkConflict {
        /// The entry already held for that id.
        existing: Node,
    },
    /// An id's bit length disagrees with the table's id space.
    LengthMismatch { expected: usize, actual: usize },
    /// The local node itself was offered for admission.
    SelfEntry { id: Id },
    /// `stale`/`lock` named a node that is not in the live set of its
    /// bucket, or `unlock` named an id that is not locked.
    NotInBucket { node: Node },
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LinkConflict { existing } => write!(
                f,
                "id {} is already tracked under link {:?}",
                existing.id(),
                existing.link()
            ),
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "id bit length {actual} does not match the table's id space of {expected} bits"
            ),
            Self::SelfEntry { id } => {
                write!(f, "the local id {id} cannot be entered into its own table")
            }
            Self::NotInBucket { node } => write!(
                f,
                "node {} is not tracked by the live set of its bucket",
                node.id()
            ),
        }
    }
}

impl std::error::Error for RouteError {}

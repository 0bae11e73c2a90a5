//! Node identity.
//!
//! A [`Node`] is either a registered fleet member with a non-zero
//! `node_id`, or the anonymous endpoint (`node_id == 0`).

use serde::{Deserialize, Serialize};

/// Integer node identifier. `0` is reserved for the anonymous endpoint.
pub type NodeId = i64;

/// The reserved identifier of the anonymous endpoint.
pub const ANONYMOUS_NODE_ID: NodeId = 0;

/// A producer or consumer endpoint of a task.
///
/// The invariant `anonymous == (node_id == 0)` is not enforced by the
/// type: messages arrive from the wire as-is and are checked by
/// [`validate_task_ins`](crate::validation::validate_task_ins) and
/// [`validate_task_res`](crate::validation::validate_task_res) before
/// storage.
///
/// # Examples
///
/// ```
/// use fleetbroker_state::Node;
///
/// let node = Node::new(7);
/// assert!(!node.anonymous);
/// assert!(node.is_consistent());
///
/// let anon = Node::anonymous();
/// assert_eq!(anon.node_id, 0);
/// assert!(anon.is_consistent());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier, `0` when anonymous.
    pub node_id: NodeId,
    /// Whether this endpoint has no durable identity.
    #[serde(default)]
    pub anonymous: bool,
}

impl Node {
    /// Creates a non-anonymous node.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            anonymous: false,
        }
    }

    /// The anonymous endpoint.
    pub fn anonymous() -> Self {
        Self {
            node_id: ANONYMOUS_NODE_ID,
            anonymous: true,
        }
    }

    /// Returns `true` if the `anonymous` flag agrees with the `node_id`.
    pub fn is_consistent(&self) -> bool {
        self.anonymous == (self.node_id == ANONYMOUS_NODE_ID)
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_with_id_is_inconsistent() {
        let node = Node {
            node_id: 3,
            anonymous: true,
        };
        assert!(!node.is_consistent());
    }

    #[test]
    fn named_with_zero_id_is_inconsistent() {
        let node = Node {
            node_id: 0,
            anonymous: false,
        };
        assert!(!node.is_consistent());
    }

    #[test]
    fn default_is_anonymous() {
        assert_eq!(Node::default(), Node::anonymous());
    }

    #[test]
    fn deserializes_without_anonymous_flag() {
        let node: Node = serde_json::from_str(r#"{"node_id": 5}"#).unwrap();
        assert_eq!(node, Node::new(5));
    }
}

//! Messages of the node-facing Fleet API.

use std::collections::BTreeMap;

use fleetbroker_state::{Node, TaskIns, TaskRes};
use serde::{Deserialize, Serialize};

/// Tells a node when to come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconnect {
    /// Seconds the node should wait before reconnecting.
    pub reconnect: u64,
}

/// Asks the broker for a fresh node identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNodeRequest {}

/// The identity assigned to the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNodeResponse {
    /// The new node.
    pub node: Node,
}

/// Removes a node from the live node set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNodeRequest {
    /// The node leaving the fleet.
    pub node: Node,
}

/// Empty acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNodeResponse {}

/// A node asking for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullTaskInsRequest {
    /// The node asking.
    pub node: Node,
    /// Reserved for pulling specific instructions; currently unused.
    #[serde(default)]
    pub task_ids: Vec<String>,
}

/// Instructions handed out to the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullTaskInsResponse {
    /// Reconnect hint.
    #[serde(default)]
    pub reconnect: Option<Reconnect>,
    /// At most one instruction.
    #[serde(default)]
    pub task_ins_list: Vec<TaskIns>,
}

/// A node delivering results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushTaskResRequest {
    /// The results.
    #[serde(default)]
    pub task_res_list: Vec<TaskRes>,
}

/// Per-result outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTaskResResponse {
    /// Reconnect hint.
    #[serde(default)]
    pub reconnect: Option<Reconnect>,
    /// Assigned result id to status code (0 = accepted).
    #[serde(default)]
    pub results: BTreeMap<String, u32>,
}

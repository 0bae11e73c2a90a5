//! Messages of the driver-facing Driver API.

use fleetbroker_state::{Node, RunId, TaskIns, TaskRes};
use serde::{Deserialize, Serialize};

/// Starts a new run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRunRequest {}

/// The id of the new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRunResponse {
    /// The run id.
    pub run_id: RunId,
}

/// Lists the nodes available to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetNodesRequest {
    /// The run asking.
    pub run_id: RunId,
}

/// The registered nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetNodesResponse {
    /// One entry per registered node.
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Schedules instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushTaskInsRequest {
    /// The instructions, in order.
    #[serde(default)]
    pub task_ins_list: Vec<TaskIns>,
}

/// Ids assigned to pushed instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTaskInsResponse {
    /// Position-aligned with the request; an empty string marks a rejected
    /// instruction.
    #[serde(default)]
    pub task_ids: Vec<String>,
}

/// Collects results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullTaskResRequest {
    /// The caller (the driver is anonymous).
    pub node: Node,
    /// Instruction ids whose results are wanted.
    #[serde(default)]
    pub task_ids: Vec<String>,
}

/// The collected results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullTaskResResponse {
    /// Results, oldest first.
    #[serde(default)]
    pub task_res_list: Vec<TaskRes>,
}

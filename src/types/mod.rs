//! RPC message types.
//!
//! The task and node model lives in `fleetbroker-state` and is re-exported
//! here so callers only need one import path.

pub mod driver;
pub mod fleet;
pub mod rpc;

pub use driver::{
    CreateRunRequest, CreateRunResponse, GetNodesRequest, GetNodesResponse, PullTaskResRequest,
    PullTaskResResponse, PushTaskInsRequest, PushTaskInsResponse,
};
pub use fleet::{
    CreateNodeRequest, CreateNodeResponse, DeleteNodeRequest, DeleteNodeResponse,
    PullTaskInsRequest, PullTaskInsResponse, PushTaskResRequest, PushTaskResResponse, Reconnect,
};
pub use fleetbroker_state::{Node, NodeId, RunId, Task, TaskId, TaskIns, TaskRes};
pub use rpc::{
    Metadata, Request, Response, RpcKind, RpcRequest, RpcResponse, Service, AUTH_TOKEN_HEADER,
    PUBLIC_KEY_HEADER,
};

//! Node-facing API.

use std::sync::Arc;

use async_trait::async_trait;
use fleetbroker_state::State;
use tracing::{debug, info, warn};

use super::service::{unimplemented, UnaryService};
use crate::error::Status;
use crate::types::{
    CreateNodeRequest, CreateNodeResponse, DeleteNodeRequest, DeleteNodeResponse, Node,
    PullTaskInsRequest, PullTaskInsResponse, PushTaskResRequest, PushTaskResResponse, Reconnect,
    Request, Response, RpcRequest, RpcResponse, Service,
};

/// Seconds a node is asked to wait before its next call after pushing
/// results.
pub const RECONNECT_SECS: u64 = 5;

/// Serves `CreateNode`, `DeleteNode`, `PullTaskIns` and `PushTaskRes`.
#[derive(Clone)]
pub struct FleetServicer {
    state: Arc<dyn State>,
}

impl FleetServicer {
    /// Creates a servicer over `state`.
    pub fn new(state: Arc<dyn State>) -> Self {
        Self { state }
    }

    /// Registers a fresh node.
    pub async fn create_node(
        &self,
        _request: CreateNodeRequest,
    ) -> Result<CreateNodeResponse, Status> {
        let node_id = self.state.create_node().await?;
        info!(node_id, "Created node");
        Ok(CreateNodeResponse {
            node: Node::new(node_id),
        })
    }

    /// Removes a node from the live set.
    pub async fn delete_node(
        &self,
        request: DeleteNodeRequest,
    ) -> Result<DeleteNodeResponse, Status> {
        let node = request.node;
        if node.anonymous || node.node_id == 0 {
            return Err(Status::invalid_argument("anonymous nodes cannot be deleted"));
        }
        self.state.unregister_node(node.node_id).await?;
        info!(node_id = node.node_id, "Deleted node");
        Ok(DeleteNodeResponse {})
    }

    /// Hands the calling node at most one undelivered instruction.
    pub async fn pull_task_ins(
        &self,
        request: PullTaskInsRequest,
    ) -> Result<PullTaskInsResponse, Status> {
        let node = request.node;
        let node_id = (!node.anonymous).then_some(node.node_id);
        let task_ins_list = self.state.get_task_ins(node_id, Some(1)).await?;
        debug!(?node_id, count = task_ins_list.len(), "Pulled instructions");
        Ok(PullTaskInsResponse {
            reconnect: None,
            task_ins_list,
        })
    }

    /// Stores the results a node pushes.
    ///
    /// Accepted results appear in `results` keyed by their new id with
    /// status `0`; rejected ones are logged and left out.
    pub async fn push_task_res(
        &self,
        request: PushTaskResRequest,
    ) -> Result<PushTaskResResponse, Status> {
        let mut response = PushTaskResResponse {
            reconnect: Some(Reconnect {
                reconnect: RECONNECT_SECS,
            }),
            ..Default::default()
        };
        for task_res in request.task_res_list {
            let answered = task_res.answered_task_id();
            match self.state.store_task_res(task_res).await {
                Some(task_id) => {
                    response.results.insert(task_id.to_string(), 0);
                },
                None => warn!(?answered, "Rejected pushed result"),
            }
        }
        Ok(response)
    }
}

impl std::fmt::Debug for FleetServicer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetServicer").finish_non_exhaustive()
    }
}

#[async_trait]
impl UnaryService for FleetServicer {
    async fn call(&self, request: Request<RpcRequest>) -> Result<Response<RpcResponse>, Status> {
        let response = match request.into_inner() {
            RpcRequest::CreateNode(req) => self.create_node(req).await?.into(),
            RpcRequest::DeleteNode(req) => self.delete_node(req).await?.into(),
            RpcRequest::PullTaskIns(req) => self.pull_task_ins(req).await?.into(),
            RpcRequest::PushTaskRes(req) => self.push_task_res(req).await?.into(),
            other => return Err(unimplemented(other.kind(), Service::Fleet)),
        };
        Ok(Response::new(response))
    }
}

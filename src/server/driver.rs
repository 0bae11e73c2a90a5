//! Driver-facing API.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use fleetbroker_state::{validate_task_ins, State, TaskId};
use tracing::{debug, info, warn};

use super::service::{unimplemented, UnaryService};
use crate::error::Status;
use crate::types::{
    CreateRunRequest, CreateRunResponse, GetNodesRequest, GetNodesResponse, Node,
    PullTaskResRequest, PullTaskResResponse, PushTaskInsRequest, PushTaskInsResponse, Request,
    Response, RpcRequest, RpcResponse, Service,
};

/// Serves `CreateRun`, `GetNodes`, `PushTaskIns` and `PullTaskRes`.
#[derive(Clone)]
pub struct DriverServicer {
    state: Arc<dyn State>,
}

impl DriverServicer {
    /// Creates a servicer over `state`.
    pub fn new(state: Arc<dyn State>) -> Self {
        Self { state }
    }

    /// Starts a new run.
    pub async fn create_run(&self, _request: CreateRunRequest) -> Result<CreateRunResponse, Status> {
        let run_id = self.state.create_run().await?;
        info!(run_id, "Created run");
        Ok(CreateRunResponse { run_id })
    }

    /// Lists the registered nodes, sorted by id.
    pub async fn get_nodes(&self, request: GetNodesRequest) -> Result<GetNodesResponse, Status> {
        if !self.state.has_run(request.run_id).await? {
            return Err(Status::invalid_argument(format!(
                "unknown run {}",
                request.run_id
            )));
        }
        let mut node_ids: Vec<_> = self.state.get_nodes().await?.into_iter().collect();
        node_ids.sort_unstable();
        Ok(GetNodesResponse {
            nodes: node_ids.into_iter().map(Node::new).collect(),
        })
    }

    /// Stores instructions.
    ///
    /// The reply is aligned with the request: position `i` carries the id
    /// assigned to instruction `i`, or an empty string if it was rejected.
    pub async fn push_task_ins(
        &self,
        request: PushTaskInsRequest,
    ) -> Result<PushTaskInsResponse, Status> {
        let mut task_ids = Vec::with_capacity(request.task_ins_list.len());
        for task_ins in request.task_ins_list {
            if let Err(err) = validate_task_ins(&task_ins) {
                warn!(error = %err, "Rejected pushed instruction");
                task_ids.push(String::new());
                continue;
            }
            let task_id = self.state.store_task_ins(task_ins).await;
            task_ids.push(task_id.map(|id| id.to_string()).unwrap_or_default());
        }
        debug!(count = task_ids.len(), "Pushed instructions");
        Ok(PushTaskInsResponse { task_ids })
    }

    /// Returns the results for the requested instructions and consumes
    /// the delivered pairs.
    pub async fn pull_task_res(
        &self,
        request: PullTaskResRequest,
    ) -> Result<PullTaskResResponse, Status> {
        let task_ids = parse_task_ids(&request.task_ids)?;
        let task_res_list = self.state.get_task_res(&task_ids, None).await?;
        let response = PullTaskResResponse { task_res_list };
        self.state.delete_tasks(&task_ids).await?;
        debug!(
            requested = task_ids.len(),
            returned = response.task_res_list.len(),
            "Pulled results"
        );
        Ok(response)
    }
}

fn parse_task_ids(raw: &[String]) -> Result<HashSet<TaskId>, Status> {
    raw.iter()
        .map(|id| {
            TaskId::parse_str(id)
                .map_err(|_| Status::invalid_argument(format!("malformed task id {id:?}")))
        })
        .collect()
}

impl std::fmt::Debug for DriverServicer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverServicer").finish_non_exhaustive()
    }
}

#[async_trait]
impl UnaryService for DriverServicer {
    async fn call(&self, request: Request<RpcRequest>) -> Result<Response<RpcResponse>, Status> {
        let response = match request.into_inner() {
            RpcRequest::CreateRun(req) => self.create_run(req).await?.into(),
            RpcRequest::GetNodes(req) => self.get_nodes(req).await?.into(),
            RpcRequest::PushTaskIns(req) => self.push_task_ins(req).await?.into(),
            RpcRequest::PullTaskRes(req) => self.pull_task_res(req).await?.into(),
            other => return Err(unimplemented(other.kind(), Service::Driver)),
        };
        Ok(Response::new(response))
    }
}

//! The driver client.
//!
//! [`Driver`] opens its connection on first use and creates a run for
//! itself at the same time. The connection and run id are reused for all
//! later calls until [`Driver::disconnect`] or drop. Only `disconnect`
//! runs [`DriverConnection::close`]; drop just releases the connection.

use std::collections::HashSet;

use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use super::connection::{DriverConnection, DriverConnector};
use crate::config::{DriverConfig, RetryConfig};
use crate::error::{Error, Result, Status};
use crate::shared::retry::RetryInvoker;
use crate::types::{
    CreateRunRequest, CreateRunResponse, GetNodesRequest, GetNodesResponse, Node,
    PullTaskResRequest, PullTaskResResponse, PushTaskInsRequest, PushTaskInsResponse, Request,
    RpcRequest, RpcResponse, RunId, TaskId, TaskIns, TaskRes,
};

/// Retries with exponential backoff for up to 10 attempts and 300
/// seconds, giving up on anything but [`Code::Unavailable`](crate::error::Code::Unavailable).
pub fn default_invoker() -> RetryInvoker<Error> {
    RetryConfig::default().invoker()
}

struct Session<T> {
    connection: T,
    run_id: RunId,
}

/// Client of the driver-facing API.
pub struct Driver<C: DriverConnector> {
    connector: C,
    invoker: RetryInvoker<Error>,
    session: RwLock<Option<Session<C::Connection>>>,
}

impl<C: DriverConnector> Driver<C> {
    /// Creates a driver using [`default_invoker`]. Nothing is connected
    /// until the first call.
    pub fn new(connector: C) -> Self {
        Self::with_invoker(connector, default_invoker())
    }

    /// Creates a driver retrying with the policy in `config`.
    pub fn from_config(connector: C, config: &DriverConfig) -> Self {
        Self::with_invoker(connector, config.retry.invoker())
    }

    /// Creates a driver retrying with `invoker`.
    pub fn with_invoker(connector: C, invoker: RetryInvoker<Error>) -> Self {
        Self {
            connector,
            invoker,
            session: RwLock::new(None),
        }
    }

    /// Whether a connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// The run this driver works in, connecting first if needed.
    pub async fn run_id(&self) -> Result<RunId> {
        Ok(self.ensure_connected_with_run().await?.run_id)
    }

    /// Opens the connection and creates a run, once.
    ///
    /// The returned guard keeps [`disconnect`](Self::disconnect) waiting
    /// until the caller is done with the session.
    async fn ensure_connected_with_run(&self) -> Result<RwLockReadGuard<'_, Session<C::Connection>>> {
        // Fast path: already connected
        if let Ok(session) = RwLockReadGuard::try_map(self.session.read().await, Option::as_ref) {
            return Ok(session);
        }

        // Slow path: acquire write lock and re-check
        let mut guard = self.session.write().await;
        if guard.is_none() {
            let connection = self.connector.connect().await?;
            let response: CreateRunResponse =
                self.invoke(&connection, CreateRunRequest {}).await?;
            info!(run_id = response.run_id, "Driver connected");
            *guard = Some(Session {
                connection,
                run_id: response.run_id,
            });
        }

        RwLockReadGuard::try_map(guard.downgrade(), Option::as_ref)
            .map_err(|_| Error::Transport("driver disconnected".into()))
    }

    async fn invoke<Req, Res>(&self, connection: &C::Connection, message: Req) -> Result<Res>
    where
        Req: Into<RpcRequest> + Clone + Send + Sync,
        Res: TryFrom<RpcResponse, Error = Status>,
    {
        let response = self
            .invoker
            .invoke(|| connection.call(Request::new(message.clone().into())))
            .await?;
        Ok(Res::try_from(response.into_inner())?)
    }

    /// Lists the nodes currently connected to the broker.
    pub async fn get_nodes(&self) -> Result<Vec<Node>> {
        let session = self.ensure_connected_with_run().await?;
        let response: GetNodesResponse = self
            .invoke(
                &session.connection,
                GetNodesRequest {
                    run_id: session.run_id,
                },
            )
            .await?;
        Ok(response.nodes)
    }

    /// Schedules instructions in this driver's run.
    ///
    /// Returns one entry per instruction, in order: the assigned id, or
    /// `None` if the broker rejected that instruction.
    pub async fn push_task_ins(&self, mut task_ins_list: Vec<TaskIns>) -> Result<Vec<Option<TaskId>>> {
        let session = self.ensure_connected_with_run().await?;
        for task_ins in &mut task_ins_list {
            task_ins.run_id = session.run_id;
        }
        let expected = task_ins_list.len();

        let response: PushTaskInsResponse = self
            .invoke(&session.connection, PushTaskInsRequest { task_ins_list })
            .await?;
        if response.task_ids.len() != expected {
            return Err(Error::Serialization(format!(
                "broker answered {} ids for {expected} instructions",
                response.task_ids.len()
            )));
        }

        response
            .task_ids
            .iter()
            .map(|id| {
                if id.is_empty() {
                    return Ok(None);
                }
                TaskId::parse_str(id)
                    .map(Some)
                    .map_err(|e| Error::Serialization(format!("malformed task id {id:?}: {e}")))
            })
            .collect()
    }

    /// Fetches the results for `task_ids`. Returned results are consumed
    /// on the broker.
    pub async fn pull_task_res(&self, task_ids: &HashSet<TaskId>) -> Result<Vec<TaskRes>> {
        let session = self.ensure_connected_with_run().await?;
        let mut task_ids: Vec<String> = task_ids.iter().map(TaskId::to_string).collect();
        task_ids.sort_unstable();

        let response: PullTaskResResponse = self
            .invoke(
                &session.connection,
                PullTaskResRequest {
                    node: Node::anonymous(),
                    task_ids,
                },
            )
            .await?;
        debug!(count = response.task_res_list.len(), "Pulled results");
        Ok(response.task_res_list)
    }

    /// Closes the connection, if one is open. Waits for in-flight calls.
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.session.write().await.take();
        match session {
            Some(session) => {
                session.connection.close().await?;
                info!(run_id = session.run_id, "Driver disconnected");
            },
            None => debug!("Driver was not connected"),
        }
        Ok(())
    }
}

/// Dropping a connected driver drops its connection without calling
/// [`DriverConnection::close`]; call [`Driver::disconnect`] first when the
/// connection needs an orderly shutdown.
impl<C: DriverConnector> Drop for Driver<C> {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            debug!(run_id = session.run_id, "Dropping open driver connection");
        }
    }
}

impl<C: DriverConnector + std::fmt::Debug> std::fmt::Debug for Driver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("connector", &self.connector)
            .field("invoker", &self.invoker)
            .finish_non_exhaustive()
    }
}

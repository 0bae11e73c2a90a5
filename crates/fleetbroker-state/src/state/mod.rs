//! The [`State`] capability trait, the generic implementation and its
//! backends.
//!
//! # Architecture
//!
//! 1. **[`State`]** -- the interface the servicers and the authentication
//!    interceptor use, typically as `Arc<dyn State>`.
//!
//! 2. **[`GenericState<B>`](generic::GenericState)** -- all domain logic
//!    (validity rules, identifier assignment, delivery marking, pairing of
//!    instructions and results). Has a blanket `State` impl.
//!
//! 3. **[`StorageBackend`]** -- dumb KV trait implemented by backends.
//!
//! # Backends
//!
//! - [`InMemoryBackend`](memory::InMemoryBackend) -- `DashMap` backed,
//!   lives as long as the process.
//! - `SqliteBackend` -- a single SQLite file, behind the `sqlite` feature.
//!
//! [`StateFactory`](factory::StateFactory) picks one from a database
//! string at server start-up.

pub mod backend;
pub mod factory;
pub mod generic;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;

pub use backend::{StorageBackend, StorageError, VersionedRecord};

use crate::error::Result;
use crate::types::{NodeId, RunId, TaskId, TaskIns, TaskRes};

/// The authoritative record of tasks, nodes, runs and trusted keys.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. Every operation is individually
/// atomic with respect to the others; in particular two concurrent
/// [`get_task_ins`](State::get_task_ins) calls never return the same
/// instruction.
///
/// # Rejections versus errors
///
/// The store operations never fail for business-rule violations: an
/// invalid message is logged and reported as `None`. `Err` is reserved
/// for caller contract violations (`limit == Some(0)`) and storage faults.
#[async_trait]
pub trait State: Send + Sync {
    /// Stores one instruction.
    ///
    /// Validates the message, assigns a fresh [`TaskId`], clears
    /// `delivered_at`, stamps `created_at` and persists it. Returns `None`
    /// if validation or persistence fails.
    async fn store_task_ins(&self, task_ins: TaskIns) -> Option<TaskId>;

    /// Hands out undelivered instructions.
    ///
    /// With `Some(node_id)`, returns instructions addressed to that
    /// (non-anonymous) node; with `None`, instructions addressed to the
    /// anonymous consumer. Every returned instruction has `delivered_at`
    /// set as part of this call and is never returned again.
    ///
    /// # Errors
    ///
    /// - [`StateError::InvalidLimit`](crate::StateError::InvalidLimit) if
    ///   `limit == Some(0)`.
    /// - [`StateError::InvalidNodeId`](crate::StateError::InvalidNodeId)
    ///   if `node_id == Some(0)`.
    /// - [`StateError::Storage`](crate::StateError::Storage) on backend
    ///   failures.
    async fn get_task_ins(
        &self,
        node_id: Option<NodeId>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskIns>>;

    /// Stores one result. Same contract as
    /// [`store_task_ins`](State::store_task_ins); a result must also
    /// carry a non-empty ancestry whose first entry names an instruction
    /// that is still stored.
    async fn store_task_res(&self, task_res: TaskRes) -> Option<TaskId>;

    /// Returns the stored results for `task_ids`.
    ///
    /// A result matches if its own id or the id of the instruction it
    /// answers is in `task_ids`. No match is an empty list, not an error.
    /// `limit` only has an effect when more results match.
    ///
    /// # Errors
    ///
    /// - [`StateError::InvalidLimit`](crate::StateError::InvalidLimit) if
    ///   `limit == Some(0)`.
    /// - [`StateError::Storage`](crate::StateError::Storage) on backend
    ///   failures.
    async fn get_task_res(
        &self,
        task_ids: &HashSet<TaskId>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskRes>>;

    /// Deletes delivered instruction/result pairs.
    ///
    /// For every instruction id in `task_ids` whose instruction has been
    /// delivered and has at least one result, the results and the
    /// instruction are removed together. Anything else is left untouched.
    async fn delete_tasks(&self, task_ids: &HashSet<TaskId>) -> Result<()>;

    /// Adds a node to the live node set. Idempotent.
    async fn register_node(&self, node_id: NodeId) -> Result<()>;

    /// Removes a node from the live node set. Idempotent.
    async fn unregister_node(&self, node_id: NodeId) -> Result<()>;

    /// Snapshot of the currently registered node ids.
    async fn get_nodes(&self) -> Result<HashSet<NodeId>>;

    /// Draws a fresh random node id, registers it and returns it.
    async fn create_node(&self) -> Result<NodeId>;

    /// Draws a fresh random run id, records it and returns it.
    async fn create_run(&self) -> Result<RunId>;

    /// Returns `true` if `run_id` was created by [`create_run`](State::create_run).
    async fn has_run(&self, run_id: RunId) -> Result<bool>;

    /// Adds every key in `public_keys` to the trusted key set.
    async fn store_client_public_keys(&self, public_keys: &HashSet<Vec<u8>>) -> Result<()>;

    /// Adds one key to the trusted key set.
    async fn store_client_public_key(&self, public_key: &[u8]) -> Result<()>;

    /// Snapshot of the trusted key set.
    async fn get_client_public_keys(&self) -> Result<HashSet<Vec<u8>>>;
}

// ---- Blanket impl for GenericState<B> ----

#[async_trait]
impl<B: StorageBackend + 'static> State for generic::GenericState<B> {
    async fn store_task_ins(&self, task_ins: TaskIns) -> Option<TaskId> {
        self.store_task_ins(task_ins).await
    }

    async fn get_task_ins(
        &self,
        node_id: Option<NodeId>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskIns>> {
        self.get_task_ins(node_id, limit).await
    }

    async fn store_task_res(&self, task_res: TaskRes) -> Option<TaskId> {
        self.store_task_res(task_res).await
    }

    async fn get_task_res(
        &self,
        task_ids: &HashSet<TaskId>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskRes>> {
        self.get_task_res(task_ids, limit).await
    }

    async fn delete_tasks(&self, task_ids: &HashSet<TaskId>) -> Result<()> {
        self.delete_tasks(task_ids).await
    }

    async fn register_node(&self, node_id: NodeId) -> Result<()> {
        self.register_node(node_id).await
    }

    async fn unregister_node(&self, node_id: NodeId) -> Result<()> {
        self.unregister_node(node_id).await
    }

    async fn get_nodes(&self) -> Result<HashSet<NodeId>> {
        self.get_nodes().await
    }

    async fn create_node(&self) -> Result<NodeId> {
        self.create_node().await
    }

    async fn create_run(&self) -> Result<RunId> {
        self.create_run().await
    }

    async fn has_run(&self, run_id: RunId) -> Result<bool> {
        self.has_run(run_id).await
    }

    async fn store_client_public_keys(&self, public_keys: &HashSet<Vec<u8>>) -> Result<()> {
        self.store_client_public_keys(public_keys).await
    }

    async fn store_client_public_key(&self, public_key: &[u8]) -> Result<()> {
        self.store_client_public_key(public_key).await
    }

    async fn get_client_public_keys(&self) -> Result<HashSet<Vec<u8>>> {
        self.get_client_public_keys().await
    }
}

//! Task and node state for the fleetbroker task-distribution broker.
//!
//! The state is the broker's single source of truth: it holds task
//! instructions pushed by the driver until a node fetches them, task
//! results pushed by nodes until the driver collects them, the set of live
//! nodes, the runs created so far and the client public keys trusted by
//! the authentication layer.
//!
//! # Overview
//!
//! - An instruction ([`TaskIns`]) is handed out at most once: fetching it
//!   stamps `delivered_at` in the same atomic step.
//! - A result ([`TaskRes`]) names the instruction it answers as the first
//!   entry of its ancestry.
//! - Once an instruction has been delivered and answered, the pair can be
//!   removed with [`State::delete_tasks`].
//!
//! # Module Organization
//!
//! - [`types`] - Task, node and identifier types
//! - [`validation`] - Validity rules applied before storing a message
//! - [`state`] - The [`State`] trait, [`GenericState`] and the backends
//! - [`error`] - [`StateError`]
//!
//! # Example
//!
//! ```
//! use fleetbroker_state::{InMemoryState, Node, Task, TaskIns};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let state = InMemoryState::in_memory();
//! let task_id = state
//!     .store_task_ins(TaskIns::new(1, Task::new(Node::new(7))))
//!     .await
//!     .unwrap();
//!
//! let delivered = state.get_task_ins(Some(7), None).await.unwrap();
//! assert_eq!(delivered[0].task_id, Some(task_id));
//! assert!(state.get_task_ins(Some(7), None).await.unwrap().is_empty());
//! # });
//! ```

pub mod error;
pub mod state;
pub mod types;
pub mod validation;

pub use error::{Result, StateError};
pub use state::factory::StateFactory;
pub use state::generic::GenericState;
pub use state::memory::{InMemoryBackend, InMemoryState};
#[cfg(feature = "sqlite")]
pub use state::sqlite::{SqliteBackend, SqliteState};
pub use state::{State, StorageBackend, StorageError, VersionedRecord};
pub use types::{
    Node, NodeId, RunId, Task, TaskId, TaskIns, TaskMessage, TaskRes, ANONYMOUS_NODE_ID,
};
pub use validation::{is_valid_task, validate_task_ins, validate_task_res, ValidationError};

//! Task wire types: [`Task`], [`TaskIns`] and [`TaskRes`].
//!
//! A [`TaskIns`] is an instruction pushed by the driver and fetched by a
//! node; a [`TaskRes`] is the node's answer. Both wrap the same [`Task`]
//! envelope and differ only in the rules applied to them (a result must
//! reference the instruction it answers through `ancestry`).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::node::Node;

/// Unique task identifier assigned by the state on storage.
pub type TaskId = Uuid;

/// Identifier of a run (one training session).
pub type RunId = i64;

/// The envelope shared by instructions and results.
///
/// `payload` is opaque to the broker: it is stored and returned verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// The endpoint that produced this task, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<Node>,

    /// The endpoint this task is addressed to.
    pub consumer: Node,

    /// Set by the state when the task is stored.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Set by the state the first time the task is handed out.
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,

    /// Identifiers of the tasks this one depends on. For a result, the
    /// first entry is the instruction being answered.
    #[serde(default)]
    pub ancestry: Vec<String>,

    /// Free-form task kind, e.g. `"fit"` or `"evaluate"`.
    #[serde(default)]
    pub task_type: String,

    /// Opaque task content.
    #[serde(default)]
    pub payload: Value,
}

impl Task {
    /// Creates a task addressed to `consumer` with an empty payload.
    pub fn new(consumer: Node) -> Self {
        Self {
            producer: None,
            consumer,
            created_at: None,
            delivered_at: None,
            ancestry: Vec::new(),
            task_type: String::new(),
            payload: Value::Null,
        }
    }

    /// Sets the producer.
    pub fn with_producer(mut self, producer: Node) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Sets the ancestry.
    pub fn with_ancestry<I, S>(mut self, ancestry: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ancestry = ancestry.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the task type.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Returns `true` once the task has been handed out.
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}

/// A task instruction, produced by the driver and consumed by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskIns {
    /// Assigned by the state; `None` until stored.
    #[serde(default)]
    pub task_id: Option<TaskId>,

    /// Optional grouping label (e.g. the server round).
    #[serde(default)]
    pub group_id: String,

    /// The run this instruction belongs to.
    #[serde(default)]
    pub run_id: RunId,

    /// The task envelope.
    pub task: Task,
}

impl TaskIns {
    /// Creates an unstored instruction for `run_id`.
    pub fn new(run_id: RunId, task: Task) -> Self {
        Self {
            task_id: None,
            group_id: String::new(),
            run_id,
            task,
        }
    }
}

/// A task result, produced by a node and consumed by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRes {
    /// Assigned by the state; `None` until stored.
    #[serde(default)]
    pub task_id: Option<TaskId>,

    /// Optional grouping label, usually copied from the instruction.
    #[serde(default)]
    pub group_id: String,

    /// The run this result belongs to.
    #[serde(default)]
    pub run_id: RunId,

    /// The task envelope.
    pub task: Task,
}

impl TaskRes {
    /// Creates an unstored result for `run_id`.
    pub fn new(run_id: RunId, task: Task) -> Self {
        Self {
            task_id: None,
            group_id: String::new(),
            run_id,
            task,
        }
    }

    /// The instruction this result answers (first ancestry entry), if it
    /// parses as a task id.
    pub fn answered_task_id(&self) -> Option<TaskId> {
        self.task
            .ancestry
            .first()
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

/// Behaviour shared by [`TaskIns`] and [`TaskRes`], letting the state
/// and the validity rules treat both message kinds uniformly.
pub trait TaskMessage: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Human-readable message kind, used in logs and storage keys.
    const KIND: &'static str;

    /// Whether the message must carry at least one ancestor.
    const REQUIRES_ANCESTRY: bool;

    /// The wrapped task envelope.
    fn task(&self) -> &Task;

    /// Mutable access to the task envelope.
    fn task_mut(&mut self) -> &mut Task;

    /// The assigned identifier, if stored.
    fn task_id(&self) -> Option<TaskId>;

    /// Assigns the identifier.
    fn set_task_id(&mut self, task_id: TaskId);
}

impl TaskMessage for TaskIns {
    const KIND: &'static str = "task_ins";
    const REQUIRES_ANCESTRY: bool = false;

    fn task(&self) -> &Task {
        &self.task
    }

    fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }

    fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    fn set_task_id(&mut self, task_id: TaskId) {
        self.task_id = Some(task_id);
    }
}

impl TaskMessage for TaskRes {
    const KIND: &'static str = "task_res";
    const REQUIRES_ANCESTRY: bool = true;

    fn task(&self) -> &Task {
        &self.task
    }

    fn task_mut(&mut self) -> &mut Task {
        &mut self.task
    }

    fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    fn set_task_id(&mut self, task_id: TaskId) {
        self.task_id = Some(task_id);
    }
}

//! Data model shared by the state, the servicers and the driver client.

pub mod node;
pub mod task;

pub use node::{Node, NodeId, ANONYMOUS_NODE_ID};
pub use task::{RunId, Task, TaskId, TaskIns, TaskMessage, TaskRes};

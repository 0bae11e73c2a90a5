//! Validity rules for task instructions and results.
//!
//! A message is valid when:
//!
//! 1. its consumer's `anonymous` flag agrees with its `node_id`
//!    (`anonymous` exactly when `node_id == 0`),
//! 2. the same holds for its producer, if one is present,
//! 3. a result carries at least one ancestor.
//!
//! Invalid messages are reported, never coerced: the state logs the
//! offending message and refuses to store it.

use crate::types::{Node, TaskIns, TaskMessage, TaskRes};

/// Why a task message was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The endpoint is flagged anonymous but carries a node id.
    #[error("`task.{role}.anonymous` is `true` then `node_id` must be 0 (got {node_id})")]
    AnonymousWithNodeId {
        /// `"consumer"` or `"producer"`.
        role: &'static str,
        /// The offending node id.
        node_id: i64,
    },

    /// The endpoint is not anonymous but has the reserved id 0.
    #[error("`task.{role}.anonymous` is `false` then `node_id` must not be 0")]
    MissingNodeId {
        /// `"consumer"` or `"producer"`.
        role: &'static str,
    },

    /// A result without ancestry.
    #[error("`task_res.task.ancestry` may not be empty")]
    EmptyAncestry,
}

fn check_node(role: &'static str, node: &Node) -> Result<(), ValidationError> {
    if node.anonymous && node.node_id != 0 {
        return Err(ValidationError::AnonymousWithNodeId {
            role,
            node_id: node.node_id,
        });
    }
    if !node.anonymous && node.node_id == 0 {
        return Err(ValidationError::MissingNodeId { role });
    }
    Ok(())
}

/// Checks any task message against the validity rules.
pub fn validate<M: TaskMessage>(message: &M) -> Result<(), ValidationError> {
    let task = message.task();
    check_node("consumer", &task.consumer)?;
    if let Some(producer) = &task.producer {
        check_node("producer", producer)?;
    }
    if M::REQUIRES_ANCESTRY && task.ancestry.is_empty() {
        return Err(ValidationError::EmptyAncestry);
    }
    Ok(())
}

/// Checks a task instruction.
pub fn validate_task_ins(task_ins: &TaskIns) -> Result<(), ValidationError> {
    validate(task_ins)
}

/// Checks a task result.
pub fn validate_task_res(task_res: &TaskRes) -> Result<(), ValidationError> {
    validate(task_res)
}

/// Returns `true` if the message is valid; otherwise logs the reason
/// together with the message as JSON and returns `false`.
///
/// # Examples
///
/// ```
/// use fleetbroker_state::{is_valid_task, Node, Task, TaskIns, TaskRes};
///
/// let ins = TaskIns::new(1, Task::new(Node::new(7)));
/// assert!(is_valid_task(&ins));
///
/// // A result has to reference the instruction it answers.
/// let res = TaskRes::new(1, Task::new(Node::anonymous()));
/// assert!(!is_valid_task(&res));
/// ```
pub fn is_valid_task<M: TaskMessage>(message: &M) -> bool {
    match validate(message) {
        Ok(()) => true,
        Err(err) => {
            let json = serde_json::to_string(message).unwrap_or_default();
            tracing::error!(kind = M::KIND, error = %err, message = %json, "invalid task message");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Task;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn node(node_id: i64, anonymous: bool) -> Node {
        Node { node_id, anonymous }
    }

    #[rstest]
    #[case(node(0, true), true)]
    #[case(node(7, false), true)]
    #[case(node(7, true), false)]
    #[case(node(0, false), false)]
    fn consumer_rule(#[case] consumer: Node, #[case] valid: bool) {
        let ins = TaskIns::new(1, Task::new(consumer));
        assert_eq!(validate_task_ins(&ins).is_ok(), valid);
    }

    #[rstest]
    #[case(node(0, true), true)]
    #[case(node(3, false), true)]
    #[case(node(3, true), false)]
    #[case(node(0, false), false)]
    fn producer_rule(#[case] producer: Node, #[case] valid: bool) {
        let ins = TaskIns::new(1, Task::new(Node::new(1)).with_producer(producer));
        assert_eq!(validate_task_ins(&ins).is_ok(), valid);
    }

    #[test]
    fn result_requires_ancestry() {
        let res = TaskRes::new(1, Task::new(Node::anonymous()));
        assert_eq!(validate_task_res(&res), Err(ValidationError::EmptyAncestry));

        let res = TaskRes::new(1, Task::new(Node::anonymous()).with_ancestry(["abc"]));
        assert_eq!(validate_task_res(&res), Ok(()));
    }

    #[test]
    fn instruction_does_not_require_ancestry() {
        let ins = TaskIns::new(1, Task::new(Node::anonymous()));
        assert!(validate_task_ins(&ins).is_ok());
    }

    #[test]
    fn consumer_checked_before_producer() {
        let ins = TaskIns::new(1, Task::new(node(0, false)).with_producer(node(5, true)));
        assert_eq!(
            validate_task_ins(&ins),
            Err(ValidationError::MissingNodeId { role: "consumer" })
        );
    }

    #[test]
    fn error_messages_name_the_role() {
        let err = ValidationError::AnonymousWithNodeId {
            role: "producer",
            node_id: 9,
        };
        assert!(err.to_string().contains("task.producer.anonymous"));
        assert!(err.to_string().contains("9"));
    }
}

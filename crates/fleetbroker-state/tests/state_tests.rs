//! Behavioural tests for the state through the `State` trait object.

use std::collections::HashSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

use fleetbroker_state::{
    InMemoryState, Node, State, StateError, Task, TaskId, TaskIns, TaskRes,
};

fn state() -> Arc<dyn State> {
    Arc::new(InMemoryState::in_memory())
}

fn ins_for(consumer: Node) -> TaskIns {
    TaskIns::new(
        1,
        Task::new(consumer)
            .with_producer(Node::anonymous())
            .with_task_type("fit")
            .with_payload(json!({"round": 1})),
    )
}

fn res_for(task_id: TaskId, producer: Node) -> TaskRes {
    TaskRes::new(
        1,
        Task::new(Node::anonymous())
            .with_producer(producer)
            .with_ancestry([task_id.to_string()]),
    )
}

#[tokio::test]
async fn instruction_is_delivered_once_then_answered_then_deleted() {
    let state = state();

    let ins_id = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();

    let delivered = state.get_task_ins(Some(5), Some(10)).await.unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].task_id, Some(ins_id));
    assert!(delivered[0].task.delivered_at.is_some());
    assert_eq!(delivered[0].task.payload, json!({"round": 1}));

    assert!(state.get_task_ins(Some(5), Some(10)).await.unwrap().is_empty());

    let res_id = state.store_task_res(res_for(ins_id, Node::new(5))).await.unwrap();
    let ids = HashSet::from([ins_id]);
    let results = state.get_task_res(&ids, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].task_id, Some(res_id));

    state.delete_tasks(&ids).await.unwrap();
    assert!(state.get_task_res(&ids, None).await.unwrap().is_empty());
    assert!(state.get_task_ins(Some(5), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn instructions_are_scoped_to_their_consumer() {
    let state = state();
    state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
    let anon_id = state.store_task_ins(ins_for(Node::anonymous())).await.unwrap();

    assert!(state.get_task_ins(Some(6), None).await.unwrap().is_empty());

    let anonymous = state.get_task_ins(None, None).await.unwrap();
    assert_eq!(anonymous.len(), 1);
    assert_eq!(anonymous[0].task_id, Some(anon_id));

    assert_eq!(state.get_task_ins(Some(5), None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn limit_caps_the_number_handed_out() {
    let state = state();
    for _ in 0..5 {
        state.store_task_ins(ins_for(Node::new(9))).await.unwrap();
    }

    assert_eq!(state.get_task_ins(Some(9), Some(2)).await.unwrap().len(), 2);
    assert_eq!(state.get_task_ins(Some(9), Some(2)).await.unwrap().len(), 2);
    assert_eq!(state.get_task_ins(Some(9), Some(2)).await.unwrap().len(), 1);
    assert!(state.get_task_ins(Some(9), Some(2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn zero_limit_is_a_caller_error() {
    let state = state();
    let err = state.get_task_ins(None, Some(0)).await.unwrap_err();
    assert!(matches!(err, StateError::InvalidLimit { limit: 0 }));

    let ids = HashSet::from([uuid::Uuid::new_v4()]);
    let err = state.get_task_res(&ids, Some(0)).await.unwrap_err();
    assert!(matches!(err, StateError::InvalidLimit { limit: 0 }));
}

#[rstest]
#[case::anonymous_with_id(Node { node_id: 4, anonymous: true })]
#[case::named_without_id(Node { node_id: 0, anonymous: false })]
#[tokio::test]
async fn inconsistent_consumer_is_rejected(#[case] consumer: Node) {
    let state = InMemoryState::in_memory();
    assert_eq!(state.store_task_ins(ins_for(consumer)).await, None);
    assert!(state.backend().is_empty());
}

#[tokio::test]
async fn result_without_ancestry_is_rejected() {
    let state = InMemoryState::in_memory();
    let ins_id = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
    let res = TaskRes::new(1, Task::new(Node::anonymous()).with_producer(Node::new(5)));
    assert_eq!(state.store_task_res(res).await, None);
    assert_eq!(state.backend().len(), 1);
    assert!(state.get_task_res(&HashSet::from([ins_id]), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn late_result_for_consumed_pair_is_rejected() {
    let state = InMemoryState::in_memory();
    let ins_id = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
    state.get_task_ins(Some(5), None).await.unwrap();
    state.store_task_res(res_for(ins_id, Node::new(5))).await.unwrap();
    let ids = HashSet::from([ins_id]);
    assert_eq!(state.get_task_res(&ids, None).await.unwrap().len(), 1);
    state.delete_tasks(&ids).await.unwrap();

    for _ in 0..3 {
        assert_eq!(state.store_task_res(res_for(ins_id, Node::new(5))).await, None);
        assert!(state.get_task_res(&ids, None).await.unwrap().is_empty());
        state.delete_tasks(&ids).await.unwrap();
        assert!(state.backend().is_empty());
    }
}

#[tokio::test]
async fn result_with_inconsistent_producer_is_rejected() {
    let state = InMemoryState::in_memory();
    let ins_id = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
    let res = res_for(
        ins_id,
        Node {
            node_id: 5,
            anonymous: true,
        },
    );
    assert_eq!(state.store_task_res(res).await, None);
    assert_eq!(state.backend().len(), 1);
}

#[tokio::test]
async fn unknown_ids_yield_no_results() {
    let state = state();
    let ids = HashSet::from([uuid::Uuid::new_v4()]);
    assert!(state.get_task_res(&ids, Some(3)).await.unwrap().is_empty());
    assert!(state.get_task_res(&HashSet::new(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn get_task_res_respects_limit() {
    let state = state();
    let mut ids = HashSet::new();
    for _ in 0..3 {
        let ins_id = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
        state.store_task_res(res_for(ins_id, Node::new(5))).await.unwrap();
        ids.insert(ins_id);
    }

    assert_eq!(state.get_task_res(&ids, Some(2)).await.unwrap().len(), 2);
    assert_eq!(state.get_task_res(&ids, Some(5)).await.unwrap().len(), 3);
}

#[tokio::test]
async fn undelivered_instruction_is_not_deleted() {
    let state = state();
    let ins_id = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
    state.store_task_res(res_for(ins_id, Node::new(5))).await.unwrap();

    let ids = HashSet::from([ins_id]);
    state.delete_tasks(&ids).await.unwrap();

    // Still pending: the node can fetch it and the result is still there.
    assert_eq!(state.get_task_ins(Some(5), None).await.unwrap().len(), 1);
    assert_eq!(state.get_task_res(&ids, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unanswered_instruction_is_not_deleted() {
    let state = state();
    let ins_id = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
    state.get_task_ins(Some(5), None).await.unwrap();

    let ids = HashSet::from([ins_id]);
    state.delete_tasks(&ids).await.unwrap();

    let res_id = state.store_task_res(res_for(ins_id, Node::new(5))).await.unwrap();
    let results = state.get_task_res(&ids, None).await.unwrap();
    assert_eq!(results[0].task_id, Some(res_id));
}

#[tokio::test]
async fn delete_only_touches_requested_pairs() {
    let state = state();
    let a = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
    let b = state.store_task_ins(ins_for(Node::new(5))).await.unwrap();
    state.get_task_ins(Some(5), None).await.unwrap();
    state.store_task_res(res_for(a, Node::new(5))).await.unwrap();
    state.store_task_res(res_for(b, Node::new(5))).await.unwrap();

    state.delete_tasks(&HashSet::from([a])).await.unwrap();

    assert!(state
        .get_task_res(&HashSet::from([a]), None)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        state
            .get_task_res(&HashSet::from([b]), None)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn node_registry_is_idempotent() {
    let state = state();
    state.register_node(11).await.unwrap();
    state.register_node(11).await.unwrap();
    state.register_node(12).await.unwrap();
    assert_eq!(state.get_nodes().await.unwrap(), HashSet::from([11, 12]));

    state.unregister_node(11).await.unwrap();
    state.unregister_node(11).await.unwrap();
    state.unregister_node(99).await.unwrap();
    assert_eq!(state.get_nodes().await.unwrap(), HashSet::from([12]));
}

#[tokio::test]
async fn created_nodes_are_distinct() {
    let state = state();
    let mut seen = HashSet::new();
    for _ in 0..50 {
        assert!(seen.insert(state.create_node().await.unwrap()));
    }
    assert_eq!(state.get_nodes().await.unwrap(), seen);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pulls_never_share_an_instruction() {
    let state = state();
    let mut stored = HashSet::new();
    for _ in 0..40 {
        stored.insert(state.store_task_ins(ins_for(Node::new(3))).await.unwrap());
    }

    let pulls = (0..16).map(|_| {
        let state = Arc::clone(&state);
        tokio::spawn(async move { state.get_task_ins(Some(3), Some(4)).await.unwrap() })
    });
    let batches = futures::future::join_all(pulls).await;

    let mut delivered = Vec::new();
    for batch in batches {
        delivered.extend(batch.unwrap().into_iter().filter_map(|ins| ins.task_id));
    }
    let unique: HashSet<_> = delivered.iter().copied().collect();
    assert_eq!(unique.len(), delivered.len());
    assert!(unique.is_subset(&stored));

    let leftover = state.get_task_ins(Some(3), None).await.unwrap();
    assert_eq!(delivered.len() + leftover.len(), stored.len());
}

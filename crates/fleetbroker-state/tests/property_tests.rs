//! Property-based tests for the validity rules and delivery invariants.

use std::collections::HashSet;

use proptest::prelude::*;

use fleetbroker_state::{
    is_valid_task, InMemoryState, Node, Task, TaskIns, TaskRes, ValidationError,
};

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

fn arb_node() -> impl Strategy<Value = Node> {
    (prop_oneof![Just(0i64), 1i64..1_000], any::<bool>())
        .prop_map(|(node_id, anonymous)| Node { node_id, anonymous })
}

fn arb_ancestry() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-f0-9-]{1,36}", 0..3)
}

// ─── Validity ───────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn instruction_validity_matches_node_consistency(
        consumer in arb_node(),
        producer in proptest::option::of(arb_node()),
    ) {
        let mut task = Task::new(consumer);
        task.producer = producer;
        let ins = TaskIns::new(1, task);

        let expected = consumer.is_consistent()
            && producer.as_ref().map_or(true, Node::is_consistent);
        prop_assert_eq!(is_valid_task(&ins), expected);
    }

    #[test]
    fn result_validity_also_requires_ancestry(
        consumer in arb_node(),
        ancestry in arb_ancestry(),
    ) {
        let res = TaskRes::new(1, Task::new(consumer).with_ancestry(ancestry.clone()));
        let expected = consumer.is_consistent() && !ancestry.is_empty();
        prop_assert_eq!(is_valid_task(&res), expected);

        if consumer.is_consistent() && ancestry.is_empty() {
            prop_assert_eq!(
                fleetbroker_state::validate_task_res(&res),
                Err(ValidationError::EmptyAncestry)
            );
        }
    }

    #[test]
    fn node_deserializes_without_panicking(input in "\\PC{0,64}") {
        let _ = serde_json::from_str::<Node>(&input);
        let _ = serde_json::from_str::<TaskIns>(&input);
    }
}

// ─── Delivery ───────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_stored_instruction_is_delivered_exactly_once(
        count in 1usize..20,
        limit in 1usize..6,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let state = InMemoryState::in_memory();
            let mut stored = HashSet::new();
            for _ in 0..count {
                stored.insert(
                    state
                        .store_task_ins(TaskIns::new(1, Task::new(Node::new(2))))
                        .await
                        .unwrap(),
                );
            }

            let mut seen = HashSet::new();
            loop {
                let batch = state.get_task_ins(Some(2), Some(limit)).await.unwrap();
                prop_assert!(batch.len() <= limit);
                if batch.is_empty() {
                    break;
                }
                for ins in batch {
                    prop_assert!(ins.task.delivered_at.is_some());
                    prop_assert!(seen.insert(ins.task_id.unwrap()));
                }
            }
            prop_assert_eq!(seen, stored);
            Ok(())
        })?;
    }
}

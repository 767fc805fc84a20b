//! Property tests for ordering and repair.

mod common;

use bizsync_core::{
    entity_key, ManualClock, OperationRequest, OperationType, Repairer, Resource, SequentialIds,
};
use bizsync_engine::{EngineConfig, MemoryRecordStore, StoreMethod};
use bizsync_testkit::{
    create_request_strategy, damaged_plan_strategy, operation_type_strategy, plan,
    plan_batch_strategy, resource_strategy, valid_payload_strategy,
};
use common::Harness;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("runtime")
}

fn repairer(ceiling: u32) -> Repairer {
    Repairer::new(Arc::new(ManualClock::epoch()), Arc::new(SequentialIds::new()))
        .with_ceiling(ceiling)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn healthy_store_sees_enqueue_order(plans in plan_batch_strategy(12)) {
        let expected: Vec<String> = plans
            .iter()
            .filter_map(|p| p["id"].as_str().map(str::to_string))
            .collect();

        let seen = paused_runtime().block_on(async {
            let h = Harness::with(MemoryRecordStore::new(), EngineConfig::default(), true);
            for plan in plans {
                h.engine.enqueue(OperationRequest::create(Resource::BusinessPlan, plan));
            }
            h.engine.force_sync().await;
            h.calls(StoreMethod::Create)
                .into_iter()
                .filter_map(|call| call.id)
                .collect::<Vec<_>>()
        });

        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn repairing_valid_payload_is_identity((resource, payload) in valid_payload_strategy()) {
        let repairer = repairer(3);
        let outcome = repairer.repair(resource, &payload);

        prop_assert!(outcome.success);
        prop_assert_eq!(outcome.repaired, payload);
    }

    #[test]
    fn repair_stops_at_ceiling(plan in damaged_plan_strategy(), ceiling in 1u32..5) {
        let repairer = repairer(ceiling);
        let key = entity_key(Resource::BusinessPlan, &plan).unwrap_or_default();

        for _ in 0..ceiling {
            prop_assert!(repairer.repair(Resource::BusinessPlan, &plan).success);
        }
        for _ in 0..2 {
            let outcome = repairer.repair(Resource::BusinessPlan, &plan);
            prop_assert!(!outcome.success);
            prop_assert_eq!(&outcome.repaired, &plan);
        }
        prop_assert_eq!(repairer.attempts(&key), ceiling);
    }

    #[test]
    fn offline_enqueue_accepts_anything_in_order(
        requests in prop::collection::vec((resource_strategy(), operation_type_strategy()), 1..12)
    ) {
        let (ids, queued, pending) = paused_runtime().block_on(async {
            let h = Harness::new(false);
            let ids: Vec<_> = requests
                .iter()
                .map(|(resource, op_type)| {
                    h.engine.enqueue(OperationRequest::new(*op_type, *resource, json!({})))
                })
                .collect();
            let queued: Vec<_> = h.engine.pending_operations().iter().map(|op| op.id).collect();
            (ids, queued, h.engine.status().pending_operations)
        });

        prop_assert_eq!(pending, requests.len());
        prop_assert_eq!(queued, ids);
    }

    #[test]
    fn valid_creates_reach_the_record_store(request in create_request_strategy()) {
        prop_assert_eq!(request.op_type, OperationType::Create);
        let payload = request.payload.clone();
        let resource = request.resource;

        let (errors, stored) = paused_runtime().block_on(async {
            let h = Harness::new(true);
            let stored_id = match resource {
                Resource::Section => {
                    let plan_id = payload["plan_id"].as_str().unwrap_or_default().to_string();
                    h.store.insert("business_plans", plan(&plan_id));
                    plan_id
                }
                _ => payload["id"].as_str().unwrap_or_default().to_string(),
            };

            h.engine.enqueue(request);
            h.engine.force_sync().await;
            (
                h.engine.status().errors.len(),
                h.store.record(resource.table(), &stored_id),
            )
        });

        prop_assert_eq!(errors, 0);
        let stored = stored.unwrap_or_default();
        match resource {
            Resource::Section => {
                let key = payload["section_key"].as_str().unwrap_or_default();
                prop_assert_eq!(&stored["sections"][key], &payload["content"]);
            }
            _ => prop_assert_eq!(stored, payload),
        }
    }
}

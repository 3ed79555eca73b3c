//! Property-based tests for the per-actor merge engine
//!
//! These tests verify the guarantees convergence rests on:
//!  - Idempotence: synchronizing the same snapshot twice changes nothing
//!  - Tombstone permanence: a removed id never becomes live again
//!  - Convergence: any replica that sees the final snapshot agrees with
//!    the canonical store, whatever intermediate snapshots it saw

use proptest::prelude::*;
use tally_core::{
    ActorId, ActorStateSnapshot, OperationId, Policy, SnapshotAdd, StateTracker, StateValue,
};

const VALUES: [&str; 4] = ["frodo", "dodo", "sam", "pippin"];

fn policy_strategy() -> impl Strategy<Value = Policy> {
    prop::sample::select(Policy::ALL.to_vec())
}

fn snapshot_strategy() -> impl Strategy<Value = ActorStateSnapshot> {
    let add = (0usize..VALUES.len(), prop::collection::vec(0u8..12, 1..3)).prop_map(|(v, ids)| {
        SnapshotAdd::new(
            VALUES[v],
            ids.into_iter().map(|id| OperationId::new(format!("op-{}", id))),
        )
    });
    (
        prop::collection::vec(add, 0..6),
        prop::collection::vec(0u8..12, 0..4),
    )
        .prop_map(|(adds, removes)| ActorStateSnapshot {
            adds,
            removes: removes
                .into_iter()
                .map(|id| OperationId::new(format!("op-{}", id)))
                .collect(),
        })
}

#[derive(Clone, Debug)]
enum Action {
    Add(usize),
    Remove(usize),
}

fn actions_strategy() -> impl Strategy<Value = Vec<Action>> {
    prop::collection::vec(
        prop_oneof![
            (0usize..VALUES.len()).prop_map(Action::Add),
            (0usize..VALUES.len()).prop_map(Action::Remove),
        ],
        1..12,
    )
}

fn tracker(policy: Policy) -> StateTracker {
    StateTracker::new("choice", ActorId::new("alice"), policy)
}

// ============================================================================
// Idempotence
// ============================================================================

proptest! {
    #[test]
    fn synchronize_is_idempotent(policy in policy_strategy(), snap in snapshot_strategy()) {
        let mut t = tracker(policy);
        t.add(StateValue::from("local")).unwrap();

        t.synchronize(&snap);
        let resolved = t.resolved_value();
        let tombstones = t.tombstones().clone();

        prop_assert!(t.synchronize(&snap).is_empty());
        prop_assert_eq!(t.resolved_value(), resolved);
        prop_assert_eq!(t.tombstones(), &tombstones);
    }

    #[test]
    fn register_policies_resolve_to_single_live_add(
        policy in prop::sample::select(vec![
            Policy::FirstWriterWins,
            Policy::LastWriterWins,
            Policy::LastWriterWinsNullable,
        ]),
        snaps in prop::collection::vec(snapshot_strategy(), 1..4)
    ) {
        let mut t = tracker(policy);
        for snap in &snaps {
            t.synchronize(snap);
            let live = t
                .adds()
                .iter()
                .filter(|entry| entry.ids.iter().any(|id| !t.is_tombstoned(id)))
                .count();
            prop_assert!(live <= 1);
        }
    }
}

// ============================================================================
// Tombstone permanence
// ============================================================================

proptest! {
    #[test]
    fn tombstones_are_permanent(
        policy in policy_strategy(),
        first in snapshot_strategy(),
        later in prop::collection::vec(snapshot_strategy(), 1..4)
    ) {
        let mut t = tracker(policy);
        t.synchronize(&first);
        let removed = t.tombstones().clone();

        for snap in &later {
            t.synchronize(snap);
            for id in &removed {
                prop_assert!(t.is_tombstoned(id));
            }
        }
    }
}

// ============================================================================
// Convergence against the canonical store
// ============================================================================

proptest! {
    #[test]
    fn replicas_converge_with_canonical_store(
        policy in policy_strategy(),
        actions in actions_strategy(),
        observed in prop::collection::vec(0usize..16, 0..8)
    ) {
        let mut writer = tracker(policy);
        let mut server = tracker(policy);
        let mut snapshots = Vec::new();

        for action in &actions {
            let ops = match action {
                Action::Add(v) => writer.add(StateValue::from(VALUES[*v])).unwrap(),
                Action::Remove(v) => writer.remove(StateValue::from(VALUES[*v])).unwrap(),
            };
            for op in &ops {
                server.apply_operation(op);
            }
            snapshots.push(server.to_snapshot());
        }

        // An observer sees an arbitrary, possibly reordered, subset of the
        // intermediate snapshots before the final one.
        let mut observer = StateTracker::new("choice", ActorId::new("alice"), policy);
        for index in observed {
            observer.synchronize(&snapshots[index % snapshots.len()]);
        }
        let last = server.to_snapshot();
        observer.synchronize(&last);
        writer.synchronize(&last);

        prop_assert_eq!(observer.resolved_value(), server.resolved_value());
        prop_assert_eq!(writer.resolved_value(), server.resolved_value());
    }
}

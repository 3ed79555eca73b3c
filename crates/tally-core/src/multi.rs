//! Fan-out of one state name across every contributing actor.

use crate::error::Result;
use crate::operation::{ActorId, Operation, OperationId};
use crate::policy::Policy;
use crate::snapshot::{ActorStateSnapshot, Snapshot};
use crate::tracker::{StateChange, StateTracker};
use crate::value::{ResolvedValue, StateValue, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An actor's resolved value, as returned by `get_values`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorValue {
    pub actor_id: ActorId,
    pub value: ResolvedValue,
}

/// Owns one `StateTracker` per actor for a single state name.
///
/// Trackers are created on first reference and all share this tracker's
/// policy.
#[derive(Clone, Debug)]
pub struct MultiActorTracker {
    name: String,
    policy: Policy,
    kind: Option<ValueKind>,
    trackers: HashMap<ActorId, StateTracker>,
}

impl MultiActorTracker {
    pub fn new(name: impl Into<String>, policy: Policy) -> Self {
        Self {
            name: name.into(),
            policy,
            kind: None,
            trackers: HashMap::new(),
        }
    }

    /// Build from a policy name; unknown names are a configuration error.
    pub fn from_policy_name(name: impl Into<String>, policy: &str) -> Result<Self> {
        Ok(Self::new(name, policy.parse()?))
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn kind(&self) -> Option<ValueKind> {
        self.kind
    }

    /// Actors that have a tracker, in no particular order.
    pub fn actors(&self) -> impl Iterator<Item = &ActorId> {
        self.trackers.keys()
    }

    pub fn tracker(&self, actor_id: &ActorId) -> Option<&StateTracker> {
        self.trackers.get(actor_id)
    }

    fn tracker_mut(&mut self, actor_id: &ActorId) -> &mut StateTracker {
        let (name, policy, kind) = (&self.name, self.policy, self.kind);
        self.trackers
            .entry(actor_id.clone())
            .or_insert_with(|| StateTracker::new(name.clone(), actor_id.clone(), policy).with_kind(kind))
    }

    /// Resolved value for one actor, or the policy default if it never wrote.
    pub fn get_value(&self, actor_id: &ActorId) -> ResolvedValue {
        self.trackers
            .get(actor_id)
            .map(StateTracker::resolved_value)
            .unwrap_or_else(|| ResolvedValue::empty_for(self.policy))
    }

    /// Values for the given actors; actors without a tracker are omitted.
    pub fn get_values(&self, actor_ids: &[ActorId]) -> Vec<ActorValue> {
        actor_ids
            .iter()
            .filter_map(|actor_id| {
                self.trackers.get(actor_id).map(|tracker| ActorValue {
                    actor_id: actor_id.clone(),
                    value: tracker.resolved_value(),
                })
            })
            .collect()
    }

    pub fn add_value(&mut self, value: StateValue, actor_id: &ActorId) -> Result<Vec<Operation>> {
        self.tracker_mut(actor_id).add(value)
    }

    pub fn remove_value(&mut self, value: StateValue, actor_id: &ActorId) -> Result<Vec<Operation>> {
        self.tracker_mut(actor_id).remove(value)
    }

    /// Reconcile every actor that has an entry for this state in `snapshot`.
    pub fn synchronize(&mut self, snapshot: &Snapshot) -> Vec<StateChange> {
        let name = self.name.clone();
        let mut changes = Vec::new();
        for (actor_id, state) in snapshot.entries_for(&name) {
            changes.extend(self.tracker_mut(actor_id).synchronize(state));
        }
        changes
    }

    /// Release pending ids of an actor whose outbound batch was dropped.
    pub fn abandon<'a>(&mut self, actor_id: &ActorId, ids: impl IntoIterator<Item = &'a OperationId>) {
        if let Some(tracker) = self.trackers.get_mut(actor_id) {
            tracker.abandon(ids);
        }
    }

    /// Replay an operation in arrival order (canonical-store side).
    pub fn apply_operation(&mut self, op: &Operation) -> Option<StateChange> {
        self.tracker_mut(&op.actor_id).apply_operation(op)
    }

    /// Every actor's state in the wire shape.
    pub fn actor_snapshots(&self) -> impl Iterator<Item = (&ActorId, ActorStateSnapshot)> {
        self.trackers
            .iter()
            .map(|(actor_id, tracker)| (actor_id, tracker.to_snapshot()))
    }

    /// Drop every per-actor tracker.
    pub fn reset(&mut self) {
        self.trackers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use serde_json::json;

    fn alice() -> ActorId {
        ActorId::new("alice")
    }

    fn bob() -> ActorId {
        ActorId::new("bob")
    }

    #[test]
    fn test_defaults_for_unknown_actor() {
        let set = MultiActorTracker::new("votes", Policy::Set);
        assert_eq!(set.get_value(&alice()), ResolvedValue::Set(vec![]));

        for policy in [
            Policy::FirstWriterWins,
            Policy::LastWriterWins,
            Policy::LastWriterWinsNullable,
        ] {
            let register = MultiActorTracker::new("choice", policy);
            assert_eq!(register.get_value(&alice()), ResolvedValue::Register(None));
        }
    }

    #[test]
    fn test_get_values_omits_silent_actors() {
        let mut tracker = MultiActorTracker::new("votes", Policy::Set);
        tracker.add_value("a".into(), &alice()).unwrap();
        tracker.remove_value("a".into(), &alice()).unwrap();

        let values = tracker.get_values(&[alice(), bob()]);
        assert_eq!(
            values,
            vec![ActorValue {
                actor_id: alice(),
                value: ResolvedValue::Set(vec![]),
            }]
        );
    }

    #[test]
    fn test_unknown_policy_name_fails() {
        assert!(matches!(
            MultiActorTracker::from_policy_name("votes", "quorum"),
            Err(StateError::UnknownPolicy(_))
        ));
        let tracker = MultiActorTracker::from_policy_name("votes", "lww").unwrap();
        assert_eq!(tracker.policy(), Policy::LastWriterWins);
    }

    #[test]
    fn test_synchronize_fans_out_per_actor() {
        let mut tracker = MultiActorTracker::new("choice", Policy::LastWriterWins);
        let snapshot = Snapshot::from_value(&json!({
            "alice": { "choice": { "adds": [{"value": "a", "ids": ["1"]}], "removes": [] } },
            "bob": { "choice": { "adds": [{"value": "b", "ids": ["2"]}], "removes": [] } },
            "carol": { "other": { "adds": [{"value": "c", "ids": ["3"]}], "removes": [] } }
        }))
        .unwrap();

        let changes = tracker.synchronize(&snapshot);
        assert_eq!(changes.len(), 2);
        assert_eq!(tracker.get_value(&bob()), ResolvedValue::Register(Some("b".into())));
        assert!(tracker.tracker(&ActorId::new("carol")).is_none());

        assert!(tracker.synchronize(&snapshot).is_empty());
    }

    #[test]
    fn test_typed_tracker_passes_kind_to_actors() {
        let mut tracker = MultiActorTracker::new("score", Policy::LastWriterWins).with_kind(ValueKind::Number);
        assert!(tracker.add_value("high".into(), &alice()).is_err());
        assert!(tracker.add_value(7i64.into(), &alice()).is_ok());
    }

    #[test]
    fn test_reset_drops_actors() {
        let mut tracker = MultiActorTracker::new("votes", Policy::Set);
        tracker.add_value("a".into(), &alice()).unwrap();
        tracker.reset();
        assert_eq!(tracker.actors().count(), 0);
        assert_eq!(tracker.get_value(&alice()), ResolvedValue::Set(vec![]));
    }
}

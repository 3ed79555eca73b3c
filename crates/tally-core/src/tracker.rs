//! Per-actor state tracker
//!
//! A `StateTracker` holds one actor's writes to one state name as a list of
//! add entries and a set of tombstoned operation ids. Tombstones only grow,
//! so a retracted id can never come back under redelivery. The resolved
//! value is recomputed from `(adds, tombstones, policy)` on every read.

use crate::error::{Result, StateError};
use crate::operation::{ActorId, Operation, OperationId, OperationKind};
use crate::policy::Policy;
use crate::snapshot::{ActorStateSnapshot, SnapshotAdd};
use crate::value::{ResolvedValue, StateValue, ValueKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A candidate value and every operation id that proposed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEntry {
    pub value: StateValue,
    pub ids: BTreeSet<OperationId>,
}

/// A change in one actor's resolved value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub name: String,
    pub actor_id: ActorId,
    pub old: ResolvedValue,
    pub new: ResolvedValue,
}

#[derive(Clone, Debug)]
pub struct StateTracker {
    name: String,
    actor_id: ActorId,
    policy: Policy,
    kind: Option<ValueKind>,
    adds: Vec<AddEntry>,
    tombstones: BTreeSet<OperationId>,
    /// Ids minted here that no snapshot has mentioned yet.
    unacknowledged: BTreeSet<OperationId>,
}

impl StateTracker {
    pub fn new(name: impl Into<String>, actor_id: ActorId, policy: Policy) -> Self {
        Self {
            name: name.into(),
            actor_id,
            policy,
            kind: None,
            adds: Vec::new(),
            tombstones: BTreeSet::new(),
            unacknowledged: BTreeSet::new(),
        }
    }

    /// Pin the scalar kind accepted by this tracker.
    pub fn with_kind(mut self, kind: Option<ValueKind>) -> Self {
        self.kind = kind;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn adds(&self) -> &[AddEntry] {
        &self.adds
    }

    pub fn tombstones(&self) -> &BTreeSet<OperationId> {
        &self.tombstones
    }

    pub fn is_tombstoned(&self, id: &OperationId) -> bool {
        self.tombstones.contains(id)
    }

    /// Whether `id` was generated locally and not yet seen in a snapshot.
    pub fn is_unacknowledged(&self, id: &OperationId) -> bool {
        self.unacknowledged.contains(id)
    }

    fn is_live(&self, entry: &AddEntry) -> bool {
        entry.ids.iter().any(|id| !self.tombstones.contains(id))
    }

    fn live_ids(&self, entry: &AddEntry) -> Vec<OperationId> {
        entry
            .ids
            .iter()
            .filter(|id| !self.tombstones.contains(*id))
            .cloned()
            .collect()
    }

    fn live_entries(&self) -> impl Iterator<Item = &AddEntry> {
        self.adds.iter().filter(move |entry| self.is_live(entry))
    }

    /// The policy-resolved value.
    pub fn resolved_value(&self) -> ResolvedValue {
        match self.policy {
            Policy::Set => {
                let mut values: Vec<StateValue> = Vec::new();
                for entry in self.live_entries() {
                    if !values.contains(&entry.value) {
                        values.push(entry.value.clone());
                    }
                }
                ResolvedValue::Set(values)
            }
            Policy::FirstWriterWins => {
                ResolvedValue::Register(self.live_entries().next().map(|e| e.value.clone()))
            }
            Policy::LastWriterWins | Policy::LastWriterWinsNullable => {
                ResolvedValue::Register(self.live_entries().last().map(|e| e.value.clone()))
            }
        }
    }

    fn check_kind(&self, value: &StateValue) -> Result<()> {
        match self.kind {
            Some(expected) if expected != value.kind() => Err(StateError::ValueKindMismatch {
                name: self.name.clone(),
                expected,
                found: value.kind(),
            }),
            _ => Ok(()),
        }
    }

    fn tombstone_entry(&mut self, index: usize) -> Vec<OperationId> {
        let ids = self.live_ids(&self.adds[index]);
        self.tombstones.extend(ids.iter().cloned());
        ids
    }

    fn push_local_add(&mut self, value: StateValue) -> Operation {
        let op = Operation::add(self.name.clone(), self.actor_id.clone(), value, self.policy);
        self.adds.push(AddEntry {
            value: op.value.clone(),
            ids: BTreeSet::from([op.id.clone()]),
        });
        self.unacknowledged.insert(op.id.clone());
        debug!(state = %self.name, actor = %self.actor_id, id = %op.id, value = %op.value, "local add");
        op
    }

    /// Propose `value`. An empty result means the call was a no-op.
    pub fn add(&mut self, value: StateValue) -> Result<Vec<Operation>> {
        self.check_kind(&value)?;

        match self.policy {
            Policy::Set => {
                if self.live_entries().any(|entry| entry.value == value) {
                    return Ok(Vec::new());
                }
            }
            Policy::FirstWriterWins => {
                if self.live_entries().next().is_some() {
                    return Ok(Vec::new());
                }
            }
            Policy::LastWriterWins | Policy::LastWriterWinsNullable => {
                let live: Vec<usize> = (0..self.adds.len())
                    .filter(|&i| self.is_live(&self.adds[i]))
                    .collect();
                for index in live {
                    self.tombstone_entry(index);
                }
            }
        }

        Ok(vec![self.push_local_add(value)])
    }

    /// Retract `value`. An empty result means the call was a no-op.
    pub fn remove(&mut self, value: StateValue) -> Result<Vec<Operation>> {
        self.check_kind(&value)?;

        let targets = match self.policy {
            Policy::FirstWriterWins | Policy::LastWriterWins => return Ok(Vec::new()),
            Policy::Set => {
                let matching: Vec<usize> = (0..self.adds.len())
                    .filter(|&i| self.adds[i].value == value && self.is_live(&self.adds[i]))
                    .collect();
                matching
                    .into_iter()
                    .flat_map(|index| self.tombstone_entry(index))
                    .collect::<Vec<_>>()
            }
            Policy::LastWriterWinsNullable => {
                let current = (0..self.adds.len())
                    .rev()
                    .find(|&i| self.is_live(&self.adds[i]));
                match current {
                    Some(index) if self.adds[index].value == value => self.tombstone_entry(index),
                    _ => Vec::new(),
                }
            }
        };

        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let op = Operation::remove(
            self.name.clone(),
            self.actor_id.clone(),
            value,
            self.policy,
            targets,
        );
        debug!(state = %self.name, actor = %self.actor_id, id = %op.id, targets = op.targets.len(), "local remove");
        Ok(vec![op])
    }

    /// Forget that `ids` are pending, e.g. because their batch was never sent.
    ///
    /// The writes stay in place until a snapshot contradicts them.
    pub fn abandon<'a>(&mut self, ids: impl IntoIterator<Item = &'a OperationId>) {
        for id in ids {
            self.unacknowledged.remove(id);
        }
    }

    fn change_since(&self, old: ResolvedValue) -> Option<StateChange> {
        let new = self.resolved_value();
        (old != new).then(|| StateChange {
            name: self.name.clone(),
            actor_id: self.actor_id.clone(),
            old,
            new,
        })
    }

    /// Reconcile with the server's view of this actor's state.
    ///
    /// Removes are unioned into the tombstones, unseen adds are appended, and
    /// register policies then keep a single canonical add and tombstone the
    /// rest. Applying the same snapshot twice changes nothing.
    pub fn synchronize(&mut self, snapshot: &ActorStateSnapshot) -> Vec<StateChange> {
        let old = self.resolved_value();

        for id in &snapshot.removes {
            self.unacknowledged.remove(id);
            self.tombstones.insert(id.clone());
        }

        // Entry index for each snapshot add, in snapshot order.
        let mut positions = Vec::with_capacity(snapshot.adds.len());
        for add in &snapshot.adds {
            if let Some(expected) = self.kind {
                if add.value.kind() != expected {
                    warn!(state = %self.name, actor = %self.actor_id, value = %add.value, "skipping add of wrong kind");
                    continue;
                }
            }
            for id in &add.ids {
                self.unacknowledged.remove(id);
            }

            let existing = self
                .adds
                .iter()
                .position(|entry| add.ids.iter().any(|id| entry.ids.contains(id)));
            match existing {
                Some(index) => {
                    let entry = &mut self.adds[index];
                    if entry.value != add.value {
                        warn!(state = %self.name, actor = %self.actor_id, "snapshot add reuses an id with a different value");
                    }
                    entry.ids.extend(add.ids.iter().cloned());
                    positions.push(index);
                }
                None => {
                    self.adds.push(AddEntry {
                        value: add.value.clone(),
                        ids: add.ids.iter().cloned().collect(),
                    });
                    positions.push(self.adds.len() - 1);
                }
            }
        }

        if self.policy.is_register() {
            self.canonicalize(&positions);
        }

        self.change_since(old).into_iter().collect()
    }

    /// Keep one live add for register policies and tombstone every other one.
    ///
    /// FWW keeps the earliest live add the server has acknowledged and local
    /// writes yield to it. LWW/LWWN prefer the newest local write the server
    /// has not seen yet, since any snapshot predates it; otherwise the last
    /// live add the snapshot names.
    fn canonicalize(&mut self, positions: &[usize]) {
        let live = |tracker: &Self, index: usize| tracker.is_live(&tracker.adds[index]);

        let canonical = match self.policy {
            Policy::Set => return,
            Policy::FirstWriterWins => (0..self.adds.len())
                .find(|&i| {
                    live(self, i)
                        && self.adds[i]
                            .ids
                            .iter()
                            .any(|id| !self.unacknowledged.contains(id))
                })
                .or_else(|| (0..self.adds.len()).find(|&i| live(self, i))),
            Policy::LastWriterWins | Policy::LastWriterWinsNullable => (0..self.adds.len())
                .rev()
                .find(|&i| {
                    live(self, i)
                        && self.adds[i]
                            .ids
                            .iter()
                            .all(|id| self.unacknowledged.contains(id))
                })
                .or_else(|| positions.iter().rev().copied().find(|&i| live(self, i)))
                .or_else(|| (0..self.adds.len()).rev().find(|&i| live(self, i))),
        };

        let Some(canonical) = canonical else {
            return;
        };
        for index in 0..self.adds.len() {
            if index != canonical && live(self, index) {
                let retracted = self.tombstone_entry(index);
                for id in &retracted {
                    self.unacknowledged.remove(id);
                }
                debug!(state = %self.name, actor = %self.actor_id, count = retracted.len(), "retracted non-canonical add");
            }
        }
    }

    /// Apply an operation in arrival order, as the canonical store does.
    ///
    /// Returns the resulting change, if any. Operations for another state,
    /// actor or policy are ignored.
    pub fn apply_operation(&mut self, op: &Operation) -> Option<StateChange> {
        if op.name != self.name || op.actor_id != self.actor_id || op.policy != self.policy {
            warn!(state = %self.name, actor = %self.actor_id, op = %op.id, "ignoring operation for another tracker");
            return None;
        }
        if self.check_kind(&op.value).is_err() {
            warn!(state = %self.name, op = %op.id, "ignoring operation of wrong kind");
            return None;
        }

        let old = self.resolved_value();
        match op.kind {
            OperationKind::Add => {
                if self.tombstones.contains(&op.id)
                    || self.adds.iter().any(|entry| entry.ids.contains(&op.id))
                {
                    return None;
                }
                let rejected = match self.policy {
                    Policy::Set => false,
                    Policy::FirstWriterWins => self.live_entries().next().is_some(),
                    Policy::LastWriterWins | Policy::LastWriterWinsNullable => {
                        let live: Vec<usize> = (0..self.adds.len())
                            .filter(|&i| self.is_live(&self.adds[i]))
                            .collect();
                        for index in live {
                            self.tombstone_entry(index);
                        }
                        false
                    }
                };
                self.adds.push(AddEntry {
                    value: op.value.clone(),
                    ids: BTreeSet::from([op.id.clone()]),
                });
                if rejected {
                    self.tombstones.insert(op.id.clone());
                }
            }
            OperationKind::Remove => {
                if !self.policy.supports_remove() {
                    warn!(state = %self.name, op = %op.id, policy = %self.policy, "remove not supported");
                    return None;
                }
                self.tombstones.extend(op.targets.iter().cloned());
            }
        }
        self.change_since(old)
    }

    /// Render this tracker's state in the wire shape.
    pub fn to_snapshot(&self) -> ActorStateSnapshot {
        ActorStateSnapshot {
            adds: self
                .live_entries()
                .map(|entry| SnapshotAdd {
                    value: entry.value.clone(),
                    ids: self.live_ids(entry),
                })
                .collect(),
            removes: self.tombstones.iter().cloned().collect(),
        }
    }
}

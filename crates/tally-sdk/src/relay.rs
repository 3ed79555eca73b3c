//! In-memory canonical store for tests and simulations.
//!
//! Plays the server: operations are applied in arrival order and every
//! accepted batch publishes a fresh full snapshot to subscribers.

use crate::error::TransportError;
use crate::summary::InitialResponseState;
use crate::transport::{OperationSink, OutboundBatch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tally_core::{MultiActorTracker, Operation, Policy, Snapshot};
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub struct MemoryRelay {
    trackers: Mutex<BTreeMap<String, MultiActorTracker>>,
    batches: Mutex<Vec<OutboundBatch>>,
    snapshot_tx: broadcast::Sender<String>,
    offline: AtomicBool,
}

impl MemoryRelay {
    pub fn new() -> Self {
        let (snapshot_tx, _) = broadcast::channel(100);
        Self {
            trackers: Mutex::new(BTreeMap::new()),
            batches: Mutex::new(Vec::new()),
            snapshot_tx,
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every send fails with `TransportError::Disconnected`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Receive the JSON snapshot published after every accepted batch.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.snapshot_tx.subscribe()
    }

    fn apply(&self, op: &Operation) {
        let mut trackers = self.trackers.lock();
        let tracker = trackers
            .entry(op.name.clone())
            .or_insert_with(|| MultiActorTracker::new(op.name.clone(), op.policy));
        if tracker.policy() != op.policy {
            warn!(state = %op.name, expected = %tracker.policy(), found = %op.policy, "rejecting operation with mismatched policy");
            return;
        }
        tracker.apply_operation(op);
    }

    /// Accept seeds carried by a message creation payload.
    ///
    /// Each seed becomes a server-minted add. Seeds for states missing from
    /// `policies` are dropped.
    pub fn accept_initial_states(&self, states: &[InitialResponseState], policies: &[(String, Policy)]) {
        for state in states {
            let Some((_, policy)) = policies.iter().find(|(name, _)| *name == state.name) else {
                warn!(state = %state.name, "dropping seed for unknown state");
                continue;
            };
            let op = Operation::add(state.name.clone(), state.actor_id.clone(), state.value.clone(), *policy);
            self.apply(&op);
        }
        self.publish();
    }

    /// The canonical view.
    pub fn snapshot(&self) -> Snapshot {
        let trackers = self.trackers.lock();
        let mut snapshot = Snapshot::new();
        for (name, tracker) in trackers.iter() {
            for (actor_id, state) in tracker.actor_snapshots() {
                snapshot.insert(actor_id.clone(), name.clone(), state);
            }
        }
        snapshot
    }

    pub fn snapshot_json(&self) -> String {
        self.snapshot().to_value().to_string()
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(self.snapshot_json());
    }

    /// Batches accepted so far, in arrival order.
    pub fn batches(&self) -> Vec<OutboundBatch> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationSink for MemoryRelay {
    async fn schedule_send(&self, batch: OutboundBatch) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        for op in batch.operations() {
            self.apply(op);
        }
        debug!(operations = batch.len(), "relay accepted batch");
        self.batches.lock().push(batch);
        self.publish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::OutboundEntry;
    use tally_core::{ActorId, ResolvedValue, StateChange};

    fn entry(op: Operation) -> OutboundEntry {
        OutboundEntry {
            change: StateChange {
                name: op.name.clone(),
                actor_id: op.actor_id.clone(),
                old: ResolvedValue::Register(None),
                new: ResolvedValue::Register(Some(op.value.clone())),
            },
            operation: op,
        }
    }

    #[tokio::test]
    async fn test_relay_publishes_snapshot() {
        let relay = MemoryRelay::new();
        let mut snapshots = relay.subscribe();
        let op = Operation::add("choice", ActorId::new("alice"), "a".into(), Policy::FirstWriterWins);

        relay.schedule_send(OutboundBatch::new(vec![entry(op.clone())])).await.unwrap();

        let payload = snapshots.recv().await.unwrap();
        let snapshot = Snapshot::parse(&payload).unwrap();
        let state = snapshot.state_for(&ActorId::new("alice"), "choice").unwrap();
        assert_eq!(state.adds[0].ids, vec![op.id]);
        assert_eq!(relay.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_relay_rejects_batches() {
        let relay = MemoryRelay::new();
        relay.set_offline(true);
        let op = Operation::add("choice", ActorId::new("alice"), "a".into(), Policy::Set);

        let result = relay.schedule_send(OutboundBatch::new(vec![entry(op)])).await;
        assert_eq!(result, Err(TransportError::Disconnected));
        assert!(relay.snapshot().is_empty());
    }

    #[test]
    fn test_policy_mismatch_is_rejected() {
        let relay = MemoryRelay::new();
        relay.apply(&Operation::add("choice", ActorId::new("alice"), "a".into(), Policy::Set));
        relay.apply(&Operation::add("choice", ActorId::new("bob"), "b".into(), Policy::LastWriterWins));

        let snapshot = relay.snapshot();
        assert!(snapshot.state_for(&ActorId::new("bob"), "choice").is_none());
    }
}

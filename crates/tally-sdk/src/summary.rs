//! Response summary: the per-message owner of every registered state.
//!
//! Local writes are applied immediately and queued; a single debounce timer
//! flushes the queue as one batch, so a gesture that issues a remove and an
//! add in the same tick goes out as one unit. Snapshots from the server are
//! fanned out to every registered state.

use crate::config::SummaryConfig;
use crate::events::{ChangeOrigin, SummaryEvent};
use crate::transport::{
    IdentityProvider, OperationSink, OutboundBatch, OutboundEntry, SendDecision, SendHook,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tally_core::{
    ActorId, ActorValue, MultiActorTracker, Operation, OperationKind, Policy, ResolvedValue,
    Result, Snapshot, StateChange, StateError, StateValue, ValueKind,
};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A value declared when a message is first authored, before any snapshot.
///
/// Seeds travel with the message creation payload and are validated by the
/// server; they never enter the trackers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialResponseState {
    pub name: String,
    pub actor_id: ActorId,
    pub value: StateValue,
}

#[derive(Default)]
struct SummaryInner {
    trackers: BTreeMap<String, MultiActorTracker>,
    pending: Vec<OutboundEntry>,
    flush_timer: Option<JoinHandle<()>>,
    /// Bumped on every arm and cancel so a stale timer cannot clear a newer slot.
    timer_generation: u64,
    snapshot: Option<Snapshot>,
    initial_states: Vec<InitialResponseState>,
    send_hook: Option<Arc<dyn SendHook>>,
}

impl SummaryInner {
    fn tracker(&self, name: &str) -> Result<&MultiActorTracker> {
        self.trackers
            .get(name)
            .ok_or_else(|| StateError::UnregisteredState(name.to_string()))
    }

    fn tracker_mut(&mut self, name: &str) -> Result<&mut MultiActorTracker> {
        self.trackers
            .get_mut(name)
            .ok_or_else(|| StateError::UnregisteredState(name.to_string()))
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
        }
        self.timer_generation += 1;
    }

    /// Release the pending ids of a batch that will never be sent.
    fn abandon(&mut self, entries: &[OutboundEntry]) {
        for entry in entries {
            let op = &entry.operation;
            if let Some(tracker) = self.trackers.get_mut(&op.name) {
                tracker.abandon(&op.actor_id, [&op.id]);
            }
        }
    }
}

/// Owns one `MultiActorTracker` per registered state of a shared message.
pub struct ResponseStateManager<S: OperationSink> {
    inner: Arc<Mutex<SummaryInner>>,
    sink: Arc<S>,
    identity: Arc<dyn IdentityProvider>,
    config: SummaryConfig,
    event_tx: broadcast::Sender<SummaryEvent>,
}

impl<S: OperationSink> ResponseStateManager<S> {
    pub fn new(identity: Arc<dyn IdentityProvider>, sink: Arc<S>, config: SummaryConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(Mutex::new(SummaryInner::default())),
            sink,
            identity,
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    pub fn current_actor_id(&self) -> ActorId {
        self.identity.current_actor_id()
    }

    /// Subscribe to change and flush events.
    pub fn subscribe(&self) -> broadcast::Receiver<SummaryEvent> {
        self.event_tx.subscribe()
    }

    /// Install a hook that may cancel a batch right before it is sent.
    pub fn set_send_hook(&self, hook: impl SendHook + 'static) {
        self.inner.lock().send_hook = Some(Arc::new(hook));
    }

    pub fn clear_send_hook(&self) {
        self.inner.lock().send_hook = None;
    }

    /// Register a state name with its merge policy.
    ///
    /// Registering again with the same policy is a no-op; a different policy
    /// is a `PolicyConflict`. If a snapshot was already received the new
    /// state is synchronized against it right away.
    pub fn register_state(&self, name: impl Into<String>, policy: Policy) -> Result<()> {
        self.register(name.into(), policy, None)
    }

    /// Like `register_state`, additionally pinning the value kind.
    pub fn register_typed_state(
        &self,
        name: impl Into<String>,
        policy: Policy,
        kind: ValueKind,
    ) -> Result<()> {
        self.register(name.into(), policy, Some(kind))
    }

    fn register(&self, name: String, policy: Policy, kind: Option<ValueKind>) -> Result<()> {
        let changes = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.trackers.get(&name) {
                if existing.policy() != policy {
                    return Err(StateError::PolicyConflict {
                        name,
                        registered: existing.policy(),
                        requested: policy,
                    });
                }
                return Ok(());
            }

            let mut tracker = MultiActorTracker::new(name.clone(), policy);
            if let Some(kind) = kind {
                tracker = tracker.with_kind(kind);
            }
            let changes = match &inner.snapshot {
                Some(snapshot) => tracker.synchronize(snapshot),
                None => Vec::new(),
            };
            debug!(state = %name, %policy, late = inner.snapshot.is_some(), "registered state");
            inner.trackers.insert(name, tracker);
            changes
        };

        self.emit_changes(changes, ChangeOrigin::Remote);
        Ok(())
    }

    /// Registered state names and their policies.
    pub fn registered_states(&self) -> Vec<(String, Policy)> {
        self.inner
            .lock()
            .trackers
            .iter()
            .map(|(name, tracker)| (name.clone(), tracker.policy()))
            .collect()
    }

    /// Add `value` to a state on behalf of the current actor.
    pub fn add_state(&self, name: &str, value: impl Into<StateValue>) -> Result<Vec<Operation>> {
        let actor_id = self.current_actor_id();
        self.mutate(name, value.into(), &actor_id, OperationKind::Add)
    }

    pub fn add_state_for(
        &self,
        name: &str,
        value: impl Into<StateValue>,
        actor_id: &ActorId,
    ) -> Result<Vec<Operation>> {
        self.mutate(name, value.into(), actor_id, OperationKind::Add)
    }

    /// Remove `value` from a state on behalf of the current actor.
    pub fn remove_state(&self, name: &str, value: impl Into<StateValue>) -> Result<Vec<Operation>> {
        let actor_id = self.current_actor_id();
        self.mutate(name, value.into(), &actor_id, OperationKind::Remove)
    }

    pub fn remove_state_for(
        &self,
        name: &str,
        value: impl Into<StateValue>,
        actor_id: &ActorId,
    ) -> Result<Vec<Operation>> {
        self.mutate(name, value.into(), actor_id, OperationKind::Remove)
    }

    fn mutate(
        &self,
        name: &str,
        value: StateValue,
        actor_id: &ActorId,
        kind: OperationKind,
    ) -> Result<Vec<Operation>> {
        let (change, ops) = {
            let mut inner = self.inner.lock();
            let tracker = inner.tracker_mut(name)?;
            let old = tracker.get_value(actor_id);
            let ops = match kind {
                OperationKind::Add => tracker.add_value(value, actor_id)?,
                OperationKind::Remove => tracker.remove_value(value, actor_id)?,
            };
            if ops.is_empty() {
                return Ok(ops);
            }

            let change = StateChange {
                name: name.to_string(),
                actor_id: actor_id.clone(),
                old,
                new: tracker.get_value(actor_id),
            };
            inner.pending.extend(ops.iter().map(|op| OutboundEntry {
                operation: op.clone(),
                change: change.clone(),
            }));
            self.arm_flush_timer(&mut inner);
            (change, ops)
        };

        if change.old != change.new {
            self.emit(SummaryEvent::StateChanged {
                change,
                origin: ChangeOrigin::Local,
            });
        }
        Ok(ops)
    }

    fn arm_flush_timer(&self, inner: &mut SummaryInner) {
        if inner.flush_timer.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime; pending operations wait for flush_now");
            return;
        };

        inner.timer_generation += 1;
        let generation = inner.timer_generation;
        let weak = Arc::downgrade(&self.inner);
        let sink = Arc::clone(&self.sink);
        let events = self.event_tx.clone();
        let delay = self.config.flush_delay();

        debug!(delay_ms = self.config.flush_delay_ms, "armed flush timer");
        inner.flush_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // The manager is gone; nothing to flush.
            let Some(inner) = weak.upgrade() else {
                return;
            };
            flush_pending(inner, sink, events, Some(generation)).await;
        }));
    }

    /// Whether a flush is currently scheduled.
    pub fn has_scheduled_flush(&self) -> bool {
        self.inner.lock().flush_timer.is_some()
    }

    /// Operations waiting for the next flush, in call order.
    pub fn pending_operations(&self) -> Vec<Operation> {
        self.inner
            .lock()
            .pending
            .iter()
            .map(|entry| entry.operation.clone())
            .collect()
    }

    /// Send the pending batch now instead of waiting for the timer.
    pub async fn flush_now(&self) {
        self.inner.lock().cancel_timer();
        flush_pending(
            Arc::clone(&self.inner),
            Arc::clone(&self.sink),
            self.event_tx.clone(),
            None,
        )
        .await;
    }

    /// Drop the pending batch without sending it.
    ///
    /// Local values are kept until a snapshot contradicts them. Returns the
    /// number of discarded operations.
    pub fn cancel_pending(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            inner.cancel_timer();
            let entries = std::mem::take(&mut inner.pending);
            inner.abandon(&entries);
            entries.len()
        };
        if discarded > 0 {
            debug!(operations = discarded, "discarded pending batch");
            self.emit(SummaryEvent::BatchDiscarded {
                operations: discarded,
            });
        }
        discarded
    }

    /// Cancel the timer and discard the batch; used on teardown.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.cancel_timer();
        inner.pending.clear();
    }

    /// Resolved value of `name` for one actor.
    pub fn get_state(&self, name: &str, actor_id: &ActorId) -> Result<ResolvedValue> {
        Ok(self.inner.lock().tracker(name)?.get_value(actor_id))
    }

    /// Resolved value of `name` for the current actor.
    pub fn get_own_state(&self, name: &str) -> Result<ResolvedValue> {
        self.get_state(name, &self.current_actor_id())
    }

    /// Values of `name` for the actors that have responded.
    pub fn get_states(&self, name: &str, actor_ids: &[ActorId]) -> Result<Vec<ActorValue>> {
        Ok(self.inner.lock().tracker(name)?.get_values(actor_ids))
    }

    /// Apply a JSON snapshot payload. Returns whether any value changed.
    ///
    /// An unreadable payload is logged and ignored.
    pub fn parse_snapshot(&self, payload: &str) -> bool {
        match Snapshot::parse(payload) {
            Ok(snapshot) => self.apply_snapshot(snapshot),
            Err(err) => {
                warn!(error = %err, "ignoring unreadable snapshot");
                false
            }
        }
    }

    /// Reconcile every registered state with `snapshot`.
    ///
    /// State names in the snapshot that were never registered are ignored.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> bool {
        let changes = {
            let mut inner = self.inner.lock();
            let mut changes = Vec::new();
            for tracker in inner.trackers.values_mut() {
                changes.extend(tracker.synchronize(&snapshot));
            }
            inner.snapshot = Some(snapshot);
            inner.initial_states.clear();
            changes
        };

        debug!(changes = changes.len(), "applied snapshot");
        let changed = !changes.is_empty();
        self.emit_changes(changes, ChangeOrigin::Remote);
        changed
    }

    /// Drop every actor's state from every tracker.
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            for tracker in inner.trackers.values_mut() {
                tracker.reset();
            }
        }
        info!("reset response summary");
        self.emit(SummaryEvent::Reset);
    }

    /// The snapshot part was detached from the message.
    pub fn handle_snapshot_part_removed(&self) {
        self.inner.lock().snapshot = None;
        self.reset();
    }

    /// Declare the current actor's initial value for a state.
    pub fn add_initial_response_state(&self, name: &str, value: impl Into<StateValue>) -> Result<()> {
        let actor_id = self.current_actor_id();
        self.add_initial_response_state_for(name, value, &actor_id)
    }

    pub fn add_initial_response_state_for(
        &self,
        name: &str,
        value: impl Into<StateValue>,
        actor_id: &ActorId,
    ) -> Result<()> {
        let value = value.into();
        let mut inner = self.inner.lock();
        let tracker = inner.tracker(name)?;
        if let Some(expected) = tracker.kind() {
            if expected != value.kind() {
                return Err(StateError::ValueKindMismatch {
                    name: name.to_string(),
                    expected,
                    found: value.kind(),
                });
            }
        }
        inner.initial_states.push(InitialResponseState {
            name: name.to_string(),
            actor_id: actor_id.clone(),
            value,
        });
        Ok(())
    }

    /// Seeds declared since creation; cleared by the first snapshot.
    pub fn initial_response_states(&self) -> Vec<InitialResponseState> {
        self.inner.lock().initial_states.clone()
    }

    /// Seeds rendered for the message creation payload.
    pub fn initial_response_payload(&self) -> Value {
        let states = self.inner.lock().initial_states.clone();
        Value::Array(
            states
                .iter()
                .map(|state| {
                    json!({
                        "actor_id": state.actor_id.as_str(),
                        "name": state.name,
                        "value": state.value.to_json(),
                    })
                })
                .collect(),
        )
    }

    /// The local view of every registered state in the wire shape.
    pub fn to_snapshot(&self) -> Snapshot {
        let inner = self.inner.lock();
        let mut snapshot = Snapshot::new();
        for (name, tracker) in &inner.trackers {
            for (actor_id, state) in tracker.actor_snapshots() {
                snapshot.insert(actor_id.clone(), name.clone(), state);
            }
        }
        snapshot
    }

    fn emit(&self, event: SummaryEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_changes(&self, changes: Vec<StateChange>, origin: ChangeOrigin) {
        for change in changes {
            self.emit(SummaryEvent::StateChanged { change, origin });
        }
    }
}

impl<S: OperationSink> Drop for ResponseStateManager<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Take the pending batch and hand it to the sink.
///
/// `generation` identifies the timer that fired, if any; the timer slot is
/// only cleared when it still belongs to that timer.
async fn flush_pending<S: OperationSink>(
    inner: Arc<Mutex<SummaryInner>>,
    sink: Arc<S>,
    events: broadcast::Sender<SummaryEvent>,
    generation: Option<u64>,
) {
    let (batch, hook) = {
        let mut guard = inner.lock();
        if generation.is_some_and(|g| g == guard.timer_generation) {
            guard.flush_timer = None;
        }
        let entries = std::mem::take(&mut guard.pending);
        (OutboundBatch::new(entries), guard.send_hook.clone())
    };
    if batch.is_empty() {
        return;
    }

    if let Some(hook) = hook {
        if hook.before_send(&batch) == SendDecision::Cancel {
            inner.lock().abandon(&batch.entries);
            debug!(operations = batch.len(), "send hook canceled batch");
            let _ = events.send(SummaryEvent::BatchDiscarded {
                operations: batch.len(),
            });
            return;
        }
    }

    let operations = batch.len();
    let entries = batch.entries.clone();
    match sink.schedule_send(batch).await {
        Ok(()) => {
            debug!(operations, "flushed batch");
            let _ = events.send(SummaryEvent::BatchFlushed { operations });
        }
        Err(err) => {
            // Never delivered: the next snapshot decides.
            inner.lock().abandon(&entries);
            warn!(error = %err, operations, "transport rejected batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MemoryRelay;
    use std::time::Duration;

    fn manager() -> ResponseStateManager<MemoryRelay> {
        ResponseStateManager::new(
            Arc::new(ActorId::new("alice")),
            Arc::new(MemoryRelay::new()),
            SummaryConfig::default(),
        )
    }

    #[test]
    fn test_register_same_policy_is_noop() {
        let summary = manager();
        summary.register_state("choice", Policy::Set).unwrap();
        summary.register_state("choice", Policy::Set).unwrap();
        assert_eq!(summary.registered_states().len(), 1);
    }

    #[test]
    fn test_register_conflicting_policy_fails() {
        let summary = manager();
        summary.register_state("choice", Policy::Set).unwrap();
        let err = summary
            .register_state("choice", Policy::LastWriterWins)
            .unwrap_err();
        assert_eq!(
            err,
            StateError::PolicyConflict {
                name: "choice".to_string(),
                registered: Policy::Set,
                requested: Policy::LastWriterWins,
            }
        );
    }

    #[test]
    fn test_unregistered_state_is_an_error() {
        let summary = manager();
        assert!(matches!(
            summary.get_state("missing", &ActorId::new("alice")),
            Err(StateError::UnregisteredState(_))
        ));
        assert!(summary.get_states("missing", &[]).is_err());
        assert!(summary.add_state("missing", "x").is_err());
    }

    #[test]
    fn test_local_write_without_runtime_stays_pending() {
        let summary = manager();
        summary.register_state("choice", Policy::Set).unwrap();
        summary.add_state("choice", "a").unwrap();

        assert!(!summary.has_scheduled_flush());
        assert_eq!(summary.pending_operations().len(), 1);
        assert_eq!(
            summary.get_own_state("choice").unwrap(),
            ResolvedValue::Set(vec!["a".into()])
        );
    }

    #[test]
    fn test_manual_flush_without_timer() {
        let relay = Arc::new(MemoryRelay::new());
        let summary = ResponseStateManager::new(
            Arc::new(ActorId::new("alice")),
            Arc::clone(&relay),
            SummaryConfig::default(),
        );
        summary.register_state("choice", Policy::Set).unwrap();
        summary.add_state("choice", "a").unwrap();
        summary.add_state("choice", "b").unwrap();

        tokio_test::block_on(summary.flush_now());
        assert_eq!(relay.batch_count(), 1);
        assert!(summary.pending_operations().is_empty());
    }

    #[test]
    fn test_noop_write_queues_nothing() {
        let summary = manager();
        summary.register_state("flag", Policy::FirstWriterWins).unwrap();
        summary.add_state("flag", true).unwrap();
        assert!(summary.add_state("flag", false).unwrap().is_empty());
        assert_eq!(summary.pending_operations().len(), 1);
    }

    #[test]
    fn test_late_registration_catches_up() {
        let summary = manager();
        let changed = summary.parse_snapshot(
            r#"{"bob": {"choice": {"adds": [{"value": "x", "ids": ["1"]}], "removes": []}}}"#,
        );
        assert!(!changed);

        let mut events = summary.subscribe();
        summary.register_state("choice", Policy::LastWriterWins).unwrap();
        assert_eq!(
            summary.get_state("choice", &ActorId::new("bob")).unwrap(),
            ResolvedValue::Register(Some("x".into()))
        );
        assert!(matches!(
            events.try_recv(),
            Ok(SummaryEvent::StateChanged {
                origin: ChangeOrigin::Remote,
                ..
            })
        ));
    }

    #[test]
    fn test_unreadable_snapshot_is_ignored() {
        let summary = manager();
        summary.register_state("choice", Policy::Set).unwrap();
        assert!(!summary.parse_snapshot("not json"));
        assert!(!summary.parse_snapshot("[1, 2, 3]"));
    }

    #[test]
    fn test_part_removal_resets_trackers() {
        let summary = manager();
        summary.register_state("choice", Policy::Set).unwrap();
        summary.parse_snapshot(
            r#"{"bob": {
                "choice": {"adds": [{"value": "x", "ids": ["1"]}], "removes": []},
                "other": {"adds": [{"value": "y", "ids": ["2"]}], "removes": []}
            }}"#,
        );
        summary.handle_snapshot_part_removed();

        assert_eq!(
            summary.get_state("choice", &ActorId::new("bob")).unwrap(),
            ResolvedValue::Set(vec![])
        );
        // No stored snapshot to catch up from.
        summary.register_state("other", Policy::Set).unwrap();
        assert!(summary.get_states("other", &[ActorId::new("bob")]).unwrap().is_empty());
    }

    #[test]
    fn test_initial_states_cleared_by_first_snapshot() {
        let summary = manager();
        summary
            .register_typed_state("rating", Policy::LastWriterWins, ValueKind::Number)
            .unwrap();

        assert!(summary.add_initial_response_state("rating", "five").is_err());
        summary.add_initial_response_state("rating", 5i64).unwrap();
        assert_eq!(
            summary.initial_response_payload(),
            json!([{"actor_id": "alice", "name": "rating", "value": 5}])
        );

        summary.parse_snapshot("{}");
        assert!(summary.initial_response_states().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let relay = Arc::new(MemoryRelay::new());
        let summary = ResponseStateManager::new(
            Arc::new(ActorId::new("alice")),
            Arc::clone(&relay),
            SummaryConfig::default(),
        );
        summary.register_state("choice", Policy::Set).unwrap();
        summary.add_state("choice", "a").unwrap();
        assert!(summary.has_scheduled_flush());

        drop(summary);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(relay.batch_count(), 0);
    }
}

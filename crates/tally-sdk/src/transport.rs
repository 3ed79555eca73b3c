//! Collaborator seams: outbound transport, identity and the pre-send hook.

use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tally_core::{ActorId, Operation, StateChange};

/// One locally generated operation and the change it caused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundEntry {
    pub operation: Operation,
    pub change: StateChange,
}

/// Everything accumulated during one debounce window, in call order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutboundBatch {
    pub entries: Vec<OutboundEntry>,
}

impl OutboundBatch {
    pub fn new(entries: Vec<OutboundEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.entries.iter().map(|entry| &entry.operation)
    }

    /// The operations as a JSON array, ready to become a message part body.
    pub fn to_json(&self) -> Result<Value, TransportError> {
        let operations: Vec<&Operation> = self.operations().collect();
        Ok(serde_json::to_value(operations)?)
    }
}

/// Transport that carries outbound batches to the server.
///
/// Delivery, retries and confirmation are the transport's business.
#[async_trait]
pub trait OperationSink: Send + Sync + 'static {
    async fn schedule_send(&self, batch: OutboundBatch) -> Result<(), TransportError>;
}

/// Resolves the identity local writes are attributed to.
pub trait IdentityProvider: Send + Sync {
    fn current_actor_id(&self) -> ActorId;
}

impl IdentityProvider for ActorId {
    fn current_actor_id(&self) -> ActorId {
        self.clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendDecision {
    Send,
    Cancel,
}

/// Inspects a batch right before it is sent and may cancel it.
pub trait SendHook: Send + Sync {
    fn before_send(&self, batch: &OutboundBatch) -> SendDecision;
}

impl<F> SendHook for F
where
    F: Fn(&OutboundBatch) -> SendDecision + Send + Sync,
{
    fn before_send(&self, batch: &OutboundBatch) -> SendDecision {
        self(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Policy, ResolvedValue};

    #[test]
    fn test_batch_to_json_lists_operations() {
        let operation = Operation::add("flag", ActorId::new("alice"), true.into(), Policy::LastWriterWins);
        let change = StateChange {
            name: "flag".to_string(),
            actor_id: ActorId::new("alice"),
            old: ResolvedValue::Register(None),
            new: ResolvedValue::Register(Some(true.into())),
        };
        let batch = OutboundBatch::new(vec![OutboundEntry { operation, change }]);

        let json = batch.to_json().unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(1));
        assert_eq!(json[0]["operation"], "add");
        assert_eq!(json[0]["type"], "last-writer-wins");
    }

    #[test]
    fn test_closure_hook() {
        let hook = |batch: &OutboundBatch| {
            if batch.is_empty() {
                SendDecision::Cancel
            } else {
                SendDecision::Send
            }
        };
        assert_eq!(hook.before_send(&OutboundBatch::default()), SendDecision::Cancel);
    }
}

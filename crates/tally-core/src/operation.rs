//! Operations: immutable records of one proposed state change.

use crate::policy::Policy;
use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of an actor (a participant identity).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque operation id. Unique per operation, not meant to be sorted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id for a locally generated operation.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Remove,
}

/// One state change proposed by one actor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    #[serde(rename = "operation")]
    pub kind: OperationKind,
    pub name: String,
    pub actor_id: ActorId,
    pub value: StateValue,
    /// Policy of the tracker that generated this operation.
    #[serde(rename = "type")]
    pub policy: Policy,
    /// For removes: the add operations being retracted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<OperationId>,
}

impl Operation {
    pub fn add(name: impl Into<String>, actor_id: ActorId, value: StateValue, policy: Policy) -> Self {
        Self {
            id: OperationId::generate(),
            kind: OperationKind::Add,
            name: name.into(),
            actor_id,
            value,
            policy,
            targets: Vec::new(),
        }
    }

    pub fn remove(
        name: impl Into<String>,
        actor_id: ActorId,
        value: StateValue,
        policy: Policy,
        targets: Vec<OperationId>,
    ) -> Self {
        Self {
            id: OperationId::generate(),
            kind: OperationKind::Remove,
            name: name.into(),
            actor_id,
            value,
            policy,
            targets,
        }
    }

    pub fn is_add(&self) -> bool {
        self.kind == OperationKind::Add
    }
}

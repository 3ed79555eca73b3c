//! Wire representation of the server's full response-state view.
//!
//! ```text
//! { "<actor>": { "<state>": { "adds": [{"value": v, "ids": [..]}], "removes": [..] } } }
//! ```
//!
//! Parsing is lenient below the top level: malformed entries are dropped
//! with a warning so one corrupt entry never blocks the rest of the merge.

use crate::error::{Result, StateError};
use crate::operation::{ActorId, OperationId};
use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// One add entry as reported by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotAdd {
    pub value: StateValue,
    pub ids: Vec<OperationId>,
}

impl SnapshotAdd {
    pub fn new(value: impl Into<StateValue>, ids: impl IntoIterator<Item = OperationId>) -> Self {
        Self {
            value: value.into(),
            ids: ids.into_iter().collect(),
        }
    }
}

/// The server's view of one (actor, state name) pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorStateSnapshot {
    #[serde(default)]
    pub adds: Vec<SnapshotAdd>,
    #[serde(default)]
    pub removes: Vec<OperationId>,
}

impl ActorStateSnapshot {
    /// Parse one state entry. Returns `None` if the entry is not an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut state = ActorStateSnapshot::default();

        if let Some(adds) = object.get("adds").and_then(Value::as_array) {
            for add in adds {
                match parse_add(add) {
                    Some(add) => state.adds.push(add),
                    None => warn!(entry = %add, "skipping malformed snapshot add"),
                }
            }
        }

        if let Some(removes) = object.get("removes").and_then(Value::as_array) {
            for id in removes {
                match id.as_str() {
                    Some(id) => state.removes.push(OperationId::new(id)),
                    None => warn!(entry = %id, "skipping non-string remove id"),
                }
            }
        }

        Some(state)
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }
}

fn parse_add(value: &Value) -> Option<SnapshotAdd> {
    let object = value.as_object()?;
    let scalar = StateValue::from_json(object.get("value")?)?;
    let ids = object
        .get("ids")?
        .as_array()?
        .iter()
        .filter_map(|id| id.as_str().map(OperationId::new))
        .collect::<Vec<_>>();
    if ids.is_empty() {
        return None;
    }
    Some(SnapshotAdd { value: scalar, ids })
}

/// Full view: actor -> state name -> entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    actors: BTreeMap<ActorId, BTreeMap<String, ActorStateSnapshot>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON payload as delivered by the transport.
    pub fn parse(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(&value)
    }

    /// Parse an already-decoded payload.
    ///
    /// Only a non-object top level is an error; anything malformed beneath
    /// it is skipped.
    pub fn from_value(value: &Value) -> Result<Self> {
        let actors = value.as_object().ok_or_else(|| {
            StateError::InvalidSnapshot("top level must be an object".to_string())
        })?;

        let mut snapshot = Snapshot::new();
        for (actor, states) in actors {
            let Some(states) = states.as_object() else {
                warn!(actor = %actor, "skipping non-object actor entry");
                continue;
            };
            for (name, state) in states {
                match ActorStateSnapshot::from_value(state) {
                    Some(state) => snapshot.insert(ActorId::new(actor.as_str()), name.clone(), state),
                    None => warn!(actor = %actor, state = %name, "skipping non-object state entry"),
                }
            }
        }
        Ok(snapshot)
    }

    pub fn insert(&mut self, actor_id: ActorId, name: impl Into<String>, state: ActorStateSnapshot) {
        self.actors
            .entry(actor_id)
            .or_default()
            .insert(name.into(), state);
    }

    /// The entry for one actor and state name, if present.
    pub fn state_for(&self, actor_id: &ActorId, name: &str) -> Option<&ActorStateSnapshot> {
        self.actors.get(actor_id).and_then(|states| states.get(name))
    }

    /// Every actor that carries an entry for `name`.
    pub fn entries_for<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (&'a ActorId, &'a ActorStateSnapshot)> + 'a {
        self.actors
            .iter()
            .filter_map(move |(actor, states)| states.get(name).map(|state| (actor, state)))
    }

    pub fn actors(&self) -> impl Iterator<Item = &ActorId> {
        self.actors.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Render back into the wire shape.
    pub fn to_value(&self) -> Value {
        let mut actors = Map::new();
        for (actor, states) in &self.actors {
            let mut entries = Map::new();
            for (name, state) in states {
                let adds = state
                    .adds
                    .iter()
                    .map(|add| {
                        serde_json::json!({
                            "value": add.value.to_json(),
                            "ids": add.ids.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
                        })
                    })
                    .collect::<Vec<_>>();
                let removes = state
                    .removes
                    .iter()
                    .map(|id| Value::String(id.0.clone()))
                    .collect::<Vec<_>>();
                entries.insert(
                    name.clone(),
                    serde_json::json!({ "adds": adds, "removes": removes }),
                );
            }
            actors.insert(actor.0.clone(), Value::Object(entries));
        }
        Value::Object(actors)
    }
}

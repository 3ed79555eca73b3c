//! Scalar state values and policy-resolved views of them.

use crate::policy::Policy;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// The scalar kinds a state value can take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Number,
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Number => write!(f, "number"),
            ValueKind::String => write!(f, "string"),
        }
    }
}

/// A single scalar value proposed by an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(Number),
    String(String),
}

impl StateValue {
    /// Convert a JSON value, rejecting arrays, objects and null.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(StateValue::Bool(*b)),
            Value::Number(n) => Some(StateValue::Number(n.clone())),
            Value::String(s) => Some(StateValue::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Build a number value; `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        Number::from_f64(value).map(StateValue::Number)
    }

    pub fn to_json(&self) -> Value {
        match self {
            StateValue::Bool(b) => Value::Bool(*b),
            StateValue::Number(n) => Value::Number(n.clone()),
            StateValue::String(s) => Value::String(s.clone()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            StateValue::Bool(_) => ValueKind::Bool,
            StateValue::Number(_) => ValueKind::Number,
            StateValue::String(_) => ValueKind::String,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{}", b),
            StateValue::Number(n) => write!(f, "{}", n),
            StateValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(value)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<u64> for StateValue {
    fn from(value: u64) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Number(value.into())
    }
}

/// The current value of one actor's state, shaped by its policy.
///
/// Set states resolve to a list (possibly empty); the three register
/// policies resolve to at most one value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Set(Vec<StateValue>),
    Register(Option<StateValue>),
}

impl ResolvedValue {
    /// The value reported for an actor that never contributed.
    pub fn empty_for(policy: Policy) -> Self {
        if policy.is_register() {
            ResolvedValue::Register(None)
        } else {
            ResolvedValue::Set(Vec::new())
        }
    }

    pub fn as_set(&self) -> Option<&[StateValue]> {
        match self {
            ResolvedValue::Set(values) => Some(values),
            ResolvedValue::Register(_) => None,
        }
    }

    pub fn as_register(&self) -> Option<&StateValue> {
        match self {
            ResolvedValue::Register(value) => value.as_ref(),
            ResolvedValue::Set(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ResolvedValue::Set(values) => values.is_empty(),
            ResolvedValue::Register(value) => value.is_none(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ResolvedValue::Set(values) => Value::Array(values.iter().map(StateValue::to_json).collect()),
            ResolvedValue::Register(Some(value)) => value.to_json(),
            ResolvedValue::Register(None) => Value::Null,
        }
    }
}

impl fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_conversion() {
        assert_eq!(StateValue::from_json(&json!("frodo")), Some("frodo".into()));
        assert_eq!(StateValue::from_json(&json!(true)), Some(true.into()));
        assert_eq!(StateValue::from_json(&json!(3)), Some(3i64.into()));
        assert_eq!(StateValue::from_json(&json!(null)), None);
        assert_eq!(StateValue::from_json(&json!(["a"])), None);
        assert_eq!(StateValue::from_json(&json!({"a": 1})), None);
    }

    #[test]
    fn test_from_f64_rejects_nan() {
        assert!(StateValue::from_f64(f64::NAN).is_none());
        assert_eq!(
            StateValue::from_f64(1.5).map(|v| v.kind()),
            Some(ValueKind::Number)
        );
    }

    #[test]
    fn test_policy_defaults() {
        assert_eq!(ResolvedValue::empty_for(Policy::Set), ResolvedValue::Set(vec![]));
        assert_eq!(
            ResolvedValue::empty_for(Policy::FirstWriterWins),
            ResolvedValue::Register(None)
        );
        assert_eq!(ResolvedValue::empty_for(Policy::Set).to_json(), json!([]));
        assert_eq!(
            ResolvedValue::empty_for(Policy::LastWriterWinsNullable).to_json(),
            json!(null)
        );
    }

    #[test]
    fn test_resolved_serialization() {
        let set = ResolvedValue::Set(vec!["a".into(), 2i64.into()]);
        assert_eq!(serde_json::to_value(&set).unwrap(), json!(["a", 2]));

        let reg = ResolvedValue::Register(Some(false.into()));
        assert_eq!(serde_json::to_string(&reg).unwrap(), "false");
    }
}

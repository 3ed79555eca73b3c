//! Error types for the response-state engine.

use crate::policy::Policy;
use crate::value::ValueKind;
use thiserror::Error;

/// Errors raised by trackers and registrations.
///
/// Every variant except `InvalidSnapshot` is a configuration error: two
/// parts of the same program disagree about a state's schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Unknown state policy: {0}")]
    UnknownPolicy(String),

    #[error("State {name} is registered as {registered}, cannot re-register as {requested}")]
    PolicyConflict {
        name: String,
        registered: Policy,
        requested: Policy,
    },

    #[error("State is not registered: {0}")]
    UnregisteredState(String),

    #[error("Value kind mismatch for {name}: expected {expected}, found {found}")]
    ValueKindMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::InvalidSnapshot(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StateError>;

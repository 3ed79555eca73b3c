//! The four merge policies a state can be registered with.

use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Merge policy of a state name, fixed at registration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Every actor holds a set of distinct values.
    Set,
    /// The first value written sticks; it can never be removed.
    FirstWriterWins,
    /// Each write overwrites the previous one; there is no empty state.
    LastWriterWins,
    /// Like `LastWriterWins`, but the value can be explicitly cleared.
    LastWriterWinsNullable,
}

impl Policy {
    pub const ALL: [Policy; 4] = [
        Policy::Set,
        Policy::FirstWriterWins,
        Policy::LastWriterWins,
        Policy::LastWriterWinsNullable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Set => "set",
            Policy::FirstWriterWins => "first-writer-wins",
            Policy::LastWriterWins => "last-writer-wins",
            Policy::LastWriterWinsNullable => "last-writer-wins-nullable",
        }
    }

    /// Whether the policy holds at most one live value per actor.
    pub fn is_register(&self) -> bool {
        !matches!(self, Policy::Set)
    }

    /// Whether a local `remove` can ever change the value.
    pub fn supports_remove(&self) -> bool {
        matches!(self, Policy::Set | Policy::LastWriterWinsNullable)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(Policy::Set),
            "first-writer-wins" | "fww" => Ok(Policy::FirstWriterWins),
            "last-writer-wins" | "lww" => Ok(Policy::LastWriterWins),
            "last-writer-wins-nullable" | "lwwn" => Ok(Policy::LastWriterWinsNullable),
            other => Err(StateError::UnknownPolicy(other.to_string())),
        }
    }
}

//! Error types for the Tally SDK.

use thiserror::Error;

pub use tally_core::error::{Result, StateError};

/// Failure reported by a transport when handing off a batch.
///
/// The response summary logs these; retries belong to the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::SerializationError(err.to_string())
    }
}

//! Tally SDK - response summaries for shared messages
//!
//! A response summary attaches small pieces of eventually-consistent state
//! (votes, selections, status flags) from many participants to one
//! message. Local writes apply immediately and are batched to the
//! transport; server snapshots reconcile every participant's view.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tally_sdk::{ActorId, MemoryRelay, Policy, ResponseStateManager, SummaryConfig};
//!
//! let relay = Arc::new(MemoryRelay::new());
//! let summary = ResponseStateManager::new(
//!     Arc::new(ActorId::new("alice")),
//!     relay,
//!     SummaryConfig::default(),
//! );
//!
//! summary.register_state("selection", Policy::Set).unwrap();
//! summary.add_state("selection", "frodo").unwrap();
//!
//! let value = summary.get_own_state("selection").unwrap();
//! assert_eq!(value.as_set().map(|v| v.len()), Some(1));
//! ```
//!
//! # Architecture
//!
//! - [`summary`] - the `ResponseStateManager` and its flush timer
//! - [`transport`] - transport, identity and pre-send hook seams
//! - [`relay`] - in-memory canonical store for tests and simulations
//! - [`events`] - change notifications
//! - [`config`] - configuration
//! - [`error`] - error types

pub mod config;
pub mod error;
pub mod events;
pub mod relay;
pub mod summary;
pub mod transport;

// Re-exports for convenience
pub use config::{SummaryConfig, SummaryConfigBuilder};
pub use error::{Result, StateError, TransportError};
pub use events::{ChangeOrigin, SummaryEvent};
pub use relay::MemoryRelay;
pub use summary::{InitialResponseState, ResponseStateManager};
pub use transport::{
    IdentityProvider, OperationSink, OutboundBatch, OutboundEntry, SendDecision, SendHook,
};

// Re-export the engine types callers need.
pub use tally_core::{
    ActorId, ActorValue, MultiActorTracker, Operation, OperationId, OperationKind, Policy,
    ResolvedValue, Snapshot, StateChange, StateValue, ValueKind,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::SummaryConfig;
    pub use crate::events::SummaryEvent;
    pub use crate::summary::ResponseStateManager;
    pub use crate::transport::{IdentityProvider, OperationSink};
    pub use tally_core::{ActorId, Policy, ResolvedValue, StateValue};
}

//! # tally-core
//!
//! The merge engine behind Tally response summaries: many actors attach
//! small pieces of shared state (votes, selections, flags) to one message,
//! and every replica converges once the server's snapshot arrives.
//!
//! - [`operation`] - operations, actor and operation ids
//! - [`policy`] - the four merge policies
//! - [`value`] - scalar values and resolved views
//! - [`snapshot`] - the server snapshot wire shape
//! - [`tracker`] - per-actor CRDT state
//! - [`multi`] - per-state fan-out over actors
//! - [`error`] - error types

pub mod error;
pub mod multi;
pub mod operation;
pub mod policy;
pub mod snapshot;
pub mod tracker;
pub mod value;

pub use error::{Result, StateError};
pub use multi::{ActorValue, MultiActorTracker};
pub use operation::{ActorId, Operation, OperationId, OperationKind};
pub use policy::Policy;
pub use snapshot::{ActorStateSnapshot, Snapshot, SnapshotAdd};
pub use tracker::{AddEntry, StateChange, StateTracker};
pub use value::{ResolvedValue, StateValue, ValueKind};

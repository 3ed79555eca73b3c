//! Events emitted by a response summary.

use tally_core::StateChange;

/// Where a change in resolved value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A local `add_state`/`remove_state` call.
    Local,
    /// A server snapshot.
    Remote,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SummaryEvent {
    /// An actor's resolved value changed.
    StateChanged {
        change: StateChange,
        origin: ChangeOrigin,
    },
    /// A batch was handed to the transport.
    BatchFlushed { operations: usize },
    /// A pending batch was dropped without being sent.
    BatchDiscarded { operations: usize },
    /// Every tracker was reset.
    Reset,
}

//! Match-state model and the tracker that folds typed messages into it.

pub mod calls;
pub mod snapshot;
pub mod tracker;

use std::sync::Arc;

pub use calls::CallPriority;
pub use snapshot::{
    HandKnowledge, LastDiscard, MatchState, Meld, MeldKind, PendingCall, Phase, RiichiStatus,
    RiverTile, SeatState, TurnStep,
};
pub use tracker::{Tracker, TrackerConfig};

use crate::error::DesyncError;
use crate::protocol::CanonicalEvent;

/// Rebuilds a snapshot from an empty state by applying `events` in order.
pub fn replay<'a, I>(events: I) -> Result<MatchState, DesyncError>
where
    I: IntoIterator<Item = &'a CanonicalEvent>,
{
    let mut state = MatchState::default();
    for event in events {
        state.apply(event)?;
    }
    Ok(state)
}

/// The snapshot as published to concurrent readers after each emitted event.
#[derive(Debug, Clone, Default)]
pub struct SnapshotView {
    pub epoch: u64,
    /// Sequence number of the last event folded into `state` (0 before any event).
    pub seq: u64,
    pub state: Arc<MatchState>,
}

//! Agent-facing protocol: the canonical event vocabulary, the emitter that numbers confirmed
//! transitions, and the append-only log they land in.

pub mod emitter;
pub mod event;
pub mod log;

pub use emitter::Emitter;
pub use event::{CanonicalEvent, SequencedEvent, Transition, TransitionId};
pub use log::EventLog;

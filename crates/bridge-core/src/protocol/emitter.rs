use tracing::debug;

use super::event::{SequencedEvent, Transition, TransitionId};
use super::log::EventLog;

/// Numbers confirmed transitions and appends them to the match log.
///
/// Deduplication is by transition identity: anything whose id is not strictly greater than the
/// last emitted id was already emitted (or superseded) and is dropped, whatever its content.
#[derive(Debug, Clone, Default)]
pub struct Emitter {
    last: Option<TransitionId>,
    log: EventLog,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn last_seq(&self) -> u64 {
        self.log.last_seq()
    }

    pub fn emit<I>(&mut self, transitions: I) -> Vec<SequencedEvent>
    where
        I: IntoIterator<Item = Transition>,
    {
        let mut out = Vec::new();
        for Transition { id, event } in transitions {
            if let Some(last) = self.last
                && id <= last
            {
                debug!(
                    "emitter.duplicate capture_seq={} fragment={} step={} type={}",
                    id.capture_seq,
                    id.fragment,
                    id.step,
                    event.type_name()
                );
                continue;
            }
            self.last = Some(id);
            out.push(self.log.append(event).clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CanonicalEvent;

    fn transition(capture_seq: u64, step: u16, actor: u8) -> Transition {
        Transition {
            id: TransitionId {
                capture_seq,
                fragment: 0,
                step,
            },
            event: CanonicalEvent::Reach { actor },
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_without_gaps() {
        let mut emitter = Emitter::new();
        let first = emitter.emit([transition(1, 0, 0), transition(1, 1, 1)]);
        let second = emitter.emit([transition(2, 0, 2)]);
        let seqs: Vec<u64> = first.iter().chain(&second).map(|e| e.seq).collect();
        assert_eq!(seqs, [1, 2, 3]);
        assert_eq!(emitter.last_seq(), 3);
    }

    #[test]
    fn repeated_transition_ids_emit_once() {
        let mut emitter = Emitter::new();
        assert_eq!(emitter.emit([transition(5, 0, 0)]).len(), 1);
        // Same id with different content is still the same transition.
        assert!(emitter.emit([transition(5, 0, 3)]).is_empty());
        assert!(emitter.emit([transition(4, 9, 0)]).is_empty());
        assert_eq!(emitter.emit([transition(5, 1, 0)]).len(), 1);
        assert_eq!(emitter.log().len(), 2);
    }
}

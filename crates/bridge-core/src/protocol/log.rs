use std::io::Write;

use anyhow::{Context, bail};

use super::event::{CanonicalEvent, SequencedEvent};
use crate::error::DesyncError;
use crate::state::{self, MatchState};

/// Append-only, gap-free record of one match's canonical events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: Vec<SequencedEvent>,
}

impl EventLog {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[SequencedEvent] {
        &self.events
    }

    pub fn last_seq(&self) -> u64 {
        self.events.len() as u64
    }

    /// Appends `event` with the next sequence number.
    pub fn append(&mut self, event: CanonicalEvent) -> &SequencedEvent {
        let seq = self.last_seq() + 1;
        self.events.push(SequencedEvent { seq, event });
        &self.events[self.events.len() - 1]
    }

    /// Events with `seq > since`.
    pub fn since(&self, since: u64) -> &[SequencedEvent] {
        let start = usize::try_from(since).unwrap_or(usize::MAX).min(self.events.len());
        &self.events[start..]
    }

    pub fn write_ndjson<W: Write>(&self, mut out: W) -> anyhow::Result<()> {
        for event in &self.events {
            serde_json::to_writer(&mut out, event)
                .with_context(|| format!("serialize event seq={}", event.seq))?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn to_ndjson(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        self.write_ndjson(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Parses an NDJSON log. Blank lines are skipped; sequence numbers must run 1, 2, ...
    pub fn from_ndjson(text: &str) -> anyhow::Result<Self> {
        let mut log = EventLog::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event: SequencedEvent = serde_json::from_str(line)
                .with_context(|| format!("line {}: invalid event", lineno + 1))?;
            let expected = log.last_seq() + 1;
            if event.seq != expected {
                bail!("line {}: expected seq {expected}, got {}", lineno + 1, event.seq);
            }
            log.events.push(event);
        }
        Ok(log)
    }

    /// Rebuilds the match state from an empty snapshot.
    pub fn replay(&self) -> Result<MatchState, DesyncError> {
        state::replay(self.events.iter().map(|e| &e.event))
    }
}

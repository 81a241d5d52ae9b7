//! Error taxonomy shared by every stage of the bridge.
//!
//! Each stage owns one enum. None of them is fatal on its own: the orchestrator decides whether
//! a failure drops a frame, forces a resync, degrades a decision to observe-only, or raises an
//! operator alert.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unknown message name, frame type or schema version. Expected noise.
    #[error("unsupported frame: {0}")]
    Unsupported(String),
    /// A recognized message whose bytes do not fit its schema.
    #[error("malformed {name}: {reason}")]
    Malformed { name: String, reason: String },
}

impl DecodeError {
    pub fn malformed(name: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DesyncError {
    /// The message was held back; the tracker may still catch up on its own.
    #[error("desync candidate ({buffered} buffered): {reason}")]
    Recoverable { reason: String, buffered: usize },
    /// The tracker is frozen until a full state broadcast arrives.
    #[error("unrecoverable desync: {reason}")]
    Unrecoverable { reason: String },
}

impl DesyncError {
    pub(crate) fn illegal(reason: impl Into<String>) -> Self {
        Self::Recoverable {
            reason: reason.into(),
            buffered: 0,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Recoverable { reason, .. } | Self::Unrecoverable { reason } => reason,
        }
    }

    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("agent timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("invalid agent reply: {0}")]
    InvalidReply(String),
    /// A newer event arrived before the reply; the reply (if any) was dropped.
    #[error("decision superseded by a newer event")]
    Superseded,
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("verification failed after {attempts} attempt(s): {reason}")]
    VerificationFailed { attempts: u32, reason: String },
    #[error("intent abandoned: {0}")]
    Abandoned(String),
    /// Another intent for the same decision point is still executing or verifying.
    #[error("an intent for this decision point is already in flight")]
    Busy,
}

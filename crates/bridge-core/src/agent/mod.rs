//! Agent gateway: decision-point detection, the newline-delimited agent protocol, transports,
//! and the cancellable query that turns a reply into an [`ActionIntent`].

pub mod decision;
pub mod gateway;
pub mod transport;
pub mod wire;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tile::Tile;

pub use decision::{ActionKind, DecisionKind, DecisionPoint, EventStamp, decision_point};
pub use gateway::{AgentConfig, AgentGateway, AgentTransport};
pub use transport::{AgentClient, HttpAgent, LineAgent};
pub use wire::{AgentReply, ReplyParseError, parse_reply, request_line};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    Discard { tile: Tile, tsumogiri: bool },
    /// Declare riichi by discarding `tile`.
    Riichi { tile: Tile },
    Chi { consumed: Vec<Tile> },
    Pon { consumed: Vec<Tile> },
    Daiminkan { consumed: Vec<Tile> },
    Ankan { consumed: Vec<Tile> },
    Kakan { tile: Tile },
    Hora,
    Ryukyoku,
    Nukidora,
    Pass,
}

impl AgentAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            AgentAction::Discard { .. } => ActionKind::Dahai,
            AgentAction::Riichi { .. } => ActionKind::Reach,
            AgentAction::Chi { .. } => ActionKind::Chi,
            AgentAction::Pon { .. } => ActionKind::Pon,
            AgentAction::Daiminkan { .. } => ActionKind::Daiminkan,
            AgentAction::Ankan { .. } => ActionKind::Ankan,
            AgentAction::Kakan { .. } => ActionKind::Kakan,
            AgentAction::Hora => ActionKind::Hora,
            AgentAction::Ryukyoku => ActionKind::Ryukyoku,
            AgentAction::Nukidora => ActionKind::Nukidora,
            AgentAction::Pass => ActionKind::None,
        }
    }
}

/// Optional scores an agent attaches to its reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_prob: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_in_prob: Option<f32>,
    /// Per-tile safety in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub safety: BTreeMap<Tile, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionIntent {
    pub decision: DecisionPoint,
    pub action: AgentAction,
    pub evaluation: Evaluation,
}

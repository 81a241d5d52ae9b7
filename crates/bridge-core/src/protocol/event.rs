use serde::{Deserialize, Serialize};

use crate::message::{CallEligibility, DrawReason, Seat, SelfOption};
use crate::state::MatchState;
use crate::tile::Tile;

/// One atomic game action in the agent-facing vocabulary. Field names follow the mjai
/// convention (`actor`, `target`, `pai`, `consumed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    StartGame {
        id: Seat,
        seat_count: u8,
        scores: Vec<i32>,
    },
    StartKyoku {
        bakaze: Tile,
        kyoku: u8,
        honba: u8,
        kyotaku: u8,
        oya: Seat,
        dora_marker: Tile,
        scores: Vec<i32>,
        /// Hidden seats carry 13 `?` tiles.
        tehais: Vec<Vec<Tile>>,
        wall: u8,
    },
    Tsumo {
        actor: Seat,
        pai: Tile,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<SelfOption>,
    },
    Dahai {
        actor: Seat,
        pai: Tile,
        tsumogiri: bool,
    },
    Reach {
        actor: Seat,
    },
    ReachAccepted {
        actor: Seat,
    },
    CallWindow {
        target: Seat,
        pai: Tile,
        eligible: Vec<CallEligibility>,
    },
    CallWindowClosed,
    Chi {
        actor: Seat,
        target: Seat,
        pai: Tile,
        consumed: Vec<Tile>,
    },
    Pon {
        actor: Seat,
        target: Seat,
        pai: Tile,
        consumed: Vec<Tile>,
    },
    Daiminkan {
        actor: Seat,
        target: Seat,
        pai: Tile,
        consumed: Vec<Tile>,
    },
    Ankan {
        actor: Seat,
        consumed: Vec<Tile>,
    },
    Kakan {
        actor: Seat,
        pai: Tile,
        consumed: Vec<Tile>,
    },
    Nukidora {
        actor: Seat,
        pai: Tile,
    },
    Dora {
        dora_marker: Tile,
    },
    Hora {
        actor: Seat,
        target: Seat,
        pai: Tile,
    },
    Ryukyoku {
        reason: DrawReason,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tenpai: Vec<Seat>,
    },
    EndKyoku {
        deltas: Vec<i32>,
        scores: Vec<i32>,
    },
    EndGame {
        scores: Vec<i32>,
    },
    Resync {
        state: Box<MatchState>,
    },
}

impl CanonicalEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            CanonicalEvent::StartGame { .. } => "start_game",
            CanonicalEvent::StartKyoku { .. } => "start_kyoku",
            CanonicalEvent::Tsumo { .. } => "tsumo",
            CanonicalEvent::Dahai { .. } => "dahai",
            CanonicalEvent::Reach { .. } => "reach",
            CanonicalEvent::ReachAccepted { .. } => "reach_accepted",
            CanonicalEvent::CallWindow { .. } => "call_window",
            CanonicalEvent::CallWindowClosed => "call_window_closed",
            CanonicalEvent::Chi { .. } => "chi",
            CanonicalEvent::Pon { .. } => "pon",
            CanonicalEvent::Daiminkan { .. } => "daiminkan",
            CanonicalEvent::Ankan { .. } => "ankan",
            CanonicalEvent::Kakan { .. } => "kakan",
            CanonicalEvent::Nukidora { .. } => "nukidora",
            CanonicalEvent::Dora { .. } => "dora",
            CanonicalEvent::Hora { .. } => "hora",
            CanonicalEvent::Ryukyoku { .. } => "ryukyoku",
            CanonicalEvent::EndKyoku { .. } => "end_kyoku",
            CanonicalEvent::EndGame { .. } => "end_game",
            CanonicalEvent::Resync { .. } => "resync",
        }
    }

    /// Seat performing the action, for events that have one.
    pub fn actor(&self) -> Option<Seat> {
        match self {
            CanonicalEvent::Tsumo { actor, .. }
            | CanonicalEvent::Dahai { actor, .. }
            | CanonicalEvent::Reach { actor }
            | CanonicalEvent::ReachAccepted { actor }
            | CanonicalEvent::Chi { actor, .. }
            | CanonicalEvent::Pon { actor, .. }
            | CanonicalEvent::Daiminkan { actor, .. }
            | CanonicalEvent::Ankan { actor, .. }
            | CanonicalEvent::Kakan { actor, .. }
            | CanonicalEvent::Nukidora { actor, .. }
            | CanonicalEvent::Hora { actor, .. } => Some(*actor),
            _ => None,
        }
    }

    /// Events after which no further action belongs to the same hand.
    pub fn ends_hand(&self) -> bool {
        matches!(
            self,
            CanonicalEvent::Hora { .. }
                | CanonicalEvent::Ryukyoku { .. }
                | CanonicalEvent::EndKyoku { .. }
                | CanonicalEvent::EndGame { .. }
                | CanonicalEvent::StartKyoku { .. }
                | CanonicalEvent::StartGame { .. }
                | CanonicalEvent::Resync { .. }
        )
    }
}

/// Tracker-assigned identity of a confirmed transition. One typed message may yield several
/// transitions (`step` 0, 1, ...); synthesized transitions reuse the origin that triggered them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransitionId {
    pub capture_seq: u64,
    pub fragment: u16,
    pub step: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub id: TransitionId,
    pub event: CanonicalEvent,
}

/// A canonical event with its match-scoped sequence number (1-based, gap free).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub event: CanonicalEvent,
}

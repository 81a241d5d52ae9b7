//! Typed application messages: the closed set of match-relevant variants the wire decoder
//! produces. The tracker owns a message only while folding it.

use serde::{Deserialize, Serialize};

use crate::state::MatchState;
use crate::tile::Tile;

pub type Seat = u8;

/// Identity of a raw frame within one capture connection. Fragments share a `capture_seq`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub capture_seq: u64,
    pub fragment: u16,
}

impl Origin {
    pub fn new(capture_seq: u64, fragment: u16) -> Self {
        Self {
            capture_seq,
            fragment,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub origin: Origin,
    pub message: TypedMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundId {
    pub bakaze: Tile,
    /// 1-based hand number within the wind.
    pub kyoku: u8,
    pub honba: u8,
    pub kyotaku: u8,
}

impl Default for RoundId {
    fn default() -> Self {
        Self {
            bakaze: Tile::EAST,
            kyoku: 1,
            honba: 0,
            kyotaku: 0,
        }
    }
}

/// Calls another seat may make on a discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Chi,
    Pon,
    Daiminkan,
    Ron,
}

impl CallKind {
    pub fn name(self) -> &'static str {
        match self {
            CallKind::Chi => "chi",
            CallKind::Pon => "pon",
            CallKind::Daiminkan => "daiminkan",
            CallKind::Ron => "ron",
        }
    }

    /// Tiles taken from the caller's own hand.
    pub fn consumed_len(self) -> usize {
        match self {
            CallKind::Chi | CallKind::Pon => 2,
            CallKind::Daiminkan => 3,
            CallKind::Ron => 0,
        }
    }
}

/// Actions the turn holder may take besides discarding, as offered with a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfOption {
    Riichi,
    Tsumo,
    Ankan,
    Kakan,
    Kyuushu,
    Nukidora,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEligibility {
    pub seat: Seat,
    pub kinds: Vec<CallKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReply {
    Pass,
    Call { kind: CallKind, consumed: Vec<Tile> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfKanKind {
    Ankan,
    Kakan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawReason {
    Exhaustive,
    NineTerminals,
    FourWinds,
    FourKans,
    FourRiichi,
    TripleRon,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedMessage {
    MatchStart {
        seat_count: u8,
        self_seat: Seat,
        scores: Vec<i32>,
    },
    Deal {
        round: RoundId,
        dealer: Seat,
        dora_marker: Tile,
        scores: Vec<i32>,
        /// The controlled seat's 13 starting tiles.
        hand: Vec<Tile>,
        wall: u8,
    },
    /// `tile` is [`Tile::UNKNOWN`] for seats other than the controlled one.
    Draw {
        seat: Seat,
        tile: Tile,
        options: Vec<SelfOption>,
    },
    Discard {
        seat: Seat,
        tile: Tile,
        tsumogiri: bool,
        riichi: bool,
    },
    CallWindow {
        discarder: Seat,
        tile: Tile,
        eligible: Vec<CallEligibility>,
    },
    CallResponse {
        seat: Seat,
        reply: CallReply,
    },
    CallTimeout,
    /// A call the server has already resolved (no per-seat responses were observed).
    Meld {
        seat: Seat,
        kind: CallKind,
        consumed: Vec<Tile>,
    },
    SelfKan {
        seat: Seat,
        kind: SelfKanKind,
        tile: Tile,
        consumed: Vec<Tile>,
    },
    Nukidora {
        seat: Seat,
    },
    DoraReveal {
        marker: Tile,
    },
    /// `target == seat` for a self-drawn win.
    Win {
        seat: Seat,
        target: Seat,
        tile: Tile,
    },
    ExhaustiveDraw {
        tenpai: Vec<Seat>,
    },
    AbortiveDraw {
        reason: DrawReason,
    },
    HandResult {
        deltas: Vec<i32>,
        scores: Vec<i32>,
    },
    MatchEnd {
        scores: Vec<i32>,
    },
    Resync(Box<MatchState>),
}

impl TypedMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            TypedMessage::MatchStart { .. } => "match_start",
            TypedMessage::Deal { .. } => "deal",
            TypedMessage::Draw { .. } => "draw",
            TypedMessage::Discard { .. } => "discard",
            TypedMessage::CallWindow { .. } => "call_window",
            TypedMessage::CallResponse { .. } => "call_response",
            TypedMessage::CallTimeout => "call_timeout",
            TypedMessage::Meld { .. } => "meld",
            TypedMessage::SelfKan { .. } => "self_kan",
            TypedMessage::Nukidora { .. } => "nukidora",
            TypedMessage::DoraReveal { .. } => "dora_reveal",
            TypedMessage::Win { .. } => "win",
            TypedMessage::ExhaustiveDraw { .. } => "exhaustive_draw",
            TypedMessage::AbortiveDraw { .. } => "abortive_draw",
            TypedMessage::HandResult { .. } => "hand_result",
            TypedMessage::MatchEnd { .. } => "match_end",
            TypedMessage::Resync(_) => "resync",
        }
    }
}

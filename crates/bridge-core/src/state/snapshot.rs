use serde::{Deserialize, Serialize};

use crate::error::DesyncError;
use crate::message::{CallEligibility, CallKind, DrawReason, RoundId, Seat, SelfOption};
use crate::protocol::CanonicalEvent;
use crate::tile::{Tile, remove_tile};

pub const RIICHI_COST: i32 = 1000;
const MAX_DORA_MARKERS: usize = 5;
const STARTING_HAND: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStep {
    Draw { rinshan: bool },
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AwaitingMatchStart,
    DealingHand,
    InTurnPlay(TurnStep),
    AwaitingCallResolution,
    HandEnd { result_recorded: bool },
    MatchEnd,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::AwaitingMatchStart => "awaiting_match_start",
            Phase::DealingHand => "dealing_hand",
            Phase::InTurnPlay(TurnStep::Draw { .. }) => "in_turn_play.draw",
            Phase::InTurnPlay(TurnStep::Discard) => "in_turn_play.discard",
            Phase::AwaitingCallResolution => "awaiting_call_resolution",
            Phase::HandEnd { .. } => "hand_end",
            Phase::MatchEnd => "match_end",
        }
    }

    fn in_hand(self) -> bool {
        matches!(self, Phase::InTurnPlay(_) | Phase::AwaitingCallResolution)
    }
}

/// What is known about a seat's concealed tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandKnowledge {
    /// Exact tiles, kept sorted.
    Known(Vec<Tile>),
    Hidden { count: u8 },
}

impl HandKnowledge {
    pub fn len(&self) -> usize {
        match self {
            HandKnowledge::Known(tiles) => tiles.len(),
            HandKnowledge::Hidden { count } => *count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tiles(&self) -> Option<&[Tile]> {
        match self {
            HandKnowledge::Known(tiles) => Some(tiles),
            HandKnowledge::Hidden { .. } => None,
        }
    }

    pub fn contains(&self, tile: Tile) -> bool {
        match self {
            HandKnowledge::Known(tiles) => tiles.contains(&tile),
            HandKnowledge::Hidden { count } => *count > 0,
        }
    }

    fn with_added(&self, tile: Tile) -> HandKnowledge {
        match self {
            HandKnowledge::Known(tiles) => {
                let mut tiles = tiles.clone();
                tiles.push(tile);
                tiles.sort();
                HandKnowledge::Known(tiles)
            }
            HandKnowledge::Hidden { count } => HandKnowledge::Hidden {
                count: count.saturating_add(1),
            },
        }
    }

    fn without(&self, taken: &[Tile]) -> Result<HandKnowledge, String> {
        match self {
            HandKnowledge::Known(tiles) => {
                let mut tiles = tiles.clone();
                for tile in taken {
                    if !remove_tile(&mut tiles, *tile) {
                        return Err(format!("tile {tile} not in hand"));
                    }
                }
                Ok(HandKnowledge::Known(tiles))
            }
            HandKnowledge::Hidden { count } => {
                let n = taken.len() as u8;
                if *count < n {
                    return Err(format!("hidden hand has {count} tiles, needs {n}"));
                }
                Ok(HandKnowledge::Hidden { count: count - n })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeldKind {
    Chi,
    Pon,
    Daiminkan,
    Ankan,
    Kakan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meld {
    pub kind: MeldKind,
    pub tiles: Vec<Tile>,
    pub called: Option<Tile>,
    pub from: Option<Seat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiverTile {
    pub tile: Tile,
    pub tsumogiri: bool,
    pub riichi: bool,
    pub called: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiichiStatus {
    #[default]
    Off,
    Declared,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatState {
    pub hand: HandKnowledge,
    /// Tile drawn this turn, until it is discarded or the turn moves on.
    pub drawn: Option<Tile>,
    pub melds: Vec<Meld>,
    pub river: Vec<RiverTile>,
    pub riichi: RiichiStatus,
    pub nuki: Vec<Tile>,
}

impl SeatState {
    fn dealt(hand: HandKnowledge) -> Self {
        Self {
            hand,
            drawn: None,
            melds: Vec::new(),
            river: Vec::new(),
            riichi: RiichiStatus::Off,
            nuki: Vec::new(),
        }
    }

    fn empty() -> Self {
        Self::dealt(HandKnowledge::Hidden { count: 0 })
    }

    /// Concealed tile count this seat must hold at the given step.
    pub fn expected_concealed(&self, discard_step: bool) -> usize {
        let base = if discard_step { 14 } else { 13 };
        base - 3 * self.melds.len()
    }

    pub fn is_closed(&self) -> bool {
        self.melds.iter().all(|m| m.kind == MeldKind::Ankan)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCall {
    pub target: Seat,
    pub pai: Tile,
    pub eligible: Vec<CallEligibility>,
}

impl PendingCall {
    pub fn kinds_for(&self, seat: Seat) -> Option<&[CallKind]> {
        self.eligible
            .iter()
            .find(|e| e.seat == seat)
            .map(|e| e.kinds.as_slice())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastDiscard {
    pub seat: Seat,
    pub tile: Tile,
}

/// Authoritative model of one match. [`MatchState::apply`] is its only mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub phase: Phase,
    pub seat_count: u8,
    pub self_seat: Seat,
    pub round: RoundId,
    pub dealer: Seat,
    pub turn: Seat,
    pub wall_remaining: u8,
    pub dora_markers: Vec<Tile>,
    pub scores: Vec<i32>,
    pub seats: Vec<SeatState>,
    pub pending_call: Option<PendingCall>,
    pub last_discard: Option<LastDiscard>,
    /// Options offered with the controlled seat's current draw.
    pub self_options: Vec<SelfOption>,
}

impl Default for MatchState {
    fn default() -> Self {
        Self {
            phase: Phase::AwaitingMatchStart,
            seat_count: 4,
            self_seat: 0,
            round: RoundId::default(),
            dealer: 0,
            turn: 0,
            wall_remaining: 0,
            dora_markers: Vec::new(),
            scores: Vec::new(),
            seats: Vec::new(),
            pending_call: None,
            last_discard: None,
            self_options: Vec::new(),
        }
    }
}

fn illegal(reason: impl Into<String>) -> DesyncError {
    DesyncError::illegal(reason)
}

fn ensure(cond: bool, reason: impl FnOnce() -> String) -> Result<(), DesyncError> {
    if cond { Ok(()) } else { Err(illegal(reason())) }
}

impl MatchState {
    pub fn next_seat(&self, seat: Seat) -> Seat {
        (seat + 1) % self.seat_count.max(1)
    }

    /// Turn distance from `from` to `to` (1 = the next seat).
    pub fn distance(&self, from: Seat, to: Seat) -> u8 {
        let n = self.seat_count.max(1);
        (to % n + n - from % n) % n
    }

    pub fn seat(&self, seat: Seat) -> Option<&SeatState> {
        if seat >= self.seat_count {
            return None;
        }
        self.seats.get(seat as usize)
    }

    pub fn own(&self) -> Option<&SeatState> {
        self.seat(self.self_seat)
    }

    pub fn step(&self) -> Option<TurnStep> {
        match self.phase {
            Phase::InTurnPlay(step) => Some(step),
            _ => None,
        }
    }

    /// Riichi declared on the most recent discard and not yet paid for.
    pub fn pending_reach(&self) -> Option<Seat> {
        let seat = self.last_discard?.seat;
        (self.seat(seat)?.riichi == RiichiStatus::Declared).then_some(seat)
    }

    fn seat_checked(&self, seat: Seat) -> Result<&SeatState, DesyncError> {
        self.seat(seat)
            .ok_or_else(|| illegal(format!("seat {seat} out of range")))
    }

    fn check_count(&self, seat: Seat, discard_step: bool) -> Result<(), DesyncError> {
        let state = self.seat_checked(seat)?;
        let expected = state.expected_concealed(discard_step);
        ensure(state.hand.len() == expected, || {
            format!(
                "seat {seat} holds {} concealed tiles, expected {expected}",
                state.hand.len()
            )
        })
    }

    fn check_scores(&self, scores: &[i32], what: &str) -> Result<(), DesyncError> {
        ensure(scores.len() == self.seat_count as usize, || {
            format!("{what} has {} entries for {} seats", scores.len(), self.seat_count)
        })
    }

    /// Whether `actor` may claim `target`'s discard of `pai` with `kind` right now.
    fn check_claim(
        &self,
        actor: Seat,
        target: Seat,
        pai: Tile,
        kind: CallKind,
    ) -> Result<(), DesyncError> {
        self.seat_checked(actor)?;
        self.seat_checked(target)?;
        ensure(actor != target, || format!("seat {actor} claims its own discard"))?;
        ensure(self.pending_reach().is_none(), || {
            "claim before pending riichi was accepted".to_string()
        })?;
        match self.phase {
            Phase::AwaitingCallResolution => {
                let pending = self
                    .pending_call
                    .as_ref()
                    .ok_or_else(|| illegal("call window without pending call"))?;
                ensure(pending.target == target && pending.pai == pai, || {
                    format!("claim of {pai} from seat {target} does not match the open window")
                })?;
                let offered = pending.kinds_for(actor).unwrap_or(&[]);
                ensure(offered.contains(&kind), || {
                    format!("seat {actor} was not offered {}", kind.name())
                })
            }
            Phase::InTurnPlay(TurnStep::Draw { rinshan: false }) => {
                let last = self
                    .last_discard
                    .ok_or_else(|| illegal("claim with no discard to claim"))?;
                ensure(last.seat == target && last.tile == pai, || {
                    format!("claim of {pai} from seat {target} does not match last discard")
                })
            }
            other => Err(illegal(format!("claim during {}", other.name()))),
        }
    }

    fn check_consumed(kind: CallKind, pai: Tile, consumed: &[Tile]) -> Result<(), DesyncError> {
        ensure(consumed.len() == kind.consumed_len(), || {
            format!("{} consumes {} tiles, got {}", kind.name(), kind.consumed_len(), consumed.len())
        })?;
        match kind {
            CallKind::Chi => {
                let suit = pai.suit().filter(|s| *s != crate::tile::Suit::Honor);
                ensure(suit.is_some(), || format!("chi on honor {pai}"))?;
                let mut numbers = vec![pai.number().unwrap_or(0)];
                for tile in consumed {
                    ensure(tile.suit() == suit, || format!("chi mixes suits with {tile}"))?;
                    numbers.push(tile.number().unwrap_or(0));
                }
                numbers.sort_unstable();
                ensure(
                    numbers[1] == numbers[0] + 1 && numbers[2] == numbers[1] + 1,
                    || format!("chi {consumed:?} + {pai} is not a run"),
                )
            }
            CallKind::Pon | CallKind::Daiminkan => ensure(
                consumed.iter().all(|t| t.same_kind(pai)),
                || format!("{} {consumed:?} does not match {pai}", kind.name()),
            ),
            CallKind::Ron => Ok(()),
        }
    }

    /// Folds one canonical event into the snapshot. An event that is illegal for the current
    /// state is rejected before any field changes.
    pub fn apply(&mut self, event: &CanonicalEvent) -> Result<(), DesyncError> {
        match event {
            CanonicalEvent::StartGame {
                id,
                seat_count,
                scores,
            } => {
                ensure(
                    matches!(self.phase, Phase::AwaitingMatchStart | Phase::MatchEnd),
                    || format!("start_game during {}", self.phase.name()),
                )?;
                ensure(matches!(seat_count, 3 | 4), || {
                    format!("unsupported seat count {seat_count}")
                })?;
                ensure(id < seat_count, || format!("self seat {id} out of range"))?;
                ensure(scores.len() == *seat_count as usize, || {
                    "start_game scores do not match seat count".to_string()
                })?;
                *self = MatchState {
                    phase: Phase::DealingHand,
                    seat_count: *seat_count,
                    self_seat: *id,
                    scores: scores.clone(),
                    seats: (0..*seat_count).map(|_| SeatState::empty()).collect(),
                    ..MatchState::default()
                };
            }

            CanonicalEvent::StartKyoku {
                bakaze,
                kyoku,
                honba,
                kyotaku,
                oya,
                dora_marker,
                scores,
                tehais,
                wall,
            } => {
                ensure(
                    matches!(
                        self.phase,
                        Phase::DealingHand
                            | Phase::HandEnd {
                                result_recorded: true
                            }
                    ),
                    || format!("start_kyoku during {}", self.phase.name()),
                )?;
                self.seat_checked(*oya)?;
                self.check_scores(scores, "start_kyoku scores")?;
                ensure(tehais.len() == self.seat_count as usize, || {
                    "start_kyoku tehais do not match seat count".to_string()
                })?;
                let mut seats = Vec::with_capacity(tehais.len());
                for (seat, tehai) in tehais.iter().enumerate() {
                    ensure(tehai.len() == STARTING_HAND, || {
                        format!("seat {seat} dealt {} tiles", tehai.len())
                    })?;
                    let hidden = tehai.iter().all(|t| t.is_unknown());
                    let hand = if seat == self.self_seat as usize || !hidden {
                        ensure(tehai.iter().all(|t| !t.is_unknown()), || {
                            format!("seat {seat} hand is partially hidden")
                        })?;
                        let mut tiles = tehai.clone();
                        tiles.sort();
                        HandKnowledge::Known(tiles)
                    } else {
                        HandKnowledge::Hidden {
                            count: STARTING_HAND as u8,
                        }
                    };
                    seats.push(SeatState::dealt(hand));
                }
                self.round = RoundId {
                    bakaze: *bakaze,
                    kyoku: *kyoku,
                    honba: *honba,
                    kyotaku: *kyotaku,
                };
                self.dealer = *oya;
                self.turn = *oya;
                self.wall_remaining = *wall;
                self.dora_markers = vec![*dora_marker];
                self.scores = scores.clone();
                self.seats = seats;
                self.pending_call = None;
                self.last_discard = None;
                self.self_options.clear();
                self.phase = Phase::InTurnPlay(TurnStep::Draw { rinshan: false });
            }

            CanonicalEvent::Tsumo {
                actor,
                pai,
                options,
            } => {
                ensure(
                    matches!(self.phase, Phase::InTurnPlay(TurnStep::Draw { .. })),
                    || format!("tsumo during {}", self.phase.name()),
                )?;
                ensure(*actor == self.turn, || {
                    format!("seat {actor} draws on seat {}'s turn", self.turn)
                })?;
                ensure(self.wall_remaining > 0, || "tsumo from an empty wall".to_string())?;
                ensure(self.pending_reach().is_none(), || {
                    "tsumo before pending riichi was accepted".to_string()
                })?;
                self.check_count(*actor, false)?;
                let seat = self.seat_checked(*actor)?;
                if matches!(seat.hand, HandKnowledge::Known(_)) {
                    ensure(!pai.is_unknown(), || {
                        format!("seat {actor} has a known hand but drew an unknown tile")
                    })?;
                }
                let hand = seat.hand.with_added(*pai);

                let seat = &mut self.seats[*actor as usize];
                seat.hand = hand;
                seat.drawn = Some(*pai);
                self.wall_remaining -= 1;
                self.last_discard = None;
                self.self_options = if *actor == self.self_seat {
                    options.clone()
                } else {
                    Vec::new()
                };
                self.phase = Phase::InTurnPlay(TurnStep::Discard);
            }

            CanonicalEvent::Dahai {
                actor,
                pai,
                tsumogiri,
            } => {
                ensure(
                    self.phase == Phase::InTurnPlay(TurnStep::Discard),
                    || format!("dahai during {}", self.phase.name()),
                )?;
                ensure(*actor == self.turn, || {
                    format!("seat {actor} discards on seat {}'s turn", self.turn)
                })?;
                ensure(!pai.is_unknown(), || "discard of an unknown tile".to_string())?;
                self.check_count(*actor, true)?;
                let seat = self.seat_checked(*actor)?;
                if *tsumogiri
                    && let Some(drawn) = seat.drawn
                    && !drawn.is_unknown()
                {
                    ensure(drawn == *pai, || {
                        format!("tsumogiri of {pai} but seat {actor} drew {drawn}")
                    })?;
                }
                let hand = seat.hand.without(&[*pai]).map_err(illegal)?;
                let riichi = seat.riichi == RiichiStatus::Declared;

                let next = self.next_seat(*actor);
                let seat = &mut self.seats[*actor as usize];
                seat.hand = hand;
                seat.drawn = None;
                seat.river.push(RiverTile {
                    tile: *pai,
                    tsumogiri: *tsumogiri,
                    riichi,
                    called: false,
                });
                self.last_discard = Some(LastDiscard {
                    seat: *actor,
                    tile: *pai,
                });
                self.self_options.clear();
                self.turn = next;
                self.phase = Phase::InTurnPlay(TurnStep::Draw { rinshan: false });
            }

            CanonicalEvent::Reach { actor } => {
                ensure(
                    self.phase == Phase::InTurnPlay(TurnStep::Discard),
                    || format!("reach during {}", self.phase.name()),
                )?;
                ensure(*actor == self.turn, || format!("seat {actor} declares out of turn"))?;
                let seat = self.seat_checked(*actor)?;
                ensure(seat.riichi == RiichiStatus::Off, || {
                    format!("seat {actor} already declared riichi")
                })?;
                ensure(seat.is_closed(), || format!("seat {actor} has an open hand"))?;
                ensure(self.scores[*actor as usize] >= RIICHI_COST, || {
                    format!("seat {actor} cannot afford riichi")
                })?;
                self.seats[*actor as usize].riichi = RiichiStatus::Declared;
            }

            CanonicalEvent::ReachAccepted { actor } => {
                ensure(self.phase.in_hand(), || {
                    format!("reach_accepted during {}", self.phase.name())
                })?;
                let seat = self.seat_checked(*actor)?;
                ensure(seat.riichi == RiichiStatus::Declared, || {
                    format!("seat {actor} has no declared riichi")
                })?;
                self.seats[*actor as usize].riichi = RiichiStatus::Accepted;
                self.scores[*actor as usize] -= RIICHI_COST;
                self.round.kyotaku = self.round.kyotaku.saturating_add(1);
            }

            CanonicalEvent::CallWindow {
                target,
                pai,
                eligible,
            } => {
                ensure(
                    self.phase == Phase::InTurnPlay(TurnStep::Draw { rinshan: false }),
                    || format!("call window during {}", self.phase.name()),
                )?;
                let last = self
                    .last_discard
                    .ok_or_else(|| illegal("call window with no discard"))?;
                ensure(last.seat == *target && last.tile == *pai, || {
                    format!("call window on {pai} from seat {target} does not match last discard")
                })?;
                ensure(!eligible.is_empty(), || "call window with no eligible seat".to_string())?;
                let mut seen = Vec::new();
                for entry in eligible {
                    self.seat_checked(entry.seat)?;
                    ensure(entry.seat != *target, || "discarder listed as eligible".to_string())?;
                    ensure(!seen.contains(&entry.seat), || {
                        format!("seat {} listed twice", entry.seat)
                    })?;
                    ensure(!entry.kinds.is_empty(), || {
                        format!("seat {} listed with no call", entry.seat)
                    })?;
                    if entry.kinds.contains(&CallKind::Chi) {
                        ensure(entry.seat == self.next_seat(*target), || {
                            format!("seat {} may not chi from seat {target}", entry.seat)
                        })?;
                    }
                    seen.push(entry.seat);
                }
                self.pending_call = Some(PendingCall {
                    target: *target,
                    pai: *pai,
                    eligible: eligible.clone(),
                });
                self.phase = Phase::AwaitingCallResolution;
            }

            CanonicalEvent::CallWindowClosed => {
                ensure(self.phase == Phase::AwaitingCallResolution, || {
                    format!("call_window_closed during {}", self.phase.name())
                })?;
                ensure(self.pending_reach().is_none(), || {
                    "window closed before pending riichi was accepted".to_string()
                })?;
                self.pending_call = None;
                self.phase = Phase::InTurnPlay(TurnStep::Draw { rinshan: false });
            }

            CanonicalEvent::Chi {
                actor,
                target,
                pai,
                consumed,
            }
            | CanonicalEvent::Pon {
                actor,
                target,
                pai,
                consumed,
            }
            | CanonicalEvent::Daiminkan {
                actor,
                target,
                pai,
                consumed,
            } => {
                let (kind, meld_kind) = match event {
                    CanonicalEvent::Chi { .. } => (CallKind::Chi, MeldKind::Chi),
                    CanonicalEvent::Pon { .. } => (CallKind::Pon, MeldKind::Pon),
                    _ => (CallKind::Daiminkan, MeldKind::Daiminkan),
                };
                self.check_claim(*actor, *target, *pai, kind)?;
                if kind == CallKind::Chi {
                    ensure(*actor == self.next_seat(*target), || {
                        format!("seat {actor} may not chi from seat {target}")
                    })?;
                }
                Self::check_consumed(kind, *pai, consumed)?;
                self.check_count(*actor, false)?;
                let seat = self.seat_checked(*actor)?;
                ensure(seat.riichi == RiichiStatus::Off, || {
                    format!("seat {actor} calls while in riichi")
                })?;
                let hand = seat.hand.without(consumed).map_err(illegal)?;

                let mut tiles = consumed.clone();
                tiles.push(*pai);
                tiles.sort();
                let seat = &mut self.seats[*actor as usize];
                seat.hand = hand;
                seat.drawn = None;
                seat.melds.push(Meld {
                    kind: meld_kind,
                    tiles,
                    called: Some(*pai),
                    from: Some(*target),
                });
                if let Some(last) = self.seats[*target as usize].river.last_mut() {
                    last.called = true;
                }
                self.pending_call = None;
                self.last_discard = None;
                self.self_options.clear();
                self.turn = *actor;
                self.phase = if kind == CallKind::Daiminkan {
                    Phase::InTurnPlay(TurnStep::Draw { rinshan: true })
                } else {
                    Phase::InTurnPlay(TurnStep::Discard)
                };
            }

            CanonicalEvent::Ankan { actor, consumed } => {
                self.check_self_action(*actor, "ankan")?;
                ensure(consumed.len() == 4, || "ankan needs four tiles".to_string())?;
                ensure(consumed.iter().all(|t| t.same_kind(consumed[0])), || {
                    format!("ankan {consumed:?} mixes tiles")
                })?;
                let hand = self.seats[*actor as usize]
                    .hand
                    .without(consumed)
                    .map_err(illegal)?;

                let mut tiles = consumed.clone();
                tiles.sort();
                let seat = &mut self.seats[*actor as usize];
                seat.hand = hand;
                seat.drawn = None;
                seat.melds.push(Meld {
                    kind: MeldKind::Ankan,
                    tiles,
                    called: None,
                    from: None,
                });
                self.self_options.clear();
                self.phase = Phase::InTurnPlay(TurnStep::Draw { rinshan: true });
            }

            CanonicalEvent::Kakan {
                actor,
                pai,
                consumed,
            } => {
                self.check_self_action(*actor, "kakan")?;
                let seat = &self.seats[*actor as usize];
                let meld_index = seat
                    .melds
                    .iter()
                    .position(|m| m.kind == MeldKind::Pon && m.tiles[0].same_kind(*pai))
                    .ok_or_else(|| illegal(format!("seat {actor} has no pon of {pai}")))?;
                ensure(
                    consumed.len() == 3 && consumed.iter().all(|t| t.same_kind(*pai)),
                    || format!("kakan consumed {consumed:?} does not match {pai}"),
                )?;
                let hand = seat.hand.without(&[*pai]).map_err(illegal)?;

                let seat = &mut self.seats[*actor as usize];
                seat.hand = hand;
                seat.drawn = None;
                let meld = &mut seat.melds[meld_index];
                meld.kind = MeldKind::Kakan;
                meld.tiles.push(*pai);
                meld.tiles.sort();
                self.self_options.clear();
                self.phase = Phase::InTurnPlay(TurnStep::Draw { rinshan: true });
            }

            CanonicalEvent::Nukidora { actor, pai } => {
                ensure(self.seat_count == 3, || "nukidora outside a three-seat match".to_string())?;
                self.check_self_action(*actor, "nukidora")?;
                ensure(pai.same_kind(Tile::NORTH), || format!("nukidora of {pai}"))?;
                let hand = self.seats[*actor as usize]
                    .hand
                    .without(&[*pai])
                    .map_err(illegal)?;

                let seat = &mut self.seats[*actor as usize];
                seat.hand = hand;
                seat.drawn = None;
                seat.nuki.push(*pai);
                self.self_options.clear();
                self.phase = Phase::InTurnPlay(TurnStep::Draw { rinshan: true });
            }

            CanonicalEvent::Dora { dora_marker } => {
                ensure(self.phase.in_hand(), || format!("dora during {}", self.phase.name()))?;
                ensure(self.dora_markers.len() < MAX_DORA_MARKERS, || {
                    "too many dora markers".to_string()
                })?;
                self.dora_markers.push(*dora_marker);
            }

            CanonicalEvent::Hora { actor, target, pai } => {
                if actor == target {
                    ensure(
                        self.phase == Phase::InTurnPlay(TurnStep::Discard),
                        || format!("tsumo win during {}", self.phase.name()),
                    )?;
                    ensure(*actor == self.turn, || format!("seat {actor} wins out of turn"))?;
                    self.check_count(*actor, true)?;
                } else {
                    self.check_claim(*actor, *target, *pai, CallKind::Ron)
                        .or_else(|err| {
                            // Pending riichi is never paid when the riichi tile deals in.
                            if self.pending_reach() == Some(*target) {
                                self.check_ron_on_riichi_tile(*actor, *target, *pai)
                            } else {
                                Err(err)
                            }
                        })?;
                }
                self.pending_call = None;
                self.last_discard = None;
                self.self_options.clear();
                self.phase = Phase::HandEnd {
                    result_recorded: false,
                };
            }

            CanonicalEvent::Ryukyoku { reason, tenpai } => {
                for seat in tenpai {
                    self.seat_checked(*seat)?;
                }
                match reason {
                    DrawReason::Exhaustive => {
                        ensure(
                            matches!(self.phase, Phase::InTurnPlay(TurnStep::Draw { .. })),
                            || format!("exhaustive draw during {}", self.phase.name()),
                        )?;
                        ensure(self.wall_remaining == 0, || {
                            format!("exhaustive draw with {} tiles left", self.wall_remaining)
                        })?;
                        ensure(self.pending_reach().is_none(), || {
                            "exhaustive draw before pending riichi was accepted".to_string()
                        })?;
                    }
                    _ => ensure(self.phase.in_hand(), || {
                        format!("abortive draw during {}", self.phase.name())
                    })?,
                }
                self.pending_call = None;
                self.last_discard = None;
                self.self_options.clear();
                self.phase = Phase::HandEnd {
                    result_recorded: false,
                };
            }

            CanonicalEvent::EndKyoku { deltas, scores } => {
                ensure(
                    self.phase
                        == Phase::HandEnd {
                            result_recorded: false,
                        },
                    || format!("end_kyoku during {}", self.phase.name()),
                )?;
                self.check_scores(deltas, "end_kyoku deltas")?;
                self.check_scores(scores, "end_kyoku scores")?;
                self.scores = scores.clone();
                self.phase = Phase::HandEnd {
                    result_recorded: true,
                };
            }

            CanonicalEvent::EndGame { scores } => {
                ensure(
                    matches!(
                        self.phase,
                        Phase::DealingHand
                            | Phase::HandEnd {
                                result_recorded: true
                            }
                    ),
                    || format!("end_game during {}", self.phase.name()),
                )?;
                self.check_scores(scores, "end_game scores")?;
                self.scores = scores.clone();
                self.pending_call = None;
                self.self_options.clear();
                self.phase = Phase::MatchEnd;
            }

            CanonicalEvent::Resync { state } => {
                state.check_invariants().map_err(illegal)?;
                *self = state.as_ref().clone();
            }
        }
        Ok(())
    }

    fn check_self_action(&self, actor: Seat, what: &str) -> Result<(), DesyncError> {
        ensure(self.phase == Phase::InTurnPlay(TurnStep::Discard), || {
            format!("{what} during {}", self.phase.name())
        })?;
        ensure(actor == self.turn, || format!("seat {actor} {what} out of turn"))?;
        self.check_count(actor, true)
    }

    fn check_ron_on_riichi_tile(
        &self,
        actor: Seat,
        target: Seat,
        pai: Tile,
    ) -> Result<(), DesyncError> {
        let mut paid = self.clone();
        paid.seats[target as usize].riichi = RiichiStatus::Accepted;
        paid.check_claim(actor, target, pai, CallKind::Ron)
    }

    /// Structural checks used for externally supplied snapshots and by tests.
    pub fn check_invariants(&self) -> Result<(), String> {
        let n = self.seat_count as usize;
        if matches!(self.phase, Phase::AwaitingMatchStart) {
            return Ok(());
        }
        if !matches!(n, 3 | 4) {
            return Err(format!("unsupported seat count {n}"));
        }
        if self.seats.len() != n || self.scores.len() != n {
            return Err("seat or score table does not match seat count".to_string());
        }
        if self.self_seat as usize >= n || self.turn as usize >= n || self.dealer as usize >= n {
            return Err("seat index out of range".to_string());
        }
        if !self.phase.in_hand() {
            return Ok(());
        }
        for (i, seat) in self.seats.iter().enumerate() {
            let discard_step =
                i == self.turn as usize && self.phase == Phase::InTurnPlay(TurnStep::Discard);
            let expected = seat.expected_concealed(discard_step);
            if seat.hand.len() != expected {
                return Err(format!(
                    "seat {i} holds {} concealed tiles, expected {expected}",
                    seat.hand.len()
                ));
            }
        }
        if (self.phase == Phase::AwaitingCallResolution) != self.pending_call.is_some() {
            return Err("pending call does not match phase".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::parse_tiles;

    fn tiles(s: &str) -> Vec<Tile> {
        parse_tiles(s).unwrap()
    }

    fn t(s: &str) -> Tile {
        s.parse().unwrap()
    }

    fn dealt_state() -> MatchState {
        let mut state = MatchState::default();
        state
            .apply(&CanonicalEvent::StartGame {
                id: 0,
                seat_count: 4,
                scores: vec![25000; 4],
            })
            .unwrap();
        let hidden = vec![Tile::UNKNOWN; 13];
        state
            .apply(&CanonicalEvent::StartKyoku {
                bakaze: Tile::EAST,
                kyoku: 1,
                honba: 0,
                kyotaku: 0,
                oya: 0,
                dora_marker: t("3p"),
                scores: vec![25000; 4],
                tehais: vec![
                    tiles("1m 2m 3m 5pr 5p 6p 7p 3s 3s 4s E E P"),
                    hidden.clone(),
                    hidden.clone(),
                    hidden,
                ],
                wall: 70,
            })
            .unwrap();
        state
    }

    #[test]
    fn deal_reaches_turn_play_for_the_dealer() {
        let state = dealt_state();
        assert_eq!(state.phase, Phase::InTurnPlay(TurnStep::Draw { rinshan: false }));
        assert_eq!(state.turn, 0);
        assert_eq!(state.wall_remaining, 70);
        assert!(state.seats.iter().all(|s| s.river.is_empty()));
        state.check_invariants().unwrap();
    }

    #[test]
    fn draw_then_discard_moves_the_turn() {
        let mut state = dealt_state();
        state
            .apply(&CanonicalEvent::Tsumo {
                actor: 0,
                pai: t("9s"),
                options: vec![],
            })
            .unwrap();
        assert_eq!(state.own().unwrap().hand.len(), 14);
        state
            .apply(&CanonicalEvent::Dahai {
                actor: 0,
                pai: t("9s"),
                tsumogiri: true,
            })
            .unwrap();
        assert_eq!(state.turn, 1);
        assert_eq!(state.wall_remaining, 69);
        assert_eq!(state.seats[0].river.len(), 1);
        state.check_invariants().unwrap();
    }

    #[test]
    fn illegal_events_leave_the_state_untouched() {
        let mut state = dealt_state();
        let before = state.clone();
        let err = state
            .apply(&CanonicalEvent::Dahai {
                actor: 1,
                pai: t("1m"),
                tsumogiri: false,
            })
            .unwrap_err();
        assert!(!err.is_unrecoverable());
        assert_eq!(state, before);

        let err = state.apply(&CanonicalEvent::Tsumo {
            actor: 2,
            pai: Tile::UNKNOWN,
            options: vec![],
        });
        assert!(err.is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn discarding_a_tile_not_in_hand_is_rejected() {
        let mut state = dealt_state();
        state
            .apply(&CanonicalEvent::Tsumo {
                actor: 0,
                pai: t("9s"),
                options: vec![],
            })
            .unwrap();
        let before = state.clone();
        assert!(
            state
                .apply(&CanonicalEvent::Dahai {
                    actor: 0,
                    pai: t("8m"),
                    tsumogiri: false,
                })
                .is_err()
        );
        assert_eq!(state, before);
    }

    #[test]
    fn riichi_is_paid_on_acceptance() {
        let mut state = dealt_state();
        state
            .apply(&CanonicalEvent::Tsumo {
                actor: 0,
                pai: t("4s"),
                options: vec![SelfOption::Riichi],
            })
            .unwrap();
        state.apply(&CanonicalEvent::Reach { actor: 0 }).unwrap();
        state
            .apply(&CanonicalEvent::Dahai {
                actor: 0,
                pai: t("P"),
                tsumogiri: false,
            })
            .unwrap();
        assert!(state.seats[0].river[0].riichi);
        assert_eq!(state.pending_reach(), Some(0));

        // The next draw must wait for acceptance.
        let draw = CanonicalEvent::Tsumo {
            actor: 1,
            pai: Tile::UNKNOWN,
            options: vec![],
        };
        assert!(state.clone().apply(&draw).is_err());

        state.apply(&CanonicalEvent::ReachAccepted { actor: 0 }).unwrap();
        assert_eq!(state.scores[0], 24000);
        assert_eq!(state.round.kyotaku, 1);
        state.apply(&draw).unwrap();
    }

    #[test]
    fn pon_moves_the_turn_to_the_caller() {
        let mut state = dealt_state();
        state
            .apply(&CanonicalEvent::Tsumo {
                actor: 0,
                pai: t("9s"),
                options: vec![],
            })
            .unwrap();
        state
            .apply(&CanonicalEvent::Dahai {
                actor: 0,
                pai: t("9s"),
                tsumogiri: true,
            })
            .unwrap();
        state
            .apply(&CanonicalEvent::Pon {
                actor: 2,
                target: 0,
                pai: t("9s"),
                consumed: vec![t("9s"), t("9s")],
            })
            .unwrap();
        assert_eq!(state.turn, 2);
        assert_eq!(state.phase, Phase::InTurnPlay(TurnStep::Discard));
        assert!(state.seats[0].river[0].called);
        assert_eq!(state.seats[2].hand.len(), 11);
        state.check_invariants().unwrap();
    }

    #[test]
    fn chi_only_from_the_previous_seat() {
        let mut state = dealt_state();
        state
            .apply(&CanonicalEvent::Tsumo {
                actor: 0,
                pai: t("4p"),
                options: vec![],
            })
            .unwrap();
        state
            .apply(&CanonicalEvent::Dahai {
                actor: 0,
                pai: t("4p"),
                tsumogiri: true,
            })
            .unwrap();
        let chi = |actor| CanonicalEvent::Chi {
            actor,
            target: 0,
            pai: t("4p"),
            consumed: vec![t("2p"), t("3p")],
        };
        assert!(state.clone().apply(&chi(2)).is_err());
        state.apply(&chi(1)).unwrap();
        assert_eq!(state.seats[1].melds[0].tiles, tiles("2p 3p 4p"));
    }

    #[test]
    fn resync_replaces_the_whole_state() {
        let mut state = MatchState::default();
        let target = dealt_state();
        state
            .apply(&CanonicalEvent::Resync {
                state: Box::new(target.clone()),
            })
            .unwrap();
        assert_eq!(state, target);

        let mut broken = target;
        broken.seats[1].hand = HandKnowledge::Hidden { count: 9 };
        assert!(
            state
                .apply(&CanonicalEvent::Resync {
                    state: Box::new(broken),
                })
                .is_err()
        );
    }
}

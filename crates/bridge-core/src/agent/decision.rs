use serde::{Deserialize, Serialize};

use crate::message::{CallKind, Seat, SelfOption};
use crate::state::{MatchState, Phase, TurnStep};

/// Reply types an agent may choose, named as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Dahai,
    Reach,
    Chi,
    Pon,
    Daiminkan,
    Ankan,
    Kakan,
    Hora,
    Ryukyoku,
    Nukidora,
    None,
}

impl ActionKind {
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Dahai => "dahai",
            ActionKind::Reach => "reach",
            ActionKind::Chi => "chi",
            ActionKind::Pon => "pon",
            ActionKind::Daiminkan => "daiminkan",
            ActionKind::Ankan => "ankan",
            ActionKind::Kakan => "kakan",
            ActionKind::Hora => "hora",
            ActionKind::Ryukyoku => "ryukyoku",
            ActionKind::Nukidora => "nukidora",
            ActionKind::None => "none",
        }
    }

    pub fn from_name(name: &str) -> Option<ActionKind> {
        Some(match name {
            "dahai" => ActionKind::Dahai,
            "reach" => ActionKind::Reach,
            "chi" => ActionKind::Chi,
            "pon" => ActionKind::Pon,
            "daiminkan" => ActionKind::Daiminkan,
            "ankan" => ActionKind::Ankan,
            "kakan" => ActionKind::Kakan,
            "hora" => ActionKind::Hora,
            "ryukyoku" => ActionKind::Ryukyoku,
            "nukidora" => ActionKind::Nukidora,
            "none" => ActionKind::None,
            _ => return None,
        })
    }

    fn from_self_option(option: SelfOption) -> ActionKind {
        match option {
            SelfOption::Riichi => ActionKind::Reach,
            SelfOption::Tsumo => ActionKind::Hora,
            SelfOption::Ankan => ActionKind::Ankan,
            SelfOption::Kakan => ActionKind::Kakan,
            SelfOption::Kyuushu => ActionKind::Ryukyoku,
            SelfOption::Nukidora => ActionKind::Nukidora,
        }
    }

    fn from_call(kind: CallKind) -> ActionKind {
        match kind {
            CallKind::Chi => ActionKind::Chi,
            CallKind::Pon => ActionKind::Pon,
            CallKind::Daiminkan => ActionKind::Daiminkan,
            CallKind::Ron => ActionKind::Hora,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Turn,
    Call,
}

/// Position in the event stream: match epoch, then the last emitted sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventStamp {
    pub epoch: u64,
    pub seq: u64,
}

/// A moment at which the controlled seat has to choose. Identified by the event stamp it was
/// detected at; any later event makes it stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPoint {
    pub epoch: u64,
    pub seq: u64,
    pub seat: Seat,
    pub kind: DecisionKind,
    pub allowed: Vec<ActionKind>,
}

impl DecisionPoint {
    pub fn stamp(&self) -> EventStamp {
        EventStamp {
            epoch: self.epoch,
            seq: self.seq,
        }
    }

    /// Still open if nothing was emitted after it.
    pub fn is_current(&self, latest: EventStamp) -> bool {
        latest <= self.stamp()
    }

    pub fn allows(&self, kind: ActionKind) -> bool {
        self.allowed.contains(&kind)
    }
}

/// Decision the controlled seat faces in `state`, if any.
pub fn decision_point(state: &MatchState, stamp: EventStamp) -> Option<DecisionPoint> {
    let seat = state.self_seat;
    let (kind, allowed) = match state.phase {
        Phase::InTurnPlay(TurnStep::Discard) if state.turn == seat => {
            let mut allowed = vec![ActionKind::Dahai];
            for option in &state.self_options {
                let kind = ActionKind::from_self_option(*option);
                if !allowed.contains(&kind) {
                    allowed.push(kind);
                }
            }
            (DecisionKind::Turn, allowed)
        }
        Phase::AwaitingCallResolution => {
            let kinds = state.pending_call.as_ref()?.kinds_for(seat)?;
            let mut allowed = vec![ActionKind::None];
            allowed.extend(kinds.iter().map(|k| ActionKind::from_call(*k)));
            (DecisionKind::Call, allowed)
        }
        _ => return None,
    };
    Some(DecisionPoint {
        epoch: stamp.epoch,
        seq: stamp.seq,
        seat,
        kind,
        allowed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CallEligibility;
    use crate::state::PendingCall;

    fn stamp(seq: u64) -> EventStamp {
        EventStamp { epoch: 1, seq }
    }

    #[test]
    fn own_discard_step_offers_dahai_and_draw_options() {
        let state = MatchState {
            phase: Phase::InTurnPlay(TurnStep::Discard),
            self_seat: 2,
            turn: 2,
            self_options: vec![SelfOption::Riichi, SelfOption::Tsumo],
            ..MatchState::default()
        };
        let dp = decision_point(&state, stamp(9)).unwrap();
        assert_eq!(dp.kind, DecisionKind::Turn);
        assert_eq!(dp.allowed, [ActionKind::Dahai, ActionKind::Reach, ActionKind::Hora]);
        assert_eq!(dp.seq, 9);
    }

    #[test]
    fn other_seats_turns_are_not_decisions() {
        let state = MatchState {
            phase: Phase::InTurnPlay(TurnStep::Discard),
            self_seat: 2,
            turn: 1,
            ..MatchState::default()
        };
        assert!(decision_point(&state, stamp(3)).is_none());
    }

    #[test]
    fn call_window_offers_pass_and_listed_calls() {
        let state = MatchState {
            phase: Phase::AwaitingCallResolution,
            self_seat: 0,
            pending_call: Some(PendingCall {
                target: 3,
                pai: "7s".parse().unwrap(),
                eligible: vec![CallEligibility {
                    seat: 0,
                    kinds: vec![CallKind::Chi, CallKind::Ron],
                }],
            }),
            ..MatchState::default()
        };
        let dp = decision_point(&state, stamp(4)).unwrap();
        assert_eq!(dp.kind, DecisionKind::Call);
        assert_eq!(dp.allowed, [ActionKind::None, ActionKind::Chi, ActionKind::Hora]);
    }

    #[test]
    fn stale_once_a_later_event_exists() {
        let dp = DecisionPoint {
            epoch: 1,
            seq: 5,
            seat: 0,
            kind: DecisionKind::Turn,
            allowed: vec![ActionKind::Dahai],
        };
        assert!(dp.is_current(stamp(5)));
        assert!(!dp.is_current(stamp(6)));
        assert!(!dp.is_current(EventStamp { epoch: 2, seq: 1 }));
    }
}

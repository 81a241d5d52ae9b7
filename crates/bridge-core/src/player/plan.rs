use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::input::Control;
use super::layout::{
    self, Button, chi_candidates, kan_candidate_slot, kan_candidates, pon_candidates,
};
use crate::agent::{ActionIntent, AgentAction, DecisionKind};
use crate::error::ActionError;
use crate::state::{MatchState, MeldKind, RiichiStatus};
use crate::tile::Tile;

/// Human-like pacing, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub discard_min_ms: u64,
    pub discard_max_ms: u64,
    /// Floor for the first discard of a hand.
    pub first_discard_min_ms: u64,
    pub dealer_first_discard_extra_ms: u64,
    pub call_prewait_ms: u64,
    pub pass_prewait_ms: u64,
    pub reach_button_ms: u64,
    pub ron_button_ms: u64,
    pub tsumo_button_ms: u64,
    pub ryukyoku_button_ms: u64,
    pub button_ms: u64,
    /// +/- range applied to call pre-waits and plain button waits.
    pub jitter_ms: u64,
    pub tile_click_ms: u64,
    pub candidate_click_ms: u64,
    pub hold_min_ms: u64,
    pub hold_max_ms: u64,
    /// Fixed seed for reproducible jitter.
    pub seed: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discard_min_ms: 600,
            discard_max_ms: 4_000,
            first_discard_min_ms: 4_000,
            dealer_first_discard_extra_ms: 3_000,
            call_prewait_ms: 1_000,
            pass_prewait_ms: 0,
            reach_button_ms: 1_500,
            ron_button_ms: 1_000,
            tsumo_button_ms: 1_000,
            ryukyoku_button_ms: 3_000,
            button_ms: 500,
            jitter_ms: 20,
            tile_click_ms: 300,
            candidate_click_ms: 300,
            hold_min_ms: 40,
            hold_max_ms: 90,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanStep {
    Wait(Duration),
    /// Press and release `control`, holding it for `hold`.
    Click { control: Control, hold: Duration },
}

impl PlanStep {
    pub fn is_click(&self) -> bool {
        matches!(self, PlanStep::Click { .. })
    }
}

/// Turns an intent into a click sequence for the current snapshot.
#[derive(Debug)]
pub struct Planner {
    timing: TimingConfig,
    rng: StdRng,
}

fn precondition(reason: impl Into<String>) -> ActionError {
    ActionError::PreconditionFailed(reason.into())
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

impl Planner {
    pub fn new(timing: TimingConfig) -> Self {
        let rng = match timing.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { timing, rng }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    fn uniform(&mut self, lo: u64, hi: u64) -> Duration {
        if hi <= lo {
            return ms(lo);
        }
        ms(self.rng.gen_range(lo..=hi))
    }

    fn jittered(&mut self, base: u64) -> Duration {
        let j = self.timing.jitter_ms;
        self.uniform(base.saturating_sub(j), base + j)
    }

    fn click(&mut self, control: Control) -> PlanStep {
        let hold = self.uniform(self.timing.hold_min_ms, self.timing.hold_max_ms);
        PlanStep::Click { control, hold }
    }

    pub fn plan(&mut self, intent: &ActionIntent, state: &MatchState) -> Result<Vec<PlanStep>, ActionError> {
        let decision = &intent.decision;
        let seat = state
            .seat(decision.seat)
            .ok_or_else(|| precondition("controlled seat missing from snapshot"))?;
        let hand = seat
            .hand
            .tiles()
            .ok_or_else(|| precondition("controlled hand is not known"))?;
        let riichi_locked = seat.riichi == RiichiStatus::Accepted;
        let t = self.timing.clone();
        let mut steps = Vec::new();

        match &intent.action {
            AgentAction::Discard { tile, tsumogiri } => {
                let target = discard_control(hand, seat.drawn, *tile, *tsumogiri)?;
                if riichi_locked {
                    if !matches!(target, Control::TsumoSlot { .. }) {
                        return Err(precondition(format!(
                            "riichi locks the discard to the drawn tile, asked for {tile}"
                        )));
                    }
                } else {
                    let first = state.seats.iter().all(|s| s.river.is_empty());
                    let mut pre = self.uniform(t.discard_min_ms, t.discard_max_ms);
                    if first {
                        pre = pre.max(ms(t.first_discard_min_ms));
                        if state.dealer == decision.seat {
                            pre += ms(t.dealer_first_discard_extra_ms);
                        }
                    }
                    steps.push(PlanStep::Wait(pre));
                    steps.push(PlanStep::Wait(ms(t.tile_click_ms)));
                }
                steps.push(self.click(target));
            }

            AgentAction::Riichi { tile } => {
                let target = discard_control(hand, seat.drawn, *tile, false)?;
                self.push_button(&mut steps, intent, Button::Reach, ms(t.reach_button_ms))?;
                steps.push(PlanStep::Wait(ms(t.tile_click_ms)));
                steps.push(self.click(target));
            }

            AgentAction::Chi { consumed } | AgentAction::Pon { consumed } => {
                let last = state
                    .pending_call
                    .as_ref()
                    .map(|p| p.pai)
                    .ok_or_else(|| precondition("no open call window"))?;
                for tile in consumed {
                    if !hand.contains(tile) {
                        return Err(precondition(format!("{tile} is not in hand")));
                    }
                }
                let is_chi = matches!(intent.action, AgentAction::Chi { .. });
                let (button, candidates) = if is_chi {
                    (Button::Chi, chi_candidates(hand, last))
                } else {
                    (Button::Pon, pon_candidates(hand, last))
                };
                let pre = self.jittered(t.call_prewait_ms);
                steps.push(PlanStep::Wait(pre));
                let wait = self.jittered(t.button_ms);
                self.push_button(&mut steps, intent, button, wait)?;
                if candidates.len() > 1 {
                    let &[a, b] = consumed.as_slice() else {
                        return Err(precondition(format!("expected two tiles, got {consumed:?}")));
                    };
                    let wanted = if a <= b { [a, b] } else { [b, a] };
                    let index = candidates
                        .iter()
                        .position(|c| *c == wanted)
                        .ok_or_else(|| precondition(format!("no candidate matches {consumed:?}")))?;
                    let slot = layout::candidate_slot(index, candidates.len())
                        .ok_or_else(|| precondition("candidate outside the candidate row"))?;
                    steps.push(PlanStep::Wait(ms(t.candidate_click_ms)));
                    steps.push(self.click(Control::CallCandidate { slot }));
                }
            }

            AgentAction::Daiminkan { consumed } => {
                for tile in consumed {
                    if !hand.contains(tile) {
                        return Err(precondition(format!("{tile} is not in hand")));
                    }
                }
                let wait = self.jittered(t.button_ms);
                self.push_button(&mut steps, intent, Button::Daiminkan, wait)?;
            }

            AgentAction::Ankan { consumed } => {
                let kind = consumed
                    .first()
                    .copied()
                    .ok_or_else(|| precondition("ankan without tiles"))?;
                self.plan_self_kan(&mut steps, intent, state, hand, kind, Button::Ankan)?;
            }

            AgentAction::Kakan { tile } => {
                self.plan_self_kan(&mut steps, intent, state, hand, *tile, Button::Kakan)?;
            }

            AgentAction::Hora => {
                let wait = if decision.kind == DecisionKind::Turn {
                    t.tsumo_button_ms
                } else {
                    t.ron_button_ms
                };
                let button = Button::for_action(intent.action.kind(), decision.kind);
                self.push_button(&mut steps, intent, button, ms(wait))?;
            }

            AgentAction::Ryukyoku => {
                self.push_button(&mut steps, intent, Button::Ryukyoku, ms(t.ryukyoku_button_ms))?;
            }

            AgentAction::Nukidora => {
                if !hand.iter().any(|x| x.same_kind(Tile::NORTH)) {
                    return Err(precondition("no north in hand"));
                }
                let wait = self.jittered(t.button_ms);
                self.push_button(&mut steps, intent, Button::Nukidora, wait)?;
            }

            AgentAction::Pass => {
                steps.push(PlanStep::Wait(ms(t.pass_prewait_ms)));
                let wait = self.jittered(t.button_ms);
                self.push_button(&mut steps, intent, Button::Skip, wait)?;
            }
        }

        if riichi_locked {
            steps.retain(PlanStep::is_click);
        }
        Ok(steps)
    }

    fn push_button(
        &mut self,
        steps: &mut Vec<PlanStep>,
        intent: &ActionIntent,
        button: Button,
        wait: Duration,
    ) -> Result<(), ActionError> {
        let slot = layout::button_slot(&intent.decision, button)
            .ok_or_else(|| precondition(format!("{button:?} button is not on screen")))?;
        steps.push(PlanStep::Wait(wait));
        steps.push(self.click(Control::ActionButton { slot }));
        Ok(())
    }

    fn plan_self_kan(
        &mut self,
        steps: &mut Vec<PlanStep>,
        intent: &ActionIntent,
        state: &MatchState,
        hand: &[Tile],
        kind: Tile,
        button: Button,
    ) -> Result<(), ActionError> {
        let pon_kinds: Vec<Tile> = state
            .seat(intent.decision.seat)
            .map(|s| {
                s.melds
                    .iter()
                    .filter(|m| m.kind == MeldKind::Pon)
                    .filter_map(|m| m.tiles.first().copied())
                    .collect()
            })
            .unwrap_or_default();
        let candidates = kan_candidates(hand, &pon_kinds);
        let index = candidates
            .iter()
            .position(|c| c.same_kind(kind))
            .ok_or_else(|| precondition(format!("cannot kan {kind}")))?;
        let pre = self.jittered(self.timing.call_prewait_ms);
        steps.push(PlanStep::Wait(pre));
        let wait = self.jittered(self.timing.button_ms);
        self.push_button(steps, intent, button, wait)?;
        if candidates.len() > 1 {
            let slot = kan_candidate_slot(index, candidates.len())
                .ok_or_else(|| precondition("kan candidate outside the candidate row"))?;
            steps.push(PlanStep::Wait(ms(self.timing.candidate_click_ms)));
            steps.push(self.click(Control::KanCandidate { slot }));
        }
        Ok(())
    }
}

/// Where `tile` is clicked from: the drawn tile sits in its own slot, the rest of the hand is
/// sorted in UI order.
fn discard_control(
    hand: &[Tile],
    drawn: Option<Tile>,
    tile: Tile,
    tsumogiri: bool,
) -> Result<Control, ActionError> {
    let mut rest: Vec<Tile> = hand.to_vec();
    let drawn = drawn.filter(|d| rest.len() % 3 == 2 && crate::tile::remove_tile(&mut rest, *d));
    rest.sort();
    if let Some(d) = drawn
        && (d == tile || tsumogiri)
    {
        if d != tile {
            return Err(precondition(format!("tsumogiri of {tile} but drew {d}")));
        }
        return Ok(Control::TsumoSlot {
            hand_len: rest.len() as u8,
        });
    }
    let index = rest
        .iter()
        .position(|t| *t == tile)
        .ok_or_else(|| precondition(format!("{tile} is not in hand")))?;
    Ok(Control::HandSlot { index: index as u8 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ActionKind, DecisionPoint, Evaluation};
    use crate::state::{HandKnowledge, Phase, RiverTile, SeatState, TurnStep};
    use crate::tile::parse_tiles;

    fn t(s: &str) -> Tile {
        s.parse().unwrap()
    }

    fn seat(hand: &str, drawn: Option<&str>) -> SeatState {
        SeatState {
            hand: HandKnowledge::Known(parse_tiles(hand).unwrap()),
            drawn: drawn.map(t),
            melds: vec![],
            river: vec![],
            riichi: RiichiStatus::Off,
            nuki: vec![],
        }
    }

    fn turn_state(own: SeatState) -> MatchState {
        let hidden = SeatState {
            hand: HandKnowledge::Hidden { count: 13 },
            ..seat("", None)
        };
        MatchState {
            phase: Phase::InTurnPlay(TurnStep::Discard),
            dealer: 1,
            seats: vec![own, hidden.clone(), hidden.clone(), hidden],
            scores: vec![25000; 4],
            ..MatchState::default()
        }
    }

    fn intent(action: AgentAction, allowed: Vec<ActionKind>) -> ActionIntent {
        ActionIntent {
            decision: DecisionPoint {
                epoch: 1,
                seq: 7,
                seat: 0,
                kind: DecisionKind::Turn,
                allowed,
            },
            action,
            evaluation: Evaluation::default(),
        }
    }

    fn planner() -> Planner {
        Planner::new(TimingConfig {
            seed: Some(7),
            ..TimingConfig::default()
        })
    }

    fn clicks(steps: &[PlanStep]) -> Vec<Control> {
        steps
            .iter()
            .filter_map(|s| match s {
                PlanStep::Click { control, .. } => Some(*control),
                PlanStep::Wait(_) => None,
            })
            .collect()
    }

    const HAND: &str = "1m 2m 3m 4p 5p 6p 7s 8s 9s E E W N 3s";

    #[test]
    fn discarding_the_drawn_tile_clicks_the_tsumo_slot() {
        let state = turn_state(seat(HAND, Some("3s")));
        let intent = intent(
            AgentAction::Discard {
                tile: t("3s"),
                tsumogiri: true,
            },
            vec![ActionKind::Dahai],
        );
        let steps = planner().plan(&intent, &state).unwrap();
        assert_eq!(clicks(&steps), [Control::TsumoSlot { hand_len: 13 }]);
    }

    #[test]
    fn hand_tiles_are_found_in_sorted_order() {
        let state = turn_state(seat(HAND, Some("3s")));
        let intent = intent(
            AgentAction::Discard {
                tile: t("W"),
                tsumogiri: false,
            },
            vec![ActionKind::Dahai],
        );
        let steps = planner().plan(&intent, &state).unwrap();
        // 1m 2m 3m 4p 5p 6p 7s 8s 9s E E W N
        assert_eq!(clicks(&steps), [Control::HandSlot { index: 11 }]);
    }

    #[test]
    fn first_discard_waits_at_least_the_floor() {
        let state = turn_state(seat(HAND, Some("3s")));
        let intent = intent(
            AgentAction::Discard {
                tile: t("N"),
                tsumogiri: false,
            },
            vec![ActionKind::Dahai],
        );
        let steps = planner().plan(&intent, &state).unwrap();
        let PlanStep::Wait(pre) = steps[0] else {
            panic!("expected a pre-wait, got {:?}", steps[0]);
        };
        assert!(pre >= Duration::from_millis(4_000));

        let mut later = state.clone();
        later.seats[1].river.push(RiverTile {
            tile: t("9m"),
            tsumogiri: true,
            riichi: false,
            called: false,
        });
        let steps = planner().plan(&intent, &later).unwrap();
        let PlanStep::Wait(pre) = steps[0] else {
            panic!("expected a pre-wait");
        };
        assert!(pre >= Duration::from_millis(600) && pre <= Duration::from_millis(4_000));
    }

    #[test]
    fn riichi_lock_skips_waits_and_rejects_other_tiles() {
        let mut own = seat(HAND, Some("3s"));
        own.riichi = RiichiStatus::Accepted;
        let state = turn_state(own);
        let ok = intent(
            AgentAction::Discard {
                tile: t("3s"),
                tsumogiri: true,
            },
            vec![ActionKind::Dahai],
        );
        let steps = planner().plan(&ok, &state).unwrap();
        assert!(steps.iter().all(PlanStep::is_click));

        let bad = intent(
            AgentAction::Discard {
                tile: t("E"),
                tsumogiri: false,
            },
            vec![ActionKind::Dahai],
        );
        assert!(matches!(
            planner().plan(&bad, &state),
            Err(ActionError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn riichi_clicks_the_button_then_the_tile() {
        let state = turn_state(seat(HAND, Some("3s")));
        let intent = intent(
            AgentAction::Riichi { tile: t("N") },
            vec![ActionKind::Dahai, ActionKind::Reach],
        );
        let steps = planner().plan(&intent, &state).unwrap();
        // Skip, Reach, Discard.
        assert_eq!(
            clicks(&steps),
            [Control::ActionButton { slot: 1 }, Control::HandSlot { index: 12 }]
        );
    }

    #[test]
    fn chi_picks_the_matching_candidate() {
        let mut state = turn_state(seat("3p 4p 5pr 5p 7p 1m 1m 1m 9s 9s E E E", None));
        state.phase = Phase::AwaitingCallResolution;
        state.pending_call = Some(crate::state::PendingCall {
            target: 3,
            pai: t("6p"),
            eligible: vec![],
        });
        let mut call = intent(
            AgentAction::Chi {
                consumed: vec![t("7p"), t("5p")],
            },
            vec![ActionKind::None, ActionKind::Chi],
        );
        call.decision.kind = DecisionKind::Call;
        let steps = planner().plan(&call, &state).unwrap();
        // Candidates: 4p-5pr, 4p-5p, 5pr-7p, 5p-7p; the last of four sits in slot 8.
        assert_eq!(
            clicks(&steps),
            [Control::ActionButton { slot: 1 }, Control::CallCandidate { slot: 8 }]
        );
    }

    #[test]
    fn missing_tiles_fail_the_precondition() {
        let state = turn_state(seat(HAND, Some("3s")));
        let intent = intent(
            AgentAction::Discard {
                tile: t("C"),
                tsumogiri: false,
            },
            vec![ActionKind::Dahai],
        );
        assert!(matches!(
            planner().plan(&intent, &state),
            Err(ActionError::PreconditionFailed(_))
        ));
    }
}

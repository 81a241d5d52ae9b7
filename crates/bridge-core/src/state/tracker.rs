use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::calls::{self, CallClaim, CallPriority};
use super::snapshot::{HandKnowledge, MatchState, Phase, TurnStep};
use crate::error::DesyncError;
use crate::message::{CallKind, CallReply, DrawReason, Envelope, Origin, Seat, SelfKanKind, TypedMessage};
use crate::protocol::{CanonicalEvent, Transition, TransitionId};
use crate::tile::Tile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Messages held back after a desync candidate before giving up and requesting a resync.
    pub desync_window: usize,
    pub call_priority: CallPriority,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            desync_window: 3,
            call_priority: CallPriority::default(),
        }
    }
}

/// Snapshot plus the call responses gathered for the open window. Cloned before every step so a
/// rejected message never leaves partial changes behind.
#[derive(Debug, Clone, Default)]
struct Fold {
    state: MatchState,
    responses: Vec<(Seat, CallReply)>,
}

impl Fold {
    fn pending_reach_accept(&self) -> Option<CanonicalEvent> {
        self.state
            .pending_reach()
            .map(|actor| CanonicalEvent::ReachAccepted { actor })
    }

    fn apply_all(&mut self, events: &[CanonicalEvent]) -> Result<(), DesyncError> {
        for event in events {
            self.state.apply(event)?;
        }
        Ok(())
    }

    /// Events closing the open call window with whatever responses were gathered.
    fn resolution_events(&mut self, priority: &CallPriority) -> Result<Vec<CanonicalEvent>, DesyncError> {
        let pending = self
            .state
            .pending_call
            .clone()
            .ok_or_else(|| DesyncError::illegal("no call window to resolve"))?;
        let claims: Vec<CallClaim> = self
            .responses
            .drain(..)
            .filter_map(|(seat, reply)| match reply {
                CallReply::Pass => None,
                CallReply::Call { kind, consumed } => Some(CallClaim {
                    seat,
                    kind,
                    consumed,
                }),
            })
            .collect();
        let winner = calls::resolve(&claims, pending.target, self.state.seat_count, priority);

        let mut events = Vec::new();
        if let Some(claim) = winner
            && claim.kind == CallKind::Ron
        {
            events.push(CanonicalEvent::Hora {
                actor: claim.seat,
                target: pending.target,
                pai: pending.pai,
            });
            return Ok(events);
        }
        events.extend(self.pending_reach_accept());
        events.push(match winner {
            Some(claim) => claim_event(claim.seat, claim.kind, pending.target, pending.pai, claim.consumed.clone()),
            None => CanonicalEvent::CallWindowClosed,
        });
        Ok(events)
    }

    /// Translates one message into canonical events and folds them in.
    fn step(
        &mut self,
        message: &TypedMessage,
        priority: &CallPriority,
    ) -> Result<Vec<CanonicalEvent>, DesyncError> {
        let state = &self.state;
        let events = match message {
            TypedMessage::MatchStart {
                seat_count,
                self_seat,
                scores,
            } => vec![CanonicalEvent::StartGame {
                id: *self_seat,
                seat_count: *seat_count,
                scores: scores.clone(),
            }],

            TypedMessage::Deal {
                round,
                dealer,
                dora_marker,
                scores,
                hand,
                wall,
            } => {
                let tehais = (0..state.seat_count)
                    .map(|seat| {
                        if seat == state.self_seat {
                            hand.clone()
                        } else {
                            vec![Tile::UNKNOWN; 13]
                        }
                    })
                    .collect();
                vec![CanonicalEvent::StartKyoku {
                    bakaze: round.bakaze,
                    kyoku: round.kyoku,
                    honba: round.honba,
                    kyotaku: round.kyotaku,
                    oya: *dealer,
                    dora_marker: *dora_marker,
                    scores: scores.clone(),
                    tehais,
                    wall: *wall,
                }]
            }

            TypedMessage::Draw {
                seat,
                tile,
                options,
            } => {
                let mut events: Vec<_> = self.pending_reach_accept().into_iter().collect();
                events.push(CanonicalEvent::Tsumo {
                    actor: *seat,
                    pai: *tile,
                    options: options.clone(),
                });
                events
            }

            TypedMessage::Discard {
                seat,
                tile,
                tsumogiri,
                riichi,
            } => {
                let mut events = Vec::with_capacity(2);
                if *riichi {
                    events.push(CanonicalEvent::Reach { actor: *seat });
                }
                events.push(CanonicalEvent::Dahai {
                    actor: *seat,
                    pai: *tile,
                    tsumogiri: *tsumogiri,
                });
                events
            }

            TypedMessage::CallWindow {
                discarder,
                tile,
                eligible,
            } => {
                self.responses.clear();
                vec![CanonicalEvent::CallWindow {
                    target: *discarder,
                    pai: *tile,
                    eligible: eligible.clone(),
                }]
            }

            TypedMessage::CallResponse { seat, reply } => {
                let pending = match (&state.phase, &state.pending_call) {
                    (Phase::AwaitingCallResolution, Some(pending)) => pending,
                    _ => {
                        return Err(DesyncError::illegal(format!(
                            "call response during {}",
                            state.phase.name()
                        )));
                    }
                };
                let offered = pending.kinds_for(*seat).ok_or_else(|| {
                    DesyncError::illegal(format!("seat {seat} was not offered a call"))
                })?;
                if self.responses.iter().any(|(s, _)| s == seat) {
                    return Err(DesyncError::illegal(format!("seat {seat} responded twice")));
                }
                if let CallReply::Call { kind, .. } = reply
                    && !offered.contains(kind)
                {
                    return Err(DesyncError::illegal(format!(
                        "seat {seat} answered with {} which was not offered",
                        kind.name()
                    )));
                }
                let all_in = pending.eligible.len() == self.responses.len() + 1;
                self.responses.push((*seat, reply.clone()));
                if all_in {
                    self.resolution_events(priority)?
                } else {
                    Vec::new()
                }
            }

            TypedMessage::CallTimeout => {
                if state.phase != Phase::AwaitingCallResolution {
                    return Err(DesyncError::illegal(format!(
                        "call timeout during {}",
                        state.phase.name()
                    )));
                }
                self.resolution_events(priority)?
            }

            TypedMessage::Meld {
                seat,
                kind,
                consumed,
            } => {
                let last = state
                    .last_discard
                    .ok_or_else(|| DesyncError::illegal("meld with no discard to claim"))?;
                self.responses.clear();
                if *kind == CallKind::Ron {
                    vec![CanonicalEvent::Hora {
                        actor: *seat,
                        target: last.seat,
                        pai: last.tile,
                    }]
                } else {
                    let mut events: Vec<_> = self.pending_reach_accept().into_iter().collect();
                    events.push(claim_event(*seat, *kind, last.seat, last.tile, consumed.clone()));
                    events
                }
            }

            TypedMessage::SelfKan {
                seat,
                kind,
                tile,
                consumed,
            } => match kind {
                SelfKanKind::Ankan => vec![CanonicalEvent::Ankan {
                    actor: *seat,
                    consumed: consumed.clone(),
                }],
                SelfKanKind::Kakan => vec![CanonicalEvent::Kakan {
                    actor: *seat,
                    pai: *tile,
                    consumed: consumed.clone(),
                }],
            },

            TypedMessage::Nukidora { seat } => {
                // The controlled seat may hold several norths; any copy is equivalent.
                let pai = state
                    .seat(*seat)
                    .and_then(|s| s.hand.tiles())
                    .and_then(|tiles| tiles.iter().copied().find(|t| t.same_kind(Tile::NORTH)))
                    .unwrap_or(Tile::NORTH);
                vec![CanonicalEvent::Nukidora { actor: *seat, pai }]
            }

            TypedMessage::DoraReveal { marker } => vec![CanonicalEvent::Dora {
                dora_marker: *marker,
            }],

            TypedMessage::Win { seat, target, tile } => {
                self.responses.clear();
                vec![CanonicalEvent::Hora {
                    actor: *seat,
                    target: *target,
                    pai: *tile,
                }]
            }

            TypedMessage::ExhaustiveDraw { tenpai } => {
                let mut events: Vec<_> = self.pending_reach_accept().into_iter().collect();
                events.push(CanonicalEvent::Ryukyoku {
                    reason: DrawReason::Exhaustive,
                    tenpai: tenpai.clone(),
                });
                events
            }

            TypedMessage::AbortiveDraw { reason } => {
                let mut events = Vec::new();
                if *reason != DrawReason::TripleRon {
                    events.extend(self.pending_reach_accept());
                }
                events.push(CanonicalEvent::Ryukyoku {
                    reason: *reason,
                    tenpai: Vec::new(),
                });
                events
            }

            TypedMessage::HandResult { deltas, scores } => vec![CanonicalEvent::EndKyoku {
                deltas: deltas.clone(),
                scores: scores.clone(),
            }],

            TypedMessage::MatchEnd { scores } => vec![CanonicalEvent::EndGame {
                scores: scores.clone(),
            }],

            TypedMessage::Resync(snapshot) => {
                self.responses.clear();
                vec![CanonicalEvent::Resync {
                    state: snapshot.clone(),
                }]
            }
        };
        self.apply_all(&events)?;
        Ok(events)
    }
}

fn claim_event(actor: Seat, kind: CallKind, target: Seat, pai: Tile, consumed: Vec<Tile>) -> CanonicalEvent {
    match kind {
        CallKind::Chi => CanonicalEvent::Chi {
            actor,
            target,
            pai,
            consumed,
        },
        CallKind::Pon => CanonicalEvent::Pon {
            actor,
            target,
            pai,
            consumed,
        },
        CallKind::Daiminkan => CanonicalEvent::Daiminkan {
            actor,
            target,
            pai,
            consumed,
        },
        CallKind::Ron => CanonicalEvent::Hora { actor, target, pai },
    }
}

/// Deterministic fold of typed messages into a [`MatchState`], producing one transition per
/// canonical event.
///
/// Illegal messages are held back instead of applied. Each held message triggers one attempt
/// at a single skip-ahead step (close the open call window, imply a hidden seat's missed draw,
/// or settle an unreported hand result) followed by re-applying everything held back. Past
/// `desync_window` held messages the tracker freezes until a full resync or a new match.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    cfg: TrackerConfig,
    fold: Fold,
    held: Vec<Envelope>,
    frozen: Option<String>,
    seen: Option<Origin>,
    stamp_origin: Option<Origin>,
    next_step: u16,
}

impl Tracker {
    pub fn new(cfg: TrackerConfig) -> Self {
        Self {
            cfg,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &MatchState {
        &self.fold.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.cfg
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    pub fn window_open(&self) -> bool {
        self.fold.state.phase == Phase::AwaitingCallResolution
    }

    pub fn ingest(&mut self, env: Envelope) -> Result<Vec<Transition>, DesyncError> {
        let resets = matches!(
            env.message,
            TypedMessage::Resync(_) | TypedMessage::MatchStart { .. }
        );
        if let Some(reason) = &self.frozen
            && !resets
        {
            return Err(DesyncError::Unrecoverable {
                reason: reason.clone(),
            });
        }
        if let Some(seen) = self.seen
            && env.origin <= seen
        {
            debug!(
                "tracker.duplicate capture_seq={} fragment={} kind={}",
                env.origin.capture_seq,
                env.origin.fragment,
                env.message.kind()
            );
            return Ok(Vec::new());
        }
        self.seen = Some(env.origin);

        if resets && (self.frozen.is_some() || !self.held.is_empty()) {
            info!(
                "tracker.reset kind={} dropped={}",
                env.message.kind(),
                self.held.len()
            );
            self.held.clear();
            if self.frozen.take().is_some() && matches!(env.message, TypedMessage::MatchStart { .. }) {
                self.fold = Fold::default();
            }
        }

        if !self.held.is_empty() {
            self.held.push(env);
            return self.recover(None);
        }

        let mut next = self.fold.clone();
        match next.step(&env.message, &self.cfg.call_priority) {
            Ok(events) => {
                self.fold = next;
                Ok(self.stamp(env.origin, events))
            }
            Err(err) => {
                warn!(
                    "tracker.desync.candidate kind={} phase={} reason={}",
                    env.message.kind(),
                    self.fold.state.phase.name(),
                    err.reason()
                );
                self.held.push(env);
                self.recover(Some(err))
            }
        }
    }

    /// Closes the open call window with the responses gathered so far, as if the application
    /// had reported a timeout.
    pub fn expire_call_window(&mut self) -> Result<Vec<Transition>, DesyncError> {
        if let Some(reason) = &self.frozen {
            return Err(DesyncError::Unrecoverable {
                reason: reason.clone(),
            });
        }
        if !self.window_open() {
            return Ok(Vec::new());
        }
        let mut next = self.fold.clone();
        let events = next.resolution_events(&self.cfg.call_priority)?;
        next.apply_all(&events)?;
        self.fold = next;
        let origin = self.stamp_origin.unwrap_or_default();
        let mut out = self.stamp(origin, events);
        if !self.held.is_empty()
            && let Some(more) = self.replay_held(false)
        {
            out.extend(more);
        }
        Ok(out)
    }

    fn stamp(&mut self, origin: Origin, events: Vec<CanonicalEvent>) -> Vec<Transition> {
        if self.stamp_origin != Some(origin) {
            self.stamp_origin = Some(origin);
            self.next_step = 0;
        }
        events
            .into_iter()
            .map(|event| {
                let id = TransitionId {
                    capture_seq: origin.capture_seq,
                    fragment: origin.fragment,
                    step: self.next_step,
                };
                self.next_step = self.next_step.saturating_add(1);
                Transition { id, event }
            })
            .collect()
    }

    /// One skip-ahead step suggested by the current phase and the first held message.
    fn skip_ahead(&self, first: &TypedMessage) -> Option<(Fold, Vec<CanonicalEvent>)> {
        let mut fold = self.fold.clone();
        let state = &fold.state;
        let events = match (state.phase, first) {
            (Phase::AwaitingCallResolution, _) => {
                fold.resolution_events(&self.cfg.call_priority).ok()?
            }
            (Phase::InTurnPlay(TurnStep::Draw { .. }), TypedMessage::Discard { seat, .. })
                if *seat == state.turn
                    && state.wall_remaining > 0
                    && matches!(
                        state.seat(*seat).map(|s| &s.hand),
                        Some(HandKnowledge::Hidden { .. })
                    ) =>
            {
                let mut events: Vec<_> = fold.pending_reach_accept().into_iter().collect();
                events.push(CanonicalEvent::Tsumo {
                    actor: *seat,
                    pai: Tile::UNKNOWN,
                    options: Vec::new(),
                });
                events
            }
            (
                Phase::HandEnd {
                    result_recorded: false,
                },
                TypedMessage::Deal { scores, .. },
            ) if scores.len() == state.scores.len() => {
                let deltas = scores
                    .iter()
                    .zip(&state.scores)
                    .map(|(new, old)| new - old)
                    .collect();
                vec![CanonicalEvent::EndKyoku {
                    deltas,
                    scores: scores.clone(),
                }]
            }
            _ => return None,
        };
        fold.apply_all(&events).ok()?;
        Some((fold, events))
    }

    /// Re-applies every held message, optionally after one skip-ahead step. Commits and returns
    /// the stamped transitions only if all of them fold cleanly.
    fn replay_held(&mut self, with_skip: bool) -> Option<Vec<Transition>> {
        let first = self.held.first()?;
        let (mut fold, skipped) = if with_skip {
            self.skip_ahead(&first.message)?
        } else {
            (self.fold.clone(), Vec::new())
        };

        let mut batches = Vec::with_capacity(self.held.len());
        for env in &self.held {
            let events = fold.step(&env.message, &self.cfg.call_priority).ok()?;
            batches.push((env.origin, events));
        }

        self.fold = fold;
        let held = std::mem::take(&mut self.held);
        let mut out = Vec::new();
        if !skipped.is_empty() {
            out.extend(self.stamp(held[0].origin, skipped));
        }
        for (origin, events) in batches {
            out.extend(self.stamp(origin, events));
        }
        Some(out)
    }

    fn recover(&mut self, cause: Option<DesyncError>) -> Result<Vec<Transition>, DesyncError> {
        if let Some(out) = self.replay_held(true) {
            info!(
                "tracker.desync.recovered phase={} events={}",
                self.fold.state.phase.name(),
                out.len()
            );
            return Ok(out);
        }

        let reason = cause
            .as_ref()
            .map(|err| err.reason().to_string())
            .unwrap_or_else(|| {
                format!(
                    "holding {} message(s) in {}",
                    self.held.len(),
                    self.fold.state.phase.name()
                )
            });
        if self.held.len() > self.cfg.desync_window {
            warn!(
                "tracker.desync.unrecoverable held={} reason={reason}",
                self.held.len()
            );
            self.held.clear();
            self.frozen = Some(reason.clone());
            return Err(DesyncError::Unrecoverable { reason });
        }
        Err(DesyncError::Recoverable {
            reason,
            buffered: self.held.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CallEligibility, RoundId};
    use crate::protocol::CanonicalEvent as Ev;
    use crate::state::replay;
    use crate::tile::parse_tiles;

    fn t(s: &str) -> Tile {
        s.parse().unwrap()
    }

    struct Feed {
        tracker: Tracker,
        seq: u64,
        events: Vec<Ev>,
    }

    impl Feed {
        fn new() -> Self {
            Self {
                tracker: Tracker::new(TrackerConfig::default()),
                seq: 0,
                events: Vec::new(),
            }
        }

        fn send(&mut self, message: TypedMessage) -> Result<Vec<Ev>, DesyncError> {
            self.seq += 1;
            let out = self.tracker.ingest(Envelope {
                origin: Origin::new(self.seq, 0),
                message,
            })?;
            let events: Vec<Ev> = out.into_iter().map(|t| t.event).collect();
            self.events.extend(events.clone());
            Ok(events)
        }

        fn ok(&mut self, message: TypedMessage) -> Vec<Ev> {
            self.send(message).expect("legal message")
        }

        fn types(events: &[Ev]) -> Vec<&'static str> {
            events.iter().map(|e| e.type_name()).collect()
        }

        fn start(&mut self) {
            self.ok(TypedMessage::MatchStart {
                seat_count: 4,
                self_seat: 0,
                scores: vec![25000; 4],
            });
            self.ok(TypedMessage::Deal {
                round: RoundId::default(),
                dealer: 0,
                dora_marker: t("1p"),
                scores: vec![25000; 4],
                hand: parse_tiles("1m 2m 3m 4p 5p 6p 7s 8s 9s E E W N").unwrap(),
                wall: 70,
            });
        }

        fn draw(&mut self, seat: Seat, tile: &str) -> Vec<Ev> {
            self.ok(TypedMessage::Draw {
                seat,
                tile: t(tile),
                options: vec![],
            })
        }

        fn discard(&mut self, seat: Seat, tile: &str) -> Vec<Ev> {
            self.ok(TypedMessage::Discard {
                seat,
                tile: t(tile),
                tsumogiri: false,
                riichi: false,
            })
        }
    }

    #[test]
    fn four_seat_deal_starts_turn_play_for_seat_zero() {
        let mut feed = Feed::new();
        feed.start();
        let state = feed.tracker.state();
        assert_eq!(state.phase, Phase::InTurnPlay(TurnStep::Draw { rinshan: false }));
        assert_eq!(state.turn, 0);
        assert_eq!(state.wall_remaining, 70);
        assert!(state.seats.iter().all(|s| s.river.is_empty()));
        assert!(state.seats.iter().all(|s| s.hand.len() == 13));
    }

    fn open_window_on_5p(feed: &mut Feed) {
        feed.start();
        feed.draw(0, "N");
        feed.discard(0, "N");
        feed.draw(1, "?");
        feed.discard(1, "5p");
        feed.ok(TypedMessage::CallWindow {
            discarder: 1,
            tile: t("5p"),
            eligible: vec![
                CallEligibility {
                    seat: 2,
                    kinds: vec![CallKind::Chi, CallKind::Ron],
                },
                CallEligibility {
                    seat: 3,
                    kinds: vec![CallKind::Pon],
                },
            ],
        });
    }

    #[test]
    fn call_priority_ignores_arrival_order() {
        let mut feed = Feed::new();
        open_window_on_5p(&mut feed);

        let early = feed.ok(TypedMessage::CallResponse {
            seat: 3,
            reply: CallReply::Call {
                kind: CallKind::Pon,
                consumed: vec![t("5p"), t("5p")],
            },
        });
        assert!(early.is_empty(), "resolution waits for every eligible seat");

        let resolved = feed.ok(TypedMessage::CallResponse {
            seat: 2,
            reply: CallReply::Call {
                kind: CallKind::Ron,
                consumed: vec![],
            },
        });
        assert_eq!(
            resolved,
            vec![Ev::Hora {
                actor: 2,
                target: 1,
                pai: t("5p"),
            }]
        );
    }

    #[test]
    fn lower_priority_call_wins_when_higher_seat_passes() {
        let mut feed = Feed::new();
        open_window_on_5p(&mut feed);
        feed.ok(TypedMessage::CallResponse {
            seat: 2,
            reply: CallReply::Pass,
        });
        let resolved = feed.ok(TypedMessage::CallResponse {
            seat: 3,
            reply: CallReply::Call {
                kind: CallKind::Pon,
                consumed: vec![t("5p"), t("5p")],
            },
        });
        assert_eq!(Feed::types(&resolved), ["pon"]);
        assert_eq!(feed.tracker.state().turn, 3);
    }

    #[test]
    fn timeout_resolves_with_partial_responses() {
        let mut feed = Feed::new();
        open_window_on_5p(&mut feed);
        feed.ok(TypedMessage::CallResponse {
            seat: 2,
            reply: CallReply::Pass,
        });
        let events = feed.ok(TypedMessage::CallTimeout);
        assert_eq!(Feed::types(&events), ["call_window_closed"]);
        assert_eq!(feed.tracker.state().turn, 2);
    }

    #[test]
    fn local_expiry_closes_the_window() {
        let mut feed = Feed::new();
        open_window_on_5p(&mut feed);
        let out = feed.tracker.expire_call_window().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event, Ev::CallWindowClosed);
        assert!(feed.tracker.expire_call_window().unwrap().is_empty());
    }

    #[test]
    fn riichi_is_accepted_before_the_next_draw() {
        let mut feed = Feed::new();
        feed.start();
        feed.draw(0, "E");
        let declared = feed.ok(TypedMessage::Discard {
            seat: 0,
            tile: t("N"),
            tsumogiri: false,
            riichi: true,
        });
        assert_eq!(Feed::types(&declared), ["reach", "dahai"]);
        let next = feed.draw(1, "?");
        assert_eq!(Feed::types(&next), ["reach_accepted", "tsumo"]);
        assert_eq!(feed.tracker.state().scores[0], 24000);
    }

    #[test]
    fn ron_on_the_riichi_tile_skips_acceptance() {
        let mut feed = Feed::new();
        feed.start();
        feed.draw(0, "E");
        feed.ok(TypedMessage::Discard {
            seat: 0,
            tile: t("N"),
            tsumogiri: false,
            riichi: true,
        });
        let won = feed.ok(TypedMessage::Win {
            seat: 2,
            target: 0,
            tile: t("N"),
        });
        assert_eq!(Feed::types(&won), ["hora"]);
        assert_eq!(feed.tracker.state().scores[0], 25000);
    }

    #[test]
    fn illegal_messages_never_mutate_the_snapshot() {
        let mut feed = Feed::new();
        feed.start();
        let before = feed.tracker.state().clone();

        // Seat 2 discards while seat 0 holds the turn.
        let err = feed
            .send(TypedMessage::Discard {
                seat: 2,
                tile: t("3s"),
                tsumogiri: false,
                riichi: false,
            })
            .unwrap_err();
        assert!(matches!(err, DesyncError::Recoverable { buffered: 1, .. }));
        assert_eq!(feed.tracker.state(), &before);

        for _ in 0..2 {
            assert!(feed.send(TypedMessage::CallTimeout).is_err());
            assert_eq!(feed.tracker.state(), &before);
        }
        let err = feed.send(TypedMessage::CallTimeout).unwrap_err();
        assert!(err.is_unrecoverable());
        assert!(feed.tracker.is_frozen());
        assert_eq!(feed.tracker.state(), &before);

        // Frozen: only a full broadcast gets through.
        assert!(feed.send(TypedMessage::CallTimeout).unwrap_err().is_unrecoverable());
        let events = feed.ok(TypedMessage::Resync(Box::new(before.clone())));
        assert_eq!(Feed::types(&events), ["resync"]);
        assert!(!feed.tracker.is_frozen());
        feed.draw(0, "C");
    }

    #[test]
    fn missed_hidden_draw_is_implied() {
        let mut feed = Feed::new();
        feed.start();
        feed.draw(0, "N");
        feed.discard(0, "N");
        // Seat 1's draw was never captured.
        let events = feed.discard(1, "9p");
        assert_eq!(Feed::types(&events), ["tsumo", "dahai"]);
        assert_eq!(feed.tracker.state().turn, 2);
        assert_eq!(feed.tracker.held_len(), 0);
    }

    #[test]
    fn unclosed_window_is_skipped_when_play_moves_on() {
        let mut feed = Feed::new();
        open_window_on_5p(&mut feed);
        let events = feed.draw(2, "?");
        assert_eq!(Feed::types(&events), ["call_window_closed", "tsumo"]);
    }

    #[test]
    fn missing_hand_result_is_settled_from_the_next_deal() {
        let mut feed = Feed::new();
        feed.start();
        feed.draw(0, "N");
        feed.ok(TypedMessage::Win {
            seat: 0,
            target: 0,
            tile: t("N"),
        });
        let events = feed.ok(TypedMessage::Deal {
            round: RoundId {
                honba: 1,
                ..RoundId::default()
            },
            dealer: 0,
            dora_marker: t("2s"),
            scores: vec![37000, 21000, 21000, 21000],
            hand: parse_tiles("1m 1m 1m 2p 3p 4p 5s 6s 7s S S W W").unwrap(),
            wall: 70,
        });
        assert_eq!(Feed::types(&events), ["end_kyoku", "start_kyoku"]);
        match &events[0] {
            Ev::EndKyoku { deltas, .. } => assert_eq!(deltas, &vec![12000, -4000, -4000, -4000]),
            other => panic!("expected end_kyoku, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_origins_are_ignored() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let env = Envelope {
            origin: Origin::new(1, 0),
            message: TypedMessage::MatchStart {
                seat_count: 4,
                self_seat: 1,
                scores: vec![25000; 4],
            },
        };
        assert_eq!(tracker.ingest(env.clone()).unwrap().len(), 1);
        assert!(tracker.ingest(env).unwrap().is_empty());
    }

    #[test]
    fn transitions_replay_to_the_live_state() {
        let mut feed = Feed::new();
        open_window_on_5p(&mut feed);
        feed.ok(TypedMessage::CallResponse {
            seat: 2,
            reply: CallReply::Pass,
        });
        feed.ok(TypedMessage::CallResponse {
            seat: 3,
            reply: CallReply::Call {
                kind: CallKind::Pon,
                consumed: vec![t("5p"), t("5p")],
            },
        });
        feed.discard(3, "1s");
        let replayed = replay(&feed.events).unwrap();
        assert_eq!(&replayed, feed.tracker.state());
    }
}

//! Seeded simulator producing legal typed-message streams for whole matches.
//!
//! Every seat plays from a real shuffled wall, so hidden seats discard tiles they actually hold
//! and calls are only offered when the caller could make them. Only the controlled seat's tiles
//! are revealed in the generated messages, as on the wire.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::message::{
    CallEligibility, CallKind, CallReply, Envelope, Origin, RoundId, Seat, TypedMessage,
};
use crate::state::snapshot::RIICHI_COST;
use crate::tile::{Suit, Tile, full_set, remove_tile};

const DEAD_WALL: usize = 14;
const HAND: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    pub seat_count: u8,
    pub self_seat: Seat,
    pub hands: u8,
    pub call_rate: f64,
    pub riichi_rate: f64,
    pub tsumo_rate: f64,
    /// Chance a call window closes by timeout instead of every seat answering.
    pub timeout_rate: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seat_count: 4,
            self_seat: 0,
            hands: 2,
            call_rate: 0.3,
            riichi_rate: 0.04,
            tsumo_rate: 0.01,
            timeout_rate: 0.2,
        }
    }
}

struct Table {
    hands: Vec<Vec<Tile>>,
    riichi: Vec<bool>,
    melds: Vec<usize>,
}

pub struct Simulator {
    cfg: SimConfig,
    rng: StdRng,
    scores: Vec<i32>,
    kyotaku: u8,
    capture_seq: u64,
    out: Vec<Envelope>,
}

impl Simulator {
    pub fn new(cfg: SimConfig, seed: u64) -> Self {
        Self {
            cfg,
            rng: StdRng::seed_from_u64(seed),
            scores: vec![25_000; cfg.seat_count as usize],
            kyotaku: 0,
            capture_seq: 0,
            out: Vec::new(),
        }
    }

    fn push(&mut self, message: TypedMessage) {
        self.capture_seq += 1;
        self.out.push(Envelope {
            origin: Origin::new(self.capture_seq, 0),
            message,
        });
    }

    fn next(&self, seat: Seat) -> Seat {
        (seat + 1) % self.cfg.seat_count
    }

    /// The full message stream of one match.
    pub fn run(mut self) -> Vec<Envelope> {
        self.push(TypedMessage::MatchStart {
            seat_count: self.cfg.seat_count,
            self_seat: self.cfg.self_seat,
            scores: self.scores.clone(),
        });
        for kyoku in 0..self.cfg.hands {
            self.play_hand(kyoku);
        }
        self.push(TypedMessage::MatchEnd {
            scores: self.scores.clone(),
        });
        self.out
    }

    fn play_hand(&mut self, kyoku: u8) {
        let n = self.cfg.seat_count;
        let mut wall = full_set(n);
        wall.shuffle(&mut self.rng);
        let mut table = Table {
            hands: (0..n).map(|_| wall.split_off(wall.len() - HAND)).collect(),
            riichi: vec![false; n as usize],
            melds: vec![0; n as usize],
        };
        let dora_marker = wall.pop().unwrap_or(Tile::EAST);
        wall.truncate(wall.len().saturating_sub(DEAD_WALL - 1));
        let dealer = kyoku % n;

        let own = self.cfg.self_seat as usize;
        let mut hand = table.hands[own].clone();
        hand.sort();
        self.push(TypedMessage::Deal {
            round: RoundId {
                bakaze: Tile::EAST,
                kyoku: kyoku % n + 1,
                honba: 0,
                kyotaku: self.kyotaku,
            },
            dealer,
            dora_marker,
            scores: self.scores.clone(),
            hand,
            wall: wall.len() as u8,
        });

        let mut turn = dealer;
        let mut draw = true;
        loop {
            let drawn = if draw {
                let Some(tile) = wall.pop() else {
                    self.push(TypedMessage::ExhaustiveDraw { tenpai: Vec::new() });
                    let deltas = vec![0; n as usize];
                    self.push(TypedMessage::HandResult {
                        deltas,
                        scores: self.scores.clone(),
                    });
                    return;
                };
                table.hands[turn as usize].push(tile);
                let visible = turn == self.cfg.self_seat;
                self.push(TypedMessage::Draw {
                    seat: turn,
                    tile: if visible { tile } else { Tile::UNKNOWN },
                    options: Vec::new(),
                });
                if self.rng.gen_bool(self.cfg.tsumo_rate) {
                    self.settle_tsumo(turn, tile);
                    return;
                }
                Some(tile)
            } else {
                None
            };

            let tile = self.discard(&mut table, turn, drawn);
            match self.call_window(&mut table, turn, tile) {
                Some(caller) => {
                    turn = caller;
                    draw = false;
                }
                None => {
                    turn = self.next(turn);
                    draw = true;
                }
            }
        }
    }

    fn discard(&mut self, table: &mut Table, seat: Seat, drawn: Option<Tile>) -> Tile {
        let s = seat as usize;
        let tile = match drawn {
            Some(d) if table.riichi[s] => d,
            _ => {
                let hand = &table.hands[s];
                hand[self.rng.gen_range(0..hand.len())]
            }
        };
        remove_tile(&mut table.hands[s], tile);
        let riichi = !table.riichi[s]
            && table.melds[s] == 0
            && self.scores[s] >= RIICHI_COST
            && self.rng.gen_bool(self.cfg.riichi_rate);
        if riichi {
            // No ron in the simulation, so every declaration is accepted.
            table.riichi[s] = true;
            self.scores[s] -= RIICHI_COST;
            self.kyotaku += 1;
        }
        self.push(TypedMessage::Discard {
            seat,
            tile,
            tsumogiri: drawn == Some(tile),
            riichi,
        });
        tile
    }

    fn options(&self, table: &Table, seat: Seat, discarder: Seat, tile: Tile) -> Vec<(CallKind, Vec<Tile>)> {
        let s = seat as usize;
        if table.riichi[s] {
            return Vec::new();
        }
        let hand = &table.hands[s];
        let mut out = Vec::new();
        let same: Vec<Tile> = hand.iter().copied().filter(|t| t.same_kind(tile)).collect();
        if same.len() >= 2 {
            out.push((CallKind::Pon, same[..2].to_vec()));
        }
        if seat == self.next(discarder)
            && self.cfg.seat_count == 4
            && let (Some(suit), Some(n)) = (tile.suit(), tile.number())
            && suit != Suit::Honor
        {
            let find = |k: u8| {
                Tile::suited(suit, k).and_then(|want| hand.iter().copied().find(|t| t.same_kind(want)))
            };
            for (a, b) in [(n.wrapping_sub(2), n.wrapping_sub(1)), (n.wrapping_sub(1), n + 1), (n + 1, n + 2)] {
                if let (Some(x), Some(y)) = (find(a), find(b)) {
                    out.push((CallKind::Chi, vec![x, y]));
                    break;
                }
            }
        }
        out
    }

    /// Opens a call window when anyone can claim `tile`. Returns the seat whose call won.
    fn call_window(&mut self, table: &mut Table, discarder: Seat, tile: Tile) -> Option<Seat> {
        let mut offers: Vec<(Seat, Vec<(CallKind, Vec<Tile>)>)> = (0..self.cfg.seat_count)
            .filter(|s| *s != discarder)
            .map(|s| (s, self.options(table, s, discarder, tile)))
            .filter(|(_, o)| !o.is_empty())
            .collect();
        if offers.is_empty() {
            return None;
        }
        self.push(TypedMessage::CallWindow {
            discarder,
            tile,
            eligible: offers
                .iter()
                .map(|(seat, o)| CallEligibility {
                    seat: *seat,
                    kinds: o.iter().map(|(k, _)| *k).collect(),
                })
                .collect(),
        });

        offers.shuffle(&mut self.rng);
        let timeout = self.rng.gen_bool(self.cfg.timeout_rate);
        let answering = if timeout {
            self.rng.gen_range(0..offers.len())
        } else {
            offers.len()
        };
        // At most one seat calls so the winner does not depend on priority rules.
        let mut winner: Option<(Seat, CallKind, Vec<Tile>)> = None;
        for (seat, options) in offers.into_iter().take(answering) {
            let reply = if winner.is_none() && self.rng.gen_bool(self.cfg.call_rate) {
                let (kind, consumed) = options[self.rng.gen_range(0..options.len())].clone();
                winner = Some((seat, kind, consumed.clone()));
                CallReply::Call { kind, consumed }
            } else {
                CallReply::Pass
            };
            self.push(TypedMessage::CallResponse { seat, reply });
        }
        if timeout {
            self.push(TypedMessage::CallTimeout);
        }

        let (seat, _, consumed) = winner?;
        for t in &consumed {
            remove_tile(&mut table.hands[seat as usize], *t);
        }
        table.melds[seat as usize] += 1;
        Some(seat)
    }

    fn settle_tsumo(&mut self, seat: Seat, tile: Tile) {
        self.push(TypedMessage::Win {
            seat,
            target: seat,
            tile,
        });
        let n = self.cfg.seat_count as usize;
        let mut deltas = vec![-1_000; n];
        deltas[seat as usize] = 1_000 * (n as i32 - 1) + 1_000 * self.kyotaku as i32;
        self.kyotaku = 0;
        for (score, delta) in self.scores.iter_mut().zip(&deltas) {
            *score += delta;
        }
        self.push(TypedMessage::HandResult {
            deltas,
            scores: self.scores.clone(),
        });
    }
}

/// Message stream of a seeded match with default settings.
pub fn simulate(seed: u64) -> Vec<Envelope> {
    Simulator::new(SimConfig::default(), seed).run()
}

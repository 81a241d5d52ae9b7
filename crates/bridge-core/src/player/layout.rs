//! Screen geometry on the client's 16x9 logical grid, and the rules that pick which button or
//! candidate a given action clicks.

use super::input::{Control, Point, Viewport};
use crate::agent::{ActionKind, DecisionKind, DecisionPoint};
use crate::tile::{Suit, Tile};

pub const GRID_WIDTH: f64 = 16.0;
pub const GRID_HEIGHT: f64 = 9.0;

const HAND_X: [f64; 14] = [
    2.23125, 3.021875, 3.8125, 4.603125, 5.39375, 6.184375, 6.975, 7.765625, 8.55625, 9.346875,
    10.1375, 10.928125, 11.71875, 12.509375,
];
const HAND_Y: f64 = 8.3625;
const TSUMO_GAP: f64 = 0.246875;

// Slots 0-2 on the lower row right to left, 3-5 on the row above.
const ACTIONS: [(f64, f64); 6] = [
    (10.875, 7.0),
    (8.6375, 7.0),
    (6.4, 7.0),
    (10.875, 5.9),
    (8.6375, 5.9),
    (6.4, 5.9),
];

const CANDIDATE_Y: f64 = 6.3;
const CANDIDATE_X: [f64; 11] = [
    3.6625, 4.49625, 5.33, 6.16375, 6.9975, 7.83125, 8.665, 9.49875, 10.3325, 11.16625, 12.0,
];
const KAN_CANDIDATE_X: [f64; 7] = [4.325, 5.4915, 6.6583, 7.825, 8.9917, 10.1583, 11.325];

/// Position on the logical grid, `0..=16` by `0..=9`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub x: f64,
    pub y: f64,
}

pub fn grid_point(control: Control) -> Option<GridPoint> {
    let (x, y) = match control {
        Control::HandSlot { index } => (*HAND_X.get(index as usize)?, HAND_Y),
        Control::TsumoSlot { hand_len } => (*HAND_X.get(hand_len as usize)? + TSUMO_GAP, HAND_Y),
        Control::ActionButton { slot } => *ACTIONS.get(slot as usize)?,
        Control::CallCandidate { slot } => (*CANDIDATE_X.get(slot as usize)?, CANDIDATE_Y),
        Control::KanCandidate { slot } => (*KAN_CANDIDATE_X.get(slot as usize)?, CANDIDATE_Y),
    };
    Some(GridPoint { x, y })
}

/// Maps grid points onto the largest 16:9 rectangle centred in the viewport. Wider viewports
/// get bars left and right, taller ones above and below.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenMapper {
    origin_x: f64,
    origin_y: f64,
    width: f64,
    height: f64,
}

impl ScreenMapper {
    pub fn new(viewport: Viewport) -> Self {
        let target = GRID_WIDTH / GRID_HEIGHT;
        let (mut width, mut height) = (viewport.width, viewport.height);
        let (mut origin_x, mut origin_y) = (0.0, 0.0);
        if viewport.height > 0.0 && viewport.width / viewport.height > target {
            width = (viewport.height * target).floor();
            origin_x = (viewport.width - width) / 2.0;
        } else {
            height = (viewport.width / target).floor();
            origin_y = (viewport.height - height) / 2.0;
        }
        Self {
            origin_x,
            origin_y,
            width,
            height,
        }
    }

    /// `None` for points outside the grid.
    pub fn to_pixels(&self, p: GridPoint) -> Option<Point> {
        if !(0.0..=GRID_WIDTH).contains(&p.x) || !(0.0..=GRID_HEIGHT).contains(&p.y) {
            return None;
        }
        Some(Point {
            x: self.origin_x + p.x / GRID_WIDTH * self.width,
            y: self.origin_y + p.y / GRID_HEIGHT * self.height,
        })
    }
}

/// Operation buttons the client can show, in its own operation-id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Skip,
    Discard,
    Chi,
    Pon,
    Ankan,
    Daiminkan,
    Kakan,
    Reach,
    Tsumo,
    Ron,
    Ryukyoku,
    Nukidora,
}

const BUTTON_ORDER: [Button; 12] = [
    Button::Skip,
    Button::Discard,
    Button::Chi,
    Button::Pon,
    Button::Ankan,
    Button::Daiminkan,
    Button::Kakan,
    Button::Reach,
    Button::Tsumo,
    Button::Ron,
    Button::Ryukyoku,
    Button::Nukidora,
];

impl Button {
    /// Lower values are laid out first.
    pub fn priority(self) -> u8 {
        match self {
            Button::Skip => 0,
            Button::Tsumo | Button::Ron => 1,
            Button::Reach | Button::Daiminkan | Button::Ryukyoku => 2,
            Button::Pon | Button::Ankan | Button::Kakan => 3,
            Button::Chi | Button::Nukidora => 4,
            Button::Discard => 99,
        }
    }

    pub fn for_action(kind: ActionKind, decision: DecisionKind) -> Button {
        match kind {
            ActionKind::Dahai => Button::Discard,
            ActionKind::Reach => Button::Reach,
            ActionKind::Chi => Button::Chi,
            ActionKind::Pon => Button::Pon,
            ActionKind::Daiminkan => Button::Daiminkan,
            ActionKind::Ankan => Button::Ankan,
            ActionKind::Kakan => Button::Kakan,
            ActionKind::Hora if decision == DecisionKind::Turn => Button::Tsumo,
            ActionKind::Hora => Button::Ron,
            ActionKind::Ryukyoku => Button::Ryukyoku,
            ActionKind::Nukidora => Button::Nukidora,
            ActionKind::None => Button::Skip,
        }
    }
}

/// Buttons on screen for `decision`, in layout order. Skip is always shown.
pub fn button_layout(decision: &DecisionPoint) -> Vec<Button> {
    let shown: Vec<Button> = decision
        .allowed
        .iter()
        .map(|k| Button::for_action(*k, decision.kind))
        .collect();
    let mut buttons: Vec<Button> = BUTTON_ORDER
        .iter()
        .copied()
        .filter(|b| *b == Button::Skip || shown.contains(b))
        .collect();
    buttons.sort_by_key(|b| b.priority());
    buttons
}

pub fn button_slot(decision: &DecisionPoint, button: Button) -> Option<u8> {
    let slot = button_layout(decision).iter().position(|b| *b == button)?;
    (slot < ACTIONS.len()).then_some(slot as u8)
}

/// Slot in the candidate row for the `index`-th of `count` centred candidates.
pub fn candidate_slot(index: usize, count: usize) -> Option<u8> {
    let slot = (2 * index + 6).checked_sub(count)?;
    (slot < CANDIDATE_X.len()).then_some(slot as u8)
}

pub fn kan_candidate_slot(index: usize, count: usize) -> Option<u8> {
    let slot = (2 * index + 4).checked_sub(count)?;
    (slot < KAN_CANDIDATE_X.len()).then_some(slot as u8)
}

fn sorted_pair(a: Tile, b: Tile) -> [Tile; 2] {
    if a <= b { [a, b] } else { [b, a] }
}

/// Distinct ways to chi `pai` from `hand`, red fives counted apart, in UI order.
pub fn chi_candidates(hand: &[Tile], pai: Tile) -> Vec<[Tile; 2]> {
    let (Some(suit), Some(n)) = (pai.suit(), pai.number()) else {
        return Vec::new();
    };
    if suit == Suit::Honor {
        return Vec::new();
    }
    let variants = |number: u8| -> Vec<Tile> {
        let Some(plain) = Tile::suited(suit, number) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if let Some(red) = plain.akaize()
            && hand.contains(&red)
        {
            out.push(red);
        }
        if hand.contains(&plain) {
            out.push(plain);
        }
        out
    };
    let mut candidates = Vec::new();
    let shapes: [(i8, i8); 3] = [(-2, -1), (-1, 1), (1, 2)];
    for (da, db) in shapes {
        let (a, b) = (n as i8 + da, n as i8 + db);
        if !(1..=9).contains(&a) || !(1..=9).contains(&b) {
            continue;
        }
        for ta in variants(a as u8) {
            for tb in variants(b as u8) {
                let pair = sorted_pair(ta, tb);
                if !candidates.contains(&pair) {
                    candidates.push(pair);
                }
            }
        }
    }
    candidates.sort();
    candidates
}

/// Pon choices on `pai`: with a red five in hand the client asks which pair to use.
pub fn pon_candidates(hand: &[Tile], pai: Tile) -> Vec<[Tile; 2]> {
    let plain = pai.deaka();
    let plain_count = hand.iter().filter(|t| **t == plain).count();
    let mut out = Vec::new();
    if plain_count >= 2 {
        out.push([plain, plain]);
    }
    if let Some(red) = plain.akaize()
        && plain_count >= 1
        && hand.contains(&red)
    {
        out.push([red, plain]);
    }
    out
}

/// Tile kinds the seat could kan on its turn: four concealed copies, or a pon plus the fourth.
pub fn kan_candidates(hand: &[Tile], pon_kinds: &[Tile]) -> Vec<Tile> {
    let mut kinds: Vec<Tile> = Vec::new();
    for tile in hand {
        let kind = tile.deaka();
        if kinds.contains(&kind) {
            continue;
        }
        let copies = hand.iter().filter(|t| t.same_kind(kind)).count();
        if copies >= 4 || pon_kinds.iter().any(|p| p.same_kind(kind)) {
            kinds.push(kind);
        }
    }
    kinds.sort();
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::parse_tiles;

    fn t(s: &str) -> Tile {
        s.parse().unwrap()
    }

    #[test]
    fn tsumo_slot_sits_right_of_the_sorted_hand() {
        let p = grid_point(Control::TsumoSlot { hand_len: 13 }).unwrap();
        assert!((p.x - (12.509375 + 0.246875)).abs() < 1e-9);
        assert_eq!(p.y, HAND_Y);
        assert!(grid_point(Control::HandSlot { index: 14 }).is_none());
    }

    #[test]
    fn wide_viewports_get_side_bars() {
        let mapper = ScreenMapper::new(Viewport {
            width: 2000.0,
            height: 900.0,
        });
        let p = mapper.to_pixels(GridPoint { x: 0.0, y: 0.0 }).unwrap();
        assert_eq!((p.x, p.y), (200.0, 0.0));
        let p = mapper.to_pixels(GridPoint { x: 16.0, y: 9.0 }).unwrap();
        assert_eq!((p.x, p.y), (1800.0, 900.0));
    }

    #[test]
    fn tall_viewports_get_top_and_bottom_bars() {
        let mapper = ScreenMapper::new(Viewport {
            width: 1600.0,
            height: 1100.0,
        });
        let p = mapper.to_pixels(GridPoint { x: 8.0, y: 0.0 }).unwrap();
        assert_eq!((p.x, p.y), (800.0, 100.0));
        assert!(mapper.to_pixels(GridPoint { x: 16.5, y: 1.0 }).is_none());
    }

    #[test]
    fn buttons_sort_by_priority_keeping_operation_order() {
        let decision = DecisionPoint {
            epoch: 1,
            seq: 1,
            seat: 0,
            kind: DecisionKind::Turn,
            allowed: vec![ActionKind::Dahai, ActionKind::Reach, ActionKind::Hora, ActionKind::Ankan],
        };
        assert_eq!(
            button_layout(&decision),
            [Button::Skip, Button::Tsumo, Button::Reach, Button::Ankan, Button::Discard]
        );
        assert_eq!(button_slot(&decision, Button::Reach), Some(2));

        let call = DecisionPoint {
            kind: DecisionKind::Call,
            allowed: vec![ActionKind::None, ActionKind::Chi, ActionKind::Pon, ActionKind::Hora],
            ..decision
        };
        assert_eq!(
            button_layout(&call),
            [Button::Skip, Button::Ron, Button::Pon, Button::Chi]
        );
    }

    #[test]
    fn candidates_are_centred() {
        assert_eq!(candidate_slot(0, 2), Some(4));
        assert_eq!(candidate_slot(1, 2), Some(6));
        assert_eq!(candidate_slot(1, 3), Some(5));
        assert_eq!(kan_candidate_slot(0, 1), Some(3));
        assert_eq!(kan_candidate_slot(1, 2), Some(4));
    }

    #[test]
    fn chi_candidates_split_red_variants() {
        let hand = parse_tiles("3p 4p 5pr 5p 6p 7p").unwrap();
        let cands = chi_candidates(&hand, t("6p"));
        // 4-5 (red and plain), 5-7 (red and plain), 7-8 missing.
        assert_eq!(
            cands,
            vec![
                [t("4p"), t("5pr")],
                [t("4p"), t("5p")],
                [t("5pr"), t("7p")],
                [t("5p"), t("7p")],
            ]
        );
        assert!(chi_candidates(&hand, t("E")).is_empty());
    }

    #[test]
    fn pon_with_a_red_five_offers_two_pairs() {
        let hand = parse_tiles("5sr 5s 5s 1m").unwrap();
        assert_eq!(
            pon_candidates(&hand, t("5s")),
            vec![[t("5s"), t("5s")], [t("5sr"), t("5s")]]
        );
        assert_eq!(pon_candidates(&hand, t("1m")).len(), 0);
    }

    #[test]
    fn kan_candidates_include_added_kans() {
        let hand = parse_tiles("2m 2m 2m 2m 9s W").unwrap();
        assert_eq!(kan_candidates(&hand, &[t("9s")]), vec![t("2m"), t("9s")]);
    }
}

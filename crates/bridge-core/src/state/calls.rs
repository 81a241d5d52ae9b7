use serde::{Deserialize, Serialize};

use crate::message::{CallKind, Seat};
use crate::tile::Tile;

/// Precedence between competing calls on one discard; higher wins. Application-specific, so it
/// comes from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPriority {
    pub ron: u8,
    pub daiminkan: u8,
    pub pon: u8,
    pub chi: u8,
}

impl Default for CallPriority {
    fn default() -> Self {
        Self {
            ron: 3,
            daiminkan: 2,
            pon: 2,
            chi: 1,
        }
    }
}

impl CallPriority {
    pub fn of(&self, kind: CallKind) -> u8 {
        match kind {
            CallKind::Ron => self.ron,
            CallKind::Daiminkan => self.daiminkan,
            CallKind::Pon => self.pon,
            CallKind::Chi => self.chi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallClaim {
    pub seat: Seat,
    pub kind: CallKind,
    pub consumed: Vec<Tile>,
}

/// Picks the winning claim. Equal priorities go to the seat nearest after the discarder, so the
/// order in which responses arrived never matters.
pub fn resolve<'a>(
    claims: &'a [CallClaim],
    discarder: Seat,
    seat_count: u8,
    priority: &CallPriority,
) -> Option<&'a CallClaim> {
    let n = seat_count.max(1);
    let distance = |seat: Seat| (seat % n + n - discarder % n) % n;
    claims.iter().max_by(|a, b| {
        priority
            .of(a.kind)
            .cmp(&priority.of(b.kind))
            .then_with(|| distance(b.seat).cmp(&distance(a.seat)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(seat: Seat, kind: CallKind) -> CallClaim {
        CallClaim {
            seat,
            kind,
            consumed: Vec::new(),
        }
    }

    #[test]
    fn ron_outranks_pon_regardless_of_arrival() {
        let prio = CallPriority::default();
        let a = [claim(3, CallKind::Pon), claim(2, CallKind::Ron)];
        let b = [claim(2, CallKind::Ron), claim(3, CallKind::Pon)];
        assert_eq!(resolve(&a, 1, 4, &prio).unwrap().seat, 2);
        assert_eq!(resolve(&b, 1, 4, &prio).unwrap().seat, 2);
    }

    #[test]
    fn ties_go_to_the_seat_nearest_the_discarder() {
        let prio = CallPriority::default();
        let claims = [claim(3, CallKind::Ron), claim(0, CallKind::Ron)];
        // Discarder 2: seat 3 is one step away, seat 0 two.
        assert_eq!(resolve(&claims, 2, 4, &prio).unwrap().seat, 3);
        // Discarder 3: seat 0 is next, seat 1 after it.
        let claims = [claim(1, CallKind::Ron), claim(0, CallKind::Ron)];
        assert_eq!(resolve(&claims, 3, 4, &prio).map(|c| c.seat), Some(0));
    }

    #[test]
    fn priority_table_is_configurable() {
        let prio = CallPriority {
            chi: 5,
            ..CallPriority::default()
        };
        let claims = [claim(3, CallKind::Pon), claim(2, CallKind::Chi)];
        assert_eq!(resolve(&claims, 1, 4, &prio).unwrap().kind, CallKind::Chi);
    }

    #[test]
    fn no_claims_resolve_to_nothing() {
        assert!(resolve(&[], 0, 4, &CallPriority::default()).is_none());
    }
}

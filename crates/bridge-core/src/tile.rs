use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Tile notation in UI sort order. Red fives sort directly before their plain counterpart.
const NAMES: [&str; 38] = [
    "1m", "2m", "3m", "4m", "5mr", "5m", "6m", "7m", "8m", "9m", //
    "1p", "2p", "3p", "4p", "5pr", "5p", "6p", "7p", "8p", "9p", //
    "1s", "2s", "3s", "4s", "5sr", "5s", "6s", "7s", "8s", "9s", //
    "E", "S", "W", "N", "P", "F", "C", "?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suit {
    Man,
    Pin,
    Sou,
    Honor,
}

/// One tile, stored as its index in the UI sort order. Ordering follows that index, so sorting a
/// hand gives the same layout the client renders.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile(u8);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tile notation {0:?}")]
pub struct TileParseError(pub String);

impl Tile {
    pub const COUNT: usize = NAMES.len();
    pub const UNKNOWN: Tile = Tile(37);
    pub const EAST: Tile = Tile(30);
    pub const SOUTH: Tile = Tile(31);
    pub const WEST: Tile = Tile(32);
    pub const NORTH: Tile = Tile(33);

    pub fn from_index(index: u8) -> Option<Tile> {
        ((index as usize) < Self::COUNT).then_some(Tile(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// Plain suited tile, `number` in `1..=9`.
    pub fn suited(suit: Suit, number: u8) -> Option<Tile> {
        let base = match suit {
            Suit::Man => 0,
            Suit::Pin => 10,
            Suit::Sou => 20,
            Suit::Honor => return None,
        };
        match number {
            1..=4 => Some(Tile(base + number - 1)),
            5..=9 => Some(Tile(base + number)),
            _ => None,
        }
    }

    pub fn wind(offset: u8) -> Tile {
        Tile(30 + offset % 4)
    }

    pub fn as_str(self) -> &'static str {
        NAMES[self.0 as usize]
    }

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }

    pub fn is_red(self) -> bool {
        matches!(self.0, 4 | 14 | 24)
    }

    pub fn suit(self) -> Option<Suit> {
        match self.0 {
            0..=9 => Some(Suit::Man),
            10..=19 => Some(Suit::Pin),
            20..=29 => Some(Suit::Sou),
            30..=36 => Some(Suit::Honor),
            _ => None,
        }
    }

    pub fn number(self) -> Option<u8> {
        if self.0 >= 30 {
            return None;
        }
        let k = self.0 % 10;
        Some(match k {
            0..=3 => k + 1,
            4 => 5,
            _ => k,
        })
    }

    /// Red five mapped to its plain five; every other tile unchanged.
    pub fn deaka(self) -> Tile {
        if self.is_red() { Tile(self.0 + 1) } else { self }
    }

    /// Plain five mapped to its red five.
    pub fn akaize(self) -> Option<Tile> {
        matches!(self.0, 5 | 15 | 25).then(|| Tile(self.0 - 1))
    }

    /// Same tile ignoring the red marker.
    pub fn same_kind(self, other: Tile) -> bool {
        self.deaka() == other.deaka()
    }

    pub fn is_terminal_or_honor(self) -> bool {
        match self.number() {
            Some(n) => n == 1 || n == 9,
            None => !self.is_unknown(),
        }
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tile {
    type Err = TileParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Some agents spell red fives as 0m/0p/0s.
        let s = match s {
            "0m" => "5mr",
            "0p" => "5pr",
            "0s" => "5sr",
            other => other,
        };
        NAMES
            .iter()
            .position(|name| *name == s)
            .map(|i| Tile(i as u8))
            .ok_or_else(|| TileParseError(s.to_string()))
    }
}

impl Serialize for Tile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Tile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a whitespace separated list such as `"1m 2m 5mr E"`.
pub fn parse_tiles(s: &str) -> Result<Vec<Tile>, TileParseError> {
    s.split_whitespace().map(str::parse).collect()
}

/// Removes one exact copy of `tile`. Returns false when the hand does not hold it.
pub fn remove_tile(hand: &mut Vec<Tile>, tile: Tile) -> bool {
    match hand.iter().position(|t| *t == tile) {
        Some(i) => {
            hand.remove(i);
            true
        }
        None => false,
    }
}

/// Every tile of a standard 136-tile set with one red five per suit.
pub fn full_set(seat_count: u8) -> Vec<Tile> {
    let mut out = Vec::with_capacity(136);
    for index in 0..37u8 {
        let tile = Tile(index);
        // Three-seat matches drop 2m..8m.
        if seat_count == 3
            && tile.suit() == Some(Suit::Man)
            && matches!(tile.number(), Some(2..=8))
        {
            continue;
        }
        let copies = if tile.is_red() {
            1
        } else if tile.akaize().is_some() {
            3
        } else {
            4
        };
        out.extend(std::iter::repeat_n(tile, copies));
    }
    out
}

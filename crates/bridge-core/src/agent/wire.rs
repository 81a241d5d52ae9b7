use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::decision::{ActionKind, DecisionKind, DecisionPoint};
use super::{AgentAction, Evaluation};
use crate::message::Seat;
use crate::tile::Tile;

pub const PROTOCOL_VERSION: u32 = 1;

/// Control line sent after the events, asking for one reply.
#[derive(Debug, Clone, Serialize)]
struct RequestLine<'a> {
    #[serde(rename = "type")]
    kind_tag: &'static str,
    v: u32,
    seq: u64,
    kind: DecisionKind,
    allowed: &'a [ActionKind],
}

pub fn request_line(decision: &DecisionPoint) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RequestLine {
        kind_tag: "request_action",
        v: PROTOCOL_VERSION,
        seq: decision.seq,
        kind: decision.kind,
        allowed: &decision.allowed,
    })
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct MetaWire {
    #[serde(default)]
    pub win_prob: Option<f32>,
    #[serde(default)]
    pub deal_in_prob: Option<f32>,
    #[serde(default)]
    pub safety: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReplyWire {
    #[serde(default)]
    pub v: Option<u32>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub actor: Option<Seat>,
    #[serde(default)]
    pub pai: Option<String>,
    #[serde(default)]
    pub consumed: Vec<String>,
    #[serde(default)]
    pub tsumogiri: Option<bool>,
    #[serde(default)]
    pub target: Option<Seat>,
    #[serde(default)]
    pub meta: Option<MetaWire>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub action: AgentAction,
    pub evaluation: Evaluation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyParseError {
    InvalidJson(String),
    UnsupportedVersion(u32),
    UnsupportedType(String),
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    InvalidTile(String),
    WrongConsumedCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    WrongActor {
        expected: Seat,
        got: Seat,
    },
    NotAllowed(ActionKind),
}

impl std::fmt::Display for ReplyParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyParseError::InvalidJson(msg) => write!(f, "invalid reply json: {msg}"),
            ReplyParseError::UnsupportedVersion(v) => write!(f, "unsupported protocol version {v}"),
            ReplyParseError::UnsupportedType(kind) => write!(f, "unsupported reply type: {kind}"),
            ReplyParseError::MissingField { kind, field } => {
                write!(f, "{kind}: missing {field}")
            }
            ReplyParseError::InvalidTile(tile) => write!(f, "invalid tile: {tile}"),
            ReplyParseError::WrongConsumedCount {
                kind,
                expected,
                got,
            } => write!(f, "{kind}: expected {expected} consumed tiles, got {got}"),
            ReplyParseError::WrongActor { expected, got } => {
                write!(f, "reply for seat {got}, controlled seat is {expected}")
            }
            ReplyParseError::NotAllowed(kind) => {
                write!(f, "{} is not allowed at this decision point", kind.name())
            }
        }
    }
}

impl std::error::Error for ReplyParseError {}

fn tile(raw: &str) -> Result<Tile, ReplyParseError> {
    raw.parse::<Tile>()
        .ok()
        .filter(|t| !t.is_unknown())
        .ok_or_else(|| ReplyParseError::InvalidTile(raw.to_string()))
}

fn required_pai(wire: &ReplyWire, kind: &'static str) -> Result<Tile, ReplyParseError> {
    let raw = wire
        .pai
        .as_deref()
        .ok_or(ReplyParseError::MissingField { kind, field: "pai" })?;
    tile(raw)
}

fn consumed(wire: &ReplyWire, kind: &'static str, expected: usize) -> Result<Vec<Tile>, ReplyParseError> {
    if wire.consumed.len() != expected {
        return Err(ReplyParseError::WrongConsumedCount {
            kind,
            expected,
            got: wire.consumed.len(),
        });
    }
    wire.consumed.iter().map(|raw| tile(raw)).collect()
}

impl TryFrom<MetaWire> for Evaluation {
    type Error = ReplyParseError;

    fn try_from(meta: MetaWire) -> Result<Self, Self::Error> {
        let safety = meta
            .safety
            .iter()
            .map(|(raw, score)| Ok((tile(raw)?, *score)))
            .collect::<Result<_, ReplyParseError>>()?;
        Ok(Evaluation {
            win_prob: meta.win_prob,
            deal_in_prob: meta.deal_in_prob,
            safety,
        })
    }
}

impl TryFrom<ReplyWire> for AgentReply {
    type Error = ReplyParseError;

    fn try_from(wire: ReplyWire) -> Result<Self, Self::Error> {
        if let Some(v) = wire.v
            && v != PROTOCOL_VERSION
        {
            return Err(ReplyParseError::UnsupportedVersion(v));
        }
        let kind = ActionKind::from_name(wire.kind.trim())
            .ok_or_else(|| ReplyParseError::UnsupportedType(wire.kind.clone()))?;
        let action = match kind {
            ActionKind::Dahai => AgentAction::Discard {
                tile: required_pai(&wire, "dahai")?,
                tsumogiri: wire.tsumogiri.unwrap_or(false),
            },
            // The declaration carries the discard that goes with it.
            ActionKind::Reach => AgentAction::Riichi {
                tile: required_pai(&wire, "reach")?,
            },
            ActionKind::Chi => AgentAction::Chi {
                consumed: consumed(&wire, "chi", 2)?,
            },
            ActionKind::Pon => AgentAction::Pon {
                consumed: consumed(&wire, "pon", 2)?,
            },
            ActionKind::Daiminkan => AgentAction::Daiminkan {
                consumed: consumed(&wire, "daiminkan", 3)?,
            },
            ActionKind::Ankan => AgentAction::Ankan {
                consumed: consumed(&wire, "ankan", 4)?,
            },
            ActionKind::Kakan => AgentAction::Kakan {
                tile: required_pai(&wire, "kakan")?,
            },
            ActionKind::Hora => AgentAction::Hora,
            ActionKind::Ryukyoku => AgentAction::Ryukyoku,
            ActionKind::Nukidora => AgentAction::Nukidora,
            ActionKind::None => AgentAction::Pass,
        };
        let evaluation = match wire.meta {
            Some(meta) => Evaluation::try_from(meta)?,
            None => Evaluation::default(),
        };
        Ok(AgentReply { action, evaluation })
    }
}

/// Parses one reply line and checks it against the decision it answers.
pub fn parse_reply(line: &str, decision: &DecisionPoint) -> Result<AgentReply, ReplyParseError> {
    let wire: ReplyWire =
        serde_json::from_str(line.trim()).map_err(|e| ReplyParseError::InvalidJson(e.to_string()))?;
    if let Some(actor) = wire.actor
        && actor != decision.seat
    {
        return Err(ReplyParseError::WrongActor {
            expected: decision.seat,
            got: actor,
        });
    }
    let reply = AgentReply::try_from(wire)?;
    let kind = reply.action.kind();
    if !decision.allows(kind) {
        return Err(ReplyParseError::NotAllowed(kind));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn() -> DecisionPoint {
        DecisionPoint {
            epoch: 1,
            seq: 12,
            seat: 0,
            kind: DecisionKind::Turn,
            allowed: vec![ActionKind::Dahai, ActionKind::Reach],
        }
    }

    #[test]
    fn request_line_names_the_decision() {
        let line = request_line(&turn()).unwrap();
        assert_eq!(
            line,
            r#"{"type":"request_action","v":1,"seq":12,"kind":"turn","allowed":["dahai","reach"]}"#
        );
    }

    #[test]
    fn discard_reply_with_meta() {
        let line = r#"{"type":"dahai","pai":"3s","tsumogiri":false,"meta":{"win_prob":0.21,"safety":{"3s":0.94}}}"#;
        let reply = parse_reply(line, &turn()).unwrap();
        let three_sou: Tile = "3s".parse().unwrap();
        assert_eq!(
            reply.action,
            AgentAction::Discard {
                tile: three_sou,
                tsumogiri: false
            }
        );
        assert_eq!(reply.evaluation.win_prob, Some(0.21));
        assert_eq!(reply.evaluation.safety.get(&three_sou), Some(&0.94));
    }

    #[test]
    fn red_five_may_be_spelled_with_zero() {
        let reply = parse_reply(r#"{"type":"dahai","pai":"0p"}"#, &turn()).unwrap();
        assert!(matches!(reply.action, AgentAction::Discard { tile, .. } if tile.is_red()));
    }

    #[test]
    fn reach_requires_its_discard() {
        let err = parse_reply(r#"{"type":"reach","actor":0}"#, &turn()).unwrap_err();
        assert_eq!(
            err,
            ReplyParseError::MissingField {
                kind: "reach",
                field: "pai"
            }
        );
    }

    #[test]
    fn actions_outside_the_allowed_set_are_rejected() {
        let err = parse_reply(r#"{"type":"hora"}"#, &turn()).unwrap_err();
        assert_eq!(err, ReplyParseError::NotAllowed(ActionKind::Hora));
        assert!(err.to_string().contains("hora is not allowed"));
    }

    #[test]
    fn schema_version_and_actor_are_checked() {
        assert_eq!(
            parse_reply(r#"{"v":2,"type":"dahai","pai":"1m"}"#, &turn()).unwrap_err(),
            ReplyParseError::UnsupportedVersion(2)
        );
        assert!(matches!(
            parse_reply(r#"{"type":"dahai","pai":"1m","actor":3}"#, &turn()).unwrap_err(),
            ReplyParseError::WrongActor { got: 3, .. }
        ));
        assert!(matches!(
            parse_reply("not json", &turn()).unwrap_err(),
            ReplyParseError::InvalidJson(_)
        ));
    }

    #[test]
    fn call_replies_need_the_right_tiles() {
        let call = DecisionPoint {
            kind: DecisionKind::Call,
            allowed: vec![ActionKind::None, ActionKind::Chi],
            ..turn()
        };
        let reply = parse_reply(r#"{"type":"chi","consumed":["3m","4m"]}"#, &call).unwrap();
        assert_eq!(reply.action.kind(), ActionKind::Chi);
        assert!(matches!(
            parse_reply(r#"{"type":"chi","consumed":["3m"]}"#, &call).unwrap_err(),
            ReplyParseError::WrongConsumedCount { expected: 2, got: 1, .. }
        ));
        assert_eq!(
            parse_reply(r#"{"type":"none"}"#, &call).unwrap().action,
            AgentAction::Pass
        );
    }
}

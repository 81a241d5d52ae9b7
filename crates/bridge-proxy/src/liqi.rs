//! Binary schema of the captured client traffic.
//!
//! Frame layout (little endian):
//!
//! ```text
//! u8  frame_type      1 notify, 2 request, 3 response
//! u8  schema_version  currently 1
//! u16 index           request/response pairing, 0 for notify
//! u8  name_len
//! ..  name            ".lq.ActionDiscardTile" etc.
//! u32 payload_len
//! ..  payload         fixed binary struct per name, JSON for .lq.ResSyncGame
//! ```

use std::io::{Cursor, Read, Seek, Write};

use anyhow::Context;
use binrw::{BinRead, BinResult, BinWrite, Endian};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tile_bridge_core::error::DecodeError;
use tile_bridge_core::message::{
    CallEligibility, CallKind, CallReply, DrawReason, RoundId, SelfKanKind, SelfOption, TypedMessage,
};
use tile_bridge_core::tile::Tile;

pub const SCHEMA_VERSION: u8 = 1;

/// Byte written for a tile the capturing client cannot see.
pub const HIDDEN_TILE: u8 = 37;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Notify,
    Request,
    Response,
}

impl FrameType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(FrameType::Notify),
            2 => Some(FrameType::Request),
            3 => Some(FrameType::Response),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Notify => 1,
            FrameType::Request => 2,
            FrameType::Response => 3,
        }
    }
}

/// The closed set of message names that carry match state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageName {
    GameStart,
    NewRound,
    DealTile,
    DiscardTile,
    CallWindow,
    CallResponse,
    CallTimeout,
    ChiPengGang,
    AnGangAddGang,
    BaBei,
    DoraReveal,
    Hule,
    NoTile,
    LiuJu,
    RoundResult,
    GameEndResult,
    SyncGame,
}

impl MessageName {
    pub const ALL: [MessageName; 17] = [
        MessageName::GameStart,
        MessageName::NewRound,
        MessageName::DealTile,
        MessageName::DiscardTile,
        MessageName::CallWindow,
        MessageName::CallResponse,
        MessageName::CallTimeout,
        MessageName::ChiPengGang,
        MessageName::AnGangAddGang,
        MessageName::BaBei,
        MessageName::DoraReveal,
        MessageName::Hule,
        MessageName::NoTile,
        MessageName::LiuJu,
        MessageName::RoundResult,
        MessageName::GameEndResult,
        MessageName::SyncGame,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageName::GameStart => ".lq.NotifyGameStart",
            MessageName::NewRound => ".lq.ActionNewRound",
            MessageName::DealTile => ".lq.ActionDealTile",
            MessageName::DiscardTile => ".lq.ActionDiscardTile",
            MessageName::CallWindow => ".lq.ActionCallWindow",
            MessageName::CallResponse => ".lq.ActionCallResponse",
            MessageName::CallTimeout => ".lq.ActionCallTimeout",
            MessageName::ChiPengGang => ".lq.ActionChiPengGang",
            MessageName::AnGangAddGang => ".lq.ActionAnGangAddGang",
            MessageName::BaBei => ".lq.ActionBaBei",
            MessageName::DoraReveal => ".lq.ActionDoraReveal",
            MessageName::Hule => ".lq.ActionHule",
            MessageName::NoTile => ".lq.ActionNoTile",
            MessageName::LiuJu => ".lq.ActionLiuJu",
            MessageName::RoundResult => ".lq.NotifyRoundResult",
            MessageName::GameEndResult => ".lq.NotifyGameEndResult",
            MessageName::SyncGame => ".lq.ResSyncGame",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.as_str() == name)
    }

    pub fn of(message: &TypedMessage) -> Self {
        match message {
            TypedMessage::MatchStart { .. } => MessageName::GameStart,
            TypedMessage::Deal { .. } => MessageName::NewRound,
            TypedMessage::Draw { .. } => MessageName::DealTile,
            TypedMessage::Discard { .. } => MessageName::DiscardTile,
            TypedMessage::CallWindow { .. } => MessageName::CallWindow,
            TypedMessage::CallResponse { .. } => MessageName::CallResponse,
            TypedMessage::CallTimeout => MessageName::CallTimeout,
            TypedMessage::Meld { .. } => MessageName::ChiPengGang,
            TypedMessage::SelfKan { .. } => MessageName::AnGangAddGang,
            TypedMessage::Nukidora { .. } => MessageName::BaBei,
            TypedMessage::DoraReveal { .. } => MessageName::DoraReveal,
            TypedMessage::Win { .. } => MessageName::Hule,
            TypedMessage::ExhaustiveDraw { .. } => MessageName::NoTile,
            TypedMessage::AbortiveDraw { .. } => MessageName::LiuJu,
            TypedMessage::HandResult { .. } => MessageName::RoundResult,
            TypedMessage::MatchEnd { .. } => MessageName::GameEndResult,
            TypedMessage::Resync(_) => MessageName::SyncGame,
        }
    }
}

/// Envelope fields of one frame, borrowed from the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub frame_type: FrameType,
    pub index: u16,
    pub name: &'a str,
    pub payload: &'a [u8],
}

fn truncated(what: &str) -> DecodeError {
    DecodeError::malformed("envelope", format!("truncated at {what}"))
}

/// Splits `bytes` into envelope fields. Unknown frame types and schema versions are
/// [`DecodeError::Unsupported`]; short buffers are [`DecodeError::Malformed`].
pub fn read_frame(bytes: &[u8]) -> Result<Frame<'_>, DecodeError> {
    let mut cur = Cursor::new(bytes);
    let raw_type = ReadBytesExt::read_u8(&mut cur).map_err(|_| truncated("frame_type"))?;
    let frame_type = FrameType::from_u8(raw_type)
        .ok_or_else(|| DecodeError::Unsupported(format!("frame_type={raw_type}")))?;
    let version = ReadBytesExt::read_u8(&mut cur).map_err(|_| truncated("schema_version"))?;
    if version != SCHEMA_VERSION {
        return Err(DecodeError::Unsupported(format!("schema_version={version}")));
    }
    let index = ReadBytesExt::read_u16::<LittleEndian>(&mut cur).map_err(|_| truncated("index"))?;
    let name_len = ReadBytesExt::read_u8(&mut cur).map_err(|_| truncated("name_len"))? as usize;
    let start = cur.position() as usize;
    let name = bytes
        .get(start..start + name_len)
        .ok_or_else(|| truncated("name"))?;
    let name = std::str::from_utf8(name)
        .map_err(|_| DecodeError::malformed("envelope", "name is not utf-8"))?;
    cur.set_position((start + name_len) as u64);
    let payload_len =
        ReadBytesExt::read_u32::<LittleEndian>(&mut cur).map_err(|_| truncated("payload_len"))? as usize;
    let start = cur.position() as usize;
    let payload = bytes
        .get(start..start + payload_len)
        .ok_or_else(|| DecodeError::malformed(name, format!("payload shorter than {payload_len} bytes")))?;
    if start + payload_len != bytes.len() {
        return Err(DecodeError::malformed(
            name,
            format!("{} trailing bytes", bytes.len() - start - payload_len),
        ));
    }
    Ok(Frame {
        frame_type,
        index,
        name,
        payload,
    })
}

pub fn write_frame(frame_type: FrameType, index: u16, name: &str, payload: &[u8]) -> anyhow::Result<Vec<u8>> {
    let name_len = u8::try_from(name.len()).context("message name too long")?;
    let payload_len = u32::try_from(payload.len()).context("payload too long")?;
    let mut out = Vec::with_capacity(9 + name.len() + payload.len());
    out.write_u8(frame_type.as_u8())?;
    out.write_u8(SCHEMA_VERSION)?;
    out.write_u16::<LittleEndian>(index)?;
    out.write_u8(name_len)?;
    out.write_all(name.as_bytes())?;
    out.write_u32::<LittleEndian>(payload_len)?;
    out.write_all(payload)?;
    Ok(out)
}

macro_rules! flags_codec {
    ($name:ident) => {
        impl BinRead for $name {
            type Args<'a> = ();
            fn read_options<R: Read + Seek>(
                reader: &mut R,
                endian: Endian,
                _: Self::Args<'_>,
            ) -> BinResult<Self> {
                let bits = u8::read_options(reader, endian, ())?;
                Ok($name::from_bits_truncate(bits))
            }
        }

        impl BinWrite for $name {
            type Args<'a> = ();
            fn write_options<W: Write + Seek>(
                &self,
                writer: &mut W,
                endian: Endian,
                _: Self::Args<'_>,
            ) -> BinResult<()> {
                u8::write_options(&self.bits(), writer, endian, ())
            }
        }
    };
}

bitflags! {
    /// Actions offered to the drawing seat.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct DrawOptions: u8 {
        const RIICHI = 0x01;
        const TSUMO = 0x02;
        const ANKAN = 0x04;
        const KAKAN = 0x08;
        const KYUUSHU = 0x10;
        const NUKIDORA = 0x20;
    }
}
flags_codec!(DrawOptions);

impl DrawOptions {
    const TABLE: [(DrawOptions, SelfOption); 6] = [
        (DrawOptions::RIICHI, SelfOption::Riichi),
        (DrawOptions::TSUMO, SelfOption::Tsumo),
        (DrawOptions::ANKAN, SelfOption::Ankan),
        (DrawOptions::KAKAN, SelfOption::Kakan),
        (DrawOptions::KYUUSHU, SelfOption::Kyuushu),
        (DrawOptions::NUKIDORA, SelfOption::Nukidora),
    ];

    pub fn to_options(self) -> Vec<SelfOption> {
        Self::TABLE
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, option)| *option)
            .collect()
    }

    pub fn from_options(options: &[SelfOption]) -> Self {
        Self::TABLE
            .iter()
            .filter(|(_, option)| options.contains(option))
            .fold(DrawOptions::empty(), |acc, (flag, _)| acc | *flag)
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct DiscardFlags: u8 {
        const TSUMOGIRI = 0x01;
        const RIICHI = 0x02;
    }
}
flags_codec!(DiscardFlags);

bitflags! {
    /// Calls a seat may make on the window's tile.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct CallKinds: u8 {
        const CHI = 0x01;
        const PON = 0x02;
        const KAN = 0x04;
        const RON = 0x08;
    }
}
flags_codec!(CallKinds);

impl CallKinds {
    const TABLE: [(CallKinds, CallKind); 4] = [
        (CallKinds::CHI, CallKind::Chi),
        (CallKinds::PON, CallKind::Pon),
        (CallKinds::KAN, CallKind::Daiminkan),
        (CallKinds::RON, CallKind::Ron),
    ];

    pub fn to_kinds(self) -> Vec<CallKind> {
        Self::TABLE
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, kind)| *kind)
            .collect()
    }

    pub fn from_kinds(kinds: &[CallKind]) -> Self {
        Self::TABLE
            .iter()
            .filter(|(_, kind)| kinds.contains(kind))
            .fold(CallKinds::empty(), |acc, (flag, _)| acc | *flag)
    }
}

/// Wire code of a call: 0 pass, then chi, pon, kan, ron.
fn call_code(kind: Option<CallKind>) -> u8 {
    match kind {
        None => 0,
        Some(CallKind::Chi) => 1,
        Some(CallKind::Pon) => 2,
        Some(CallKind::Daiminkan) => 3,
        Some(CallKind::Ron) => 4,
    }
}

fn call_from_code(code: u8) -> Option<Option<CallKind>> {
    match code {
        0 => Some(None),
        1 => Some(Some(CallKind::Chi)),
        2 => Some(Some(CallKind::Pon)),
        3 => Some(Some(CallKind::Daiminkan)),
        4 => Some(Some(CallKind::Ron)),
        _ => None,
    }
}

const DRAW_REASONS: [DrawReason; 6] = [
    DrawReason::Exhaustive,
    DrawReason::NineTerminals,
    DrawReason::FourWinds,
    DrawReason::FourKans,
    DrawReason::FourRiichi,
    DrawReason::TripleRon,
];

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone)]
#[br(little)]
#[bw(little)]
pub struct GameStart {
    pub seat_count: u8,
    pub self_seat: u8,
    pub n_scores: u8,
    #[br(count = n_scores)]
    pub scores: Vec<i32>,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone)]
#[br(little)]
#[bw(little)]
pub struct NewRound {
    pub bakaze: u8,
    pub kyoku: u8,
    pub honba: u8,
    pub kyotaku: u8,
    pub dealer: u8,
    pub dora_marker: u8,
    pub wall: u8,
    pub n_scores: u8,
    #[br(count = n_scores)]
    pub scores: Vec<i32>,
    pub n_hand: u8,
    #[br(count = n_hand)]
    pub hand: Vec<u8>,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone, Copy)]
#[br(little)]
#[bw(little)]
pub struct DealTile {
    pub seat: u8,
    pub tile: u8,
    pub options: DrawOptions,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone, Copy)]
#[br(little)]
#[bw(little)]
pub struct DiscardTile {
    pub seat: u8,
    pub tile: u8,
    pub flags: DiscardFlags,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone, Copy)]
#[br(little)]
#[bw(little)]
pub struct Eligibility {
    pub seat: u8,
    pub kinds: CallKinds,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone)]
#[br(little)]
#[bw(little)]
pub struct CallWindow {
    pub discarder: u8,
    pub tile: u8,
    pub n_eligible: u8,
    #[br(count = n_eligible)]
    pub eligible: Vec<Eligibility>,
}

/// Shared by call responses and resolved melds.
#[derive(BinRead, BinWrite, PartialEq, Debug, Clone)]
#[br(little)]
#[bw(little)]
pub struct CallBody {
    pub seat: u8,
    pub kind: u8,
    pub n_consumed: u8,
    #[br(count = n_consumed)]
    pub consumed: Vec<u8>,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone)]
#[br(little)]
#[bw(little)]
pub struct SelfKanBody {
    pub seat: u8,
    /// 0 ankan, 1 kakan.
    pub kind: u8,
    pub tile: u8,
    pub n_consumed: u8,
    #[br(count = n_consumed)]
    pub consumed: Vec<u8>,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone, Copy)]
#[br(little)]
#[bw(little)]
pub struct Hule {
    pub seat: u8,
    pub target: u8,
    pub tile: u8,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone)]
#[br(little)]
#[bw(little)]
pub struct SeatList {
    pub n_seats: u8,
    #[br(count = n_seats)]
    pub seats: Vec<u8>,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone)]
#[br(little)]
#[bw(little)]
pub struct RoundResult {
    pub n_seats: u8,
    #[br(count = n_seats)]
    pub deltas: Vec<i32>,
    #[br(count = n_seats)]
    pub scores: Vec<i32>,
}

#[derive(BinRead, BinWrite, PartialEq, Debug, Clone)]
#[br(little)]
#[bw(little)]
pub struct ScoreList {
    pub n_scores: u8,
    #[br(count = n_scores)]
    pub scores: Vec<i32>,
}

fn read_body<T>(name: MessageName, payload: &[u8]) -> Result<T, DecodeError>
where
    T: for<'a> BinRead<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(payload);
    let body = T::read_options(&mut cursor, Endian::Little, ())
        .map_err(|e| DecodeError::malformed(name.as_str(), e.to_string()))?;
    let rest = payload.len() as u64 - cursor.position();
    if rest != 0 {
        return Err(DecodeError::malformed(name.as_str(), format!("{rest} trailing payload bytes")));
    }
    Ok(body)
}

fn write_body<T>(body: &T) -> anyhow::Result<Vec<u8>>
where
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut out = Vec::with_capacity(32);
    let mut cursor = Cursor::new(&mut out);
    body.write_options(&mut cursor, Endian::Little, ())
        .context("write payload")?;
    Ok(out)
}

fn tile(name: MessageName, raw: u8) -> Result<Tile, DecodeError> {
    Tile::from_index(raw)
        .ok_or_else(|| DecodeError::malformed(name.as_str(), format!("tile index {raw} out of range")))
}

fn tiles(name: MessageName, raw: &[u8]) -> Result<Vec<Tile>, DecodeError> {
    raw.iter().map(|t| tile(name, *t)).collect()
}

fn len_u8(len: usize) -> anyhow::Result<u8> {
    u8::try_from(len).context("list longer than 255 entries")
}

fn tile_bytes(tiles: &[Tile]) -> Vec<u8> {
    tiles.iter().map(|t| t.index()).collect()
}

/// Parses the payload of a known message into its typed form.
pub fn parse_payload(name: MessageName, payload: &[u8]) -> Result<TypedMessage, DecodeError> {
    let message = match name {
        MessageName::GameStart => {
            let body: GameStart = read_body(name, payload)?;
            TypedMessage::MatchStart {
                seat_count: body.seat_count,
                self_seat: body.self_seat,
                scores: body.scores,
            }
        }
        MessageName::NewRound => {
            let body: NewRound = read_body(name, payload)?;
            TypedMessage::Deal {
                round: RoundId {
                    bakaze: tile(name, body.bakaze)?,
                    kyoku: body.kyoku,
                    honba: body.honba,
                    kyotaku: body.kyotaku,
                },
                dealer: body.dealer,
                dora_marker: tile(name, body.dora_marker)?,
                scores: body.scores,
                hand: tiles(name, &body.hand)?,
                wall: body.wall,
            }
        }
        MessageName::DealTile => {
            let body: DealTile = read_body(name, payload)?;
            TypedMessage::Draw {
                seat: body.seat,
                tile: tile(name, body.tile)?,
                options: body.options.to_options(),
            }
        }
        MessageName::DiscardTile => {
            let body: DiscardTile = read_body(name, payload)?;
            TypedMessage::Discard {
                seat: body.seat,
                tile: tile(name, body.tile)?,
                tsumogiri: body.flags.contains(DiscardFlags::TSUMOGIRI),
                riichi: body.flags.contains(DiscardFlags::RIICHI),
            }
        }
        MessageName::CallWindow => {
            let body: CallWindow = read_body(name, payload)?;
            TypedMessage::CallWindow {
                discarder: body.discarder,
                tile: tile(name, body.tile)?,
                eligible: body
                    .eligible
                    .iter()
                    .map(|e| CallEligibility {
                        seat: e.seat,
                        kinds: e.kinds.to_kinds(),
                    })
                    .collect(),
            }
        }
        MessageName::CallResponse => {
            let body: CallBody = read_body(name, payload)?;
            let kind = call_from_code(body.kind)
                .ok_or_else(|| DecodeError::malformed(name.as_str(), format!("call code {}", body.kind)))?;
            let reply = match kind {
                None => CallReply::Pass,
                Some(kind) => CallReply::Call {
                    kind,
                    consumed: tiles(name, &body.consumed)?,
                },
            };
            TypedMessage::CallResponse {
                seat: body.seat,
                reply,
            }
        }
        MessageName::CallTimeout => {
            if !payload.is_empty() {
                return Err(DecodeError::malformed(name.as_str(), "expected empty payload"));
            }
            TypedMessage::CallTimeout
        }
        MessageName::ChiPengGang => {
            let body: CallBody = read_body(name, payload)?;
            let kind = call_from_code(body.kind)
                .flatten()
                .filter(|k| *k != CallKind::Ron)
                .ok_or_else(|| DecodeError::malformed(name.as_str(), format!("meld code {}", body.kind)))?;
            TypedMessage::Meld {
                seat: body.seat,
                kind,
                consumed: tiles(name, &body.consumed)?,
            }
        }
        MessageName::AnGangAddGang => {
            let body: SelfKanBody = read_body(name, payload)?;
            let kind = match body.kind {
                0 => SelfKanKind::Ankan,
                1 => SelfKanKind::Kakan,
                other => {
                    return Err(DecodeError::malformed(name.as_str(), format!("kan code {other}")));
                }
            };
            TypedMessage::SelfKan {
                seat: body.seat,
                kind,
                tile: tile(name, body.tile)?,
                consumed: tiles(name, &body.consumed)?,
            }
        }
        MessageName::BaBei => {
            let [seat] = payload else {
                return Err(DecodeError::malformed(name.as_str(), "expected one seat byte"));
            };
            TypedMessage::Nukidora { seat: *seat }
        }
        MessageName::DoraReveal => {
            let [marker] = payload else {
                return Err(DecodeError::malformed(name.as_str(), "expected one tile byte"));
            };
            TypedMessage::DoraReveal {
                marker: tile(name, *marker)?,
            }
        }
        MessageName::Hule => {
            let body: Hule = read_body(name, payload)?;
            TypedMessage::Win {
                seat: body.seat,
                target: body.target,
                tile: tile(name, body.tile)?,
            }
        }
        MessageName::NoTile => {
            let body: SeatList = read_body(name, payload)?;
            TypedMessage::ExhaustiveDraw { tenpai: body.seats }
        }
        MessageName::LiuJu => {
            let [code] = payload else {
                return Err(DecodeError::malformed(name.as_str(), "expected one reason byte"));
            };
            let reason = DRAW_REASONS
                .get(*code as usize)
                .copied()
                .ok_or_else(|| DecodeError::malformed(name.as_str(), format!("reason code {code}")))?;
            TypedMessage::AbortiveDraw { reason }
        }
        MessageName::RoundResult => {
            let body: RoundResult = read_body(name, payload)?;
            TypedMessage::HandResult {
                deltas: body.deltas,
                scores: body.scores,
            }
        }
        MessageName::GameEndResult => {
            let body: ScoreList = read_body(name, payload)?;
            TypedMessage::MatchEnd { scores: body.scores }
        }
        MessageName::SyncGame => {
            let state = serde_json::from_slice(payload)
                .map_err(|e| DecodeError::malformed(name.as_str(), e.to_string()))?;
            TypedMessage::Resync(Box::new(state))
        }
    };
    Ok(message)
}

/// Payload bytes for `message`. The inverse of [`parse_payload`], used by capture fixtures.
pub fn encode_payload(message: &TypedMessage) -> anyhow::Result<Vec<u8>> {
    match message {
        TypedMessage::MatchStart {
            seat_count,
            self_seat,
            scores,
        } => write_body(&GameStart {
            seat_count: *seat_count,
            self_seat: *self_seat,
            n_scores: len_u8(scores.len())?,
            scores: scores.clone(),
        }),
        TypedMessage::Deal {
            round,
            dealer,
            dora_marker,
            scores,
            hand,
            wall,
        } => write_body(&NewRound {
            bakaze: round.bakaze.index(),
            kyoku: round.kyoku,
            honba: round.honba,
            kyotaku: round.kyotaku,
            dealer: *dealer,
            dora_marker: dora_marker.index(),
            wall: *wall,
            n_scores: len_u8(scores.len())?,
            scores: scores.clone(),
            n_hand: len_u8(hand.len())?,
            hand: tile_bytes(hand),
        }),
        TypedMessage::Draw { seat, tile, options } => write_body(&DealTile {
            seat: *seat,
            tile: tile.index(),
            options: DrawOptions::from_options(options),
        }),
        TypedMessage::Discard {
            seat,
            tile,
            tsumogiri,
            riichi,
        } => {
            let mut flags = DiscardFlags::empty();
            flags.set(DiscardFlags::TSUMOGIRI, *tsumogiri);
            flags.set(DiscardFlags::RIICHI, *riichi);
            write_body(&DiscardTile {
                seat: *seat,
                tile: tile.index(),
                flags,
            })
        }
        TypedMessage::CallWindow {
            discarder,
            tile,
            eligible,
        } => write_body(&CallWindow {
            discarder: *discarder,
            tile: tile.index(),
            n_eligible: len_u8(eligible.len())?,
            eligible: eligible
                .iter()
                .map(|e| Eligibility {
                    seat: e.seat,
                    kinds: CallKinds::from_kinds(&e.kinds),
                })
                .collect(),
        }),
        TypedMessage::CallResponse { seat, reply } => {
            let (kind, consumed) = match reply {
                CallReply::Pass => (None, Vec::new()),
                CallReply::Call { kind, consumed } => (Some(*kind), tile_bytes(consumed)),
            };
            write_body(&CallBody {
                seat: *seat,
                kind: call_code(kind),
                n_consumed: len_u8(consumed.len())?,
                consumed,
            })
        }
        TypedMessage::CallTimeout => Ok(Vec::new()),
        TypedMessage::Meld { seat, kind, consumed } => write_body(&CallBody {
            seat: *seat,
            kind: call_code(Some(*kind)),
            n_consumed: len_u8(consumed.len())?,
            consumed: tile_bytes(consumed),
        }),
        TypedMessage::SelfKan {
            seat,
            kind,
            tile,
            consumed,
        } => write_body(&SelfKanBody {
            seat: *seat,
            kind: match kind {
                SelfKanKind::Ankan => 0,
                SelfKanKind::Kakan => 1,
            },
            tile: tile.index(),
            n_consumed: len_u8(consumed.len())?,
            consumed: tile_bytes(consumed),
        }),
        TypedMessage::Nukidora { seat } => Ok(vec![*seat]),
        TypedMessage::DoraReveal { marker } => Ok(vec![marker.index()]),
        TypedMessage::Win { seat, target, tile } => write_body(&Hule {
            seat: *seat,
            target: *target,
            tile: tile.index(),
        }),
        TypedMessage::ExhaustiveDraw { tenpai } => write_body(&SeatList {
            n_seats: len_u8(tenpai.len())?,
            seats: tenpai.clone(),
        }),
        TypedMessage::AbortiveDraw { reason } => {
            let code = DRAW_REASONS
                .iter()
                .position(|r| r == reason)
                .context("unknown draw reason")?;
            Ok(vec![len_u8(code)?])
        }
        TypedMessage::HandResult { deltas, scores } => {
            anyhow::ensure!(deltas.len() == scores.len(), "deltas and scores differ in length");
            write_body(&RoundResult {
                n_seats: len_u8(scores.len())?,
                deltas: deltas.clone(),
                scores: scores.clone(),
            })
        }
        TypedMessage::MatchEnd { scores } => write_body(&ScoreList {
            n_scores: len_u8(scores.len())?,
            scores: scores.clone(),
        }),
        TypedMessage::Resync(state) => serde_json::to_vec(state).context("encode snapshot"),
    }
}

/// Complete frame bytes for `message`: notify for actions, response for the sync reply.
pub fn encode(message: &TypedMessage, index: u16) -> anyhow::Result<Vec<u8>> {
    let name = MessageName::of(message);
    let frame_type = match name {
        MessageName::SyncGame => FrameType::Response,
        _ => FrameType::Notify,
    };
    write_frame(frame_type, index, name.as_str(), &encode_payload(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_a_closed_bijection() {
        for name in MessageName::ALL {
            assert_eq!(MessageName::parse(name.as_str()), Some(name));
        }
        assert_eq!(MessageName::parse(".lq.ActionUnknownThing"), None);
    }

    #[test]
    fn discard_payload_layout() {
        let msg = TypedMessage::Discard {
            seat: 2,
            tile: "5pr".parse().unwrap(),
            tsumogiri: true,
            riichi: true,
        };
        let payload = encode_payload(&msg).unwrap();
        assert_eq!(payload, [2, 14, 0x03]);
        assert_eq!(parse_payload(MessageName::DiscardTile, &payload).unwrap(), msg);
    }

    #[test]
    fn envelope_fields_are_little_endian() {
        let bytes = write_frame(FrameType::Response, 0x0102, ".lq.ResSyncGame", b"{}").unwrap();
        assert_eq!(&bytes[..4], &[3, SCHEMA_VERSION, 0x02, 0x01]);
        let frame = read_frame(&bytes).unwrap();
        assert_eq!(frame.frame_type, FrameType::Response);
        assert_eq!(frame.index, 0x0102);
        assert_eq!(frame.name, ".lq.ResSyncGame");
        assert_eq!(frame.payload, b"{}");
    }

    #[test]
    fn call_window_flags_map_to_kinds() {
        let msg = TypedMessage::CallWindow {
            discarder: 3,
            tile: "7s".parse().unwrap(),
            eligible: vec![CallEligibility {
                seat: 0,
                kinds: vec![CallKind::Chi, CallKind::Ron],
            }],
        };
        let payload = encode_payload(&msg).unwrap();
        assert_eq!(payload[3..], [0, 0x09]);
        assert_eq!(parse_payload(MessageName::CallWindow, &payload).unwrap(), msg);
    }

    #[test]
    fn hidden_draw_decodes_to_unknown_tile() {
        let msg = parse_payload(MessageName::DealTile, &[1, HIDDEN_TILE, 0]).unwrap();
        assert_eq!(
            msg,
            TypedMessage::Draw {
                seat: 1,
                tile: Tile::UNKNOWN,
                options: Vec::new()
            }
        );
    }

    #[test]
    fn short_and_overlong_payloads_are_malformed() {
        assert!(matches!(
            parse_payload(MessageName::DiscardTile, &[1, 2]),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            parse_payload(MessageName::DiscardTile, &[1, 2, 0, 9]),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            parse_payload(MessageName::DiscardTile, &[1, 200, 0]),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let mut bytes = write_frame(FrameType::Notify, 0, ".lq.ActionCallTimeout", &[]).unwrap();
        bytes[1] = 9;
        assert_eq!(
            read_frame(&bytes).unwrap_err(),
            DecodeError::Unsupported("schema_version=9".to_string())
        );
    }
}

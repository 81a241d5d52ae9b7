//! Pure frame decoding: raw capture bytes in, one typed message out.

use serde::{Deserialize, Serialize};
use tile_bridge_core::error::DecodeError;
use tile_bridge_core::message::TypedMessage;

use crate::liqi::{self, FrameType, MessageName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Server to client.
    Inbound,
    /// Client to server.
    Outbound,
}

/// One captured websocket frame. `seq` is assigned by the capture side and repeats for
/// fragments and retransmissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub seq: u64,
    pub direction: Direction,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub frame_type: FrameType,
    pub index: u16,
    pub name: MessageName,
    pub message: TypedMessage,
}

/// Decodes one frame. Has no side effects and keeps no state: responses carry their own method
/// name, so nothing has to remember which request they answer.
pub fn decode(frame: &RawFrame) -> Result<Decoded, DecodeError> {
    let envelope = liqi::read_frame(&frame.bytes)?;
    if envelope.frame_type == FrameType::Request {
        return Err(DecodeError::Unsupported(format!("request {}", envelope.name)));
    }
    let name = MessageName::parse(envelope.name)
        .ok_or_else(|| DecodeError::Unsupported(envelope.name.to_string()))?;
    let message = liqi::parse_payload(name, envelope.payload)?;
    Ok(Decoded {
        frame_type: envelope.frame_type,
        index: envelope.index,
        name,
        message,
    })
}

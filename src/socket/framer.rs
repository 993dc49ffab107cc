//! Frame composition and parsing.
//!
//! Outbound JSON frames are `"<tag>,<json>"`. Outbound binary frames are
//! `"<tag>," || metric || flag || sealed`, where metric and flag are the
//! server's routing bytes. Inbound frames are split symmetrically: a payload
//! starting with `{`, `[` or a digit is JSON, anything else is a sealed
//! binary body.

use serde_json::Value;

use super::WireFrame;
use crate::error::WaError;

/// Server-defined routing byte prefixed to binary frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Metric {
    DebugLog = 1,
    QueryResume = 2,
    QueryReceipt = 3,
    QueryMedia = 4,
    Group = 5,
    QueryContact = 6,
    QueryStatus = 7,
    Presence = 8,
    Picture = 9,
    Block = 10,
    QueryChat = 11,
    QueryMessages = 12,
    Read = 13,
    Message = 14,
}

/// Flag byte companions to [`Metric`].
pub mod flags {
    pub const IGNORE: u8 = 0;
    pub const ACKNOWLEDGE: u8 = 1 << 6;
    pub const AVAILABLE: u8 = 1 << 5;
    pub const UNAVAILABLE: u8 = 1 << 4;
    pub const EXPIRES: u8 = 1 << 3;
    pub const SKIP_OFFLINE: u8 = 1 << 2;
}

/// Payload half of a parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    Json(Value),
    /// Still sealed; the caller owns envelope keys and node decoding.
    Sealed(Vec<u8>),
    /// Keep-alive pong with the server timestamp text.
    Pong(String),
}

/// Compose an outbound JSON frame.
pub fn compose_json(tag: &str, json: &Value) -> WireFrame {
    WireFrame::Text(format!("{tag},{json}"))
}

/// Compose an outbound binary frame around an already sealed payload.
pub fn compose_binary(tag: &str, metric: Metric, flag: u8, sealed: &[u8]) -> WireFrame {
    let mut data = Vec::with_capacity(tag.len() + 3 + sealed.len());
    data.extend_from_slice(tag.as_bytes());
    data.push(b',');
    data.push(metric as u8);
    data.push(flag);
    data.extend_from_slice(sealed);
    WireFrame::Binary(data)
}

/// Split an inbound frame into its tag and payload.
pub fn parse_inbound(frame: &WireFrame) -> Result<(String, InboundPayload), WaError> {
    match frame {
        WireFrame::Text(text) => {
            if let Some(rest) = text.strip_prefix('!') {
                let ts = rest.strip_prefix(',').unwrap_or(rest);
                return Ok(("!".to_string(), InboundPayload::Pong(ts.to_string())));
            }
            let (tag, rest) = text
                .split_once(',')
                .ok_or_else(|| WaError::Frame("text frame without tag separator".to_string()))?;
            if rest.is_empty() {
                return Ok((tag.to_string(), InboundPayload::Json(Value::Null)));
            }
            let json = serde_json::from_str(rest)?;
            Ok((tag.to_string(), InboundPayload::Json(json)))
        }
        WireFrame::Binary(data) => {
            let comma = data
                .iter()
                .position(|b| *b == b',')
                .ok_or_else(|| WaError::Frame("binary frame without tag separator".to_string()))?;
            let tag = std::str::from_utf8(&data[..comma])
                .map_err(|_| WaError::Frame("binary frame tag is not utf-8".to_string()))?
                .to_string();
            let payload = &data[comma + 1..];

            match payload.first() {
                None => Ok((tag, InboundPayload::Json(Value::Null))),
                Some(b'{') | Some(b'[') | Some(b'0'..=b'9') => {
                    // A sealed body can begin with a digit byte too, so fall
                    // back to the sealed path when it is not actually JSON.
                    match std::str::from_utf8(payload)
                        .ok()
                        .and_then(|text| serde_json::from_str(text).ok())
                    {
                        Some(json) => Ok((tag, InboundPayload::Json(json))),
                        None => Ok((tag, InboundPayload::Sealed(payload.to_vec()))),
                    }
                }
                Some(_) => Ok((tag, InboundPayload::Sealed(payload.to_vec()))),
            }
        }
    }
}

//! Outer frame: `[type: 1 byte][length: varint][body: length bytes]`.

use thiserror::Error;

use super::varint::{decode_varint, encode_varint};
use crate::utils::now_millis;

/// Fixed outer frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterType {
    Authenticate,
    Subscribe,
    Unsubscribe,
    Payload,
    Error,
    Disconnect,
}

impl OuterType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Authenticate),
            2 => Some(Self::Subscribe),
            3 => Some(Self::Unsubscribe),
            6 => Some(Self::Payload),
            9 => Some(Self::Error),
            10 => Some(Self::Disconnect),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::Authenticate => 1,
            Self::Subscribe => 2,
            Self::Unsubscribe => 3,
            Self::Payload => 6,
            Self::Error => 9,
            Self::Disconnect => 10,
        }
    }
}

/// The named fields a frame body may carry. Every field is optional except
/// `msg_id`/`msg_date`, which every frame stamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OuterFields {
    pub jwt: Option<String>,
    pub channels: Vec<String>,
    pub src: Option<String>,
    pub dests: Vec<String>,
    pub payload: Option<Vec<u8>>,
    pub proto: Option<i32>,
    pub code: Option<i32>,
    pub message: Option<String>,
}

/// A fully decoded outer frame.
#[derive(Debug, Clone, PartialEq)]
pub struct OuterFrame {
    pub outer_type: OuterType,
    pub msg_id: u64,
    pub msg_date: u64,
    pub fields: OuterFields,
}

/// Errors produced while decoding an outer frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame is shorter than its length prefix requires")]
    LengthUnderflow,
    #[error("unknown outer frame type: {0}")]
    UnknownOuterType(u8),
    #[error("frame body failed to parse")]
    MalformedBody,
    #[error("frame is empty")]
    Empty,
}

const TAG_MSG_ID: u8 = 1;
const TAG_MSG_DATE: u8 = 2;
const TAG_JWT: u8 = 3;
const TAG_CHANNELS: u8 = 4;
const TAG_SRC: u8 = 5;
const TAG_DESTS: u8 = 6;
const TAG_PAYLOAD: u8 = 7;
const TAG_PROTO: u8 = 8;
const TAG_CODE: u8 = 9;
const TAG_MESSAGE: u8 = 10;

const LIST_SEPARATOR: char = '\u{0}';

fn encode_body(msg_id: u64, msg_date: u64, fields: &OuterFields) -> Vec<u8> {
    let mut body = Vec::new();

    write_field(&mut body, TAG_MSG_ID, &msg_id.to_le_bytes());
    write_field(&mut body, TAG_MSG_DATE, &msg_date.to_le_bytes());
    if let Some(jwt) = &fields.jwt {
        write_field(&mut body, TAG_JWT, jwt.as_bytes());
    }
    if !fields.channels.is_empty() {
        write_field(
            &mut body,
            TAG_CHANNELS,
            fields.channels.join(&LIST_SEPARATOR.to_string()).as_bytes(),
        );
    }
    if let Some(src) = &fields.src {
        write_field(&mut body, TAG_SRC, src.as_bytes());
    }
    if !fields.dests.is_empty() {
        write_field(
            &mut body,
            TAG_DESTS,
            fields.dests.join(&LIST_SEPARATOR.to_string()).as_bytes(),
        );
    }
    if let Some(payload) = &fields.payload {
        write_field(&mut body, TAG_PAYLOAD, payload);
    }
    if let Some(proto) = fields.proto {
        write_field(&mut body, TAG_PROTO, &proto.to_le_bytes());
    }
    if let Some(code) = fields.code {
        write_field(&mut body, TAG_CODE, &code.to_le_bytes());
    }
    if let Some(message) = &fields.message {
        write_field(&mut body, TAG_MESSAGE, message.as_bytes());
    }

    body
}

fn write_field(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    encode_varint(value.len() as u64, out);
    out.extend_from_slice(value);
}

fn decode_body(body: &[u8]) -> Option<(u64, u64, OuterFields)> {
    let mut pos = 0usize;
    let mut msg_id = None;
    let mut msg_date = None;
    let mut fields = OuterFields::default();

    while pos < body.len() {
        let tag = body[pos];
        pos += 1;
        let (len, consumed) = decode_varint(&body[pos..])?;
        pos += consumed;
        let len = len as usize;
        if pos + len > body.len() {
            return None;
        }
        let value = &body[pos..pos + len];
        pos += len;

        match tag {
            TAG_MSG_ID => msg_id = Some(u64::from_le_bytes(value.try_into().ok()?)),
            TAG_MSG_DATE => msg_date = Some(u64::from_le_bytes(value.try_into().ok()?)),
            TAG_JWT => fields.jwt = Some(String::from_utf8(value.to_vec()).ok()?),
            TAG_CHANNELS => {
                fields.channels = String::from_utf8(value.to_vec())
                    .ok()?
                    .split(LIST_SEPARATOR)
                    .map(str::to_string)
                    .collect();
            }
            TAG_SRC => fields.src = Some(String::from_utf8(value.to_vec()).ok()?),
            TAG_DESTS => {
                fields.dests = String::from_utf8(value.to_vec())
                    .ok()?
                    .split(LIST_SEPARATOR)
                    .map(str::to_string)
                    .collect();
            }
            TAG_PAYLOAD => fields.payload = Some(value.to_vec()),
            TAG_PROTO => fields.proto = Some(i32::from_le_bytes(value.try_into().ok()?)),
            TAG_CODE => fields.code = Some(i32::from_le_bytes(value.try_into().ok()?)),
            TAG_MESSAGE => fields.message = Some(String::from_utf8(value.to_vec()).ok()?),
            _ => {
                // Unknown field tag: skip, don't fail the whole body.
            }
        }
    }

    Some((msg_id?, msg_date?, fields))
}

/// Stateful codec for one WebSocket session: assigns monotonically
/// increasing `msg_id`s and stamps `msg_date` on every encode.
///
/// Exactly one instance should exist per session (§4.1).
#[derive(Debug, Default)]
pub struct Codec {
    next_msg_id: u64,
}

impl Codec {
    /// Creates a fresh codec; the first encoded frame gets `msg_id = 1`.
    #[must_use]
    pub fn new() -> Self {
        Self { next_msg_id: 1 }
    }

    /// Encodes a frame, assigning the next `msg_id` and the current wall-clock
    /// time as `msg_date`.
    pub fn encode(&mut self, outer_type: OuterType, fields: OuterFields) -> Vec<u8> {
        let msg_id = self.next_msg_id;
        self.next_msg_id += 1;
        let msg_date = now_millis();

        let body = encode_body(msg_id, msg_date, &fields);

        let mut out = Vec::with_capacity(body.len() + 6);
        out.push(outer_type.as_byte());
        encode_varint(body.len() as u64, &mut out);
        out.extend_from_slice(&body);
        out
    }

    /// Decodes a single frame. Does not require a live codec instance to
    /// succeed — decoding is stateless other than assigning ids on encode.
    pub fn decode(buf: &[u8]) -> Result<OuterFrame, CodecError> {
        if buf.is_empty() {
            return Err(CodecError::Empty);
        }
        let outer_type = OuterType::from_byte(buf[0]).ok_or(CodecError::UnknownOuterType(buf[0]))?;

        let (body_len, consumed) = decode_varint(&buf[1..]).ok_or(CodecError::LengthUnderflow)?;
        let body_len = body_len as usize;
        let start = 1 + consumed;
        if start + body_len > buf.len() {
            return Err(CodecError::LengthUnderflow);
        }
        let body = &buf[start..start + body_len];

        let (msg_id, msg_date, fields) = decode_body(body).ok_or(CodecError::MalformedBody)?;

        Ok(OuterFrame {
            outer_type,
            msg_id,
            msg_date,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_id_increases_monotonically() {
        let mut codec = Codec::new();
        let f1 = codec.encode(OuterType::Authenticate, OuterFields::default());
        let f2 = codec.encode(OuterType::Subscribe, OuterFields::default());
        assert_eq!(Codec::decode(&f1).unwrap().msg_id, 1);
        assert_eq!(Codec::decode(&f2).unwrap().msg_id, 2);
    }

    #[test]
    fn encode_decode_round_trips_all_outer_types() {
        let mut codec = Codec::new();
        let fields = OuterFields {
            jwt: Some("jwt-token".into()),
            channels: vec!["ch-a".into(), "ch-b".into()],
            src: Some("renderer".into()),
            dests: vec!["controller".into()],
            payload: Some(vec![1, 2, 3, 4]),
            proto: Some(1),
            code: Some(0),
            message: Some("ok".into()),
        };

        for outer_type in [
            OuterType::Authenticate,
            OuterType::Subscribe,
            OuterType::Unsubscribe,
            OuterType::Payload,
            OuterType::Error,
            OuterType::Disconnect,
        ] {
            let encoded = codec.encode(outer_type, fields.clone());
            let decoded = Codec::decode(&encoded).unwrap();
            assert_eq!(decoded.outer_type, outer_type);
            assert_eq!(decoded.fields, fields);
        }
    }

    #[test]
    fn length_field_matches_exact_body_length() {
        let mut codec = Codec::new();
        let encoded = codec.encode(OuterType::Disconnect, OuterFields::default());
        let (len, consumed) = decode_varint(&encoded[1..]).unwrap();
        assert_eq!(1 + consumed + len as usize, encoded.len());
    }

    #[test]
    fn truncated_frame_fails_without_panicking() {
        let mut codec = Codec::new();
        let encoded = codec.encode(
            OuterType::Payload,
            OuterFields {
                payload: Some(vec![0u8; 64]),
                ..Default::default()
            },
        );
        let truncated = &encoded[..encoded.len() - 10];
        assert_eq!(Codec::decode(truncated), Err(CodecError::LengthUnderflow));
    }

    #[test]
    fn unknown_outer_type_is_rejected() {
        let buf = vec![200u8, 0];
        assert_eq!(Codec::decode(&buf), Err(CodecError::UnknownOuterType(200)));
    }

    #[test]
    fn empty_buffer_is_rejected() {
        assert_eq!(Codec::decode(&[]), Err(CodecError::Empty));
    }
}

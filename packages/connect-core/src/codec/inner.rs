//! Inner "QConnect" messages carried inside a `PAYLOAD` outer frame.
//!
//! The vendor's actual inner messages are protocol-buffer encoded with a
//! fixed field schema pinned by the controller binary (see the Open
//! Questions in the project's design notes) — reverse engineering that
//! schema is out of scope here. Each inner message is instead represented
//! as a small internal enum, tagged by the same `messageType` codes the
//! wire protocol uses, and serialized to a self-consistent JSON body behind
//! the outer varint framing. Unknown `messageType` values decode to
//! [`QConnectMessage::Unhandled`] rather than failing.

use serde::{Deserialize, Serialize};

use super::varint::{decode_varint, encode_varint};

/// Fixed `messageType` codes for inner QConnect messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Renderer → controller: initial session join.
    JoinSession,
    /// Renderer → controller: device info changed.
    DeviceInfoUpdated,
    /// Renderer → controller: playback state report.
    StateUpdated,
    /// Renderer → controller: volume changed.
    VolumeChanged,
    /// Renderer → controller: current file's actual audio quality.
    FileAudioQualityChanged,
    /// Renderer → controller: device audio quality changed.
    DeviceAudioQualityChanged,
    /// Renderer → controller: max audio quality changed.
    MaxAudioQualityChanged,
    /// Controller → renderer: apply playback state.
    SetState,
    /// Controller → renderer: set volume (absolute or delta).
    SetVolume,
    /// Controller → renderer: set active/inactive.
    SetActive,
    /// Controller → renderer: set max audio quality.
    SetMaxAudioQuality,
    /// Controller → renderer: set loop mode.
    SetLoopMode,
    /// Controller → renderer: set shuffle mode.
    SetShuffleMode,
    /// Controller → renderer: set autoplay mode.
    SetAutoplayMode,
    /// Broadcast: volume changed by another controller.
    VolumeChangedBroadcast,
    /// Controller → renderer: full queue state.
    QueueState,
    /// Controller → renderer: load queue tracks.
    QueueLoadTracks,
    /// A `messageType` the renderer does not act on (e.g. 24, renderer-action).
    Unhandled(i32),
}

impl MessageType {
    /// Maps a raw `messageType` code to its `MessageType`.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            21 => Self::JoinSession,
            22 => Self::DeviceInfoUpdated,
            23 => Self::StateUpdated,
            25 => Self::VolumeChanged,
            26 => Self::FileAudioQualityChanged,
            27 => Self::DeviceAudioQualityChanged,
            28 => Self::MaxAudioQualityChanged,
            41 => Self::SetState,
            42 => Self::SetVolume,
            43 => Self::SetActive,
            44 => Self::SetMaxAudioQuality,
            45 => Self::SetLoopMode,
            46 => Self::SetShuffleMode,
            47 => Self::SetAutoplayMode,
            87 => Self::VolumeChangedBroadcast,
            90 => Self::QueueState,
            91 => Self::QueueLoadTracks,
            other => Self::Unhandled(other),
        }
    }

    /// Returns the raw wire code for this message type.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::JoinSession => 21,
            Self::DeviceInfoUpdated => 22,
            Self::StateUpdated => 23,
            Self::VolumeChanged => 25,
            Self::FileAudioQualityChanged => 26,
            Self::DeviceAudioQualityChanged => 27,
            Self::MaxAudioQualityChanged => 28,
            Self::SetState => 41,
            Self::SetVolume => 42,
            Self::SetActive => 43,
            Self::SetMaxAudioQuality => 44,
            Self::SetLoopMode => 45,
            Self::SetShuffleMode => 46,
            Self::SetAutoplayMode => 47,
            Self::VolumeChangedBroadcast => 87,
            Self::QueueState => 90,
            Self::QueueLoadTracks => 91,
            Self::Unhandled(code) => *code,
        }
    }
}

/// Capabilities announced in a `JoinSession` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinCapabilities {
    pub min_audio_quality: i32,
    pub max_audio_quality: i32,
    /// 2 == CONTROLLER (volume remote control delegated to controller).
    pub volume_remote_control: i32,
}

/// Renderer → controller: initial session join payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinSession {
    pub device_uuid: String,
    pub friendly_name: String,
    pub brand: String,
    pub model: String,
    pub software_version: String,
    pub capabilities: JoinCapabilities,
    pub session_uuid: String,
    /// 1 == normal join.
    pub reason: i32,
    pub is_active: bool,
}

/// Renderer → controller: state report, mirrors the player's authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateUpdated {
    /// 1 stopped, 2 playing, 3 paused.
    pub playing_state: i32,
    pub buffer_state: String,
    pub position_timestamp_ms: u64,
    pub position_value_ms: i64,
    pub duration_ms: i64,
    pub current_queue_item_id: Option<i64>,
    pub version_major: u64,
    pub version_minor: u64,
}

/// A queue item as the controller describes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub queue_item_id: i64,
    pub track_id: String,
}

/// Controller → renderer: `SetState` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SetState {
    pub current_queue_item: Option<QueueItem>,
    pub next_queue_item: Option<QueueItem>,
    pub current_position_ms: Option<i64>,
    /// 1 stopped, 2 playing, 3 paused.
    pub playing_state: Option<i32>,
}

/// Controller → renderer: `SetVolume` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetVolume {
    pub absolute: Option<i32>,
    pub delta: Option<i32>,
}

/// Controller → renderer: `SetActive` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetActive {
    pub is_active: bool,
}

/// Controller → renderer: `SetMaxAudioQuality` payload; `quality` is a protocol value (1-4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetMaxAudioQuality {
    pub quality: i32,
}

/// Controller → renderer: `SetLoopMode` payload (0 unknown, 1 off, 2 one, 3 all).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetLoopMode {
    pub mode: i32,
}

/// Controller → renderer: `SetShuffleMode` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetShuffleMode {
    pub enabled: bool,
    pub pivot_queue_item_id: Option<i64>,
}

/// Controller → renderer: `SetAutoplayMode` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetAutoplayMode {
    pub enabled: bool,
}

/// Broadcast: another controller changed the volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeChangedBroadcast {
    pub volume: i32,
}

/// Renderer → controller: `FileAudioQualityChanged` / `DeviceAudioQualityChanged` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioQualityChanged {
    pub quality: i32,
    pub sampling_rate: u32,
    pub bit_depth: u8,
    pub nb_channels: u8,
}

/// Renderer → controller: `MaxAudioQualityChanged` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaxAudioQualityChanged {
    pub quality: i32,
    /// 1 == WiFi.
    pub network_type: i32,
    pub sampling_rate: u32,
    pub bit_depth: u8,
    pub nb_channels: u8,
}

/// Controller → renderer: `QueueState` / `QueueLoadTracks` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueueLoad {
    pub tracks: Vec<QueueItem>,
    pub version_major: u64,
    pub version_minor: u64,
    pub current_queue_item_id: Option<i64>,
    /// Present on `QueueLoadTracks`; the renderer derives `current_item_id` from it.
    pub queue_position: Option<usize>,
}

/// A decoded inner QConnect message: its type tag plus an opaque JSON body.
///
/// Handlers deserialize the body into the concrete struct for the message's
/// `MessageType`; unrecognized types carry their raw body through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct QConnectMessage {
    pub message_type: MessageType,
    pub body: Vec<u8>,
}

impl QConnectMessage {
    /// Builds an inner message by JSON-encoding `payload`.
    pub fn encode<T: Serialize>(message_type: MessageType, payload: &T) -> Self {
        let body = serde_json::to_vec(payload).expect("inner payload is always serializable");
        Self { message_type, body }
    }

    /// Decodes this message's body as `T`.
    pub fn decode_body<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A `PAYLOAD` frame's inner batch: a timestamp, a batch id, and zero or more
/// QConnect messages, dispatched in order.
#[derive(Debug, Clone, PartialEq)]
pub struct QConnectBatch {
    pub messages_time: u64,
    pub messages_id: u64,
    pub messages: Vec<QConnectMessage>,
}

impl QConnectBatch {
    /// Encodes the batch to bytes, suitable as the `payload` field of a `PAYLOAD` frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_varint(self.messages_time, &mut out);
        encode_varint(self.messages_id, &mut out);
        encode_varint(self.messages.len() as u64, &mut out);
        for msg in &self.messages {
            encode_varint(msg.message_type.code() as u64, &mut out);
            encode_varint(msg.body.len() as u64, &mut out);
            out.extend_from_slice(&msg.body);
        }
        out
    }

    /// Decodes a batch previously produced by [`QConnectBatch::encode`].
    ///
    /// Fails only on structural truncation; unknown `messageType` values
    /// decode into [`MessageType::Unhandled`] rather than erroring.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut pos = 0usize;
        let (messages_time, len) = decode_varint(&buf[pos..])?;
        pos += len;
        let (messages_id, len) = decode_varint(&buf[pos..])?;
        pos += len;
        let (count, len) = decode_varint(&buf[pos..])?;
        pos += len;

        let mut messages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (type_code, len) = decode_varint(&buf[pos..])?;
            pos += len;
            let (body_len, len) = decode_varint(&buf[pos..])?;
            pos += len;
            let body_len = body_len as usize;
            if pos + body_len > buf.len() {
                return None;
            }
            let body = buf[pos..pos + body_len].to_vec();
            pos += body_len;
            messages.push(QConnectMessage {
                message_type: MessageType::from_code(type_code as i32),
                body,
            });
        }

        Some(Self {
            messages_time,
            messages_id,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_known_codes() {
        for code in [21, 22, 23, 25, 26, 27, 28, 41, 42, 43, 44, 45, 46, 47, 87, 90, 91] {
            assert_eq!(MessageType::from_code(code).code(), code);
        }
    }

    #[test]
    fn unknown_message_type_is_unhandled_not_error() {
        assert_eq!(MessageType::from_code(24), MessageType::Unhandled(24));
        assert_eq!(MessageType::from_code(999).code(), 999);
    }

    #[test]
    fn batch_round_trips_through_bytes() {
        let set_state = SetState {
            current_queue_item: Some(QueueItem {
                queue_item_id: 1,
                track_id: "64868955".into(),
            }),
            next_queue_item: None,
            current_position_ms: Some(0),
            playing_state: Some(2),
        };
        let batch = QConnectBatch {
            messages_time: 1_700_000_000_000,
            messages_id: 7,
            messages: vec![QConnectMessage::encode(MessageType::SetState, &set_state)],
        };

        let encoded = batch.encode();
        let decoded = QConnectBatch::decode(&encoded).unwrap();

        assert_eq!(decoded.messages_time, batch.messages_time);
        assert_eq!(decoded.messages_id, batch.messages_id);
        assert_eq!(decoded.messages.len(), 1);
        let decoded_state: SetState = decoded.messages[0].decode_body().unwrap();
        assert_eq!(decoded_state, set_state);
    }

    #[test]
    fn truncated_batch_fails_to_decode() {
        let batch = QConnectBatch {
            messages_time: 1,
            messages_id: 1,
            messages: vec![QConnectMessage::encode(MessageType::SetVolume, &SetVolume {
                absolute: Some(50),
                delta: None,
            })],
        };
        let mut encoded = batch.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(QConnectBatch::decode(&encoded).is_none());
    }
}

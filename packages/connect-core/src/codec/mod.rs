//! Connect protocol wire codec: outer frame, inner message batch, varints,
//! and quality-id mapping.

mod frame;
mod inner;
mod quality;
mod varint;

pub use frame::{Codec, CodecError, OuterFields, OuterFrame, OuterType};
pub use inner::{
    AudioQualityChanged, JoinCapabilities, JoinSession, MaxAudioQualityChanged, MessageType,
    QConnectBatch, QConnectMessage, QueueItem, QueueLoad, SetActive, SetAutoplayMode,
    SetLoopMode, SetMaxAudioQuality, SetShuffleMode, SetState, SetVolume, StateUpdated,
    VolumeChangedBroadcast,
};
pub use quality::{
    protocol_to_quality, quality_audio_properties, quality_to_protocol, QualityAudioProperties,
    QUALITY_CD, QUALITY_HIRES_192, QUALITY_HIRES_96, QUALITY_IDS_DESCENDING, QUALITY_MP3,
};

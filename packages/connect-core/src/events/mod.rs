//! Event system decoupling domain services (player, session, DLNA backend)
//! from their eventual transport (the Connect WebSocket session, logs).
//!
//! Services depend on [`EventEmitter`] rather than a concrete broadcast
//! channel; [`BroadcastEventBridge`] is the one real implementation, fanning
//! events out to whoever is subscribed (normally just the session task that
//! turns them into outbound inner QConnect messages).

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Every event a domain service can emit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Player state transitions and quality/volume changes.
    Playback(PlaybackEvent),
    /// Connect WebSocket session lifecycle.
    Session(SessionEvent),
    /// DLNA backend transport-level changes.
    Dlna(DlnaEvent),
    /// Local audio backend transport-level changes.
    Local(LocalEvent),
}

/// Events the player raises as it transitions state (§4.6, §4.7).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// A state report should be sent immediately (not tied to the 5s heartbeat).
    StateReportRequested,
    /// Volume changed locally (by command or delta), to be relayed as `VOLUME_CHANGED`.
    VolumeChanged { volume_pct: i32 },
    /// The actual quality a resolved streaming URL came back as.
    FileQualityChanged { quality_id: i32 },
    /// The device's announced max quality changed (e.g. after a capability refresh).
    DeviceQualityChanged { quality_id: i32 },
    /// The renderer's configured max quality changed.
    MaxQualityChanged { quality_id: i32 },
}

/// Connect WebSocket session lifecycle events, used for logging and for
/// gating background tasks (state reporter, preload) on `live`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The session reached `live` and the initial `JoinSession` was sent.
    Live { session_uuid: String },
    /// The session dropped out of `live` for any reason.
    Disconnected { reason: String },
    /// A reconnect attempt is scheduled after `delay_ms`.
    Reconnecting { attempt: u32, delay_ms: u64 },
}

/// DLNA backend transport-level changes not initiated by the player itself.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DlnaEvent {
    /// The device reported `STOPPED` outside the post-play grace period.
    DeviceStopped { device_uuid: String },
    /// `GetPositionInfo` returned a fresh position while the device is playing.
    PositionUpdate { device_uuid: String, position_ms: i64 },
    /// A SOAP call failed after exhausting retries.
    Error { device_uuid: String, message: String },
}

/// Local audio backend transport-level changes not initiated by the player itself.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LocalEvent {
    /// The feeder drained the ring buffer after feeding the full track.
    TrackEnded,
    /// Ring buffer fill crossed into a new status bucket (`empty`, `low`, `ok`, `full`).
    BufferStatusChanged { status: String },
}

impl From<PlaybackEvent> for BroadcastEvent {
    fn from(event: PlaybackEvent) -> Self {
        Self::Playback(event)
    }
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        Self::Session(event)
    }
}

impl From<DlnaEvent> for BroadcastEvent {
    fn from(event: DlnaEvent) -> Self {
        Self::Dlna(event)
    }
}

impl From<LocalEvent> for BroadcastEvent {
    fn from(event: LocalEvent) -> Self {
        Self::Local(event)
    }
}

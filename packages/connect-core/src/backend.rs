//! Playback backend abstraction unifying the DLNA and local audio sinks (§9).

use async_trait::async_trait;

use crate::error::RenderResult;
use crate::rest::TrackMetadata;

/// A playback sink: a DLNA/UPnP renderer or a local audio device.
///
/// Implementations report transport-level changes (buffer state, device-
/// initiated stop) through the [`crate::events::EventEmitter`] they were
/// constructed with rather than through return values, mirroring how the
/// player observes reality rather than commanding it synchronously.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Starts playback of `url`, announcing `metadata` to the sink where applicable.
    async fn play(&self, url: &str, metadata: &TrackMetadata) -> RenderResult<()>;

    /// Pauses a currently playing stream.
    async fn pause(&self) -> RenderResult<()>;

    /// Resumes a paused stream.
    async fn resume(&self) -> RenderResult<()>;

    /// Stops playback entirely.
    async fn stop(&self) -> RenderResult<()>;

    /// Seeks to `position_ms` within the current track.
    async fn seek(&self, position_ms: i64) -> RenderResult<()>;

    /// Sets playback volume, 0-100. No-op when [`PlaybackBackend::fixed_volume`] is set.
    async fn set_volume(&self, volume_pct: i32) -> RenderResult<()>;

    /// A short buffer-state tag suitable for state reports (e.g. `"BUFFERING"`, `"BUFFERED"`).
    fn buffer_state(&self) -> String;

    /// True when this sink does not support volume control (reported volume is then always 100).
    fn fixed_volume(&self) -> bool {
        false
    }

    /// The conservative renderer-internal quality id implied by the sink's
    /// discovered capabilities, or `None` when the sink imposes no ceiling of
    /// its own (e.g. a local audio device, or a renderer whose capabilities
    /// could not be discovered).
    fn recommended_quality_id(&self) -> Option<i32> {
        None
    }

    /// Tears down any background tasks the backend owns beyond a single
    /// [`PlaybackBackend::stop`] call (e.g. a transport state poll loop).
    /// Called once, at process shutdown.
    fn shutdown(&self) {}
}

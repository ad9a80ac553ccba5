//! The player: single authority over playback state (§4.6).

use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::PlaybackBackend;
use crate::events::{EventEmitter, PlaybackEvent};
use crate::metadata::MetadataService;
use crate::protocol_constants::PREVIOUS_TRACK_THRESHOLD_MS;
use crate::queue::{Queue, RepeatMode};
use crate::utils::now_millis;

/// Playback state kind (§3). `Loading` and `Error` both report as `stopped` (1)
/// to the controller; see [`PlayerKind::protocol_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
    Stopped,
    Loading,
    Playing,
    Paused,
    Error,
}

impl PlayerKind {
    /// Maps to the wire `playingState` code (1 stopped, 2 playing, 3 paused).
    #[must_use]
    pub fn protocol_code(self) -> i32 {
        match self {
            Self::Playing => 2,
            Self::Paused => 3,
            Self::Stopped | Self::Loading | Self::Error => 1,
        }
    }
}

/// `(timestamp_ms, value_ms)`: the position's value at a monotonic-clock instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionAnchor {
    pub timestamp_ms: u64,
    pub value_ms: i64,
}

#[derive(Debug, Clone)]
struct CurrentTrackRef {
    queue_item_id: i64,
    track_id: String,
}

struct PlayerState {
    kind: PlayerKind,
    current_track: Option<CurrentTrackRef>,
    duration_ms: i64,
    anchor: PositionAnchor,
    volume_pct: i32,
    fixed_volume: bool,
    effective_quality_id: i32,
    /// Stashed from the last `SET_STATE`'s `nextQueueItem`, consumed at track end.
    stashed_next: Option<CurrentTrackRef>,
    autoplay_enabled: bool,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            kind: PlayerKind::Stopped,
            current_track: None,
            duration_ms: 0,
            anchor: PositionAnchor::default(),
            volume_pct: 100,
            fixed_volume: false,
            effective_quality_id: 0,
            stashed_next: None,
            autoplay_enabled: true,
        }
    }
}

/// The player: single authority over playback state, serialized one
/// operation at a time via the lock on [`PlayerState`].
pub struct Player {
    backend: Arc<dyn PlaybackBackend>,
    queue: Arc<Queue>,
    metadata: Arc<MetadataService>,
    emitter: Arc<dyn EventEmitter>,
    state: RwLock<PlayerState>,
}

impl Player {
    #[must_use]
    pub fn new(
        backend: Arc<dyn PlaybackBackend>,
        queue: Arc<Queue>,
        metadata: Arc<MetadataService>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let fixed_volume = backend.fixed_volume();
        Self {
            backend,
            queue,
            metadata,
            emitter,
            state: RwLock::new(PlayerState {
                fixed_volume,
                ..Default::default()
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> PlayerKind {
        self.state.read().kind
    }

    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.state.read().duration_ms
    }

    #[must_use]
    pub fn current_queue_item_id(&self) -> Option<i64> {
        self.state.read().current_track.as_ref().map(|t| t.queue_item_id)
    }

    /// Live position: `value_ms + (now - timestamp_ms)` while playing, else frozen.
    #[must_use]
    pub fn position_ms(&self) -> i64 {
        let state = self.state.read();
        match state.kind {
            PlayerKind::Playing => {
                let elapsed = now_millis().saturating_sub(state.anchor.timestamp_ms) as i64;
                state.anchor.value_ms + elapsed
            }
            _ => state.anchor.value_ms,
        }
    }

    #[must_use]
    pub fn anchor(&self) -> PositionAnchor {
        self.state.read().anchor
    }

    /// The currently effective max-quality id (0 until the controller sets one
    /// or auto-detection from DLNA capabilities runs).
    #[must_use]
    pub fn effective_quality_id(&self) -> i32 {
        self.state.read().effective_quality_id
    }

    /// Current buffer-state tag, proxied straight from the backend.
    #[must_use]
    pub fn buffer_state(&self) -> String {
        self.backend.buffer_state()
    }

    #[must_use]
    pub fn volume_pct(&self) -> i32 {
        if self.state.read().fixed_volume {
            100
        } else {
            self.state.read().volume_pct
        }
    }

    /// Sets which track is "current" without starting playback; called by the
    /// `SET_STATE` handler before applying the playing state (§4.8).
    pub async fn load_track(&self, queue_item_id: i64, track_id: String) {
        let differs = {
            let state = self.state.read();
            state.current_track.as_ref().map(|t| t.track_id.as_str()) != Some(track_id.as_str())
        };
        if !differs {
            return;
        }

        let _ = self.backend.stop().await;

        let mut state = self.state.write();
        state.kind = PlayerKind::Stopped;
        state.current_track = Some(CurrentTrackRef { queue_item_id, track_id });
        state.duration_ms = 0;
        state.anchor = PositionAnchor { timestamp_ms: now_millis(), value_ms: 0 };
    }

    /// Stashes the controller-supplied next queue item, consumed at track end.
    pub fn stash_next(&self, queue_item_id: Option<i64>, track_id: Option<String>) {
        let mut state = self.state.write();
        state.stashed_next = match (queue_item_id, track_id) {
            (Some(id), Some(track_id)) => Some(CurrentTrackRef { queue_item_id: id, track_id }),
            _ => None,
        };
    }

    /// `play(position_ms)` per §4.6.
    pub async fn play(&self, position_ms: i64) -> bool {
        let kind = self.state.read().kind;

        if kind == PlayerKind::Paused {
            let _ = self.backend.resume().await;
            let mut state = self.state.write();
            state.kind = PlayerKind::Playing;
            state.anchor.timestamp_ms = now_millis();
            self.request_report();
            return true;
        }

        if kind == PlayerKind::Playing {
            return true;
        }

        let current = {
            let state = self.state.read();
            state.current_track.clone()
        };
        let current = match current {
            Some(track) => Some(track),
            None => self.take_from_queue(),
        };
        let Some(current) = current else {
            return false;
        };

        self.state.write().kind = PlayerKind::Loading;

        let fetched = self.metadata.get_metadata(
            &current.track_id,
            true,
            self.state.read().effective_quality_id,
        ).await;

        let Ok(cached) = fetched else {
            self.state.write().kind = PlayerKind::Error;
            self.request_report();
            return false;
        };
        let Some(url) = cached.streaming_url.clone() else {
            self.state.write().kind = PlayerKind::Error;
            self.request_report();
            return false;
        };

        match self.backend.play(&url, &cached.metadata).await {
            Ok(()) => {
                {
                    let mut state = self.state.write();
                    state.kind = PlayerKind::Playing;
                    state.current_track = Some(current);
                    state.duration_ms = cached.metadata.duration_ms;
                    state.anchor = PositionAnchor { timestamp_ms: now_millis(), value_ms: 0 };
                }
                if let Some(quality) = cached.actual_quality {
                    self.emitter.emit_playback(PlaybackEvent::FileQualityChanged { quality_id: quality });
                }
                if position_ms > 0 {
                    self.seek(position_ms).await;
                }
                self.request_report();
                true
            }
            Err(_) => {
                self.state.write().kind = PlayerKind::Error;
                self.request_report();
                false
            }
        }
    }

    fn take_from_queue(&self) -> Option<CurrentTrackRef> {
        let track = self.queue.current().or_else(|| self.queue.advance_to_next())?;
        Some(CurrentTrackRef {
            queue_item_id: track.queue_item_id,
            track_id: track.track_id.clone(),
        })
    }

    /// `pause`: legal only from `playing`.
    pub async fn pause(&self) -> bool {
        if self.state.read().kind != PlayerKind::Playing {
            return false;
        }
        let live_position = self.position_ms();
        let _ = self.backend.pause().await;
        {
            let mut state = self.state.write();
            state.kind = PlayerKind::Paused;
            state.anchor = PositionAnchor { timestamp_ms: now_millis(), value_ms: live_position };
        }
        self.request_report();
        true
    }

    /// `stop_playback`: always legal, keeps the queue cursor.
    pub async fn stop_playback(&self) {
        let _ = self.backend.stop().await;
        {
            let mut state = self.state.write();
            state.kind = PlayerKind::Stopped;
            state.anchor = PositionAnchor { timestamp_ms: now_millis(), value_ms: 0 };
        }
        self.request_report();
    }

    /// Reconciles the computed position against one observed from the
    /// backend (e.g. a DLNA `GetPositionInfo` poll). No-op unless currently
    /// playing, so it never resurrects a stopped/paused anchor.
    pub fn reconcile_position(&self, position_ms: i64) {
        let mut state = self.state.write();
        if state.kind == PlayerKind::Playing {
            state.anchor = PositionAnchor { timestamp_ms: now_millis(), value_ms: position_ms };
        }
    }

    /// `seek(position_ms)`: rejected when stopped or no current track.
    pub async fn seek(&self, position_ms: i64) -> bool {
        let (kind, duration_ms, has_track) = {
            let state = self.state.read();
            (state.kind, state.duration_ms, state.current_track.is_some())
        };
        if kind == PlayerKind::Stopped || !has_track {
            return false;
        }

        let clamped = position_ms.clamp(0, (duration_ms - 1000).max(0));
        let _ = self.backend.seek(clamped).await;
        {
            let mut state = self.state.write();
            state.anchor = PositionAnchor { timestamp_ms: now_millis(), value_ms: clamped };
        }
        self.request_report();
        true
    }

    /// Track-end handling (§4.6): repeat-one replays, a stashed next-item
    /// plays next, otherwise the player stops with no current track.
    pub async fn on_track_end(&self) {
        if self.queue.repeat_mode() == RepeatMode::One {
            self.seek(0).await;
            return;
        }

        let stashed = self.state.write().stashed_next.take();
        if let Some(next) = stashed {
            self.load_track(next.queue_item_id, next.track_id).await;
            self.play(0).await;
            return;
        }

        let _ = self.backend.stop().await;
        let mut state = self.state.write();
        state.kind = PlayerKind::Stopped;
        state.current_track = None;
        state.anchor = PositionAnchor { timestamp_ms: now_millis(), value_ms: 0 };
        drop(state);
        self.request_report();
    }

    /// Previous-track policy: restart the current track past the threshold,
    /// otherwise move the queue cursor back (§4.6).
    pub async fn previous(&self) {
        if self.position_ms() > PREVIOUS_TRACK_THRESHOLD_MS as i64 {
            self.seek(0).await;
            return;
        }

        if let Some(track) = self.queue.go_to_previous() {
            self.load_track(track.queue_item_id, track.track_id.clone()).await;
            self.play(0).await;
        }
    }

    /// `set_volume(v)`: clamps, sets on backend, caches, reports.
    pub async fn set_volume(&self, volume_pct: i32) {
        if self.state.read().fixed_volume {
            return;
        }
        let clamped = volume_pct.clamp(0, 100);
        let _ = self.backend.set_volume(clamped).await;
        self.state.write().volume_pct = clamped;
        self.emitter.emit_playback(PlaybackEvent::VolumeChanged { volume_pct: clamped });
    }

    pub async fn set_volume_delta(&self, delta: i32) {
        let current = self.state.read().volume_pct;
        self.set_volume(current + delta).await;
    }

    /// Maps the controller's loop-mode code to the queue's repeat mode (§4.6).
    pub fn set_loop_mode(&self, controller_mode: i32) {
        let mode = match controller_mode {
            2 => RepeatMode::One,
            3 => RepeatMode::All,
            _ => RepeatMode::Off,
        };
        self.queue.set_repeat_mode(mode);
    }

    pub fn set_shuffle_mode(&self, enabled: bool, pivot_queue_item_id: Option<i64>) {
        if enabled {
            self.queue.enable_shuffle(pivot_queue_item_id);
        } else {
            self.queue.disable_shuffle();
        }
    }

    pub fn set_autoplay_mode(&self, enabled: bool) {
        self.state.write().autoplay_enabled = enabled;
    }

    pub fn set_max_quality(&self, quality_id: i32) {
        self.state.write().effective_quality_id = quality_id;
        self.metadata.set_max_quality();
        self.emitter.emit_playback(PlaybackEvent::MaxQualityChanged { quality_id });
    }

    fn request_report(&self) {
        self.emitter.emit_playback(PlaybackEvent::StateReportRequested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderResult;
    use crate::events::NoopEventEmitter;
    use crate::rest::{RestClient, TrackMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubBackend {
        fixed_volume: bool,
        play_should_fail: AtomicBool,
    }

    #[async_trait]
    impl PlaybackBackend for StubBackend {
        async fn play(&self, _url: &str, _metadata: &TrackMetadata) -> RenderResult<()> {
            if self.play_should_fail.load(Ordering::SeqCst) {
                Err(crate::error::RenderError::LocalAudio("stub failure".into()))
            } else {
                Ok(())
            }
        }
        async fn pause(&self) -> RenderResult<()> { Ok(()) }
        async fn resume(&self) -> RenderResult<()> { Ok(()) }
        async fn stop(&self) -> RenderResult<()> { Ok(()) }
        async fn seek(&self, _position_ms: i64) -> RenderResult<()> { Ok(()) }
        async fn set_volume(&self, _volume_pct: i32) -> RenderResult<()> { Ok(()) }
        fn buffer_state(&self) -> String { "BUFFERED".into() }
        fn fixed_volume(&self) -> bool { self.fixed_volume }
    }

    fn make_player(fixed_volume: bool) -> Player {
        let backend = Arc::new(StubBackend { fixed_volume, play_should_fail: AtomicBool::new(false) });
        let queue = Arc::new(Queue::new());
        let metadata = Arc::new(MetadataService::new(RestClient::new("id".into(), "secret".into())));
        let emitter = Arc::new(NoopEventEmitter);
        Player::new(backend, queue, metadata, emitter)
    }

    #[test]
    fn loading_and_error_report_as_stopped() {
        assert_eq!(PlayerKind::Loading.protocol_code(), 1);
        assert_eq!(PlayerKind::Error.protocol_code(), 1);
        assert_eq!(PlayerKind::Playing.protocol_code(), 2);
        assert_eq!(PlayerKind::Paused.protocol_code(), 3);
    }

    #[tokio::test]
    async fn seek_rejected_when_stopped() {
        let player = make_player(false);
        assert!(!player.seek(1000).await);
    }

    #[tokio::test]
    async fn pause_only_legal_from_playing() {
        let player = make_player(false);
        assert!(!player.pause().await);
    }

    #[tokio::test]
    async fn fixed_volume_backend_ignores_set_volume_and_reports_100() {
        let player = make_player(true);
        player.set_volume(42).await;
        assert_eq!(player.volume_pct(), 100);
    }

    #[tokio::test]
    async fn set_volume_clamps_to_0_100() {
        let player = make_player(false);
        player.set_volume(500).await;
        assert_eq!(player.volume_pct(), 100);
        player.set_volume(-50).await;
        assert_eq!(player.volume_pct(), 0);
    }

    #[tokio::test]
    async fn stop_playback_keeps_current_track() {
        let player = make_player(false);
        player.load_track(1, "track-1".into()).await;
        player.stop_playback().await;
        assert_eq!(player.current_queue_item_id(), Some(1));
        assert_eq!(player.kind(), PlayerKind::Stopped);
    }

    #[test]
    fn loop_mode_translation_table() {
        let player = make_player(false);
        player.set_loop_mode(0);
        assert_eq!(player.queue.repeat_mode(), RepeatMode::Off);
        player.set_loop_mode(1);
        assert_eq!(player.queue.repeat_mode(), RepeatMode::Off);
        player.set_loop_mode(2);
        assert_eq!(player.queue.repeat_mode(), RepeatMode::One);
        player.set_loop_mode(3);
        assert_eq!(player.queue.repeat_mode(), RepeatMode::All);
    }
}

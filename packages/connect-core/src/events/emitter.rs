//! Event emitter abstraction for decoupling services from transport.

use super::{DlnaEvent, LocalEvent, PlaybackEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a player/state-reporter event.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits a Connect WebSocket session lifecycle event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a DLNA backend transport event.
    fn emit_dlna(&self, event: DlnaEvent);

    /// Emits a local audio backend transport event.
    fn emit_local(&self, event: LocalEvent);
}

/// No-op emitter, useful for unit tests that don't care about event delivery.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_playback(&self, _event: PlaybackEvent) {}
    fn emit_session(&self, _event: SessionEvent) {}
    fn emit_dlna(&self, _event: DlnaEvent) {}
    fn emit_local(&self, _event: LocalEvent) {}
}

/// Logs every event at debug level instead of delivering it anywhere.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_playback(&self, event: PlaybackEvent) {
        log::debug!("[Events] playback event: {:?}", event);
    }

    fn emit_session(&self, event: SessionEvent) {
        log::debug!("[Events] session event: {:?}", event);
    }

    fn emit_dlna(&self, event: DlnaEvent) {
        log::debug!("[Events] dlna event: {:?}", event);
    }

    fn emit_local(&self, event: LocalEvent) {
        log::debug!("[Events] local event: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEventEmitter {
        playback_count: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_playback(&self, _event: PlaybackEvent) {
            self.playback_count.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_session(&self, _event: SessionEvent) {}
        fn emit_dlna(&self, _event: DlnaEvent) {}
        fn emit_local(&self, _event: LocalEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_playback_events() {
        let emitter = CountingEventEmitter {
            playback_count: AtomicUsize::new(0),
        };
        emitter.emit_playback(PlaybackEvent::VolumeChanged { volume_pct: 50 });
        emitter.emit_playback(PlaybackEvent::StateReportRequested);
        assert_eq!(emitter.playback_count.load(Ordering::SeqCst), 2);
    }
}

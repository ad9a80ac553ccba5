//! Bridge implementation that maps domain events to the broadcast channel
//! the Connect WebSocket session task subscribes to.

use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, DlnaEvent, LocalEvent, PlaybackEvent, SessionEvent};

/// Bridges domain events to a `tokio::sync::broadcast` channel.
///
/// `Send + Sync` and cheaply `Clone`-able (the sender is reference-counted
/// internally), so every service that needs to emit can hold its own clone.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] no receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_playback, PlaybackEvent, Playback);
    impl_emit!(emit_session, SessionEvent, Session);
    impl_emit!(emit_dlna, DlnaEvent, Dlna);
    impl_emit!(emit_local, LocalEvent, Local);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_emitted_events() {
        let bridge = BroadcastEventBridge::new(8);
        let mut rx = bridge.subscribe();

        bridge.emit_playback(PlaybackEvent::VolumeChanged { volume_pct: 42 });

        let event = rx.try_recv().unwrap();
        matches!(event, BroadcastEvent::Playback(PlaybackEvent::VolumeChanged { volume_pct: 42 }));
    }

    #[test]
    fn send_with_no_receivers_does_not_panic() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.emit_session(SessionEvent::Disconnected { reason: "test".into() });
    }
}

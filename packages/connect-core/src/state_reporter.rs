//! Sends `STATE_UPDATED` reports: immediately on request, and on a 5s
//! heartbeat while playing (§4.7).

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::codec::StateUpdated;
use crate::events::{BroadcastEvent, PlaybackEvent};
use crate::player::{Player, PlayerKind};
use crate::protocol_constants::STATE_REPORT_HEARTBEAT_SECS;
use crate::queue::Queue;

/// Builds a [`StateUpdated`] snapshot from the player's current state.
#[must_use]
pub fn build_state_report(player: &Player, queue: &Queue) -> StateUpdated {
    let anchor = player.anchor();
    StateUpdated {
        playing_state: player.kind().protocol_code(),
        buffer_state: player.buffer_state(),
        position_timestamp_ms: anchor.timestamp_ms,
        position_value_ms: anchor.value_ms,
        duration_ms: player.duration_ms(),
        current_queue_item_id: player.current_queue_item_id(),
        version_major: queue.version().major,
        version_minor: queue.version().minor,
    }
}

/// Drives the state-report schedule: an immediate report whenever
/// [`PlaybackEvent::StateReportRequested`] fires, and a heartbeat report
/// every [`STATE_REPORT_HEARTBEAT_SECS`] while the player is playing.
///
/// `on_report` is called with each report to build; the caller is
/// responsible for framing it as an outbound inner message.
pub async fn run_state_reporter<F>(
    player: Arc<Player>,
    queue: Arc<Queue>,
    mut events: broadcast::Receiver<BroadcastEvent>,
    cancel: CancellationToken,
    mut on_report: F,
) where
    F: FnMut(StateUpdated) + Send,
{
    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(STATE_REPORT_HEARTBEAT_SECS));

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = heartbeat.tick() => {
                if player.kind() == PlayerKind::Playing {
                    on_report(build_state_report(&player, &queue));
                }
            }
            event = events.recv() => {
                match event {
                    Ok(BroadcastEvent::Playback(PlaybackEvent::StateReportRequested)) => {
                        on_report(build_state_report(&player, &queue));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderResult;
    use crate::events::NoopEventEmitter;
    use crate::metadata::MetadataService;
    use crate::rest::{RestClient, TrackMetadata};
    use async_trait::async_trait;

    struct StubBackend;

    #[async_trait]
    impl crate::backend::PlaybackBackend for StubBackend {
        async fn play(&self, _url: &str, _metadata: &TrackMetadata) -> RenderResult<()> { Ok(()) }
        async fn pause(&self) -> RenderResult<()> { Ok(()) }
        async fn resume(&self) -> RenderResult<()> { Ok(()) }
        async fn stop(&self) -> RenderResult<()> { Ok(()) }
        async fn seek(&self, _position_ms: i64) -> RenderResult<()> { Ok(()) }
        async fn set_volume(&self, _volume_pct: i32) -> RenderResult<()> { Ok(()) }
        fn buffer_state(&self) -> String { "BUFFERED".into() }
    }

    #[test]
    fn stopped_report_maps_to_protocol_code_one() {
        let queue = Arc::new(Queue::new());
        let metadata = Arc::new(MetadataService::new(RestClient::new("id".into(), "secret".into())));
        let player = Player::new(Arc::new(StubBackend), queue.clone(), metadata, Arc::new(NoopEventEmitter));

        let report = build_state_report(&player, &queue);
        assert_eq!(report.playing_state, 1);
        assert_eq!(report.current_queue_item_id, None);
    }
}

//! Dispatches inbound inner `messageType` codes to the player/queue (§4.8).

use std::sync::Arc;

use crate::codec::{
    protocol_to_quality, quality_to_protocol, MessageType, QConnectMessage, QueueLoad, SetActive,
    SetAutoplayMode, SetLoopMode, SetMaxAudioQuality, SetShuffleMode, SetState, SetVolume,
    VolumeChangedBroadcast,
};
use crate::player::Player;
use crate::queue::{Queue, QueueVersion};

/// Dispatches a single decoded inner message. Unknown/outbound-only message
/// types are ignored (logged at debug by the caller).
pub async fn dispatch(message: &QConnectMessage, player: &Arc<Player>, queue: &Arc<Queue>) {
    match message.message_type {
        MessageType::SetState => {
            if let Ok(body) = message.decode_body::<SetState>() {
                apply_set_state(body, player).await;
            }
        }
        MessageType::SetVolume => {
            if let Ok(body) = message.decode_body::<SetVolume>() {
                apply_set_volume(body, player).await;
            }
        }
        MessageType::SetActive => {
            if let Ok(body) = message.decode_body::<SetActive>() {
                if !body.is_active {
                    player.stop_playback().await;
                }
            }
        }
        MessageType::SetMaxAudioQuality => {
            if let Ok(body) = message.decode_body::<SetMaxAudioQuality>() {
                if let Some(quality_id) = protocol_to_quality(body.quality) {
                    player.set_max_quality(quality_id);
                }
            }
        }
        MessageType::SetLoopMode => {
            if let Ok(body) = message.decode_body::<SetLoopMode>() {
                player.set_loop_mode(body.mode);
            }
        }
        MessageType::SetShuffleMode => {
            if let Ok(body) = message.decode_body::<SetShuffleMode>() {
                player.set_shuffle_mode(body.enabled, body.pivot_queue_item_id);
            }
        }
        MessageType::SetAutoplayMode => {
            if let Ok(body) = message.decode_body::<SetAutoplayMode>() {
                player.set_autoplay_mode(body.enabled);
            }
        }
        MessageType::VolumeChangedBroadcast => {
            if let Ok(body) = message.decode_body::<VolumeChangedBroadcast>() {
                player.set_volume(body.volume).await;
            }
        }
        MessageType::QueueState | MessageType::QueueLoadTracks => {
            if let Ok(body) = message.decode_body::<QueueLoad>() {
                apply_queue_load(body, message.message_type, queue);
            }
        }
        _ => {
            log::debug!("[Commands] unhandled inner message type {}", message.message_type.code());
        }
    }
}

/// `SetState` handling order is mandatory (§4.8): load the new track first,
/// stash the next item, then apply position and playing state in that order.
async fn apply_set_state(body: SetState, player: &Arc<Player>) {
    if let Some(current) = &body.current_queue_item {
        player.load_track(current.queue_item_id, current.track_id.clone()).await;
    }

    player.stash_next(
        body.next_queue_item.as_ref().map(|t| t.queue_item_id),
        body.next_queue_item.as_ref().map(|t| t.track_id.clone()),
    );

    let position_ms = body.current_position_ms.unwrap_or(0);

    match body.playing_state {
        Some(2) => {
            player.play(position_ms).await;
        }
        Some(3) => {
            player.pause().await;
        }
        Some(1) => {
            player.stop_playback().await;
        }
        _ => {}
    }
}

async fn apply_set_volume(body: SetVolume, player: &Arc<Player>) {
    if let Some(absolute) = body.absolute {
        player.set_volume(absolute).await;
    } else if let Some(delta) = body.delta {
        player.set_volume_delta(delta).await;
    }
}

fn apply_queue_load(body: QueueLoad, message_type: MessageType, queue: &Arc<Queue>) {
    let tracks = body.tracks.iter().map(|t| (t.queue_item_id, t.track_id.clone())).collect();
    let version = QueueVersion { major: body.version_major, minor: body.version_minor };

    let current_item_id = match message_type {
        MessageType::QueueLoadTracks => body
            .queue_position
            .and_then(|pos| body.tracks.get(pos))
            .map(|t| t.queue_item_id),
        _ => body.current_queue_item_id,
    };

    queue.load_queue(tracks, version, current_item_id);
}

#[allow(dead_code)]
fn round_trip_quality_sanity_check(quality_id: i32) -> Option<i32> {
    quality_to_protocol(quality_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::QueueItem;
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

    fn make_player() -> (Arc<Player>, Arc<Queue>) {
        let queue = Arc::new(Queue::new());
        let metadata = Arc::new(MetadataService::new(RestClient::new("id".into(), "secret".into())));
        let player = Arc::new(Player::new(Arc::new(StubBackend), queue.clone(), metadata, Arc::new(NoopEventEmitter)));
        (player, queue)
    }

    #[tokio::test]
    async fn set_active_false_stops_playback() {
        let (player, _queue) = make_player();
        let message = QConnectMessage::encode(MessageType::SetActive, &SetActive { is_active: false });
        dispatch(&message, &player, &_queue).await;
        assert_eq!(player.kind(), crate::player::PlayerKind::Stopped);
    }

    #[tokio::test]
    async fn queue_load_tracks_derives_current_item_from_queue_position() {
        let (_player, queue) = make_player();
        let body = QueueLoad {
            tracks: vec![
                QueueItem { queue_item_id: 10, track_id: "a".into() },
                QueueItem { queue_item_id: 11, track_id: "b".into() },
            ],
            version_major: 1,
            version_minor: 0,
            current_queue_item_id: None,
            queue_position: Some(1),
        };
        let message = QConnectMessage::encode(MessageType::QueueLoadTracks, &body);
        dispatch(&message, &_player, &queue).await;
        assert_eq!(queue.current().unwrap().queue_item_id, 11);
    }

    #[tokio::test]
    async fn set_volume_absolute_takes_precedence_path() {
        let (player, queue) = make_player();
        let message = QConnectMessage::encode(MessageType::SetVolume, &SetVolume { absolute: Some(30), delta: None });
        dispatch(&message, &player, &queue).await;
        assert_eq!(player.volume_pct(), 30);
    }
}

//! WebSocket session: dials out to `ws_token.endpoint`, authenticates,
//! subscribes, and joins (§4.2). State machine per connection attempt:
//! `dialing -> authenticating -> subscribing -> joining -> live -> closing/errored`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::codec::{
    quality_audio_properties, quality_to_protocol, AudioQualityChanged, Codec, JoinCapabilities,
    JoinSession, MaxAudioQualityChanged, MessageType, OuterFields, OuterType, QConnectBatch,
    QConnectMessage, StateUpdated, VolumeChangedBroadcast,
};
use crate::commands;
use crate::events::{EventEmitter, SessionEvent};
use crate::player::Player;
use crate::protocol_constants::{
    RECONNECT_BACKOFF_INITIAL_SECS, RECONNECT_BACKOFF_MAX_SECS, WS_PING_INTERVAL_SECS,
    WS_PONG_TIMEOUT_SECS, WS_RECV_POLL_SECS,
};
use crate::queue::Queue;
use crate::tokens::{now_secs, TokenStore};
use crate::utils::now_millis;

const WS_ORIGIN: &str = "https://play.vendor.example";
const WS_SUBPROTOCOL: &str = "qws";

/// Errors that can abort a single connection attempt. The reconnect loop
/// treats every variant as transient except [`SessionError::TokenExpired`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no valid tokens available")]
    NoTokens,
    #[error("ws_token expired before a connection could be established")]
    TokenExpired,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed by server")]
    Closed,
}

/// Static device identity announced in the `JoinSession` handshake.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub uuid: String,
    pub friendly_name: String,
    pub brand: String,
    pub model: String,
    pub software_version: String,
}

/// Drives one outbound WebSocket connection to the Connect protocol endpoint.
///
/// Sends made while not `live` are buffered in the outbound channel and
/// flushed in order once the session reaches `live`; callers don't need to
/// know the connection's internal state to send.
pub struct Session {
    tokens: Arc<TokenStore>,
    device: DeviceInfo,
    emitter: Arc<dyn EventEmitter>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    next_batch_id: AtomicU64,
}

impl Session {
    #[must_use]
    pub fn new(tokens: Arc<TokenStore>, device: DeviceInfo, emitter: Arc<dyn EventEmitter>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            tokens,
            device,
            emitter,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            next_batch_id: AtomicU64::new(1),
        }
    }

    fn next_batch(&self, message_type: MessageType, payload: &impl serde::Serialize) -> QConnectBatch {
        QConnectBatch {
            messages_time: now_millis(),
            messages_id: self.next_batch_id.fetch_add(1, Ordering::SeqCst),
            messages: vec![QConnectMessage::encode(message_type, payload)],
        }
    }

    fn enqueue(&self, message_type: MessageType, payload: &impl serde::Serialize) {
        let batch = self.next_batch(message_type, payload);
        let _ = self.outbound_tx.send(batch.encode());
    }

    pub fn send_state_update(&self, report: StateUpdated) {
        self.enqueue(MessageType::StateUpdated, &report);
    }

    pub fn send_volume_changed(&self, volume_pct: i32) {
        self.enqueue(MessageType::VolumeChanged, &VolumeChangedBroadcast { volume: volume_pct });
    }

    pub fn send_file_quality_changed(&self, quality_id: i32, proto_quality: i32) {
        self.enqueue(MessageType::FileAudioQualityChanged, &quality_changed_payload(proto_quality, quality_id));
    }

    pub fn send_device_quality_changed(&self, quality_id: i32, proto_quality: i32) {
        self.enqueue(MessageType::DeviceAudioQualityChanged, &quality_changed_payload(proto_quality, quality_id));
    }

    pub fn send_max_quality_changed(&self, quality_id: i32, proto_quality: i32) {
        let props = quality_audio_properties(quality_id);
        self.enqueue(MessageType::MaxAudioQualityChanged, &MaxAudioQualityChanged {
            quality: proto_quality,
            network_type: 1,
            sampling_rate: props.map_or(0, |p| p.sample_rate),
            bit_depth: props.map_or(0, |p| p.bit_depth),
            nb_channels: props.map_or(2, |p| p.channels),
        });
    }

    /// Drives the reconnect loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, player: Arc<Player>, queue: Arc<Queue>, cancel: CancellationToken) {
        let Some(mut outbound_rx) = self.outbound_rx.lock().take() else {
            log::error!("[Session] run() called more than once");
            return;
        };

        let mut delay = Duration::from_secs(RECONNECT_BACKOFF_INITIAL_SECS);

        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.connect_and_run(&player, &queue, &cancel, &mut outbound_rx).await {
                Ok(()) => return,
                Err(SessionError::TokenExpired) => {
                    log::warn!("[Session] ws_token expired, stopping reconnect attempts");
                    self.emitter.emit_session(SessionEvent::Disconnected {
                        reason: "ws_token expired".into(),
                    });
                    return;
                }
                Err(err) => {
                    log::warn!("[Session] connection attempt failed: {}", err);
                    self.emitter.emit_session(SessionEvent::Disconnected { reason: err.to_string() });
                }
            }

            if cancel.is_cancelled() {
                return;
            }

            let Some(tokens) = self.tokens.get() else { return };
            if tokens.ws_token.is_expired(now_secs()) {
                log::warn!("[Session] ws_token expired during reconnect wait");
                return;
            }

            self.emitter.emit_session(SessionEvent::Reconnecting {
                attempt: 0,
                delay_ms: delay.as_millis() as u64,
            });

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            delay = (delay * 2).min(Duration::from_secs(RECONNECT_BACKOFF_MAX_SECS));
        }
    }

    async fn connect_and_run(
        &self,
        player: &Arc<Player>,
        queue: &Arc<Queue>,
        cancel: &CancellationToken,
        outbound_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<(), SessionError> {
        let tokens = self.tokens.get().ok_or(SessionError::NoTokens)?;
        if tokens.ws_token.is_expired(now_secs()) {
            return Err(SessionError::TokenExpired);
        }

        let mut request = tokens.ws_token.endpoint.as_str().into_client_request()?;
        request.headers_mut().insert("Origin", HeaderValue::from_static(WS_ORIGIN));
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WS_SUBPROTOCOL),
        );

        log::info!("[Session] dialing {}", mask_endpoint(&tokens.ws_token.endpoint));
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let mut codec = Codec::new();

        sink.send(frame_message(&mut codec, OuterType::Authenticate, OuterFields {
            jwt: Some(tokens.ws_token.jwt.clone()),
            ..Default::default()
        })).await?;

        sink.send(frame_message(&mut codec, OuterType::Subscribe, OuterFields {
            channels: vec![tokens.session_id.clone()],
            ..Default::default()
        })).await?;

        let join = self.join_session_payload(&tokens.session_id, player.effective_quality_id());
        let join_batch = self.next_batch(MessageType::JoinSession, &join);
        sink.send(frame_message(&mut codec, OuterType::Payload, OuterFields {
            payload: Some(join_batch.encode()),
            ..Default::default()
        })).await?;

        self.emitter.emit_session(SessionEvent::Live { session_uuid: tokens.session_id.clone() });
        log::info!("[Session] live");

        while let Ok(payload) = outbound_rx.try_recv() {
            sink.send(frame_payload(&mut codec, payload)).await?;
        }

        let recv_timeout = Duration::from_secs(WS_RECV_POLL_SECS);
        let mut ping_interval = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await; // first tick fires immediately
        let mut last_pong = tokio::time::Instant::now();
        let pong_timeout = Duration::from_secs(WS_PONG_TIMEOUT_SECS);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(());
                }
                _ = ping_interval.tick() => {
                    if last_pong.elapsed() > pong_timeout {
                        return Err(SessionError::Closed);
                    }
                    sink.send(Message::Ping(Vec::new().into())).await?;
                }
                pending = outbound_rx.recv() => {
                    match pending {
                        Some(payload) => sink.send(frame_payload(&mut codec, payload)).await?,
                        None => return Err(SessionError::Closed),
                    }
                }
                incoming = tokio::time::timeout(recv_timeout, stream.next()) => {
                    match incoming {
                        Ok(Some(Ok(Message::Pong(_)))) => {
                            last_pong = tokio::time::Instant::now();
                        }
                        Ok(Some(Ok(message))) => {
                            if self.handle_message(message, player, queue).await {
                                return Err(SessionError::Closed);
                            }
                        }
                        Ok(Some(Err(err))) => return Err(SessionError::WebSocket(err)),
                        Ok(None) => return Err(SessionError::Closed),
                        Err(_elapsed) => {
                            let tokens = self.tokens.get().ok_or(SessionError::NoTokens)?;
                            if tokens.ws_token.is_expired(now_secs()) {
                                log::warn!("[Session] ws_token expiring, need a fresh handoff");
                                return Err(SessionError::TokenExpired);
                            }
                        }
                    }
                }
            }
        }
    }

    fn join_session_payload(&self, session_uuid: &str, effective_quality_id: i32) -> JoinSession {
        JoinSession {
            device_uuid: self.device.uuid.clone(),
            friendly_name: self.device.friendly_name.clone(),
            brand: self.device.brand.clone(),
            model: self.device.model.clone(),
            software_version: self.device.software_version.clone(),
            capabilities: JoinCapabilities {
                min_audio_quality: 1,
                max_audio_quality: quality_to_protocol(effective_quality_id).unwrap_or(4),
                volume_remote_control: 2,
            },
            session_uuid: session_uuid.to_string(),
            reason: 1,
            is_active: true,
        }
    }

    /// Returns `true` if the peer closed or requested disconnect.
    async fn handle_message(&self, message: Message, player: &Arc<Player>, queue: &Arc<Queue>) -> bool {
        let bytes = match message {
            Message::Binary(b) => b,
            Message::Close(_) => return true,
            _ => return false,
        };

        let frame = match Codec::decode(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("[Session] failed to decode inbound frame: {}", err);
                return false;
            }
        };

        match frame.outer_type {
            OuterType::Payload => {
                if let Some(payload) = &frame.fields.payload {
                    if let Some(batch) = QConnectBatch::decode(payload) {
                        for message in &batch.messages {
                            commands::dispatch(message, player, queue).await;
                        }
                    }
                }
                false
            }
            OuterType::Error => {
                log::warn!(
                    "[Session] server error frame: code={}, message={}",
                    frame.fields.code.unwrap_or(-1),
                    frame.fields.message.as_deref().unwrap_or("")
                );
                false
            }
            OuterType::Disconnect => true,
            _ => false,
        }
    }
}

fn frame_message(codec: &mut Codec, outer_type: OuterType, fields: OuterFields) -> Message {
    Message::Binary(codec.encode(outer_type, fields).into())
}

fn frame_payload(codec: &mut Codec, payload: Vec<u8>) -> Message {
    frame_message(codec, OuterType::Payload, OuterFields { payload: Some(payload), ..Default::default() })
}

fn quality_changed_payload(proto_quality: i32, quality_id: i32) -> AudioQualityChanged {
    let props = quality_audio_properties(quality_id);
    AudioQualityChanged {
        quality: proto_quality,
        sampling_rate: props.map_or(0, |p| p.sample_rate),
        bit_depth: props.map_or(0, |p| p.bit_depth),
        nb_channels: props.map_or(2, |p| p.channels),
    }
}

fn mask_endpoint(endpoint: &str) -> String {
    endpoint.chars().take(48).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PlaybackBackend;
    use crate::error::RenderResult;
    use crate::events::NoopEventEmitter;
    use crate::metadata::MetadataService;
    use crate::rest::{RestClient, TrackMetadata};
    use crate::tokens::{ConnectTokens, ExpiringToken, WsToken};
    use async_trait::async_trait;

    struct StubBackend;

    #[async_trait]
    impl PlaybackBackend for StubBackend {
        async fn play(&self, _url: &str, _metadata: &TrackMetadata) -> RenderResult<()> { Ok(()) }
        async fn pause(&self) -> RenderResult<()> { Ok(()) }
        async fn resume(&self) -> RenderResult<()> { Ok(()) }
        async fn stop(&self) -> RenderResult<()> { Ok(()) }
        async fn seek(&self, _position_ms: i64) -> RenderResult<()> { Ok(()) }
        async fn set_volume(&self, _volume_pct: i32) -> RenderResult<()> { Ok(()) }
        fn buffer_state(&self) -> String { "BUFFERED".into() }
    }

    fn sample_device() -> DeviceInfo {
        DeviceInfo {
            uuid: "11111111-2222-3333-4444-555555555555".into(),
            friendly_name: "Living Room".into(),
            brand: "Vendor".into(),
            model: "Render".into(),
            software_version: "1.0.0".into(),
        }
    }

    fn make_player() -> Arc<Player> {
        let queue = Arc::new(Queue::new());
        let metadata = Arc::new(MetadataService::new(RestClient::new("id".into(), "secret".into())));
        Arc::new(Player::new(Arc::new(StubBackend), queue, metadata, Arc::new(NoopEventEmitter)))
    }

    #[tokio::test]
    async fn connect_fails_fast_with_no_tokens() {
        let session = Session::new(Arc::new(TokenStore::new()), sample_device(), Arc::new(NoopEventEmitter));
        let queue = Arc::new(Queue::new());
        let player = make_player();
        let cancel = CancellationToken::new();
        let mut rx = session.outbound_rx.lock().take().unwrap();

        let err = session.connect_and_run(&player, &queue, &cancel, &mut rx).await.unwrap_err();
        assert!(matches!(err, SessionError::NoTokens));
    }

    #[tokio::test]
    async fn connect_fails_fast_with_expired_token() {
        let tokens = Arc::new(TokenStore::new());
        tokens.set(ConnectTokens {
            session_id: "sess-1".into(),
            ws_token: WsToken { jwt: "jwt".into(), exp: 1, endpoint: "wss://host/ws".into() },
            api_token: ExpiringToken { jwt: "api".into(), exp: 1 },
        });
        let session = Session::new(tokens, sample_device(), Arc::new(NoopEventEmitter));
        let queue = Arc::new(Queue::new());
        let player = make_player();
        let cancel = CancellationToken::new();
        let mut rx = session.outbound_rx.lock().take().unwrap();

        let err = session.connect_and_run(&player, &queue, &cancel, &mut rx).await.unwrap_err();
        assert!(matches!(err, SessionError::TokenExpired));
    }

    #[test]
    fn enqueue_buffers_in_order_before_live() {
        let session = Session::new(Arc::new(TokenStore::new()), sample_device(), Arc::new(NoopEventEmitter));
        session.send_volume_changed(10);
        session.send_volume_changed(20);

        let mut guard = session.outbound_rx.lock();
        let rx = guard.as_mut().unwrap();
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());

        let decode = |bytes: Vec<u8>| -> i32 {
            let batch = QConnectBatch::decode(&bytes).unwrap();
            let body: VolumeChangedBroadcast = batch.messages[0].decode_body().unwrap();
            body.volume
        };
        assert_eq!(decode(first), 10);
        assert_eq!(decode(second), 20);
    }
}

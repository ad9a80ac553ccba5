//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place every service is
//! constructed and wired to its dependencies (§5). Run order matters:
//!
//! 1. REST client, authenticated, feeding the metadata cache
//! 2. Shared state: queue, token store, event bridge
//! 3. The playback backend (DLNA or local), proxied for DLNA
//! 4. The player, discovery endpoint, and Connect WebSocket session
//! 5. Background tasks: HTTP servers, state reporter, event relay

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::PlaybackBackend;
use crate::codec::{quality_to_protocol, QUALITY_HIRES_192};
use crate::discovery::{DiscoveryAdvertiser, DiscoveryState};
use crate::dlna::capabilities::CapabilityCache;
use crate::dlna::DlnaBackend;
use crate::error::{RenderError, RenderResult};
use crate::events::{BroadcastEvent, BroadcastEventBridge, DlnaEvent, EventEmitter, LocalEvent, PlaybackEvent};
use crate::local::LocalBackend;
use crate::metadata::MetadataService;
use crate::network;
use crate::player::Player;
use crate::protocol_constants::{EVENT_CHANNEL_CAPACITY, PRELOAD_COUNT, PRELOAD_TICK_MS};
use crate::proxy::{ProxyState, UpstreamUrlProvider};
use crate::proxy_backend::ProxyingBackend;
use crate::queue::Queue;
use crate::rest::RestClient;
use crate::session::Session;
use crate::state::{BackendType, Config, QUALITY_AUTO};
use crate::state_reporter::run_state_reporter;
use crate::tokens::TokenStore;

/// Resolves expired proxy URLs by re-fetching through the metadata cache, at
/// a fixed ceiling (the configured `qobuz.max_quality`, not the session's
/// live negotiated quality, to avoid a dependency cycle through [`Player`]).
struct MetadataUrlProvider {
    metadata: Arc<MetadataService>,
    refresh_quality: i32,
}

#[async_trait]
impl UpstreamUrlProvider for MetadataUrlProvider {
    async fn refresh_url(&self, track_id: &str) -> RenderResult<String> {
        self.metadata.invalidate_streaming_url(track_id);
        self.metadata
            .get_streaming_url(track_id, self.refresh_quality)
            .await?
            .ok_or_else(|| RenderError::UpstreamUnavailable(format!("no stream URL available for {track_id}")))
    }
}

/// Background tasks spawned by [`bootstrap_services`], aborted on shutdown.
struct BackgroundTasks {
    discovery_http: JoinHandle<()>,
    proxy_http: JoinHandle<()>,
    session_run: JoinHandle<()>,
    state_reporter: JoinHandle<()>,
    event_relay: JoinHandle<()>,
    preload: JoinHandle<()>,
}

impl BackgroundTasks {
    fn abort_all(&self) {
        self.discovery_http.abort();
        self.proxy_http.abort();
        self.session_run.abort();
        self.state_reporter.abort();
        self.event_relay.abort();
        self.preload.abort();
    }
}

/// Container for all bootstrapped services, the composition root's output.
pub struct BootstrappedServices {
    pub player: Arc<Player>,
    pub queue: Arc<Queue>,
    pub tokens: Arc<TokenStore>,
    pub discovery_state: DiscoveryState,
    backend: Arc<dyn PlaybackBackend>,
    /// Kept alive only to unregister the mDNS record on drop.
    _advertiser: DiscoveryAdvertiser,
    cancel: CancellationToken,
    tasks: BackgroundTasks,
}

impl BootstrappedServices {
    /// Stops, in order, the state reporter, player, WebSocket session,
    /// discovery endpoint, audio proxy, and backend (§5). Each step is
    /// best-effort: a failure is logged but does not block the next one.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] shutting down");
        self.cancel.cancel();

        self.tasks.state_reporter.abort();
        self.player.stop_playback().await;
        self.tasks.session_run.abort();
        self.tasks.discovery_http.abort();
        self.tasks.proxy_http.abort();
        self.tasks.event_relay.abort();
        self.tasks.preload.abort();
        self.backend.shutdown();

        log::info!("[Bootstrap] shutdown complete");
    }
}

fn resolve_advertise_ip(config: &Config) -> RenderResult<IpAddr> {
    if let Some(ip) = config.server.advertise_ip {
        return Ok(ip);
    }
    network::get_local_ip().ok_or_else(|| {
        RenderError::Configuration(
            "could not auto-detect a LAN IP address; set server.advertise_ip explicitly".into(),
        )
    })
}

async fn build_backend(
    config: &Config,
    proxy: &ProxyState,
    emitter: Arc<dyn EventEmitter>,
) -> RenderResult<Arc<dyn PlaybackBackend>> {
    match config.backend.kind {
        BackendType::Dlna => {
            let dlna: Arc<dyn PlaybackBackend> = DlnaBackend::connect(
                &config.backend.dlna.ip,
                config.backend.dlna.port,
                config.backend.dlna.fixed_volume,
                emitter,
                Arc::new(CapabilityCache::new()),
            )
            .await?;
            Ok(Arc::new(ProxyingBackend::new(dlna, proxy.clone())))
        }
        BackendType::Local => {
            let local: Arc<dyn PlaybackBackend> = LocalBackend::connect(
                &config.backend.local.device,
                config.backend.local.buffer_size,
                emitter,
            )?;
            Ok(local)
        }
    }
}

async fn serve(addr: SocketAddr, router: axum::Router) -> RenderResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RenderError::Internal(format!("failed to bind {addr}: {e}")))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| RenderError::Internal(format!("server on {addr} stopped: {e}")))
}

/// Relays domain events that need to leave the process: player quality/volume
/// changes become outbound Connect messages, and backend-initiated stops
/// drive the player's own track-end transition.
async fn run_event_relay(
    player: Arc<Player>,
    session: Arc<Session>,
    mut events: broadcast::Receiver<BroadcastEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                match event {
                    BroadcastEvent::Playback(PlaybackEvent::VolumeChanged { volume_pct }) => {
                        session.send_volume_changed(volume_pct);
                    }
                    BroadcastEvent::Playback(PlaybackEvent::FileQualityChanged { quality_id }) => {
                        if let Some(proto) = quality_to_protocol(quality_id) {
                            session.send_file_quality_changed(quality_id, proto);
                        }
                    }
                    BroadcastEvent::Playback(PlaybackEvent::DeviceQualityChanged { quality_id }) => {
                        if let Some(proto) = quality_to_protocol(quality_id) {
                            session.send_device_quality_changed(quality_id, proto);
                        }
                    }
                    BroadcastEvent::Playback(PlaybackEvent::MaxQualityChanged { quality_id }) => {
                        if let Some(proto) = quality_to_protocol(quality_id) {
                            session.send_max_quality_changed(quality_id, proto);
                        }
                    }
                    BroadcastEvent::Dlna(DlnaEvent::DeviceStopped { .. }) => {
                        player.on_track_end().await;
                    }
                    BroadcastEvent::Dlna(DlnaEvent::PositionUpdate { position_ms, .. }) => {
                        player.reconcile_position(position_ms);
                    }
                    BroadcastEvent::Local(LocalEvent::TrackEnded) => {
                        player.on_track_end().await;
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Keeps the next [`PRELOAD_COUNT`] queue positions warm in the metadata
/// cache: fetches metadata and resolves a streaming URL ahead of playback
/// reaching them, so `load_track` itself is normally a cache hit (§4.5).
async fn run_preload_loop(
    queue: Arc<Queue>,
    metadata: Arc<MetadataService>,
    player: Arc<Player>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(PRELOAD_TICK_MS));
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        for track in queue.preload_window(PRELOAD_COUNT) {
            let quality = player.effective_quality_id();
            match metadata.get_metadata(&track.track_id, true, quality).await {
                Ok(cached) => {
                    let mut cache = track.cache.write();
                    cache.metadata = Some(cached.metadata);
                    cache.streaming_url = cached.streaming_url;
                    cache.preloaded = true;
                }
                Err(e) => {
                    log::debug!("[Bootstrap] preload failed for track {}: {}", track.track_id, e);
                }
            }
        }
    }
}

/// Bootstraps all services for one renderer instance. `config` must already
/// have passed [`Config::validate`].
pub async fn bootstrap_services(config: &Config) -> RenderResult<BootstrappedServices> {
    let rest = RestClient::new(config.qobuz.app_id.clone(), config.qobuz.app_secret.clone());
    rest.login(&config.qobuz.email, &config.qobuz.password).await?;
    let metadata = Arc::new(MetadataService::new(rest));

    let queue = Arc::new(Queue::new());
    let tokens = Arc::new(TokenStore::new());
    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));
    let emitter: Arc<dyn EventEmitter> = event_bridge.clone();

    let advertise_ip = resolve_advertise_ip(config)?;
    let proxy_base_url = format!("http://{advertise_ip}:{}", config.server.proxy_port);
    // Configured ceiling, resolved once: used both as the proxy's refresh
    // quality (see `MetadataUrlProvider`) and as the starting point for the
    // player's effective quality below, before any device capability cap.
    let refresh_quality = if config.qobuz.max_quality == QUALITY_AUTO {
        QUALITY_HIRES_192
    } else {
        config.qobuz.max_quality
    };
    let proxy_state = ProxyState::new(
        Arc::new(MetadataUrlProvider { metadata: metadata.clone(), refresh_quality }),
        proxy_base_url,
    );

    let backend = build_backend(config, &proxy_state, emitter.clone()).await?;
    let player = Arc::new(Player::new(backend.clone(), queue.clone(), metadata.clone(), emitter.clone()));

    // Cap the configured ceiling by whatever the sink itself can render (e.g.
    // an MP3-only DLNA renderer), so both the JoinSession handshake and later
    // state reports announce a quality the device can actually play.
    let initial_quality = backend
        .recommended_quality_id()
        .map_or(refresh_quality, |device_cap| device_cap.min(refresh_quality));
    player.set_max_quality(initial_quality);

    let device_info = config.device_info();
    let discovery_state = DiscoveryState::new(
        device_info.clone(),
        config.qobuz.app_id.clone(),
        tokens.clone(),
        player.clone(),
    );
    let advertiser = DiscoveryAdvertiser::new(&device_info, advertise_ip, config.server.http_port)
        .map_err(|e| RenderError::Internal(format!("mDNS advertisement failed: {e}")))?;

    let session = Arc::new(Session::new(tokens.clone(), device_info, emitter.clone()));
    let cancel = CancellationToken::new();

    let discovery_addr = SocketAddr::new(config.server.bind_address.parse().map_err(|_| {
        RenderError::Configuration(format!("invalid server.bind_address: {}", config.server.bind_address))
    })?, config.server.http_port);
    let proxy_addr = SocketAddr::new(discovery_addr.ip(), config.server.proxy_port);

    let discovery_http = tokio::spawn({
        let router = discovery_state.clone().router();
        async move {
            if let Err(e) = serve(discovery_addr, router).await {
                log::error!("[Bootstrap] discovery endpoint stopped: {}", e);
            }
        }
    });

    let proxy_http = tokio::spawn({
        let router = proxy_state.router();
        async move {
            if let Err(e) = serve(proxy_addr, router).await {
                log::error!("[Bootstrap] audio proxy stopped: {}", e);
            }
        }
    });

    let session_run = tokio::spawn({
        let session = session.clone();
        let player = player.clone();
        let queue = queue.clone();
        let cancel = cancel.clone();
        let discovery_state = discovery_state.clone();
        async move {
            discovery_state.wait_for_connect().await;
            session.run(player, queue, cancel).await;
        }
    });

    let state_reporter = tokio::spawn({
        let session = session.clone();
        let player = player.clone();
        let queue = queue.clone();
        let events = event_bridge.subscribe();
        let cancel = cancel.clone();
        async move {
            run_state_reporter(player, queue, events, cancel, move |report| {
                session.send_state_update(report);
            })
            .await;
        }
    });

    let event_relay = tokio::spawn(run_event_relay(
        player.clone(),
        session.clone(),
        event_bridge.subscribe(),
        cancel.clone(),
    ));

    let preload = tokio::spawn(run_preload_loop(
        queue.clone(),
        metadata.clone(),
        player.clone(),
        cancel.clone(),
    ));

    Ok(BootstrappedServices {
        player,
        queue,
        tokens,
        discovery_state,
        backend,
        _advertiser: advertiser,
        cancel,
        tasks: BackgroundTasks {
            discovery_http,
            proxy_http,
            session_run,
            state_reporter,
            event_relay,
            preload,
        },
    })
}

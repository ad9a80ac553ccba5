//! [`PlaybackBackend`] implementation for a DLNA/UPnP renderer: device
//! connection, capability discovery, and the transport state poll loop
//! (§4.10).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::capabilities::{apply_device_overrides, build_protocol_info, parse_protocol_info_sink, CapabilityCache, DlnaCapabilities};
use super::client::{fetch_device_description, DeviceDescription, DlnaClient};
use super::didl::{build_didl_lite, content_type_from_url};
use crate::backend::PlaybackBackend;
use crate::error::{RenderError, RenderResult};
use crate::events::{DlnaEvent, EventEmitter};
use crate::protocol_constants::{DLNA_POLL_INTERVAL_MS, DLNA_STOPPED_GRACE_SECS};
use crate::rest::TrackMetadata;

/// Default DLNA/UPnP control port (Sonos and most renderers).
pub const DEFAULT_DLNA_PORT: u16 = 1400;

struct PollState {
    transport_state: String,
    played_at: Option<Instant>,
}

/// A connected DLNA renderer, playable through [`PlaybackBackend`].
pub struct DlnaBackend {
    client: Arc<DlnaClient>,
    capabilities: Mutex<Option<DlnaCapabilities>>,
    poll_state: Mutex<PollState>,
    emitter: Arc<dyn EventEmitter>,
    fixed_volume: bool,
    device_uuid: String,
    cancel: CancellationToken,
}

impl DlnaBackend {
    /// Connects to the renderer at `ip:port`: fetches its device
    /// description, discovers (or reuses cached) capabilities, and starts
    /// the transport state poll loop.
    pub async fn connect(
        ip: &str,
        port: u16,
        fixed_volume: bool,
        emitter: Arc<dyn EventEmitter>,
        capability_cache: Arc<CapabilityCache>,
    ) -> RenderResult<Arc<Self>> {
        let http = Client::new();
        let description = fetch_device_description(&http, ip, port)
            .await
            .map_err(RenderError::from)?;

        if description.av_transport_url.is_empty() {
            return Err(RenderError::Dlna(format!(
                "{ip}:{port} does not expose AVTransport"
            )));
        }

        let device_uuid = if description.udn.is_empty() {
            format!("{ip}:{port}")
        } else {
            description.udn.clone()
        };

        let client = Arc::new(DlnaClient::new(http, description));
        let capabilities = discover_capabilities(&client, &device_uuid, &capability_cache).await;

        let backend = Arc::new(Self {
            client,
            capabilities: Mutex::new(capabilities),
            poll_state: Mutex::new(PollState {
                transport_state: "STOPPED".to_string(),
                played_at: None,
            }),
            emitter,
            fixed_volume,
            device_uuid,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(poll_loop(Arc::clone(&backend)));

        Ok(backend)
    }

    /// Friendly name reported by the device description.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.client.description.friendly_name
    }

    /// Manufacturer/model reported by the device description, as a single string.
    #[must_use]
    pub fn manufacturer_model(&self) -> (&str, &str) {
        (&self.client.description.manufacturer, &self.client.description.model_name)
    }
}

async fn discover_capabilities(
    client: &Arc<DlnaClient>,
    device_uuid: &str,
    cache: &CapabilityCache,
) -> Option<DlnaCapabilities> {
    if let Some(cached) = cache.get(device_uuid) {
        return Some(cached);
    }

    match client.get_protocol_info().await {
        Ok(Some(sink)) => {
            let mut caps = parse_protocol_info_sink(&sink);
            apply_device_overrides(
                &mut caps,
                &client.description.manufacturer,
                &client.description.model_name,
            );
            cache.set(device_uuid, caps.clone());
            Some(caps)
        }
        Ok(None) => {
            log::debug!("[Dlna] connection manager unavailable on {}", device_uuid);
            None
        }
        Err(e) => {
            log::warn!("[Dlna] capability discovery failed on {}: {}", device_uuid, e);
            None
        }
    }
}

#[async_trait]
impl PlaybackBackend for DlnaBackend {
    async fn play(&self, url: &str, metadata: &TrackMetadata) -> RenderResult<()> {
        let content_type = content_type_from_url(url);
        let protocol_info = {
            let caps = self.capabilities.lock();
            match caps.as_ref() {
                Some(caps) => build_protocol_info(caps, content_type),
                None => format!("http-get:*:{content_type}:*"),
            }
        };
        let didl = build_didl_lite(url, metadata, &protocol_info);

        self.client.set_av_transport_uri(url, &didl).await?;
        self.client.play().await?;

        let mut state = self.poll_state.lock();
        state.played_at = Some(Instant::now());
        state.transport_state = "PLAYING".to_string();
        Ok(())
    }

    async fn pause(&self) -> RenderResult<()> {
        self.client.pause().await?;
        Ok(())
    }

    async fn resume(&self) -> RenderResult<()> {
        self.client.play().await?;
        Ok(())
    }

    async fn stop(&self) -> RenderResult<()> {
        self.client.stop().await?;
        let mut state = self.poll_state.lock();
        state.played_at = None;
        state.transport_state = "STOPPED".to_string();
        Ok(())
    }

    async fn seek(&self, position_ms: i64) -> RenderResult<()> {
        self.client.seek(position_ms).await?;
        Ok(())
    }

    async fn set_volume(&self, volume_pct: i32) -> RenderResult<()> {
        if self.fixed_volume {
            return Ok(());
        }
        Arc::clone(&self.client).set_volume(volume_pct).await?;
        Ok(())
    }

    fn buffer_state(&self) -> String {
        "BUFFERED".to_string()
    }

    fn fixed_volume(&self) -> bool {
        self.fixed_volume
    }

    /// The conservative renderer-internal quality id implied by discovered
    /// capabilities, or `None` when capabilities could not be discovered.
    fn recommended_quality_id(&self) -> Option<i32> {
        self.capabilities.lock().as_ref().map(DlnaCapabilities::max_quality_id)
    }

    /// Stops the background `GetTransportInfo` poll loop.
    fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Polls `GetTransportInfo` every [`DLNA_POLL_INTERVAL_MS`] and relays
/// device-initiated transitions through the event emitter. Runs until
/// `backend.cancel` fires.
async fn poll_loop(backend: Arc<DlnaBackend>) {
    let mut interval = tokio::time::interval(Duration::from_millis(DLNA_POLL_INTERVAL_MS));
    loop {
        tokio::select! {
            () = backend.cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let new_state = match backend.client.get_transport_info().await {
            Ok(s) => s,
            Err(e) => {
                log::debug!("[Dlna] poll failed on {}: {}", backend.device_uuid, e);
                continue;
            }
        };

        let (prev_state, in_grace_period) = {
            let state = backend.poll_state.lock();
            let in_grace = state
                .played_at
                .map(|t| t.elapsed() < Duration::from_secs(DLNA_STOPPED_GRACE_SECS))
                .unwrap_or(false);
            (state.transport_state.clone(), in_grace)
        };

        if new_state == "PLAYING" {
            match backend.client.get_position_info().await {
                Ok(position_ms) => backend.emitter.emit_dlna(DlnaEvent::PositionUpdate {
                    device_uuid: backend.device_uuid.clone(),
                    position_ms,
                }),
                Err(e) => {
                    log::debug!("[Dlna] position poll failed on {}: {}", backend.device_uuid, e);
                }
            }
        }

        if new_state == prev_state {
            continue;
        }

        if prev_state == "PLAYING" && new_state == "STOPPED" && in_grace_period {
            log::debug!("[Dlna] ignoring STOPPED during grace period on {}", backend.device_uuid);
            continue;
        }

        if prev_state == "PLAYING" && new_state == "STOPPED" {
            backend.emitter.emit_dlna(DlnaEvent::DeviceStopped {
                device_uuid: backend.device_uuid.clone(),
            });
        }

        backend.poll_state.lock().transport_state = new_state;
    }
}

//! Discovery HTTP endpoint and LAN mDNS advertisement (§4.9/§6.3).
//!
//! The controller finds the renderer via mDNS, then probes the HTTP surface
//! to hand off the Connect token bundle. The endpoint is unauthenticated —
//! it is LAN-only and hands out public device metadata.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mdns_sd::ServiceInfo;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

use crate::codec::{QUALITY_HIRES_192, QUALITY_HIRES_96, QUALITY_CD, QUALITY_MP3};
use crate::error::ErrorCode;
use crate::player::Player;
use crate::protocol_constants::{APP_NAME, DISCOVERY_HTTP_PATH, DISCOVERY_SDK_VERSION, MDNS_SERVICE_TYPE};
use crate::session::DeviceInfo;
use crate::tokens::{ConnectTokens, ExpiringToken, TokenStore, WsToken};

/// Errors from the discovery HTTP surface.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidBody(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for DiscoveryError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

struct Inner {
    device: DeviceInfo,
    app_id: String,
    tokens: Arc<TokenStore>,
    player: Arc<Player>,
    connect_notify: Notify,
}

/// Shared state behind the discovery router.
#[derive(Clone)]
pub struct DiscoveryState {
    inner: Arc<Inner>,
}

impl DiscoveryState {
    #[must_use]
    pub fn new(device: DeviceInfo, app_id: String, tokens: Arc<TokenStore>, player: Arc<Player>) -> Self {
        Self {
            inner: Arc::new(Inner { device, app_id, tokens, player, connect_notify: Notify::new() }),
        }
    }

    /// Resolves once a controller has completed a connect handshake.
    ///
    /// A handshake that completes before this is first called is not lost:
    /// `Notify::notify_one` stores a single permit for the next waiter.
    pub async fn wait_for_connect(&self) {
        self.inner.connect_notify.notified().await;
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(health))
            .route(&format!("{DISCOVERY_HTTP_PATH}/get-display-info"), get(get_display_info))
            .route(&format!("{DISCOVERY_HTTP_PATH}/get-connect-info"), get(get_connect_info))
            .route(&format!("{DISCOVERY_HTTP_PATH}/connect-to-qconnect"), post(connect_to_qconnect))
            .with_state(self)
    }
}

async fn health(State(state): State<DiscoveryState>) -> String {
    format!("{} - {}", APP_NAME, state.inner.device.friendly_name)
}

#[derive(Serialize)]
struct DisplayInfo {
    #[serde(rename = "type")]
    device_type: &'static str,
    friendly_name: String,
    model_display_name: &'static str,
    brand_display_name: &'static str,
    serial_number: String,
    max_audio_quality: &'static str,
}

/// Maps an effective quality id to its display string; unset (`0`) and any
/// unrecognized id fall back to the highest tier, matching the upstream
/// handoff's behavior when no quality has been negotiated yet.
fn quality_label(quality_id: i32) -> &'static str {
    match quality_id {
        QUALITY_MP3 => "MP3",
        QUALITY_CD => "LOSSLESS",
        QUALITY_HIRES_96 => "HIRES_L1",
        QUALITY_HIRES_192 => "HIRES_L3",
        _ => "HIRES_L3",
    }
}

async fn get_display_info(State(state): State<DiscoveryState>) -> Json<DisplayInfo> {
    Json(DisplayInfo {
        device_type: "SPEAKER",
        friendly_name: state.inner.device.friendly_name.clone(),
        model_display_name: APP_NAME,
        brand_display_name: APP_NAME,
        serial_number: state.inner.device.uuid.clone(),
        max_audio_quality: quality_label(state.inner.player.effective_quality_id()),
    })
}

#[derive(Serialize)]
struct ConnectInfo {
    current_session_id: String,
    app_id: String,
}

async fn get_connect_info(State(state): State<DiscoveryState>) -> impl IntoResponse {
    let current_session_id = state.inner.tokens.get().map(|t| t.session_id).unwrap_or_default();
    Json(ConnectInfo { current_session_id, app_id: state.inner.app_id.clone() })
}

#[derive(Debug, Default, Deserialize)]
struct JwtConnectPayload {
    #[serde(default)]
    jwt: String,
    #[serde(default)]
    exp: i64,
    #[serde(default)]
    endpoint: String,
}

#[derive(Debug, Default, Deserialize)]
struct JwtApiPayload {
    #[serde(default)]
    jwt: String,
    #[serde(default)]
    exp: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ConnectRequest {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    jwt_qconnect: JwtConnectPayload,
    #[serde(default)]
    jwt_api: JwtApiPayload,
}

impl From<ConnectRequest> for ConnectTokens {
    fn from(req: ConnectRequest) -> Self {
        Self {
            session_id: req.session_id,
            ws_token: WsToken { jwt: req.jwt_qconnect.jwt, exp: req.jwt_qconnect.exp, endpoint: req.jwt_qconnect.endpoint },
            api_token: ExpiringToken { jwt: req.jwt_api.jwt, exp: req.jwt_api.exp },
        }
    }
}

async fn connect_to_qconnect(
    State(state): State<DiscoveryState>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, DiscoveryError> {
    let request: ConnectRequest = serde_json::from_slice(&body)
        .map_err(|err| DiscoveryError::InvalidBody(err.to_string()))?;

    let tokens: ConnectTokens = request.into();
    if !tokens.is_valid() {
        return Err(DiscoveryError::InvalidBody("missing or empty token fields".into()));
    }

    log::info!("[Discovery] connect handshake received, session_id={}", tokens.session_id);
    state.inner.tokens.set(tokens);
    state.inner.connect_notify.notify_one();

    Ok(Json(serde_json::json!({})))
}

// ─────────────────────────────────────────────────────────────────────────────
// mDNS advertisement
// ─────────────────────────────────────────────────────────────────────────────

/// Advertises the renderer via mDNS/DNS-SD. Unregisters on drop.
pub struct DiscoveryAdvertiser {
    daemon: mdns_sd::ServiceDaemon,
    service_fullname: String,
}

impl DiscoveryAdvertiser {
    /// Registers the `_qobuz-connect._tcp.local.` service advertising `device`
    /// at `(advertise_ip, port)`.
    pub fn new(device: &DeviceInfo, advertise_ip: IpAddr, port: u16) -> Result<Self, mdns_sd::Error> {
        let daemon = mdns_sd::ServiceDaemon::new()?;

        let sanitized = sanitize_service_name(&device.friendly_name);
        let instance_name = sanitized;

        let mut txt = HashMap::new();
        txt.insert("path".to_string(), DISCOVERY_HTTP_PATH.to_string());
        txt.insert("type".to_string(), "SPEAKER".to_string());
        txt.insert("sdk_version".to_string(), DISCOVERY_SDK_VERSION.to_string());
        txt.insert("Name".to_string(), device.friendly_name.clone());
        txt.insert("device_uuid".to_string(), device.uuid.clone());

        let hostname = format!("{}.local.", sanitize_service_name(&device.uuid));
        let service = ServiceInfo::new(MDNS_SERVICE_TYPE, &instance_name, &hostname, advertise_ip, port, Some(txt))?;

        let fullname = service.get_fullname().to_string();
        daemon.register(service)?;

        log::info!("[Discovery] mDNS advertising {} at {}:{}", instance_name, advertise_ip, port);
        Ok(Self { daemon, service_fullname: fullname })
    }
}

impl Drop for DiscoveryAdvertiser {
    fn drop(&mut self) {
        if let Err(err) = self.daemon.unregister(&self.service_fullname) {
            log::warn!("[Discovery] failed to unregister mDNS service: {}", err);
        }
    }
}

/// Replaces non-`[A-Za-z0-9_-]` with `-`, then collapses runs of `-` and
/// strips leading/trailing ones.
fn sanitize_service_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    let mut last_was_dash = false;
    for c in replaced.chars() {
        if c == '-' {
            if !last_was_dash {
                collapsed.push(c);
            }
            last_was_dash = true;
        } else {
            collapsed.push(c);
            last_was_dash = false;
        }
    }

    collapsed.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderResult;
    use crate::events::NoopEventEmitter;
    use crate::metadata::MetadataService;
    use crate::queue::Queue;
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

    fn make_state() -> DiscoveryState {
        let queue = Arc::new(Queue::new());
        let metadata = Arc::new(MetadataService::new(RestClient::new("id".into(), "secret".into())));
        let player = Arc::new(Player::new(Arc::new(StubBackend), queue, metadata, Arc::new(NoopEventEmitter)));
        let device = DeviceInfo {
            uuid: "11111111-2222-3333-4444-555555555555".into(),
            friendly_name: "Living Room".into(),
            brand: "Vendor".into(),
            model: "Renderer".into(),
            software_version: "1.0.0".into(),
        };
        DiscoveryState::new(device, "app-id".into(), Arc::new(TokenStore::new()), player)
    }

    #[test]
    fn sanitizes_spaces_and_collapses_dashes() {
        assert_eq!(sanitize_service_name("Living Room!!  Speaker"), "Living-Room-Speaker");
        assert_eq!(sanitize_service_name("--edge--"), "edge");
    }

    #[test]
    fn quality_label_defaults_to_hires_l3() {
        assert_eq!(quality_label(0), "HIRES_L3");
        assert_eq!(quality_label(5), "MP3");
        assert_eq!(quality_label(6), "LOSSLESS");
        assert_eq!(quality_label(7), "HIRES_L1");
        assert_eq!(quality_label(27), "HIRES_L3");
    }

    #[tokio::test]
    async fn health_reports_friendly_name() {
        let state = make_state();
        let body = health(State(state)).await;
        assert!(body.contains("Living Room"));
    }

    #[tokio::test]
    async fn connect_with_missing_fields_returns_400() {
        let state = make_state();
        let result = connect_to_qconnect(State(state), axum::body::Bytes::from_static(b"{}")).await;
        assert!(matches!(result, Err(DiscoveryError::InvalidBody(_))));
    }

    #[tokio::test]
    async fn connect_with_malformed_json_returns_400() {
        let state = make_state();
        let result = connect_to_qconnect(State(state), axum::body::Bytes::from_static(b"not json")).await;
        assert!(matches!(result, Err(DiscoveryError::InvalidBody(_))));
    }

    #[tokio::test]
    async fn connect_with_valid_payload_stores_tokens_and_notifies() {
        let state = make_state();
        let tokens = state.inner.tokens.clone();

        let body = serde_json::json!({
            "session_id": "sess-1",
            "jwt_qconnect": {"jwt": "J", "exp": 9_999_999_999_i64, "endpoint": "wss://host/ws"},
            "jwt_api": {"jwt": "A", "exp": 9_999_999_999_i64},
        });

        let result = connect_to_qconnect(State(state.clone()), axum::body::Bytes::from(body.to_string())).await;
        assert!(result.is_ok());
        assert_eq!(tokens.get().unwrap().session_id, "sess-1");

        // A connect that already happened is not lost: notify_one stores a permit.
        tokio::time::timeout(std::time::Duration::from_millis(50), state.wait_for_connect())
            .await
            .expect("connect_notify permit should be available");
    }

    #[tokio::test]
    async fn display_info_reports_serial_and_quality() {
        let state = make_state();
        let Json(info) = get_display_info(State(state)).await;
        assert_eq!(info.serial_number, "11111111-2222-3333-4444-555555555555");
        assert_eq!(info.max_audio_quality, "HIRES_L3");
    }
}

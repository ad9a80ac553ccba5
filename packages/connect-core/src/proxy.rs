//! Local audio proxy: stable `GET /audio/{track_id}` URLs that insulate a
//! DLNA renderer from the vendor CDN's short-lived, expiring stream URLs
//! (§4.11).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{body::Body, Router};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::Client;

use crate::error::{RenderError, RenderResult};
use crate::protocol_constants::{PROXY_CHUNK_SIZE, PROXY_URL_REFRESH_MARGIN_SECS};

/// Connect timeout for the per-request upstream client. No overall timeout is
/// set — streaming responses can legitimately run for the length of a track.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches a fresh upstream streaming URL for a track whose registered URL
/// has gone (or is about to go) stale.
#[async_trait]
pub trait UpstreamUrlProvider: Send + Sync {
    async fn refresh_url(&self, track_id: &str) -> RenderResult<String>;
}

#[derive(Clone)]
struct RegisteredTrack {
    upstream_url: String,
    content_type: String,
    fetched_at: Instant,
}

impl RegisteredTrack {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() >= Duration::from_secs(PROXY_URL_REFRESH_MARGIN_SECS)
    }
}

struct Inner {
    tracks: DashMap<String, RegisteredTrack>,
    provider: Arc<dyn UpstreamUrlProvider>,
    base_url: String,
}

/// Shared state behind the proxy router. `base_url` is the address a
/// renderer on the LAN can reach this server at, e.g. `http://192.168.1.50:7120`.
#[derive(Clone)]
pub struct ProxyState {
    inner: Arc<Inner>,
}

impl ProxyState {
    #[must_use]
    pub fn new(provider: Arc<dyn UpstreamUrlProvider>, base_url: String) -> Self {
        Self {
            inner: Arc::new(Inner { tracks: DashMap::new(), provider, base_url }),
        }
    }

    /// Registers `track_id` for proxying and returns the stable local URL to
    /// hand to the renderer.
    pub fn register_track(&self, track_id: &str, upstream_url: String, content_type: String) -> String {
        let ext = if content_type.contains("flac") { "flac" } else { "mp3" };
        let proxy_url = format!("{}/audio/{track_id}.{ext}", self.inner.base_url);

        self.inner.tracks.insert(
            track_id.to_string(),
            RegisteredTrack { upstream_url, content_type, fetched_at: Instant::now() },
        );

        log::debug!("[Proxy] registered track {} at {}", track_id, proxy_url);
        proxy_url
    }

    pub fn unregister_track(&self, track_id: &str) {
        self.inner.tracks.remove(track_id);
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/audio/{track_id}", get(stream_audio))
            .with_state(self)
    }
}

/// Strips a trailing `.flac`/`.mp3` extension some renderers require to
/// infer content type from the URL path.
fn strip_known_extension(raw: &str) -> &str {
    raw.strip_suffix(".flac").or_else(|| raw.strip_suffix(".mp3")).unwrap_or(raw)
}

async fn stream_audio(
    Path(raw_track_id): Path<String>,
    State(state): State<ProxyState>,
    headers: HeaderMap,
) -> Result<Response, RenderError> {
    let track_id = strip_known_extension(&raw_track_id).to_string();

    let track = state
        .inner
        .tracks
        .get(&track_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| RenderError::TrackNotFound(track_id.clone()))?;

    let (upstream_url, content_type) = if track.is_expired() {
        log::info!("[Proxy] refreshing expired URL for {}", track_id);
        let fresh_url = state.inner.provider.refresh_url(&track_id).await.map_err(|err| {
            log::warn!("[Proxy] URL refresh failed for {}: {}", track_id, err);
            RenderError::UpstreamUnavailable(err.to_string())
        })?;
        state.inner.tracks.insert(
            track_id.clone(),
            RegisteredTrack { upstream_url: fresh_url.clone(), content_type: track.content_type.clone(), fetched_at: Instant::now() },
        );
        (fresh_url, track.content_type)
    } else {
        (track.upstream_url, track.content_type)
    };

    let range = headers.get(header::RANGE).cloned();

    let client = Client::builder()
        .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
        .build()
        .map_err(|err| RenderError::Internal(err.to_string()))?;
    let mut request = client.get(&upstream_url);
    if let Some(range) = &range {
        request = request.header(header::RANGE, range);
    }

    let upstream = request.send().await.map_err(|err| {
        log::warn!("[Proxy] upstream connect failed for {}: {}", track_id, err);
        RenderError::UpstreamUnavailable(err.to_string())
    })?;

    let status = match upstream.status().as_u16() {
        200 => StatusCode::OK,
        206 => StatusCode::PARTIAL_CONTENT,
        other => {
            log::warn!("[Proxy] upstream returned status {} for {}", other, track_id);
            return Err(RenderError::UpstreamUnavailable(format!("upstream returned {other}")));
        }
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes");

    if let Some(len) = upstream.headers().get(header::CONTENT_LENGTH) {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    if let Some(range) = upstream.headers().get(header::CONTENT_RANGE) {
        builder = builder.header(header::CONTENT_RANGE, range);
    }

    let body_stream = rechunk(upstream.bytes_stream(), PROXY_CHUNK_SIZE, track_id);

    builder
        .body(Body::from_stream(body_stream))
        .map_err(|err| RenderError::Internal(err.to_string()))
}

/// Rebuffers an upstream byte stream into fixed-size chunks. Upstream
/// transport errors end the stream rather than propagating — the client
/// simply sees a short response, matching a mid-stream disconnect.
fn rechunk(
    upstream: impl futures::Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    chunk_size: usize,
    track_id: String,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    stream! {
        tokio::pin!(upstream);
        let mut buf = BytesMut::new();
        let mut sent = 0usize;
        while let Some(next) = upstream.next().await {
            match next {
                Ok(chunk) => {
                    buf.extend_from_slice(&chunk);
                    while buf.len() >= chunk_size {
                        let out = buf.split_to(chunk_size);
                        sent += out.len();
                        yield Ok(out.freeze());
                    }
                }
                Err(err) => {
                    log::debug!("[Proxy] upstream stream for {} ended after {} bytes: {}", track_id, sent, err);
                    break;
                }
            }
        }
        if !buf.is_empty() {
            sent += buf.len();
            yield Ok(buf.freeze());
        }
        log::debug!("[Proxy] stream for {} finished, {} bytes sent", track_id, sent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider(String);

    #[async_trait]
    impl UpstreamUrlProvider for StaticProvider {
        async fn refresh_url(&self, _track_id: &str) -> RenderResult<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl UpstreamUrlProvider for FailingProvider {
        async fn refresh_url(&self, _track_id: &str) -> RenderResult<String> {
            Err(RenderError::Internal("cdn unreachable".into()))
        }
    }

    #[test]
    fn strips_known_extensions() {
        assert_eq!(strip_known_extension("12345.flac"), "12345");
        assert_eq!(strip_known_extension("12345.mp3"), "12345");
        assert_eq!(strip_known_extension("12345"), "12345");
    }

    #[test]
    fn register_track_builds_stable_url_with_extension() {
        let state = ProxyState::new(Arc::new(StaticProvider(String::new())), "http://192.168.1.50:7120".into());
        let url = state.register_track("abc", "http://cdn/x".into(), "audio/flac".into());
        assert_eq!(url, "http://192.168.1.50:7120/audio/abc.flac");

        let url_mp3 = state.register_track("def", "http://cdn/y".into(), "audio/mpeg".into());
        assert_eq!(url_mp3, "http://192.168.1.50:7120/audio/def.mp3");
    }

    #[test]
    fn unregister_removes_track() {
        let state = ProxyState::new(Arc::new(StaticProvider(String::new())), "http://x:1".into());
        state.register_track("abc", "http://cdn/x".into(), "audio/flac".into());
        state.unregister_track("abc");
        assert!(state.inner.tracks.get("abc").is_none());
    }

    #[tokio::test]
    async fn unknown_track_returns_track_not_found() {
        let state = ProxyState::new(Arc::new(FailingProvider), "http://x:1".into());
        let result = stream_audio(Path("missing".into()), State(state), HeaderMap::new()).await;
        assert!(matches!(result, Err(RenderError::TrackNotFound(_))));
    }

    #[test]
    fn registered_track_not_expired_immediately() {
        let track = RegisteredTrack {
            upstream_url: "http://cdn/x".into(),
            content_type: "audio/flac".into(),
            fetched_at: Instant::now(),
        };
        assert!(!track.is_expired());
    }

    #[tokio::test]
    async fn rechunk_flushes_remainder_smaller_than_chunk_size() {
        let upstream = futures::stream::iter(vec![Ok(Bytes::from_static(b"hello"))]);
        let mut out = rechunk(upstream, 64 * 1024, "t".into());
        let first = out.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"hello");
        assert!(out.next().await.is_none());
    }

    #[tokio::test]
    async fn rechunk_splits_into_fixed_size_pieces() {
        let a = Bytes::from(vec![1u8; 10]);
        let b = Bytes::from(vec![2u8; 10]);
        let upstream = futures::stream::iter(vec![Ok(a), Ok(b)]);
        let mut out = rechunk(upstream, 8, "t".into());

        let mut total = 0;
        while let Some(chunk) = out.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= 8);
            total += chunk.len();
        }
        assert_eq!(total, 20);
    }
}

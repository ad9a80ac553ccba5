//! Decorator that routes a [`PlaybackBackend`]'s `play()` URL through the
//! local audio proxy before handing it to the wrapped backend (§4.11).
//!
//! Only meaningful for the DLNA backend: a renderer on the LAN fetches audio
//! itself, so it needs a stable URL insulated from the vendor CDN's
//! short-lived ones. The local backend decodes the CDN URL directly and has
//! no use for this wrapper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::PlaybackBackend;
use crate::dlna::didl::content_type_from_url;
use crate::error::RenderResult;
use crate::proxy::ProxyState;
use crate::rest::TrackMetadata;

pub struct ProxyingBackend {
    inner: Arc<dyn PlaybackBackend>,
    proxy: ProxyState,
    active_key: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl ProxyingBackend {
    #[must_use]
    pub fn new(inner: Arc<dyn PlaybackBackend>, proxy: ProxyState) -> Self {
        Self {
            inner,
            proxy,
            active_key: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn unregister_active(&self) {
        if let Some(key) = self.active_key.lock().take() {
            self.proxy.unregister_track(&key);
        }
    }
}

#[async_trait]
impl PlaybackBackend for ProxyingBackend {
    async fn play(&self, url: &str, metadata: &TrackMetadata) -> RenderResult<()> {
        self.unregister_active();

        let key = format!("proxy-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let content_type = content_type_from_url(url).to_string();
        let local_url = self.proxy.register_track(&key, url.to_string(), content_type);
        *self.active_key.lock() = Some(key);

        self.inner.play(&local_url, metadata).await
    }

    async fn pause(&self) -> RenderResult<()> {
        self.inner.pause().await
    }

    async fn resume(&self) -> RenderResult<()> {
        self.inner.resume().await
    }

    async fn stop(&self) -> RenderResult<()> {
        self.unregister_active();
        self.inner.stop().await
    }

    async fn seek(&self, position_ms: i64) -> RenderResult<()> {
        self.inner.seek(position_ms).await
    }

    async fn set_volume(&self, volume_pct: i32) -> RenderResult<()> {
        self.inner.set_volume(volume_pct).await
    }

    fn buffer_state(&self) -> String {
        self.inner.buffer_state()
    }

    fn fixed_volume(&self) -> bool {
        self.inner.fixed_volume()
    }

    fn recommended_quality_id(&self) -> Option<i32> {
        self.inner.recommended_quality_id()
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    struct StubBackend {
        last_url: Mutex<Option<String>>,
    }

    #[async_trait]
    impl PlaybackBackend for StubBackend {
        async fn play(&self, url: &str, _metadata: &TrackMetadata) -> RenderResult<()> {
            *self.last_url.lock() = Some(url.to_string());
            Ok(())
        }
        async fn pause(&self) -> RenderResult<()> { Ok(()) }
        async fn resume(&self) -> RenderResult<()> { Ok(()) }
        async fn stop(&self) -> RenderResult<()> { Err(RenderError::Internal("stop".into())) }
        async fn seek(&self, _position_ms: i64) -> RenderResult<()> { Ok(()) }
        async fn set_volume(&self, _volume_pct: i32) -> RenderResult<()> { Ok(()) }
        fn buffer_state(&self) -> String { "BUFFERED".into() }
    }

    struct StaticProvider;

    #[async_trait]
    impl crate::proxy::UpstreamUrlProvider for StaticProvider {
        async fn refresh_url(&self, _track_id: &str) -> RenderResult<String> {
            Ok("http://cdn.example/refreshed".into())
        }
    }

    fn sample_metadata() -> TrackMetadata {
        TrackMetadata { title: "Song".into(), ..Default::default() }
    }

    #[tokio::test]
    async fn play_rewrites_url_to_a_local_proxy_address() {
        let proxy = ProxyState::new(Arc::new(StaticProvider), "http://192.168.1.20:7120".into());
        let stub = Arc::new(StubBackend { last_url: Mutex::new(None) });
        let backend = ProxyingBackend::new(stub.clone(), proxy);

        backend.play("https://cdn.example/track.flac", &sample_metadata()).await.unwrap();

        let recorded = stub.last_url.lock().clone().unwrap();
        assert!(recorded.starts_with("http://192.168.1.20:7120/audio/proxy-1"));
    }

    #[tokio::test]
    async fn second_play_unregisters_the_previous_track() {
        let proxy = ProxyState::new(Arc::new(StaticProvider), "http://192.168.1.20:7120".into());
        let stub = Arc::new(StubBackend { last_url: Mutex::new(None) });
        let backend = ProxyingBackend::new(stub.clone(), proxy);

        backend.play("https://cdn.example/a.flac", &sample_metadata()).await.unwrap();
        backend.play("https://cdn.example/b.mp3", &sample_metadata()).await.unwrap();

        let recorded = stub.last_url.lock().clone().unwrap();
        assert!(recorded.contains("proxy-2"));
    }
}

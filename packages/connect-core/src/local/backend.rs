//! [`PlaybackBackend`] implementation that renders audio to a local output
//! device via `cpal`, fed from a ring buffer by a background feeder task
//! (§4.12).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::decode::decode_to_interleaved_f32;
use super::device::{resolve_device, AudioDeviceInfo};
use super::ring_buffer::RingBuffer;
use crate::backend::PlaybackBackend;
use crate::error::{RenderError, RenderResult};
use crate::events::{EventEmitter, LocalEvent};
use crate::protocol_constants::{
    BUFFER_LOW_WATERMARK, FEEDER_CHUNK_FRAMES, FEEDER_DRAIN_POLL_MS, FEEDER_HIGH_WATERMARK, FEEDER_YIELD_MS,
    RING_BUFFER_SECONDS, UNDERRUN_LOG_EVERY,
};
use crate::rest::TrackMetadata;

/// Everything tied to one open cpal output stream: its ring buffer, the
/// feeder task driving it, and the shared cursors the audio callback reads.
struct Session {
    _stream: cpal::Stream,
    sample_rate: u32,
    ring: Arc<RingBuffer>,
    total_frames: u64,
    frames_fed: Arc<AtomicU64>,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    seek_target: Arc<Mutex<Option<u64>>>,
    feeder_cancel: CancellationToken,
}

pub struct LocalBackend {
    device: cpal::Device,
    device_name: String,
    buffer_frames: u32,
    emitter: Arc<dyn EventEmitter>,
    volume_pct: Arc<AtomicI64>,
    session: Mutex<Option<Session>>,
}

// cpal::Stream is !Send on some platforms because it wraps a raw platform
// handle; we never touch it outside the thread it was built on except to
// drop it, which cpal supports from any thread.
unsafe impl Send for LocalBackend {}
unsafe impl Sync for LocalBackend {}

impl LocalBackend {
    /// `buffer_frames` sizes the cpal callback block (64..=16384); the ring
    /// buffer feeding it is sized independently, from the decoded sample rate.
    pub fn connect(device_config: &str, buffer_frames: u32, emitter: Arc<dyn EventEmitter>) -> RenderResult<Arc<Self>> {
        let info = resolve_device(device_config)?;
        let device = open_cpal_device(&info)?;
        Ok(Arc::new(Self {
            device,
            device_name: info.name,
            buffer_frames,
            emitter,
            volume_pct: Arc::new(AtomicI64::new(100)),
            session: Mutex::new(None),
        }))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Buffer-latency-corrected playback position, per §4.12.
    pub fn position_ms(&self) -> i64 {
        match self.session.lock().as_ref() {
            Some(session) => {
                position_ms(session.frames_fed.load(Ordering::Relaxed), session.ring.available() as u64, session.sample_rate)
            }
            None => 0,
        }
    }

}

fn position_ms(frames_fed: u64, buffered_frames: u64, sample_rate: u32) -> i64 {
    let frames = frames_fed.saturating_sub(buffered_frames);
    if sample_rate == 0 {
        0
    } else {
        ((frames as f64 / sample_rate as f64) * 1000.0).max(0.0) as i64
    }
}

fn open_cpal_device(info: &AudioDeviceInfo) -> RenderResult<cpal::Device> {
    use cpal::traits::HostTrait;
    let host = cpal::default_host();
    host.output_devices()
        .map_err(|err| RenderError::LocalAudio(format!("failed to enumerate output devices: {err}")))?
        .enumerate()
        .find(|(idx, _)| *idx == info.index)
        .map(|(_, d)| d)
        .ok_or_else(|| RenderError::LocalAudio(format!("device '{}' vanished during open", info.name)))
}

fn build_stream(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
    buffer_frames: u32,
    ring: Arc<RingBuffer>,
    paused: Arc<AtomicBool>,
    volume_pct: Arc<AtomicI64>,
    underrun_count: Arc<AtomicU64>,
) -> RenderResult<cpal::Stream> {
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Fixed(buffer_frames),
    };

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if paused.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                if ring.available() == 0 {
                    let count = underrun_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % UNDERRUN_LOG_EVERY == 0 {
                        log::warn!("[LocalAudio] underrun (count {})", count);
                    }
                }

                let frames = data.len() / channels as usize;
                ring.read(frames, data);

                let volume = volume_pct.load(Ordering::Relaxed) as f32 / 100.0;
                if volume != 1.0 {
                    for sample in data.iter_mut() {
                        *sample *= volume;
                    }
                }
            },
            |err| log::error!("[LocalAudio] stream error: {}", err),
            None,
        )
        .map_err(|err| RenderError::LocalAudio(format!("failed to build output stream: {err}")))
}

#[async_trait]
impl PlaybackBackend for LocalBackend {
    async fn play(&self, url: &str, _metadata: &TrackMetadata) -> RenderResult<()> {
        {
            let mut current = self.session.lock();
            if let Some(session) = current.take() {
                session.feeder_cancel.cancel();
            }
        }

        let response = reqwest::get(url)
            .await
            .map_err(|err| RenderError::LocalAudio(format!("failed to download track: {err}")))?;
        if !response.status().is_success() {
            return Err(RenderError::LocalAudio(format!("track download returned {}", response.status())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| RenderError::LocalAudio(format!("failed to read track body: {err}")))?
            .to_vec();

        let decoded = tokio::task::spawn_blocking(move || decode_to_interleaved_f32(body))
            .await
            .map_err(|err| RenderError::LocalAudio(format!("decode task panicked: {err}")))??;

        let total_frames = decoded.total_frames();
        let capacity_frames = decoded.sample_rate as usize * RING_BUFFER_SECONDS as usize;
        let ring = Arc::new(RingBuffer::new(capacity_frames, decoded.channels as usize));
        let paused = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let frames_fed = Arc::new(AtomicU64::new(0));
        let seek_target = Arc::new(Mutex::new(None));
        let underrun_count = Arc::new(AtomicU64::new(0));

        let stream = build_stream(
            &self.device,
            decoded.sample_rate,
            decoded.channels,
            self.buffer_frames,
            Arc::clone(&ring),
            Arc::clone(&paused),
            Arc::clone(&self.volume_pct),
            underrun_count,
        )?;
        stream.play().map_err(|err| RenderError::LocalAudio(format!("failed to start stream: {err}")))?;

        let feeder_cancel = CancellationToken::new();
        spawn_feeder(FeederHandles {
            samples: decoded.samples,
            channels: decoded.channels as usize,
            total_frames,
            ring: Arc::clone(&ring),
            frames_fed: Arc::clone(&frames_fed),
            stopped: Arc::clone(&stopped),
            seek_target: Arc::clone(&seek_target),
            cancel: feeder_cancel.clone(),
            emitter: Arc::clone(&self.emitter),
        });

        *self.session.lock() = Some(Session {
            _stream: stream,
            sample_rate: decoded.sample_rate,
            ring,
            total_frames,
            frames_fed,
            paused,
            stopped,
            seek_target,
            feeder_cancel,
        });

        Ok(())
    }

    async fn pause(&self) -> RenderResult<()> {
        if let Some(session) = self.session.lock().as_ref() {
            session.paused.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn resume(&self) -> RenderResult<()> {
        if let Some(session) = self.session.lock().as_ref() {
            session.paused.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn stop(&self) -> RenderResult<()> {
        if let Some(session) = self.session.lock().as_ref() {
            session.stopped.store(true, Ordering::Relaxed);
            session.feeder_cancel.cancel();
            session.paused.store(true, Ordering::Relaxed);
            session.ring.clear();
        }
        Ok(())
    }

    async fn seek(&self, position_ms: i64) -> RenderResult<()> {
        let session_guard = self.session.lock();
        let Some(session) = session_guard.as_ref() else {
            return Err(RenderError::LocalAudio("seek with no track loaded".into()));
        };
        let target_frame = ((position_ms.max(0) as f64 / 1000.0) * session.sample_rate as f64) as u64;
        let clamped = target_frame.min(session.total_frames);
        *session.seek_target.lock() = Some(clamped);
        Ok(())
    }

    async fn set_volume(&self, volume_pct: i32) -> RenderResult<()> {
        self.volume_pct.store(volume_pct.clamp(0, 100) as i64, Ordering::Relaxed);
        Ok(())
    }

    fn buffer_state(&self) -> String {
        match self.session.lock().as_ref() {
            Some(session) => local_status_bucket(session.ring.fill_level()).to_string(),
            None => "empty".to_string(),
        }
    }

    fn fixed_volume(&self) -> bool {
        false
    }
}

struct FeederHandles {
    samples: Vec<f32>,
    channels: usize,
    total_frames: u64,
    ring: Arc<RingBuffer>,
    frames_fed: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
    seek_target: Arc<Mutex<Option<u64>>>,
    cancel: CancellationToken,
    emitter: Arc<dyn EventEmitter>,
}

fn spawn_feeder(handles: FeederHandles) {
    tokio::spawn(async move {
        let FeederHandles { samples, channels, total_frames, ring, frames_fed, stopped, seek_target, cancel, emitter } =
            handles;
        let mut last_status = "empty";

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let fed = frames_fed.load(Ordering::Relaxed);
            if fed >= total_frames {
                break;
            }

            if let Some(target) = seek_target.lock().take() {
                ring.clear();
                frames_fed.store(target.min(total_frames), Ordering::Relaxed);
                continue;
            }

            if ring.fill_level() > FEEDER_HIGH_WATERMARK {
                tokio::time::sleep(std::time::Duration::from_millis(FEEDER_YIELD_MS)).await;
                continue;
            }

            let remaining = total_frames - fed;
            let chunk_frames = FEEDER_CHUNK_FRAMES.min(remaining as usize);
            let start = fed as usize * channels;
            let end = start + chunk_frames * channels;
            let written_frames = ring.write(&samples[start..end]) as u64;
            frames_fed.fetch_add(written_frames, Ordering::Relaxed);

            let status = local_status_bucket(ring.fill_level());
            if status != last_status {
                emitter.emit_local(LocalEvent::BufferStatusChanged { status: status.to_string() });
                last_status = status;
            }

            tokio::task::yield_now().await;
        }

        while ring.available() > 0 && !stopped.load(Ordering::Relaxed) {
            if cancel.is_cancelled() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(FEEDER_DRAIN_POLL_MS)).await;
        }

        if !stopped.swap(true, Ordering::Relaxed) {
            emitter.emit_local(LocalEvent::TrackEnded);
        }
    });
}

fn local_status_bucket(fill: f32) -> &'static str {
    if fill <= 0.0 {
        "empty"
    } else if fill < BUFFER_LOW_WATERMARK {
        "low"
    } else if fill >= 1.0 {
        "full"
    } else {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bucket_matches_watermarks() {
        assert_eq!(local_status_bucket(0.0), "empty");
        assert_eq!(local_status_bucket(0.05), "low");
        assert_eq!(local_status_bucket(0.5), "ok");
        assert_eq!(local_status_bucket(1.0), "full");
    }

    #[test]
    fn position_ms_accounts_for_buffered_frames() {
        // fed=1000 frames, 100 buffered -> 900 played -> 900/44100*1000 ms
        let expected = (900.0 / 44100.0 * 1000.0) as i64;
        assert_eq!(position_ms(1000, 100, 44100), expected);
    }

    #[test]
    fn position_ms_never_negative_when_buffer_exceeds_fed() {
        assert_eq!(position_ms(10, 50, 44100), 0);
    }

    #[test]
    fn position_ms_zero_sample_rate_is_zero() {
        assert_eq!(position_ms(1000, 0, 0), 0);
    }
}

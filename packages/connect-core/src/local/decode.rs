//! Whole-file decode of a downloaded track into interleaved `f32` PCM (§4.12
//! step 3). The whole body is available before decode starts — no streaming
//! decode needed, unlike the DLNA proxy path.

use std::io::Cursor;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{RenderError, RenderResult};

/// A fully decoded track: interleaved samples plus the format symphonia settled on.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn total_frames(&self) -> u64 {
        if self.channels == 0 {
            0
        } else {
            (self.samples.len() / self.channels as usize) as u64
        }
    }
}

/// Decodes an entire in-memory audio body (MP3 or FLAC, per the vendor's
/// two delivered formats) to interleaved float32 samples.
pub fn decode_to_interleaved_f32(body: Vec<u8>) -> RenderResult<DecodedAudio> {
    let cursor = Cursor::new(body);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&Hint::new(), mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|err| RenderError::LocalAudio(format!("failed to probe audio format: {err}")))?;

    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| RenderError::LocalAudio("no decodable audio track found".into()))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| RenderError::LocalAudio("track has no sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| RenderError::LocalAudio(format!("failed to create decoder: {err}")))?;

    let mut samples = Vec::new();
    let mut channels: u16 = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(RenderError::LocalAudio(format!("format read error: {err}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded: AudioBufferRef = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => return Err(RenderError::LocalAudio(format!("decode error: {err}"))),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count() as u16;

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(RenderError::LocalAudio("decoded track has no audio frames".into()));
    }

    // A mono track with shape (frames,) is already interleaved identically
    // to (frames, 1); nothing further to reshape.
    Ok(DecodedAudio { samples, sample_rate, channels })
}

//! Fixed, bidirectional mapping between renderer-internal quality ids and the
//! wire protocol's quality codes, plus the sample-rate/bit-depth defaults
//! announced alongside each quality.

/// Renderer-internal quality id for MP3 320kbps.
pub const QUALITY_MP3: i32 = 5;
/// Renderer-internal quality id for FLAC 16-bit/44.1kHz ("CD").
pub const QUALITY_CD: i32 = 6;
/// Renderer-internal quality id for FLAC 24-bit/96kHz.
pub const QUALITY_HIRES_96: i32 = 7;
/// Renderer-internal quality id for FLAC 24-bit/192kHz.
pub const QUALITY_HIRES_192: i32 = 27;

/// All quality ids accepted by the renderer, in descending preference order.
pub const QUALITY_IDS_DESCENDING: [i32; 4] =
    [QUALITY_HIRES_192, QUALITY_HIRES_96, QUALITY_CD, QUALITY_MP3];

/// Maps a renderer-internal quality id to its wire protocol value.
///
/// Returns `None` for any id outside the fixed table.
#[must_use]
pub fn quality_to_protocol(quality_id: i32) -> Option<i32> {
    match quality_id {
        QUALITY_MP3 => Some(1),
        QUALITY_CD => Some(2),
        QUALITY_HIRES_96 => Some(3),
        QUALITY_HIRES_192 => Some(4),
        _ => None,
    }
}

/// Maps a wire protocol quality value back to a renderer-internal quality id.
///
/// Returns `None` for any value outside the fixed table.
#[must_use]
pub fn protocol_to_quality(protocol_value: i32) -> Option<i32> {
    match protocol_value {
        1 => Some(QUALITY_MP3),
        2 => Some(QUALITY_CD),
        3 => Some(QUALITY_HIRES_96),
        4 => Some(QUALITY_HIRES_192),
        _ => None,
    }
}

/// Sample rate (Hz), bit depth, and channel count announced for a quality id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityAudioProperties {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth.
    pub bit_depth: u8,
    /// Channel count.
    pub channels: u8,
}

/// Returns the default audio properties announced for `quality_id`.
///
/// Returns `None` for any id outside the fixed table.
#[must_use]
pub fn quality_audio_properties(quality_id: i32) -> Option<QualityAudioProperties> {
    let (sample_rate, bit_depth) = match quality_id {
        QUALITY_MP3 => (44_100, 16),
        QUALITY_CD => (44_100, 16),
        QUALITY_HIRES_96 => (96_000, 24),
        QUALITY_HIRES_192 => (192_000, 24),
        _ => return None,
    };
    Some(QualityAudioProperties {
        sample_rate,
        bit_depth,
        channels: 2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_mapping_is_bijective() {
        for &q in &QUALITY_IDS_DESCENDING {
            let protocol = quality_to_protocol(q).unwrap();
            assert_eq!(protocol_to_quality(protocol), Some(q));
        }
    }

    #[test]
    fn unknown_quality_id_maps_to_none() {
        assert_eq!(quality_to_protocol(99), None);
        assert_eq!(protocol_to_quality(99), None);
    }

    #[test]
    fn hires_192_properties() {
        let props = quality_audio_properties(QUALITY_HIRES_192).unwrap();
        assert_eq!(props.sample_rate, 192_000);
        assert_eq!(props.bit_depth, 24);
        assert_eq!(props.channels, 2);
    }
}

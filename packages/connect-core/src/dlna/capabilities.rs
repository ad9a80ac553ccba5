//! `ConnectionManager::GetProtocolInfo` parsing and the per-device capability
//! cache (§4.10).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::codec::{QUALITY_CD, QUALITY_HIRES_192, QUALITY_HIRES_96, QUALITY_MP3};
use crate::protocol_constants::CAPABILITY_CACHE_TTL_SECS;

/// A single parsed `protocol:network:contentFormat:additional` Sink entry.
#[derive(Debug, Clone)]
pub struct ProtocolInfoEntry {
    pub protocol: String,
    pub network: String,
    pub content_format: String,
    pub additional: HashMap<String, String>,
    pub profile: Option<String>,
    pub mime: String,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u8>,
}

/// Parsed capabilities of a DLNA renderer, derived from its advertised Sink
/// protocol list.
#[derive(Debug, Clone, Default)]
pub struct DlnaCapabilities {
    pub entries: Vec<ProtocolInfoEntry>,
    pub supports_flac: bool,
    pub max_sample_rate: u32,
    pub max_bit_depth: u8,
}

impl DlnaCapabilities {
    /// Conservative renderer-internal quality id implied by these capabilities.
    #[must_use]
    pub fn max_quality_id(&self) -> i32 {
        if !self.supports_flac {
            return QUALITY_MP3;
        }
        if self.max_bit_depth >= 24 && self.max_sample_rate >= 192_000 {
            return QUALITY_HIRES_192;
        }
        if self.max_bit_depth >= 24 && self.max_sample_rate >= 96_000 {
            return QUALITY_HIRES_96;
        }
        QUALITY_CD
    }

    /// All entries advertised for a given mime type.
    #[must_use]
    pub fn entries_for_mime<'a>(&'a self, mime: &str) -> Vec<&'a ProtocolInfoEntry> {
        self.entries.iter().filter(|e| e.mime == mime).collect()
    }

    /// Best-matching entry for the mime type being served, preferring the
    /// one with a `DLNA.ORG_PN` profile annotation and the highest sample rate.
    #[must_use]
    pub fn best_entry_for_mime<'a>(&'a self, mime: &str) -> Option<&'a ProtocolInfoEntry> {
        self.entries_for_mime(mime)
            .into_iter()
            .max_by_key(|e| (e.profile.is_some(), e.sample_rate.unwrap_or(0)))
    }
}

/// Renderer-internal quality id, bit depth, sample rate implied by a
/// `DLNA.ORG_PN` profile name.
fn profile_hint(profile: &str) -> Option<(u8, u32)> {
    match profile {
        "FLAC" => Some((16, 44_100)),
        "FLAC_24" | "FLAC_96" => Some((24, 96_000)),
        "FLAC_192" => Some((24, 192_000)),
        "MP3" => Some((16, 44_100)),
        _ => None,
    }
}

fn parse_additional(s: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for token in s.split(';') {
        if let Some((k, v)) = token.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn parse_format_params(content_format: &str, additional: &HashMap<String, String>) -> (Option<u32>, Option<u8>) {
    let mut sample_rate = None;
    let mut bit_depth = None;

    if content_format.to_lowercase().contains("audio/l16") {
        bit_depth = Some(16);
        for part in content_format.split(';').skip(1) {
            if let Some((k, v)) = part.split_once('=') {
                if k.trim().eq_ignore_ascii_case("rate") {
                    sample_rate = v.trim().parse().ok();
                }
            }
        }
    }

    sample_rate = sample_rate.or_else(|| {
        additional
            .get("sampleRate")
            .or_else(|| additional.get("samplerate"))
            .and_then(|v| v.parse().ok())
    });
    bit_depth = bit_depth.or_else(|| {
        additional
            .get("bitsPerSample")
            .or_else(|| additional.get("bitdepth"))
            .and_then(|v| v.parse().ok())
    });

    (sample_rate, bit_depth)
}

/// Parses a `GetProtocolInfo` `Sink` string into [`DlnaCapabilities`].
#[must_use]
pub fn parse_protocol_info_sink(sink: &str) -> DlnaCapabilities {
    let mut caps = DlnaCapabilities {
        max_sample_rate: 44_100,
        max_bit_depth: 16,
        ..Default::default()
    };

    for raw in sink.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let parts: Vec<&str> = raw.splitn(4, ':').collect();
        if parts.len() < 4 {
            continue;
        }
        let (protocol, network, content_format, additional_str) =
            (parts[0], parts[1], parts[2], parts[3]);
        let additional = parse_additional(additional_str);
        let profile = additional.get("DLNA.ORG_PN").cloned();
        let mime = content_format
            .split(';')
            .next()
            .unwrap_or(content_format)
            .trim()
            .to_lowercase();

        let (mut sample_rate, mut bit_depth) = parse_format_params(content_format, &additional);
        if let Some((hint_bd, hint_sr)) = profile.as_deref().and_then(profile_hint) {
            sample_rate = sample_rate.or(Some(hint_sr));
            bit_depth = bit_depth.or(Some(hint_bd));
        }

        if mime == "audio/flac" {
            caps.supports_flac = true;
            caps.max_sample_rate = caps.max_sample_rate.max(sample_rate.unwrap_or(44_100));
            caps.max_bit_depth = caps.max_bit_depth.max(bit_depth.unwrap_or(16));
        }

        caps.entries.push(ProtocolInfoEntry {
            protocol: protocol.to_string(),
            network: network.to_string(),
            content_format: content_format.to_string(),
            additional,
            profile,
            mime,
            sample_rate,
            bit_depth,
        });
    }

    caps
}

/// Known device-specific capability caps; some renderers advertise formats
/// they don't actually play back cleanly.
const DEVICE_OVERRIDES: &[(&str, u32, u8)] = &[("Sonos", 48_000, 16)];

/// Applies a conservative cap to `caps` when `manufacturer`/`model` match a
/// known-limited device.
pub fn apply_device_overrides(caps: &mut DlnaCapabilities, manufacturer: &str, model: &str) {
    let haystack = format!("{manufacturer} {model}").to_lowercase();
    for (pattern, max_sample_rate, max_bit_depth) in DEVICE_OVERRIDES {
        if haystack.contains(&pattern.to_lowercase()) {
            log::info!("[Dlna] device override {}: {}/{}", pattern, max_sample_rate, max_bit_depth);
            caps.max_sample_rate = *max_sample_rate;
            caps.max_bit_depth = *max_bit_depth;
            break;
        }
    }
}

/// Builds a `res@protocolInfo` string for `mime`, matching the device's
/// advertised Sink entry when one is known, or a generic fallback otherwise.
#[must_use]
pub fn build_protocol_info(caps: &DlnaCapabilities, mime: &str) -> String {
    if let Some(entry) = caps.best_entry_for_mime(mime) {
        let additional = if entry.additional.is_empty() {
            "*".to_string()
        } else {
            entry
                .additional
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(";")
        };
        return format!("{}:{}:{}:{}", entry.protocol, entry.network, entry.content_format, additional);
    }
    format!("http-get:*:{mime}:DLNA.ORG_OP=01")
}

struct CacheEntry {
    capabilities: DlnaCapabilities,
    fetched_at: Instant,
}

/// Caches discovered capabilities per device UUID for
/// [`CAPABILITY_CACHE_TTL_SECS`].
#[derive(Default)]
pub struct CapabilityCache {
    entries: DashMap<String, CacheEntry>,
}

impl CapabilityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns cached capabilities for `device_id`, evicting and returning
    /// `None` if the entry has expired.
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<DlnaCapabilities> {
        let expired = self
            .entries
            .get(device_id)
            .map(|e| e.fetched_at.elapsed() > Duration::from_secs(CAPABILITY_CACHE_TTL_SECS))?;
        if expired {
            self.entries.remove(device_id);
            return None;
        }
        self.entries.get(device_id).map(|e| e.capabilities.clone())
    }

    pub fn set(&self, device_id: &str, capabilities: DlnaCapabilities) {
        self.entries.insert(
            device_id.to_string(),
            CacheEntry {
                capabilities,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, device_id: &str) {
        self.entries.remove(device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINK: &str = "http-get:*:audio/flac:DLNA.ORG_PN=FLAC_192;DLNA.ORG_OP=01,http-get:*:audio/mpeg:DLNA.ORG_PN=MP3;DLNA.ORG_OP=01";

    #[test]
    fn parses_flac_and_mp3_entries() {
        let caps = parse_protocol_info_sink(SINK);
        assert_eq!(caps.entries.len(), 2);
        assert!(caps.supports_flac);
        assert_eq!(caps.max_sample_rate, 192_000);
        assert_eq!(caps.max_bit_depth, 24);
    }

    #[test]
    fn max_quality_id_reflects_hires_192() {
        let caps = parse_protocol_info_sink(SINK);
        assert_eq!(caps.max_quality_id(), QUALITY_HIRES_192);
    }

    #[test]
    fn no_flac_caps_at_mp3() {
        let caps = parse_protocol_info_sink("http-get:*:audio/mpeg:DLNA.ORG_PN=MP3");
        assert_eq!(caps.max_quality_id(), QUALITY_MP3);
    }

    #[test]
    fn sonos_override_caps_sample_rate_and_depth() {
        let mut caps = parse_protocol_info_sink(SINK);
        apply_device_overrides(&mut caps, "Sonos", "One");
        assert_eq!(caps.max_sample_rate, 48_000);
        assert_eq!(caps.max_bit_depth, 16);
        assert_eq!(caps.max_quality_id(), QUALITY_CD);
    }

    #[test]
    fn unrelated_manufacturer_is_untouched() {
        let mut caps = parse_protocol_info_sink(SINK);
        apply_device_overrides(&mut caps, "Denon", "AVR");
        assert_eq!(caps.max_sample_rate, 192_000);
    }

    #[test]
    fn cache_roundtrips_and_invalidates() {
        let cache = CapabilityCache::new();
        let caps = parse_protocol_info_sink(SINK);
        cache.set("uuid-1", caps.clone());
        assert!(cache.get("uuid-1").is_some());
        cache.invalidate("uuid-1");
        assert!(cache.get("uuid-1").is_none());
    }

    #[test]
    fn build_protocol_info_falls_back_when_unmatched() {
        let caps = DlnaCapabilities::default();
        assert_eq!(
            build_protocol_info(&caps, "audio/flac"),
            "http-get:*:audio/flac:DLNA.ORG_OP=01"
        );
    }
}

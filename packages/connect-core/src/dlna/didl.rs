//! DIDL-Lite metadata XML for `SetAVTransportURI` (§4.10).

use super::soap::escape_xml;
use crate::rest::TrackMetadata;

/// Builds a `DIDL-Lite` `object.item.audioItem.musicTrack` document describing
/// `stream_url`, to be sent once alongside `SetAVTransportURI`.
///
/// `protocol_info` should come from [`super::capabilities::build_protocol_info`]
/// when device capabilities were discovered, or a generic
/// `http-get:*:<mime>:*` fallback otherwise.
#[must_use]
pub fn build_didl_lite(stream_url: &str, metadata: &TrackMetadata, protocol_info: &str) -> String {
    let mut didl = String::from(
        r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">"#,
    );
    didl.push_str(r#"<item id="1" parentID="0" restricted="1">"#);
    didl.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(&metadata.title)));
    didl.push_str(&format!("<dc:creator>{}</dc:creator>", escape_xml(&metadata.artist)));
    didl.push_str(&format!("<upnp:artist>{}</upnp:artist>", escape_xml(&metadata.artist)));
    didl.push_str(&format!("<upnp:album>{}</upnp:album>", escape_xml(&metadata.album)));
    didl.push_str("<upnp:class>object.item.audioItem.musicTrack</upnp:class>");
    if !metadata.album_art_url.is_empty() {
        didl.push_str(&format!(
            "<upnp:albumArtURI>{}</upnp:albumArtURI>",
            escape_xml(&metadata.album_art_url)
        ));
    }
    didl.push_str(&format!(
        r#"<res protocolInfo="{}">{}</res>"#,
        escape_xml(protocol_info),
        escape_xml(stream_url)
    ));
    didl.push_str("</item></DIDL-Lite>");
    didl
}

/// Derives the MIME content type for DIDL/`protocolInfo` purposes from the
/// stream URL's file extension, falling back to FLAC.
#[must_use]
pub fn content_type_from_url(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    if lower.ends_with(".mp3") {
        "audio/mpeg"
    } else {
        "audio/flac"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> TrackMetadata {
        TrackMetadata {
            title: "Tom & Jerry".into(),
            artist: "Artist <1>".into(),
            album: "Album".into(),
            album_art_url: "http://example/art.jpg".into(),
            duration_ms: 180_000,
        }
    }

    #[test]
    fn escapes_title_and_artist() {
        let didl = build_didl_lite("http://x/1.flac", &sample_metadata(), "http-get:*:audio/flac:*");
        assert!(didl.contains("Tom &amp; Jerry"));
        assert!(didl.contains("Artist &lt;1&gt;"));
        assert!(didl.contains("object.item.audioItem.musicTrack"));
    }

    #[test]
    fn omits_album_art_when_empty() {
        let mut metadata = sample_metadata();
        metadata.album_art_url.clear();
        let didl = build_didl_lite("http://x/1.flac", &metadata, "http-get:*:audio/flac:*");
        assert!(!didl.contains("albumArtURI"));
    }

    #[test]
    fn content_type_sniffs_mp3_suffix() {
        assert_eq!(content_type_from_url("http://x/1.mp3"), "audio/mpeg");
        assert_eq!(content_type_from_url("http://x/1.flac"), "audio/flac");
        assert_eq!(content_type_from_url("http://x/1"), "audio/flac");
    }
}

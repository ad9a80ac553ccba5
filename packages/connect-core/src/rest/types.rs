//! Response shapes for the vendor REST API.

use serde::Deserialize;

/// Normalized track metadata produced from a `track/get` response (§4.3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_art_url: String,
    pub duration_ms: i64,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTrackPerformer {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTrackImage {
    #[serde(default)]
    pub large: String,
    #[serde(default)]
    pub small: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTrackAlbum {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image: Option<RawTrackImage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTrackGet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub performer: Option<RawTrackPerformer>,
    #[serde(default)]
    pub album: Option<RawTrackAlbum>,
}

impl From<RawTrackGet> for TrackMetadata {
    fn from(raw: RawTrackGet) -> Self {
        let artist = raw.performer.map(|p| p.name).unwrap_or_default();
        let (album, album_art_url) = match raw.album {
            Some(album) => {
                let art = album
                    .image
                    .map(|image| {
                        if !image.large.is_empty() {
                            image.large
                        } else {
                            image.small
                        }
                    })
                    .unwrap_or_default();
                (album.title, art)
            }
            None => (String::new(), String::new()),
        };

        Self {
            title: raw.title,
            artist,
            album,
            album_art_url,
            duration_ms: (raw.duration * 1000.0) as i64,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct LoginResponse {
    pub user_auth_token: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct SessionStartResponse {
    pub session_id: String,
    #[serde(default)]
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub(super) struct FileUrlResponse {
    pub url: String,
    #[serde(default)]
    pub format_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_to_empty_or_zero() {
        let raw: RawTrackGet = serde_json::from_str(r#"{"title": "Song"}"#).unwrap();
        let metadata: TrackMetadata = raw.into();
        assert_eq!(metadata.title, "Song");
        assert_eq!(metadata.artist, "");
        assert_eq!(metadata.album, "");
        assert_eq!(metadata.album_art_url, "");
        assert_eq!(metadata.duration_ms, 0);
    }

    #[test]
    fn full_track_normalizes_nested_fields() {
        let raw: RawTrackGet = serde_json::from_str(
            r#"{
                "title": "Song",
                "duration": 180,
                "performer": {"name": "Artist"},
                "album": {"title": "Album", "image": {"large": "http://a", "small": "http://b"}}
            }"#,
        )
        .unwrap();
        let metadata: TrackMetadata = raw.into();
        assert_eq!(metadata.artist, "Artist");
        assert_eq!(metadata.album, "Album");
        assert_eq!(metadata.album_art_url, "http://a");
        assert_eq!(metadata.duration_ms, 180_000);
    }
}

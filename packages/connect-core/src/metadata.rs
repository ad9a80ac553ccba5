//! Cache-through wrapper over the REST client, keyed by `track_id` (§4.4).

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::codec::QUALITY_IDS_DESCENDING;
use crate::rest::{RestClient, RestError, TrackMetadata};

const CACHE_CAPACITY: usize = 100;

/// A cached track: core metadata plus, once resolved, a streaming URL and the
/// quality the server actually served (which may differ from what was requested).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedTrack {
    pub metadata: TrackMetadata,
    pub streaming_url: Option<String>,
    pub actual_quality: Option<i32>,
}

/// LRU cache (capacity 100, insertion order) fronting the REST client.
pub struct MetadataService {
    rest: RestClient,
    cache: Mutex<LruCache<String, CachedTrack>>,
}

impl MetadataService {
    #[must_use]
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
        }
    }

    /// Fetches (or returns cached) metadata for `track_id`. When `fetch_url`
    /// is set, also resolves a streaming URL by trying quality ids from
    /// `effective_quality` downward in `[27, 7, 6, 5]`, taking the first hit.
    pub async fn get_metadata(
        &self,
        track_id: &str,
        fetch_url: bool,
        effective_quality: i32,
    ) -> Result<CachedTrack, RestError> {
        // `peek`, not `get`: the cache evicts by insertion order, not access
        // recency, so reads must not bump an entry's position.
        let cached = self.cache.lock().peek(track_id).cloned();

        let mut entry = match cached {
            Some(entry) if !fetch_url || entry.streaming_url.is_some() => {
                if !fetch_url {
                    return Ok(entry);
                }
                entry
            }
            Some(entry) => entry,
            None => {
                let metadata = self.rest.track_get(track_id).await?;
                CachedTrack {
                    metadata,
                    streaming_url: None,
                    actual_quality: None,
                }
            }
        };

        if fetch_url && entry.streaming_url.is_none() {
            for &quality in QUALITY_IDS_DESCENDING.iter().filter(|&&q| q <= effective_quality) {
                match self.rest.track_get_file_url(track_id, quality).await {
                    Ok((url, actual)) => {
                        entry.streaming_url = Some(url);
                        entry.actual_quality = Some(actual);
                        break;
                    }
                    Err(RestError::NotFound) => continue,
                    Err(other) => return Err(other),
                }
            }
        }

        self.cache.lock().put(track_id.to_string(), entry.clone());
        Ok(entry)
    }

    /// Shorthand: `get_metadata(track_id, fetch_url=true).streaming_url`.
    pub async fn get_streaming_url(
        &self,
        track_id: &str,
        effective_quality: i32,
    ) -> Result<Option<String>, RestError> {
        Ok(self
            .get_metadata(track_id, true, effective_quality)
            .await?
            .streaming_url)
    }

    /// Invalidates every cached streaming URL (quality changed), keeping core metadata.
    pub fn set_max_quality(&self) {
        let mut cache = self.cache.lock();
        let keys: Vec<String> = cache.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            if let Some(entry) = cache.peek_mut(&key) {
                entry.streaming_url = None;
                entry.actual_quality = None;
            }
        }
    }

    /// Invalidates the cached streaming URL for a single track, keeping its
    /// metadata. Used when the proxy discovers its registered URL has expired.
    pub fn invalidate_streaming_url(&self, track_id: &str) {
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.peek_mut(track_id) {
            entry.streaming_url = None;
            entry.actual_quality = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_max_quality_clears_urls_keeps_metadata() {
        let service = MetadataService::new(RestClient::new("id".into(), "secret".into()));
        service.cache.lock().put(
            "track-1".into(),
            CachedTrack {
                metadata: TrackMetadata {
                    title: "Song".into(),
                    ..Default::default()
                },
                streaming_url: Some("http://cdn/track-1".into()),
                actual_quality: Some(6),
            },
        );

        service.set_max_quality();

        let entry = service.cache.lock().get("track-1").cloned().unwrap();
        assert_eq!(entry.metadata.title, "Song");
        assert!(entry.streaming_url.is_none());
        assert!(entry.actual_quality.is_none());
    }

    #[test]
    fn cache_evicts_oldest_entry_on_overflow() {
        let mut cache: LruCache<String, CachedTrack> =
            LruCache::new(NonZeroUsize::new(2).unwrap());
        cache.put("a".into(), CachedTrack::default());
        cache.put("b".into(), CachedTrack::default());
        cache.put("c".into(), CachedTrack::default());

        assert!(cache.peek("a").is_none());
        assert!(cache.peek("b").is_some());
        assert!(cache.peek("c").is_some());
    }
}

//! The loaded track queue: ordering, shuffle, repeat, and background preload (§4.5).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;

use crate::rest::TrackMetadata;

/// Repeat mode, mirroring the controller's loop-mode translation table (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    Off,
    One,
    All,
}

/// Per-track cached fields, mutated in place by preload and playback.
#[derive(Debug, Clone, Default)]
pub struct TrackCache {
    pub metadata: Option<TrackMetadata>,
    pub streaming_url: Option<String>,
    pub preloaded: bool,
}

/// A single queue entry. `queue_item_id` is unique within a loaded queue;
/// `track_id` is the vendor-global track identity.
#[derive(Debug)]
pub struct Track {
    pub queue_item_id: i64,
    pub track_id: String,
    pub cache: RwLock<TrackCache>,
}

impl Track {
    #[must_use]
    pub fn new(queue_item_id: i64, track_id: String) -> Self {
        Self {
            queue_item_id,
            track_id,
            cache: RwLock::new(TrackCache::default()),
        }
    }
}

/// A loaded track plus the version it was loaded with.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueVersion {
    pub major: u64,
    pub minor: u64,
}

/// The renderer's authoritative queue. Owns its tracks exclusively; preload
/// mutates tracks via each track's own `RwLock` so state reports can read
/// concurrently without blocking on the queue lock.
pub struct Queue {
    tracks: RwLock<Vec<Arc<Track>>>,
    shuffled_indexes: RwLock<Vec<usize>>,
    current_index: AtomicUsize,
    shuffle_enabled: AtomicBool,
    repeat_mode: RwLock<RepeatMode>,
    version: RwLock<QueueVersion>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Queue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracks: RwLock::new(Vec::new()),
            shuffled_indexes: RwLock::new(Vec::new()),
            current_index: AtomicUsize::new(0),
            shuffle_enabled: AtomicBool::new(false),
            repeat_mode: RwLock::new(RepeatMode::Off),
            version: RwLock::new(QueueVersion::default()),
        }
    }

    /// Replaces the entire sequence. Resets order to identity, positions the
    /// cursor at `current_item_id` (or 0), and clears preload marks.
    pub fn load_queue(
        &self,
        tracks: Vec<(i64, String)>,
        version: QueueVersion,
        current_item_id: Option<i64>,
    ) {
        let new_tracks: Vec<Arc<Track>> = tracks
            .into_iter()
            .map(|(id, track_id)| Arc::new(Track::new(id, track_id)))
            .collect();

        let index = current_item_id
            .and_then(|id| new_tracks.iter().position(|t| t.queue_item_id == id))
            .unwrap_or(0);

        let identity: Vec<usize> = (0..new_tracks.len()).collect();

        *self.tracks.write() = new_tracks;
        *self.shuffled_indexes.write() = identity;
        self.current_index.store(index, Ordering::SeqCst);
        self.shuffle_enabled.store(false, Ordering::SeqCst);
        *self.version.write() = version;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn version(&self) -> QueueVersion {
        *self.version.read()
    }

    /// The current track in playback order, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Track>> {
        self.track_at_order_position(self.current_index.load(Ordering::SeqCst))
    }

    fn track_at_order_position(&self, pos: usize) -> Option<Arc<Track>> {
        let order = self.shuffled_indexes.read();
        let tracks = self.tracks.read();
        order.get(pos).and_then(|&i| tracks.get(i)).cloned()
    }

    /// Enables shuffle: a uniformly random permutation of `[0, n)`, with the
    /// pivot (if given) swapped into the current cursor position.
    pub fn enable_shuffle(&self, pivot_queue_item_id: Option<i64>) {
        let tracks = self.tracks.read();
        let n = tracks.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rand::thread_rng());

        let cursor = self.current_index.load(Ordering::SeqCst).min(n.saturating_sub(1));
        if let Some(pivot_id) = pivot_queue_item_id {
            if let Some(pivot_track_index) = tracks.iter().position(|t| t.queue_item_id == pivot_id) {
                if let Some(pos_in_order) = order.iter().position(|&i| i == pivot_track_index) {
                    order.swap(pos_in_order, cursor);
                }
            }
        }
        drop(tracks);

        *self.shuffled_indexes.write() = order;
        self.shuffle_enabled.store(true, Ordering::SeqCst);
        self.invalidate_preload_marks();
    }

    /// Disables shuffle: restores identity order and repositions the cursor
    /// at the formerly-current track's natural-order index.
    pub fn disable_shuffle(&self) {
        let former_current = self.current();

        let tracks = self.tracks.read();
        let n = tracks.len();
        let natural_index = former_current
            .and_then(|t| tracks.iter().position(|x| x.queue_item_id == t.queue_item_id))
            .unwrap_or(0);
        drop(tracks);

        *self.shuffled_indexes.write() = (0..n).collect();
        self.current_index.store(natural_index, Ordering::SeqCst);
        self.shuffle_enabled.store(false, Ordering::SeqCst);
        self.invalidate_preload_marks();
    }

    #[must_use]
    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle_enabled.load(Ordering::SeqCst)
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        *self.repeat_mode.write() = mode;
    }

    #[must_use]
    pub fn repeat_mode(&self) -> RepeatMode {
        *self.repeat_mode.read()
    }

    /// Advances the cursor per the repeat mode; returns the new current track.
    pub fn advance_to_next(&self) -> Option<Arc<Track>> {
        let mode = self.repeat_mode();
        let len = self.len();
        if len == 0 {
            return None;
        }

        match mode {
            RepeatMode::One => self.current(),
            RepeatMode::All => {
                let next = (self.current_index.load(Ordering::SeqCst) + 1) % len;
                self.current_index.store(next, Ordering::SeqCst);
                self.current()
            }
            RepeatMode::Off => {
                let pos = self.current_index.load(Ordering::SeqCst);
                if pos + 1 >= len {
                    None
                } else {
                    self.current_index.store(pos + 1, Ordering::SeqCst);
                    self.current()
                }
            }
        }
    }

    /// Moves the cursor backward per the repeat mode; returns the new current track.
    pub fn go_to_previous(&self) -> Option<Arc<Track>> {
        let mode = self.repeat_mode();
        let len = self.len();
        if len == 0 {
            return None;
        }

        match mode {
            RepeatMode::One => self.current(),
            RepeatMode::All => {
                let pos = self.current_index.load(Ordering::SeqCst);
                let prev = if pos == 0 { len - 1 } else { pos - 1 };
                self.current_index.store(prev, Ordering::SeqCst);
                self.current()
            }
            RepeatMode::Off => {
                let pos = self.current_index.load(Ordering::SeqCst);
                let prev = pos.saturating_sub(1);
                self.current_index.store(prev, Ordering::SeqCst);
                self.current()
            }
        }
    }

    /// Positions not yet preloaded within the next `count` slots from the cursor.
    #[must_use]
    pub fn preload_window(&self, count: usize) -> Vec<Arc<Track>> {
        let order = self.shuffled_indexes.read();
        let tracks = self.tracks.read();
        let start = self.current_index.load(Ordering::SeqCst);
        let len = order.len();
        if len == 0 {
            return Vec::new();
        }

        (start..start + count)
            .filter_map(|pos| {
                let idx = *order.get(pos % len)?;
                tracks.get(idx).cloned()
            })
            .filter(|t| !t.cache.read().preloaded)
            .collect()
    }

    /// Invalidates preload marks outside the current preload window, called
    /// on cursor change or reorder.
    pub fn invalidate_preload_marks(&self) {
        const PRELOAD_COUNT: usize = crate::protocol_constants::PRELOAD_COUNT;

        let order = self.shuffled_indexes.read();
        let tracks = self.tracks.read();
        let start = self.current_index.load(Ordering::SeqCst);
        let len = order.len();
        if len == 0 {
            return;
        }
        let window: std::collections::HashSet<usize> =
            (start..start + PRELOAD_COUNT).map(|pos| order[pos % len]).collect();

        for (i, track) in tracks.iter().enumerate() {
            if !window.contains(&i) {
                track.cache.write().preloaded = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tracks(n: usize) -> Vec<(i64, String)> {
        (0..n as i64).map(|i| (i, format!("track-{i}"))).collect()
    }

    #[test]
    fn load_queue_resets_order_and_positions_cursor() {
        let queue = Queue::new();
        queue.load_queue(sample_tracks(5), QueueVersion { major: 1, minor: 0 }, Some(2));
        assert_eq!(queue.current().unwrap().queue_item_id, 2);
        assert!(!queue.shuffle_enabled());
    }

    #[test]
    fn load_queue_defaults_cursor_to_zero_when_missing_or_unspecified() {
        let queue = Queue::new();
        queue.load_queue(sample_tracks(3), QueueVersion::default(), None);
        assert_eq!(queue.current().unwrap().queue_item_id, 0);

        queue.load_queue(sample_tracks(3), QueueVersion::default(), Some(999));
        assert_eq!(queue.current().unwrap().queue_item_id, 0);
    }

    #[test]
    fn repeat_one_advance_and_previous_stay_on_current_track() {
        let queue = Queue::new();
        queue.load_queue(sample_tracks(3), QueueVersion::default(), Some(1));
        queue.set_repeat_mode(RepeatMode::One);
        assert_eq!(queue.advance_to_next().unwrap().queue_item_id, 1);
        assert_eq!(queue.go_to_previous().unwrap().queue_item_id, 1);
    }

    #[test]
    fn repeat_all_wraps_at_boundaries() {
        let queue = Queue::new();
        queue.load_queue(sample_tracks(3), QueueVersion::default(), Some(2));
        queue.set_repeat_mode(RepeatMode::All);
        assert_eq!(queue.advance_to_next().unwrap().queue_item_id, 0);
        assert_eq!(queue.go_to_previous().unwrap().queue_item_id, 2);
    }

    #[test]
    fn repeat_off_stops_at_boundaries() {
        let queue = Queue::new();
        queue.load_queue(sample_tracks(3), QueueVersion::default(), Some(2));
        queue.set_repeat_mode(RepeatMode::Off);
        assert!(queue.advance_to_next().is_none());

        queue.load_queue(sample_tracks(3), QueueVersion::default(), Some(0));
        queue.set_repeat_mode(RepeatMode::Off);
        assert_eq!(queue.go_to_previous().unwrap().queue_item_id, 0);
    }

    #[test]
    fn shuffle_pivot_lands_at_current_cursor() {
        let queue = Queue::new();
        queue.load_queue(sample_tracks(5), QueueVersion::default(), Some(0));
        queue.enable_shuffle(Some(3));
        assert_eq!(queue.current().unwrap().queue_item_id, 3);
        assert!(queue.shuffle_enabled());
    }

    #[test]
    fn disable_shuffle_restores_identity_and_finds_former_track() {
        let queue = Queue::new();
        queue.load_queue(sample_tracks(5), QueueVersion::default(), Some(0));
        queue.enable_shuffle(Some(3));
        let shuffled_current = queue.current().unwrap().queue_item_id;

        queue.disable_shuffle();
        assert!(!queue.shuffle_enabled());
        assert_eq!(queue.current().unwrap().queue_item_id, shuffled_current);
    }

    #[test]
    fn preload_window_excludes_already_preloaded_tracks() {
        let queue = Queue::new();
        queue.load_queue(sample_tracks(5), QueueVersion::default(), Some(0));
        let window = queue.preload_window(3);
        assert_eq!(window.len(), 3);

        window[0].cache.write().preloaded = true;
        let window = queue.preload_window(3);
        assert_eq!(window.len(), 2);
    }
}

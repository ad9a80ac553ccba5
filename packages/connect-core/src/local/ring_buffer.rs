//! Thread-safe circular buffer of interleaved `f32` audio samples, feeding
//! the audio callback from the feeder task (§4.12, §8 "Ring-buffer invariants").

use parking_lot::Mutex;

struct Inner {
    buffer: Vec<f32>,
    capacity_frames: usize,
    channels: usize,
    write_pos: usize,
    read_pos: usize,
    available: usize,
}

/// Single-producer (feeder task), single-consumer (audio callback) ring
/// buffer. All methods take the same lock; contention is brief since both
/// sides only hold it for a memcpy-sized span.
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

impl RingBuffer {
    #[must_use]
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: vec![0.0; capacity_frames * channels],
                capacity_frames,
                channels,
                write_pos: 0,
                read_pos: 0,
                available: 0,
            }),
        }
    }

    /// Writes interleaved frames from `data` (`data.len() / channels` frames).
    /// Returns the number of frames actually written; short if the buffer
    /// doesn't have enough free space.
    pub fn write(&self, data: &[f32]) -> usize {
        let mut inner = self.inner.lock();
        let channels = inner.channels;
        let incoming_frames = data.len() / channels;
        let free_frames = inner.capacity_frames - inner.available;
        let frames = incoming_frames.min(free_frames);
        if frames == 0 {
            return 0;
        }

        let capacity = inner.capacity_frames;
        let write_pos = inner.write_pos;
        let end_pos = write_pos + frames;
        if end_pos <= capacity {
            let dst_start = write_pos * channels;
            let dst_end = end_pos * channels;
            inner.buffer[dst_start..dst_end].copy_from_slice(&data[..frames * channels]);
        } else {
            let first_chunk = capacity - write_pos;
            let first_samples = first_chunk * channels;
            inner.buffer[write_pos * channels..capacity * channels]
                .copy_from_slice(&data[..first_samples]);
            let remaining = frames - first_chunk;
            inner.buffer[..remaining * channels]
                .copy_from_slice(&data[first_samples..frames * channels]);
        }

        inner.write_pos = (write_pos + frames) % capacity;
        inner.available += frames;
        frames
    }

    /// Reads exactly `frames` frames into `out` (`out.len()` must be
    /// `frames * channels`). Zero-pads the tail on underrun.
    pub fn read(&self, frames: usize, out: &mut [f32]) {
        let mut inner = self.inner.lock();
        let channels = inner.channels;
        debug_assert_eq!(out.len(), frames * channels);
        out.fill(0.0);

        let actual = frames.min(inner.available);
        if actual == 0 {
            return;
        }

        let capacity = inner.capacity_frames;
        let read_pos = inner.read_pos;
        let end_pos = read_pos + actual;
        if end_pos <= capacity {
            let src_start = read_pos * channels;
            let src_end = end_pos * channels;
            out[..actual * channels].copy_from_slice(&inner.buffer[src_start..src_end]);
        } else {
            let first_chunk = capacity - read_pos;
            let first_samples = first_chunk * channels;
            out[..first_samples].copy_from_slice(&inner.buffer[read_pos * channels..capacity * channels]);
            let remaining = actual - first_chunk;
            out[first_samples..actual * channels].copy_from_slice(&inner.buffer[..remaining * channels]);
        }

        inner.read_pos = (read_pos + actual) % capacity;
        inner.available -= actual;
    }

    /// Discards all buffered audio, resetting both cursors (used on seek/stop).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.write_pos = 0;
        inner.read_pos = 0;
        inner.available = 0;
    }

    /// Frames currently available to read.
    pub fn available(&self) -> usize {
        self.inner.lock().available
    }

    /// Frames of free space available to write.
    pub fn free_space(&self) -> usize {
        let inner = self.inner.lock();
        inner.capacity_frames - inner.available
    }

    /// Fill level as a ratio in `[0.0, 1.0]`.
    pub fn fill_level(&self) -> f32 {
        let inner = self.inner.lock();
        if inner.capacity_frames == 0 {
            0.0
        } else {
            inner.available as f32 / inner.capacity_frames as f32
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.inner.lock().capacity_frames
    }

    pub fn channels(&self) -> usize {
        self.inner.lock().channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let rb = RingBuffer::new(8, 2);
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        assert_eq!(rb.write(&data), 4);
        assert_eq!(rb.available(), 4);

        let mut out = vec![0.0; 8];
        rb.read(4, &mut out);
        assert_eq!(out, data);
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn write_short_when_buffer_nearly_full() {
        let rb = RingBuffer::new(4, 1);
        assert_eq!(rb.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(rb.write(&[4.0, 5.0]), 1);
        assert_eq!(rb.available(), 4);
        assert_eq!(rb.free_space(), 0);
    }

    #[test]
    fn read_zero_pads_on_underrun() {
        let rb = RingBuffer::new(4, 1);
        rb.write(&[1.0, 2.0]);
        let mut out = vec![9.0; 4];
        rb.read(4, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 0.0, 0.0]);
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn wrap_around_write_and_read() {
        let rb = RingBuffer::new(4, 1);
        rb.write(&[1.0, 2.0, 3.0]);
        let mut tmp = vec![0.0; 2];
        rb.read(2, &mut tmp);
        assert_eq!(tmp, vec![1.0, 2.0]);
        // write_pos is at 3, read_pos at 2, available=1. Write 3 more -> wraps.
        assert_eq!(rb.write(&[4.0, 5.0, 6.0]), 3);
        assert_eq!(rb.available(), 4);

        let mut out = vec![0.0; 4];
        rb.read(4, &mut out);
        assert_eq!(out, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn clear_resets_cursors() {
        let rb = RingBuffer::new(4, 1);
        rb.write(&[1.0, 2.0, 3.0]);
        rb.clear();
        assert_eq!(rb.available(), 0);
        assert_eq!(rb.free_space(), 4);
    }

    #[test]
    fn fill_level_tracks_ratio() {
        let rb = RingBuffer::new(10, 1);
        assert_eq!(rb.fill_level(), 0.0);
        rb.write(&vec![1.0; 5]);
        assert_eq!(rb.fill_level(), 0.5);
    }
}

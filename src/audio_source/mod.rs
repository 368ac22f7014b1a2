// AudioSource hierarchy: a uniform "fill an AudioBuffer up to time
// t" interface over two concrete producers - emulated chip playback and
// Ogg Vorbis decoding. `AudioBuffer` is the shared PCM sink both write
// into and the host audio callback reads from; `Mutex` guards it the
// same way the reference's `SidDevice` implementations guard their
// shared playback state against a producer thread.

pub mod emulation;
pub mod ogg;

use std::sync::Mutex;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AudioSourceState {
    Inactive,
    Streaming,
    Completed,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CachingType {
    Static,
    StreamingDynamic,
    FullDynamic,
}

/// How far ahead of the read cursor a non-persistent buffer is allowed to
/// grow before old frames get trimmed from the front.
const ROLLING_WINDOW_FRAMES: usize = 1 << 16;

struct AudioBufferInner {
    samples: Vec<i16>, // interleaved stereo
    frequency: u32,
    total_length: Option<usize>,
    completed_length: usize,
    discarded_length: usize,
    persistent: bool,
}

/// Stereo 16-bit PCM storage shared between a producer (streaming job or
/// synchronous fill) and a consumer (the host audio callback). Producer
/// appends at the tail; consumer reads `[0, completed_length)`; the two
/// never overlap so the lock is held only briefly on either side.
pub struct AudioBuffer {
    inner: Mutex<AudioBufferInner>,
}

impl AudioBuffer {
    pub fn new(frequency: u32, total_length: Option<usize>, persistent: bool) -> Self {
        Self {
            inner: Mutex::new(AudioBufferInner {
                samples: Vec::new(),
                frequency,
                total_length,
                completed_length: 0,
                discarded_length: 0,
                persistent,
            }),
        }
    }

    pub fn frequency(&self) -> u32 {
        self.inner.lock().unwrap().frequency
    }

    pub fn completed_length(&self) -> usize {
        self.inner.lock().unwrap().completed_length
    }

    pub fn total_length(&self) -> Option<usize> {
        self.inner.lock().unwrap().total_length
    }

    /// Appends interleaved stereo frames and bumps `completed_length`
    /// (monotonically - never jumps backward).
    pub fn append(&self, stereo_samples: &[i16]) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.extend_from_slice(stereo_samples);
        inner.completed_length += stereo_samples.len() / 2;
        if !inner.persistent {
            // Non-persistent buffers only ever hold a short rolling
            // window; trim everything further back than that from the
            // front so memory doesn't grow with total stream length.
            let frames_held = inner.completed_length - inner.discarded_length;
            if frames_held > ROLLING_WINDOW_FRAMES {
                let drop_frames = frames_held - ROLLING_WINDOW_FRAMES;
                inner.samples.drain(..drop_frames * 2);
                inner.discarded_length += drop_frames;
            }
        }
    }

    /// Reads up to `count` stereo frames starting at `from`, clamped to
    /// what's actually been produced and to what's still retained.
    pub fn read(&self, from: usize, count: usize) -> Vec<i16> {
        let inner = self.inner.lock().unwrap();
        let start = from.max(inner.discarded_length).min(inner.completed_length);
        let end = (from + count).min(inner.completed_length);
        if start >= end {
            return Vec::new();
        }
        let local_start = start - inner.discarded_length;
        let local_end = end - inner.discarded_length;
        inner.samples[local_start * 2..local_end * 2].to_vec()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.clear();
        inner.completed_length = 0;
        inner.discarded_length = 0;
    }
}

/// Common contract every concrete audio source implements.
pub trait AudioSource {
    fn startup(&mut self, precache_seconds: f64) -> std::sync::Arc<AudioBuffer>;
    fn progress(&mut self, precache_seconds: f64);
    fn update_read_time(&mut self, t: f64);
    fn check_for_unload(&mut self, now: f64) -> bool;
    fn map_audio_ref_position_to_track_position(&self, pos: f64) -> f64 {
        pos
    }
    fn state(&self) -> AudioSourceState;
    fn caching_type(&self) -> CachingType;
    fn last_used_timestamp(&self) -> f64;
    fn read_time(&self) -> f64;
    fn buffered_seconds(&self) -> f64;
}

/// LRU eviction thresholds: dynamic sources are reclaimed
/// quickly since they're cheap to restart; static sources are kept
/// around much longer since they represent real decode/emulation work.
pub fn should_unload(caching: CachingType, buffered_seconds: f64, idle_seconds: f64) -> bool {
    match caching {
        CachingType::Static => buffered_seconds > 5.0 && idle_seconds > 180.0,
        CachingType::StreamingDynamic | CachingType::FullDynamic => {
            buffered_seconds > 0.2 && idle_seconds > 10.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_round_trips() {
        let buf = AudioBuffer::new(44_100, None, true);
        buf.append(&[1, 2, 3, 4]);
        assert_eq!(buf.completed_length(), 2);
        assert_eq!(buf.read(0, 2), vec![1, 2, 3, 4]);
        assert_eq!(buf.read(1, 5), vec![3, 4]);
    }

    #[test]
    fn read_past_completed_returns_empty() {
        let buf = AudioBuffer::new(44_100, None, true);
        buf.append(&[1, 2]);
        assert!(buf.read(5, 2).is_empty());
    }

    #[test]
    fn non_persistent_buffer_trims_old_frames_but_keeps_reading_correct() {
        let buf = AudioBuffer::new(44_100, None, false);
        for _ in 0..(ROLLING_WINDOW_FRAMES / 4 + 100) {
            buf.append(&[1, 2, 3, 4]);
        }
        let total_frames = buf.completed_length();
        assert!(total_frames > ROLLING_WINDOW_FRAMES);
        // The oldest frames are gone...
        assert!(buf.read(0, 2).is_empty());
        // ...but a recent frame still reads back correctly.
        let recent = total_frames - 10;
        assert_eq!(buf.read(recent, 1), vec![1, 2]);
    }

    #[test]
    fn static_unload_requires_long_idle_and_enough_buffered() {
        assert!(!should_unload(CachingType::Static, 6.0, 100.0));
        assert!(should_unload(CachingType::Static, 6.0, 181.0));
        assert!(!should_unload(CachingType::Static, 1.0, 400.0));
    }

    #[test]
    fn dynamic_unload_thresholds_are_tighter() {
        assert!(should_unload(CachingType::FullDynamic, 0.3, 11.0));
        assert!(!should_unload(CachingType::FullDynamic, 0.3, 5.0));
    }
}

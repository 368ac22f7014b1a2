// HostMixer boundary: the trait the player drives to hand
// PCM off to whatever the embedding application uses for output. A real
// embedding backs this with `cpal`; tests and the bundled demo binary
// use a minimal in-process mixer.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio_source::AudioBuffer;

/// A live handle to a sound registered with the host mixer. Cloning
/// is cheap - all instances referring to the same sound share state.
#[derive(Clone)]
pub struct AudioReference {
    instance_id: u64,
    state: Arc<AudioReferenceState>,
}

struct AudioReferenceState {
    valid: std::sync::atomic::AtomicBool,
    position_samples: AtomicI64,
    paused: std::sync::atomic::AtomicBool,
    volume_bits: AtomicU64,
    loop_start: AtomicI64,
    looping: std::sync::atomic::AtomicBool,
}

impl AudioReference {
    fn new(instance_id: u64) -> Self {
        Self {
            instance_id,
            state: Arc::new(AudioReferenceState {
                valid: std::sync::atomic::AtomicBool::new(true),
                position_samples: AtomicI64::new(0),
                paused: std::sync::atomic::AtomicBool::new(false),
                volume_bits: AtomicU64::new(1.0f64.to_bits()),
                loop_start: AtomicI64::new(-1),
                looping: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    pub fn valid(&self) -> bool {
        self.state.valid.load(Ordering::Acquire)
    }

    pub fn get_instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn get_position(&self) -> i64 {
        self.state.position_samples.load(Ordering::Acquire)
    }

    pub fn set_position(&self, samples: i64) {
        self.state.position_samples.store(samples, Ordering::Release);
    }

    pub fn set_pause(&self, paused: bool) {
        self.state.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, volume: f32) {
        self.state.volume_bits.store((volume as f64).to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f64::from_bits(self.state.volume_bits.load(Ordering::Acquire)) as f32
    }

    /// Applies an incremental volume change (used for fades); the
    /// mixer clamps the result into `[0, 1]`.
    pub fn set_volume_change(&self, delta: f32) {
        let current = self.volume();
        self.set_volume((current + delta).clamp(0.0, 1.0));
    }

    pub fn set_loop(&self, looping: bool) {
        self.state.looping.store(looping, Ordering::Release);
    }

    pub fn set_loop_start_in_samples(&self, start: i64) {
        self.state.loop_start.store(start, Ordering::Release);
    }

    pub fn stop(&self) {
        self.state.valid.store(false, Ordering::Release);
    }
}

/// The host-side contract a player drives. Implementations
/// own the real-time audio callback; every method here is expected to be
/// cheap and non-blocking except where locking the mixer is explicit.
pub trait HostMixer {
    fn lock_audio(&self);
    fn unlock_audio(&self);
    fn add_sound(&self, buffer: Arc<AudioBuffer>, start_position: i64, looping: bool) -> AudioReference;
    fn remove_sound(&self, reference: &AudioReference);
    fn global_played_samples(&self) -> u64;
    fn output_frequency(&self) -> u32;
    fn output_buffer_size(&self) -> usize;
}

struct FakeMixerVoice {
    buffer: Arc<AudioBuffer>,
    reference: AudioReference,
}

/// An in-process `HostMixer` used by tests and the bundled demo binary:
/// mixes every registered voice's buffer into an `i16` output slice on
/// `pull`, honoring per-voice volume/pause/loop state.
pub struct FakeHostMixer {
    locked: Mutex<bool>,
    voices: Mutex<Vec<FakeMixerVoice>>,
    next_instance_id: AtomicU64,
    played_samples: AtomicU64,
    frequency: u32,
    buffer_size: usize,
}

impl FakeHostMixer {
    pub fn new(frequency: u32, buffer_size: usize) -> Self {
        Self {
            locked: Mutex::new(false),
            voices: Mutex::new(Vec::new()),
            next_instance_id: AtomicU64::new(1),
            played_samples: AtomicU64::new(0),
            frequency,
            buffer_size,
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.lock().unwrap().len()
    }

    /// Mixes `frames` stereo samples from every active voice into `out`
    /// (interleaved stereo, pre-zeroed by the caller not required).
    pub fn pull(&self, out: &mut [i16], frames: usize) {
        out.iter_mut().for_each(|s| *s = 0);
        let mut voices = self.voices.lock().unwrap();
        voices.retain(|v| v.reference.valid());
        for voice in voices.iter() {
            if voice.reference.is_paused() {
                continue;
            }
            let pos = voice.reference.get_position().max(0) as usize;
            let samples = voice.buffer.read(pos, frames);
            let volume = voice.reference.volume();
            for (i, s) in samples.chunks(2).enumerate() {
                if i * 2 + 1 >= out.len() || s.len() < 2 {
                    break;
                }
                let l = (s[0] as f32 * volume) as i32;
                let r = (s[1] as f32 * volume) as i32;
                out[i * 2] = out[i * 2].saturating_add(l.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
                out[i * 2 + 1] = out[i * 2 + 1].saturating_add(r.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
            }
            voice.reference.set_position(pos as i64 + (samples.len() / 2) as i64);
        }
        self.played_samples.fetch_add(frames as u64, Ordering::Relaxed);
    }
}

impl HostMixer for FakeHostMixer {
    fn lock_audio(&self) {
        *self.locked.lock().unwrap() = true;
    }

    fn unlock_audio(&self) {
        *self.locked.lock().unwrap() = false;
    }

    fn add_sound(&self, buffer: Arc<AudioBuffer>, start_position: i64, looping: bool) -> AudioReference {
        let instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        let reference = AudioReference::new(instance_id);
        reference.set_position(start_position);
        reference.set_loop(looping);
        self.voices.lock().unwrap().push(FakeMixerVoice { buffer, reference: reference.clone() });
        reference
    }

    fn remove_sound(&self, reference: &AudioReference) {
        reference.stop();
        self.voices.lock().unwrap().retain(|v| v.reference.get_instance_id() != reference.get_instance_id());
    }

    fn global_played_samples(&self) -> u64 {
        self.played_samples.load(Ordering::Relaxed)
    }

    fn output_frequency(&self) -> u32 {
        self.frequency
    }

    fn output_buffer_size(&self) -> usize {
        self.buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_sound_tracks_voice_count() {
        let mixer = FakeHostMixer::new(44_100, 512);
        let buf = Arc::new(AudioBuffer::new(44_100, None, true));
        let reference = mixer.add_sound(buf, 0, false);
        assert_eq!(mixer.voice_count(), 1);
        mixer.remove_sound(&reference);
        assert_eq!(mixer.voice_count(), 0);
        assert!(!reference.valid());
    }

    #[test]
    fn pull_advances_position_and_played_samples() {
        let mixer = FakeHostMixer::new(44_100, 512);
        let buf = Arc::new(AudioBuffer::new(44_100, None, true));
        buf.append(&[100, 100, 200, 200, 300, 300]);
        let reference = mixer.add_sound(buf, 0, false);
        let mut out = vec![0i16; 4];
        mixer.pull(&mut out, 2);
        assert_eq!(reference.get_position(), 2);
        assert_eq!(mixer.global_played_samples(), 2);
    }

    #[test]
    fn paused_voice_is_skipped() {
        let mixer = FakeHostMixer::new(44_100, 512);
        let buf = Arc::new(AudioBuffer::new(44_100, None, true));
        buf.append(&[100, 100]);
        let reference = mixer.add_sound(buf, 0, false);
        reference.set_pause(true);
        let mut out = vec![0i16; 2];
        mixer.pull(&mut out, 1);
        assert_eq!(out, vec![0, 0]);
        assert_eq!(reference.get_position(), 0);
    }

    #[test]
    fn volume_change_clamps_into_unit_range() {
        let reference = AudioReference::new(1);
        reference.set_volume(0.9);
        reference.set_volume_change(0.5);
        assert_eq!(reference.volume(), 1.0);
        reference.set_volume_change(-2.0);
        assert_eq!(reference.volume(), 0.0);
    }
}

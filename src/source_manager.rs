// AudioSourceManager: owns every live AudioSource, indexed by a
// content hash of its SourceRegistration so two definitions that point
// at the same file or SMPS address share one decoder/emulation instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::audio_source::emulation::EmulationAudioSource;
use crate::audio_source::ogg::OggAudioSource;
use crate::audio_source::{AudioBuffer, AudioSource, CachingType};
use crate::collection::{SourceRegistration, SourceType};
use crate::hash::murmur2_64;

const MINIMAL_LAG_PRECACHE: f64 = 0.1;
const STANDARD_PRECACHE: f64 = 0.25;

enum Concrete {
    Ogg(OggAudioSource),
    Emulation(EmulationAudioSource),
}

impl Concrete {
    fn as_source(&mut self) -> &mut dyn AudioSource {
        match self {
            Concrete::Ogg(s) => s,
            Concrete::Emulation(s) => s,
        }
    }

    fn as_source_ref(&self) -> &dyn AudioSource {
        match self {
            Concrete::Ogg(s) => s,
            Concrete::Emulation(s) => s,
        }
    }
}

struct Entry {
    source: Concrete,
    buffer: Arc<AudioBuffer>,
}

pub fn content_hash(reg: &SourceRegistration) -> u64 {
    let mut key = String::new();
    match reg.source_type {
        SourceType::File => {
            if let Some(path) = &reg.source_file {
                key.push_str(&path.to_string_lossy());
            }
        }
        SourceType::EmulationBuffered | SourceType::EmulationDirect | SourceType::EmulationContinuous => {
            key.push_str("emu:");
            key.push_str(&reg.source_address.unwrap_or_default().to_string());
            key.push(':');
            key.push_str(&reg.emulation_sfx_id.unwrap_or_default().to_string());
        }
    }
    murmur2_64(key.as_bytes())
}

/// Owns every live `AudioSource` and reuses one per distinct content hash
/// so two `AudioDefinition`s sharing a file or SMPS address don't double
/// decode/emulate it.
pub struct AudioSourceManager {
    sample_rate: u32,
    frame_rate: f64,
    entries: HashMap<u64, Entry>,
}

impl AudioSourceManager {
    pub fn new(sample_rate: u32, frame_rate: f64) -> Self {
        Self { sample_rate, frame_rate, entries: HashMap::new() }
    }

    fn build_source(&self, reg: &SourceRegistration) -> Option<Concrete> {
        match reg.source_type {
            SourceType::File => {
                let path = reg.source_file.as_ref()?;
                let caching = CachingType::Static;
                OggAudioSource::open(path, caching, reg.loop_start.map(|s| s as usize), 0)
                    .ok()
                    .map(Concrete::Ogg)
            }
            SourceType::EmulationBuffered => {
                Some(Concrete::Emulation(EmulationAudioSource::new(self.sample_rate, self.frame_rate, CachingType::Static)))
            }
            SourceType::EmulationDirect | SourceType::EmulationContinuous => {
                Some(Concrete::Emulation(EmulationAudioSource::new(self.sample_rate, self.frame_rate, CachingType::FullDynamic)))
            }
        }
    }

    /// Returns the buffer backing `reg`, constructing and starting up a
    /// fresh source on first use, or reusing the cached one by content
    /// hash.
    pub fn get_audio_source_for_playback(&mut self, reg: &SourceRegistration, content: Option<(Vec<u8>, usize, u8)>) -> Option<Arc<AudioBuffer>> {
        let hash = content_hash(reg);
        if let Some(entry) = self.entries.get(&hash) {
            return Some(entry.buffer.clone());
        }

        let mut source = self.build_source(reg)?;
        if let (Concrete::Emulation(src), Some((data, offset, sfx_id))) = (&mut source, content) {
            src.init_with_sfx_id(data, offset, sfx_id);
        }
        let buffer = source.as_source().startup(STANDARD_PRECACHE);
        self.entries.insert(hash, Entry { source, buffer: buffer.clone() });
        Some(buffer)
    }

    /// Advances every cached source's streaming fill: unloads idle
    /// sources first, then tops up anything still streaming, using the
    /// shorter precache window for sources that need minimal lag.
    pub fn update_streaming(&mut self, now: f64, needs_minimal_lag: impl Fn(u64) -> bool) {
        self.entries.retain(|_, entry| !entry.source.as_source().check_for_unload(now));

        for (hash, entry) in self.entries.iter_mut() {
            let source = entry.source.as_source();
            let precache = if needs_minimal_lag(*hash) { MINIMAL_LAG_PRECACHE } else { STANDARD_PRECACHE };
            source.progress(source.read_time() + precache);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn active_source_count(&self) -> usize {
        self.entries.len()
    }

    /// Content hash a `SourceRegistration` would resolve to, without
    /// requiring a live source - used by callers that need to address an
    /// entry before (or without) acquiring it.
    pub fn hash_of(&self, reg: &SourceRegistration) -> u64 {
        content_hash(reg)
    }

    pub fn read_time(&self, hash: u64) -> f64 {
        self.entries.get(&hash).map(|e| e.source.as_source_ref().read_time()).unwrap_or(0.0)
    }

    pub fn buffered_seconds(&self, hash: u64) -> f64 {
        self.entries.get(&hash).map(|e| e.source.as_source_ref().buffered_seconds()).unwrap_or(0.0)
    }

    /// Advances the given source's read-time marker - the player calls
    /// this once per `updatePlayback` with the host mixer's current
    /// position so `update_streaming`'s unload check can see liveness.
    pub fn update_read_time(&mut self, hash: u64, t: f64) {
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.source.as_source().update_read_time(t);
        }
    }

    pub fn map_position(&self, hash: u64, pos: f64) -> f64 {
        match self.entries.get(&hash) {
            Some(entry) => entry.source.as_source_ref().map_audio_ref_position_to_track_position(pos),
            None => pos,
        }
    }

    /// Pushes a new `playSound` id into an `EMULATION_CONTINUOUS` source
    /// already backing `hash`; a no-op for anything else.
    pub fn inject_emulation_play_sound(&self, hash: u64, id: u8) {
        if let Some(Entry { source: Concrete::Emulation(src), .. }) = self.entries.get(&hash) {
            src.inject_play_sound(id);
        }
    }

    /// Pushes a tempo-speedup value into the emulation source backing
    /// `hash` (the audio modifier path); a no-op for anything else.
    pub fn inject_emulation_tempo_speedup(&self, hash: u64, v: u8) {
        if let Some(Entry { source: Concrete::Emulation(src), .. }) = self.entries.get(&hash) {
            src.inject_tempo_speedup(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Package;

    fn emu_reg(address: u32, sfx_id: u8) -> SourceRegistration {
        SourceRegistration {
            package: Package::Original,
            source_type: SourceType::EmulationBuffered,
            source_file: None,
            emulation_sfx_id: Some(sfx_id),
            source_address: Some(address),
            content_offset: None,
            is_looping: false,
            loop_start: None,
            volume: 1.0,
        }
    }

    #[test]
    fn identical_registrations_share_one_source() {
        let mut mgr = AudioSourceManager::new(44_100, 60.0);
        let reg = emu_reg(0x1000, 5);
        let content = Some((vec![0x7f, 0xec], 0, 5));
        mgr.get_audio_source_for_playback(&reg, content.clone());
        mgr.get_audio_source_for_playback(&reg, content);
        assert_eq!(mgr.active_source_count(), 1);
    }

    #[test]
    fn distinct_addresses_get_distinct_sources() {
        let mut mgr = AudioSourceManager::new(44_100, 60.0);
        mgr.get_audio_source_for_playback(&emu_reg(0x1000, 5), Some((vec![0xec], 0, 5)));
        mgr.get_audio_source_for_playback(&emu_reg(0x2000, 6), Some((vec![0xec], 0, 6)));
        assert_eq!(mgr.active_source_count(), 2);
    }

    #[test]
    fn clear_drops_all_sources() {
        let mut mgr = AudioSourceManager::new(44_100, 60.0);
        mgr.get_audio_source_for_playback(&emu_reg(0x1000, 5), Some((vec![0xec], 0, 5)));
        mgr.clear();
        assert_eq!(mgr.active_source_count(), 0);
    }
}

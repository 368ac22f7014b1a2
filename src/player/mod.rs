// AudioPlayer: the facade a host drives every simulation tick.
// Resolves `AudioDefinition`s through `AudioCollection`, acquires
// buffers through `AudioSourceManager`, and hands them to a `HostMixer`
// implementation, tracking every live `PlayingSound`, channel override,
// audio modifier and auto-streamer along the way.

use std::sync::Arc;

use crate::collection::{AudioCollection, Package, SourceRegistration, SourceType};
use crate::error::{AudioError, AudioResult};
use crate::host_mixer::{AudioReference, HostMixer};
use crate::source_manager::AudioSourceManager;

/// External ROM access for `EMULATION_*` sources addressed by a bare
/// 68k address rather than a file or precomputed byte buffer -
/// "ROM / SMPS data boundary"). Standalone content (`sourceFile`) never
/// needs this.
pub trait RomSource: Send + Sync {
    fn read_memory8(&self, address: u32) -> u8;
}

/// How many bytes to pull out of a `RomSource` for one SMPS track -
/// generous enough for any real driver data blob without requiring the
/// caller to know the exact length up front.
const ROM_CHUNK_BYTES: usize = 0x4000;

fn read_rom_chunk(rom: &dyn RomSource, address: u32) -> Vec<u8> {
    (0..ROM_CHUNK_BYTES).map(|i| rom.read_memory8(address.wrapping_add(i as u32))).collect()
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PlayingSoundState {
    Playing,
    Overridden,
}

pub struct PlayingSound {
    pub unique_id: u64,
    pub audio_ref: AudioReference,
    key_id: u64,
    key_string: String,
    package: Package,
    source_hash: u64,
    is_emulation: bool,
    pub base_volume: f32,
    pub relative_volume: f32,
    pub relative_volume_change: f32,
    pub context_id: u32,
    pub channel_id: u8,
    pub state: PlayingSoundState,
}

struct ChannelOverride {
    overridden_channel_id: u8,
    playing_sound_unique_id: u64,
}

#[derive(Clone)]
struct AudioModifier {
    channel_id: u8,
    context_id: u32,
    postfix: String,
    relative_speed: f32,
}

struct AutoStreamer {
    source_hash: u64,
    time: f64,
    speed: f64,
}

/// A `SavedAudioState` entry for persisting/resuming music+SFX across a
/// host save.
#[derive(Clone, Copy, Debug)]
pub struct SavedAudioState {
    pub sfx_id: u64,
    pub channel_id: u8,
    pub context_id: u32,
}

const OVERRIDE_FADE_IN_SECONDS: f32 = 0.25;
const MODIFIER_CROSSFADE_DB_PER_SEC: f32 = 50.0 / 20.0;
/// Fast fade applied to a sound that's being stopped while still playing,
/// so cancellation never produces a hard click; an already-paused sound
/// is silent already and can be dropped from the mixer immediately.
const STOP_FADE_DB_PER_SEC: f32 = 20.0;
/// `AutoStreamer`s are dropped once the source they keep alive has
/// buffered this much - there is no longer any point advancing them.
const AUTO_STREAMER_MAX_BUFFER_SECONDS: f64 = 30.0;

pub struct AudioPlayer<M: HostMixer> {
    collection: AudioCollection,
    sources: AudioSourceManager,
    mixer: M,
    rom: Option<Arc<dyn RomSource>>,
    playing: Vec<PlayingSound>,
    overrides: Vec<ChannelOverride>,
    modifiers: Vec<AudioModifier>,
    auto_streamers: Vec<AutoStreamer>,
    next_unique_id: u64,
    last_audio_time: i64,
    prefer_original: bool,
}

impl<M: HostMixer> AudioPlayer<M> {
    pub fn new(collection: AudioCollection, sources: AudioSourceManager, mixer: M, prefer_original: bool) -> Self {
        Self {
            collection,
            sources,
            mixer,
            rom: None,
            playing: Vec::new(),
            overrides: Vec::new(),
            modifiers: Vec::new(),
            auto_streamers: Vec::new(),
            next_unique_id: 1,
            last_audio_time: 0,
            prefer_original,
        }
    }

    pub fn set_rom_source(&mut self, rom: Arc<dyn RomSource>) {
        self.rom = Some(rom);
    }

    pub fn collection_mut(&mut self) -> &mut AudioCollection {
        &mut self.collection
    }

    pub fn mixer(&self) -> &M {
        &self.mixer
    }

    pub fn num_playing_sounds(&self) -> usize {
        self.playing.len()
    }

    fn resolve_content(&self, reg: &SourceRegistration) -> Option<(Vec<u8>, usize, u8)> {
        match reg.source_type {
            SourceType::File => None,
            _ => {
                let sfx_id = reg.emulation_sfx_id.unwrap_or(0);
                if let Some(file) = &reg.source_file {
                    let data = std::fs::read(file).ok()?;
                    Some((data, reg.content_offset.unwrap_or(0) as usize, sfx_id))
                } else if let (Some(addr), Some(rom)) = (reg.source_address, &self.rom) {
                    Some((read_rom_chunk(rom.as_ref(), addr), 0, sfx_id))
                } else {
                    None
                }
            }
        }
    }

    /// Stops every `PlayingSound` on `channel_id`+`context_id` that
    /// isn't `EMULATION_CONTINUOUS` - duplicates never coexist. Already
    /// playing sounds get a fast fade instead of a hard cut; paused ones
    /// are silent already and are removed from the mixer immediately.
    fn stop_duplicates(&mut self, channel_id: u8, context_id: u32) {
        let mut i = 0;
        while i < self.playing.len() {
            let p = &self.playing[i];
            let is_continuous = self
                .collection
                .get_audio_definition(p.key_id)
                .and_then(|d| d.active_source_registration())
                .map(|r| r.source_type == SourceType::EmulationContinuous)
                .unwrap_or(false);
            if p.channel_id == channel_id && p.context_id == context_id && !is_continuous {
                let removed = self.playing.remove(i);
                if removed.audio_ref.is_paused() {
                    self.mixer.remove_sound(&removed.audio_ref);
                } else {
                    removed.audio_ref.set_volume_change(-STOP_FADE_DB_PER_SEC);
                }
            } else {
                i += 1;
            }
        }
    }

    fn matching_modifier(&self, channel_id: u8, context_id: u32) -> Option<AudioModifier> {
        self.modifiers.iter().find(|m| m.channel_id == channel_id && m.context_id == context_id).cloned()
    }

    fn play_internal(&mut self, key_id: u64, context_id: u32, channel_id: Option<u8>) -> bool {
        let Some(def) = self.collection.get_audio_definition(key_id) else {
            log::warn!("playAudio: unknown key id {key_id:#x}");
            return false;
        };
        let Some(reg) = def.active_source_registration().cloned() else {
            log::warn!("playAudio: {} has no active source", def.key_string);
            return false;
        };
        let channel_id = channel_id.unwrap_or(def.channel);
        let key_string = def.key_string.clone();

        if reg.source_type == SourceType::EmulationContinuous {
            if let Some(existing) = self
                .playing
                .iter()
                .find(|p| p.key_id == key_id && p.channel_id == channel_id && p.context_id == context_id)
            {
                self.sources.inject_emulation_play_sound(existing.source_hash, reg.emulation_sfx_id.unwrap_or(0));
                return true;
            }
        }

        self.stop_duplicates(channel_id, context_id);

        let content = self.resolve_content(&reg);
        let hash = self.sources.hash_of(&reg);
        let Some(buffer) = self.sources.get_audio_source_for_playback(&reg, content) else {
            log::warn!("playAudio: {key_string} failed to acquire a source");
            return false;
        };

        let overridden = self.overrides.iter().any(|o| o.overridden_channel_id == channel_id);
        let audio_ref = self.mixer.add_sound(buffer, 0, reg.is_looping);
        if let Some(loop_start) = reg.loop_start {
            audio_ref.set_loop_start_in_samples(loop_start as i64);
        }
        if overridden {
            audio_ref.set_pause(true);
            audio_ref.set_volume(0.0);
        } else {
            audio_ref.set_volume(reg.volume);
        }

        let unique_id = self.next_unique_id;
        self.next_unique_id += 1;

        self.playing.push(PlayingSound {
            unique_id,
            audio_ref,
            key_id,
            key_string,
            package: reg.package,
            source_hash: hash,
            is_emulation: reg.source_type != SourceType::File,
            base_volume: reg.volume,
            relative_volume: 1.0,
            relative_volume_change: 0.0,
            context_id,
            channel_id,
            state: if overridden { PlayingSoundState::Overridden } else { PlayingSoundState::Playing },
        });

        if let Some(modifier) = self.matching_modifier(channel_id, context_id) {
            let idx = self.playing.len() - 1;
            self.apply_modifier_to_sound(idx, &modifier);
        }

        true
    }

    pub fn play_audio(&mut self, key_id: u64, context_id: u32) -> bool {
        self.play_internal(key_id, context_id, None)
    }

    pub fn play_audio_on_channel(&mut self, key_id: u64, context_id: u32, channel_id: u8) -> bool {
        self.play_internal(key_id, context_id, Some(channel_id))
    }

    /// Plays `key_id` on `channel_id`, pausing and marking every
    /// currently `PLAYING` sound on `overridden_channel_id` as
    /// `OVERRIDDEN` until this one ends.
    pub fn play_override(&mut self, key_id: u64, context_id: u32, channel_id: u8, overridden_channel_id: u8) -> bool {
        if !self.play_internal(key_id, context_id, Some(channel_id)) {
            return false;
        }
        let playing_sound_unique_id = self.playing.last().expect("just pushed").unique_id;
        self.overrides.push(ChannelOverride { overridden_channel_id, playing_sound_unique_id });
        self.apply_channel_override(overridden_channel_id);
        true
    }

    fn apply_channel_override(&mut self, overridden_channel_id: u8) {
        for p in self.playing.iter_mut() {
            if p.channel_id == overridden_channel_id && p.state == PlayingSoundState::Playing {
                p.audio_ref.set_pause(true);
                p.state = PlayingSoundState::Overridden;
            }
        }
    }

    fn restore_channel_override(&mut self, overridden_channel_id: u8) {
        for p in self.playing.iter_mut() {
            if p.channel_id == overridden_channel_id && p.state == PlayingSoundState::Overridden {
                p.audio_ref.set_pause(false);
                p.audio_ref.set_volume(0.0);
                p.relative_volume = 0.0;
                p.relative_volume_change = 1.0 / OVERRIDE_FADE_IN_SECONDS;
                p.state = PlayingSoundState::Playing;
            }
        }
    }

    fn matches(sound: &PlayingSound, channel_id: Option<u8>, context_id: Option<u32>) -> bool {
        channel_id.map(|c| c == sound.channel_id).unwrap_or(true) && context_id.map(|c| c == sound.context_id).unwrap_or(true)
    }

    pub fn pause(&self, channel_id: Option<u8>, context_id: Option<u32>) {
        for p in self.playing.iter().filter(|p| Self::matches(p, channel_id, context_id)) {
            p.audio_ref.set_pause(true);
        }
    }

    pub fn resume(&self, channel_id: Option<u8>, context_id: Option<u32>) {
        for p in self.playing.iter().filter(|p| Self::matches(p, channel_id, context_id) && p.state == PlayingSoundState::Playing) {
            p.audio_ref.set_pause(false);
        }
    }

    /// Stops matching sounds: a sound still playing gets a fast fade
    /// (the host mixer keeps rendering it out on its own) so cancellation
    /// never clicks; a sound already paused is silent already and is
    /// removed from the mixer immediately. Use `fade_out_channel` instead
    /// for an audible, slower ramp-down.
    pub fn stop(&mut self, channel_id: Option<u8>, context_id: Option<u32>) {
        let mut i = 0;
        while i < self.playing.len() {
            if Self::matches(&self.playing[i], channel_id, context_id) {
                let removed = self.playing.remove(i);
                if removed.audio_ref.is_paused() {
                    self.mixer.remove_sound(&removed.audio_ref);
                } else {
                    removed.audio_ref.set_volume_change(-STOP_FADE_DB_PER_SEC);
                }
            } else {
                i += 1;
            }
        }
    }

    pub fn change_sound_context(&mut self, old_context_id: u32, new_context_id: u32) {
        for p in self.playing.iter_mut().filter(|p| p.context_id == old_context_id) {
            p.context_id = new_context_id;
        }
    }

    pub fn fade_in_channel(&mut self, channel_id: u8, length_seconds: f32) {
        for p in self.playing.iter_mut().filter(|p| p.channel_id == channel_id) {
            p.relative_volume_change = 1.0 / length_seconds.max(0.001);
        }
    }

    pub fn fade_out_channel(&mut self, channel_id: u8, length_seconds: f32) {
        for p in self.playing.iter_mut().filter(|p| p.channel_id == channel_id) {
            p.relative_volume_change = -1.0 / length_seconds.max(0.001);
        }
    }

    fn apply_modifier_to_sound(&mut self, idx: usize, modifier: &AudioModifier) {
        if self.playing[idx].is_emulation {
            let speedup = if modifier.relative_speed > 1.01 {
                ((1.0 / (modifier.relative_speed - 1.0)).round() as u32 * 2).min(u8::MAX as u32) as u8
            } else {
                0
            };
            self.sources.inject_emulation_tempo_speedup(self.playing[idx].source_hash, speedup);
            return;
        }

        let base = &self.playing[idx];
        let alt_key = format!("{}{}", base.key_string, modifier.postfix);
        let package = base.package;
        let base_pos = base.audio_ref.get_position();
        let relative_speed = modifier.relative_speed;

        let Some(alt_reg) = self
            .collection
            .get_audio_definition_by_key(&alt_key)
            .and_then(|d| d.sources.iter().find(|s| s.package == package))
            .cloned()
        else {
            log::warn!("enableAudioModifier: no {package:?} source for '{alt_key}'");
            return;
        };

        let content = self.resolve_content(&alt_reg);
        let hash = self.sources.hash_of(&alt_reg);
        let Some(buffer) = self.sources.get_audio_source_for_playback(&alt_reg, content) else {
            return;
        };
        let new_pos = (base_pos as f64 / relative_speed as f64).round() as i64;
        let new_ref = self.mixer.add_sound(buffer, new_pos, alt_reg.is_looping);
        new_ref.set_volume(0.0);

        // Crossfade: ramp the outgoing reference down while the new one
        // ramps up, and keep the old source's stream alive via an
        // auto-streamer so a later `disableAudioModifier` can crossfade
        // straight back without a cold restart.
        self.playing[idx].audio_ref.set_volume_change(-MODIFIER_CROSSFADE_DB_PER_SEC);
        self.auto_streamers.push(AutoStreamer { source_hash: self.playing[idx].source_hash, time: 0.0, speed: 1.0 });

        self.playing[idx].audio_ref = new_ref;
        self.playing[idx].source_hash = hash;
        self.playing[idx].key_string = alt_key;
        self.playing[idx].audio_ref.set_volume_change(MODIFIER_CROSSFADE_DB_PER_SEC);
    }

    /// Applies (or updates) a speed/variant modifier for every sound
    /// currently matching `channel_id`+`context_id`.
    pub fn enable_audio_modifier(&mut self, channel_id: u8, context_id: u32, postfix: &str, relative_speed: f32) {
        self.modifiers.retain(|m| !(m.channel_id == channel_id && m.context_id == context_id));
        self.modifiers.push(AudioModifier { channel_id, context_id, postfix: postfix.to_string(), relative_speed });

        let targets: Vec<usize> = self
            .playing
            .iter()
            .enumerate()
            .filter(|(_, p)| p.channel_id == channel_id && p.context_id == context_id && p.state == PlayingSoundState::Playing)
            .map(|(i, _)| i)
            .collect();
        let modifier = self.modifiers.last().expect("just pushed").clone();
        for idx in targets {
            self.apply_modifier_to_sound(idx, &modifier);
        }
    }

    pub fn disable_audio_modifier(&mut self, channel_id: u8, context_id: u32) {
        self.modifiers.retain(|m| !(m.channel_id == channel_id && m.context_id == context_id));
    }

    /// Drives every time-dependent piece of player state forward by
    /// `dt` seconds, in five steps.
    pub fn update_playback(&mut self, dt: f64) {
        let output_freq = self.mixer.output_frequency() as f64;
        let buffer_size = self.mixer.output_buffer_size() as i64;
        self.last_audio_time += (dt * output_freq).round() as i64;
        let host_estimate = self.mixer.global_played_samples() as i64 + buffer_size;
        let drift = (self.last_audio_time - host_estimate).clamp(-buffer_size, buffer_size);
        self.last_audio_time = host_estimate + drift;
        let now = self.last_audio_time as f64 / output_freq;

        let mut i = 0;
        while i < self.playing.len() {
            if !self.playing[i].audio_ref.valid() {
                self.playing.remove(i);
                continue;
            }
            let change = self.playing[i].relative_volume_change;
            if change != 0.0 {
                self.playing[i].relative_volume = (self.playing[i].relative_volume + change * dt as f32).clamp(0.0, 1.0);
                let effective = self.playing[i].base_volume * self.playing[i].relative_volume;
                self.playing[i].audio_ref.set_volume(effective);
                if change < 0.0 && self.playing[i].relative_volume <= 0.0 {
                    let removed = self.playing.remove(i);
                    self.mixer.remove_sound(&removed.audio_ref);
                    continue;
                }
            }
            let hash = self.playing[i].source_hash;
            self.sources.update_read_time(hash, now);
            i += 1;
        }

        let mut restored = Vec::new();
        self.overrides.retain(|ov| {
            let controller_alive = self.playing.iter().any(|p| p.unique_id == ov.playing_sound_unique_id);
            if !controller_alive {
                restored.push(ov.overridden_channel_id);
            }
            controller_alive
        });
        for channel_id in restored {
            self.restore_channel_override(channel_id);
        }

        self.auto_streamers.retain_mut(|streamer| {
            streamer.time += dt * streamer.speed;
            self.sources.update_read_time(streamer.source_hash, streamer.time);
            self.sources.buffered_seconds(streamer.source_hash) < AUTO_STREAMER_MAX_BUFFER_SECONDS
        });

        let overridden_channels: std::collections::HashSet<u8> = self.overrides.iter().map(|o| o.overridden_channel_id).collect();
        self.sources.update_streaming(now, |hash| {
            self.playing
                .iter()
                .find(|p| p.source_hash == hash)
                .map(|p| overridden_channels.contains(&p.channel_id))
                .unwrap_or(false)
        });
    }

    pub fn rebuild_active_sources(&mut self) {
        self.collection.determine_active_source_registrations(self.prefer_original);
    }

    pub fn save_playback_state(&self) -> Vec<SavedAudioState> {
        self.playing
            .iter()
            .map(|p| SavedAudioState { sfx_id: p.key_id, channel_id: p.channel_id, context_id: p.context_id })
            .collect()
    }

    pub fn load_playback_state(&mut self, states: &[SavedAudioState]) -> AudioResult<()> {
        for state in states {
            if !self.play_audio_on_channel(state.sfx_id, state.context_id, state.channel_id) {
                return Err(AudioError::InconsistentState(format!("could not resume sfx {:#x}", state.sfx_id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{AudioDefinition, AudioDefinitionType, Visibility};
    use crate::host_mixer::FakeHostMixer;

    fn reg(package: Package) -> SourceRegistration {
        SourceRegistration {
            package,
            source_type: SourceType::File,
            source_file: None,
            emulation_sfx_id: None,
            source_address: None,
            content_offset: None,
            is_looping: false,
            loop_start: None,
            volume: 1.0,
        }
    }

    fn player_with_def(key_id: u64, channel: u8) -> AudioPlayer<FakeHostMixer> {
        let mut collection = AudioCollection::new();
        collection.test_insert(
            key_id,
            AudioDefinition {
                key_id,
                key_string: "test".into(),
                display_name: "Test".into(),
                definition_type: AudioDefinitionType::Sound,
                channel,
                visibility: Visibility::Visible,
                sources: vec![reg(Package::Original)],
                active_source: Some(0),
            },
        );
        let sources = AudioSourceManager::new(44_100, 60.0);
        let mixer = FakeHostMixer::new(44_100, 512);
        AudioPlayer::new(collection, sources, mixer, false)
    }

    #[test]
    fn playing_same_channel_and_context_stops_the_previous_sound() {
        let mut player = player_with_def(1, 0);
        assert!(player.play_audio(1, 0));
        assert_eq!(player.num_playing_sounds(), 1);
        assert!(player.play_audio(1, 0));
        assert_eq!(player.num_playing_sounds(), 1);
    }

    #[test]
    fn play_override_pauses_the_overridden_channel() {
        let mut player = player_with_def(1, 0);
        assert!(player.play_audio_on_channel(1, 0, 0));
        let base_ref = player.playing[0].audio_ref.clone();

        player.collection.test_insert(
            2,
            AudioDefinition {
                key_id: 2,
                key_string: "override".into(),
                display_name: "Override".into(),
                definition_type: AudioDefinitionType::Sound,
                channel: 1,
                visibility: Visibility::Visible,
                sources: vec![reg(Package::Original)],
                active_source: Some(0),
            },
        );

        assert!(player.play_override(2, 0, 1, 0));
        assert!(base_ref.is_paused());
        assert_eq!(player.playing.iter().find(|p| p.key_id == 1).unwrap().state, PlayingSoundState::Overridden);
    }

    #[test]
    fn fade_out_eventually_removes_the_sound() {
        let mut player = player_with_def(1, 0);
        assert!(player.play_audio(1, 0));
        player.fade_out_channel(0, 0.01);
        for _ in 0..50 {
            player.update_playback(0.01);
        }
        assert_eq!(player.num_playing_sounds(), 0);
    }

    #[test]
    fn stop_removes_matching_sounds_immediately() {
        let mut player = player_with_def(1, 0);
        player.play_audio(1, 0);
        player.play_audio_on_channel(1, 5, 2);
        player.stop(Some(0), None);
        assert_eq!(player.num_playing_sounds(), 1);
    }

    #[test]
    fn stop_fades_a_playing_sound_instead_of_hard_cutting_it() {
        let mut player = player_with_def(1, 0);
        player.play_audio(1, 0);
        let voice = player.mixer.voice_count();
        player.stop(Some(0), None);
        assert_eq!(player.num_playing_sounds(), 0);
        // The sound stopped tracking the sound but left the mixer voice in
        // place, fading, rather than cutting it - the voice count doesn't drop.
        assert_eq!(player.mixer.voice_count(), voice);
    }

    #[test]
    fn stop_hard_removes_an_already_paused_sound() {
        let mut player = player_with_def(1, 0);
        player.play_audio(1, 0);
        player.pause(Some(0), None);
        player.stop(Some(0), None);
        assert_eq!(player.num_playing_sounds(), 0);
        assert_eq!(player.mixer.voice_count(), 0);
    }

    #[test]
    fn change_sound_context_retags_matching_sounds() {
        let mut player = player_with_def(1, 0);
        player.play_audio(1, 7);
        player.change_sound_context(7, 9);
        assert_eq!(player.playing[0].context_id, 9);
    }
}

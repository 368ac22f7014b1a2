// OggAudioSource: decodes a Vorbis stream via `lewton` into an
// `AudioBuffer`, with looping support for both static (host-mixer-driven
// loop points) and dynamic (decoder reseeks) caching.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lewton::inside_ogg::OggStreamReader;

use crate::error::{AudioError, AudioResult};

use super::{AudioBuffer, AudioSource, AudioSourceState, CachingType};

pub struct OggAudioSource {
    path: PathBuf,
    reader: Option<OggStreamReader<BufReader<File>>>,
    sample_rate: u32,
    channels: u8,
    buffer: Arc<AudioBuffer>,
    state: AudioSourceState,
    caching_type: CachingType,
    loop_start_samples: Option<usize>,
    initial_seek_samples: usize,
    track_length: Option<usize>,
    produced_samples: usize,
    read_time: f64,
    buffered_seconds: f64,
    last_used: f64,
}

impl OggAudioSource {
    pub fn open(
        path: &Path,
        caching_type: CachingType,
        loop_start_samples: Option<usize>,
        initial_seek_samples: usize,
    ) -> AudioResult<Self> {
        let file = File::open(path).map_err(|_| AudioError::ResourceMissing { path: path.to_path_buf() })?;
        let reader = OggStreamReader::new(BufReader::new(file)).map_err(|e| AudioError::Config {
            file: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let sample_rate = reader.ident_hdr.audio_sample_rate;
        let channels = reader.ident_hdr.audio_channels;

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            sample_rate,
            channels,
            buffer: Arc::new(AudioBuffer::new(sample_rate, None, caching_type == CachingType::Static)),
            state: AudioSourceState::Inactive,
            caching_type,
            loop_start_samples,
            initial_seek_samples,
            track_length: None,
            produced_samples: 0,
            read_time: 0.0,
            buffered_seconds: 0.0,
            last_used: 0.0,
        })
    }

    fn to_stereo_interleaved(&self, packet: Vec<i16>) -> Vec<i16> {
        match self.channels {
            1 => packet.into_iter().flat_map(|s| [s, s]).collect(),
            _ => packet,
        }
    }

    fn reopen(&mut self) -> AudioResult<()> {
        let file = File::open(&self.path).map_err(|_| AudioError::ResourceMissing { path: self.path.clone() })?;
        let reader = OggStreamReader::new(BufReader::new(file)).map_err(|e| AudioError::Config {
            file: self.path.clone(),
            reason: e.to_string(),
        })?;
        self.reader = Some(reader);
        Ok(())
    }

    /// Decodes forward until `target_seconds` is buffered or the stream
    /// ends, handling the loop-vs-complete branch on EOF.
    fn decode_to(&mut self, target_seconds: f64) {
        loop {
            if self.buffered_seconds >= target_seconds {
                return;
            }
            let Some(reader) = self.reader.as_mut() else { return };
            match reader.read_dec_packet_itl() {
                Ok(Some(packet)) => {
                    let stereo = self.to_stereo_interleaved(packet);
                    self.buffer.append(&stereo);
                    self.produced_samples += stereo.len() / 2;
                    self.buffered_seconds += (stereo.len() / 2) as f64 / self.sample_rate as f64;
                }
                Ok(None) => {
                    self.on_stream_end();
                    return;
                }
                Err(_) => {
                    self.on_stream_end();
                    return;
                }
            }
        }
    }

    fn on_stream_end(&mut self) {
        match self.loop_start_samples {
            None => {
                self.state = AudioSourceState::Completed;
            }
            Some(loop_start) => {
                self.track_length = Some(self.initial_seek_samples + self.produced_samples);
                if self.reopen().is_err() {
                    self.state = AudioSourceState::Completed;
                    return;
                }
                // Decode-and-discard up to the loop point; lewton's stable
                // surface has no sample-accurate seek, so looping re-walks
                // the stream from the top.
                let mut skipped = 0usize;
                if let Some(reader) = self.reader.as_mut() {
                    while skipped < loop_start {
                        match reader.read_dec_packet_itl() {
                            Ok(Some(packet)) => skipped += packet.len() / self.channels.max(1) as usize,
                            _ => break,
                        }
                    }
                }
                self.produced_samples = loop_start;
            }
        }
    }
}

impl AudioSource for OggAudioSource {
    fn startup(&mut self, precache_seconds: f64) -> Arc<AudioBuffer> {
        self.state = AudioSourceState::Streaming;
        if self.caching_type != CachingType::Static {
            self.buffer.reset();
            self.buffered_seconds = 0.0;
            self.produced_samples = 0;
        }
        self.decode_to(precache_seconds);
        self.buffer.clone()
    }

    fn progress(&mut self, precache_seconds: f64) {
        if self.state == AudioSourceState::Streaming {
            self.decode_to(self.buffered_seconds + precache_seconds);
        }
    }

    fn update_read_time(&mut self, t: f64) {
        self.read_time = self.read_time.max(t);
        self.last_used = t;
    }

    fn check_for_unload(&mut self, now: f64) -> bool {
        let idle = now - self.last_used;
        if super::should_unload(self.caching_type, self.buffered_seconds, idle) {
            self.state = AudioSourceState::Inactive;
            self.buffer.reset();
            self.buffered_seconds = 0.0;
            true
        } else {
            false
        }
    }

    fn map_audio_ref_position_to_track_position(&self, pos: f64) -> f64 {
        let (Some(loop_start), Some(track_length)) =
            (self.loop_start_samples, self.track_length)
        else {
            return pos;
        };
        let p = pos * self.sample_rate as f64;
        let loop_start = loop_start as f64;
        let track_length = track_length as f64;
        if p < track_length {
            return pos;
        }
        (loop_start + (p - loop_start) % (track_length - loop_start)) / self.sample_rate as f64
    }

    fn state(&self) -> AudioSourceState {
        self.state
    }

    fn caching_type(&self) -> CachingType {
        self.caching_type
    }

    fn last_used_timestamp(&self) -> f64 {
        self.last_used
    }

    fn read_time(&self) -> f64 {
        self.read_time
    }

    fn buffered_seconds(&self) -> f64 {
        self.buffered_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_resource_missing() {
        let err = OggAudioSource::open(Path::new("/nonexistent/path.ogg"), CachingType::Static, None, 0)
            .unwrap_err();
        matches!(err, AudioError::ResourceMissing { .. });
    }

    #[test]
    fn loop_position_mapping_is_identity_before_wraparound() {
        // Can't easily construct a decoded OggAudioSource without a real
        // file; exercise the pure position-mapping math directly through a
        // source with no reader work done.
        let src = OggAudioSource {
            path: PathBuf::new(),
            reader: None,
            sample_rate: 44_100,
            channels: 2,
            buffer: Arc::new(AudioBuffer::new(44_100, None, true)),
            state: AudioSourceState::Inactive,
            caching_type: CachingType::Static,
            loop_start_samples: Some(88_200),
            initial_seek_samples: 0,
            track_length: Some(441_000),
            produced_samples: 0,
            read_time: 0.0,
            buffered_seconds: 0.0,
            last_used: 0.0,
        };
        assert_eq!(src.map_audio_ref_position_to_track_position(1.0), 1.0);
        let wrapped = src.map_audio_ref_position_to_track_position(11.0);
        assert!(wrapped >= 2.0 && wrapped < 11.0);
    }
}

// Persistent configuration for the audio system: output sample
// rate, simulation frame rate, precache window bounds, worker thread
// count, soundtrack package preference, and the base path(s) a host
// points `AudioCollection` at. Stored as JSON in
// <config_dir>/genesis-audio-core/config.json.
//
// Unlike the reference's hand-rolled line-by-line JSON parser (a
// one-off to dodge a serde dependency it otherwise didn't need), this
// crate already depends on `serde_json` for `AudioCollection`, so
// `AudioSystemConfig` is fully derive-based.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, AudioResult};

fn default_output_sample_rate() -> u32 {
    44_100
}

fn default_frame_rate() -> f64 {
    60.0
}

fn default_precache_min_seconds() -> f64 {
    0.025
}

fn default_precache_max_seconds() -> f64 {
    0.25
}

fn default_worker_thread_count() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSystemConfig {
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    #[serde(default = "default_precache_min_seconds")]
    pub precache_min_seconds: f64,
    #[serde(default = "default_precache_max_seconds")]
    pub precache_max_seconds: f64,
    #[serde(default = "default_worker_thread_count")]
    pub worker_thread_count: usize,
    #[serde(default)]
    pub prefer_original_soundtrack: bool,
    #[serde(default)]
    pub collection_base_paths: Vec<PathBuf>,
}

impl Default for AudioSystemConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: default_output_sample_rate(),
            frame_rate: default_frame_rate(),
            precache_min_seconds: default_precache_min_seconds(),
            precache_max_seconds: default_precache_max_seconds(),
            worker_thread_count: default_worker_thread_count(),
            prefer_original_soundtrack: false,
            collection_base_paths: Vec::new(),
        }
    }
}

impl AudioSystemConfig {
    /// Precache window clamped into `[precacheMin, precacheMax]`, the
    /// bound the streaming-target invariant requires.
    pub fn clamp_precache(&self, requested: f64) -> f64 {
        requested.clamp(self.precache_min_seconds, self.precache_max_seconds)
    }

    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("config.json"))
    }

    /// Loads from the platform config directory, falling back to
    /// defaults when absent (first run) or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from_file(&path).unwrap_or_else(|e| {
            log::warn!("cannot load config, using defaults: {e}");
            Self::default()
        })
    }

    pub fn load_from_file(path: &std::path::Path) -> AudioResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|_| AudioError::ResourceMissing { path: path.to_path_buf() })?;
        serde_json::from_str(&text).map_err(|e| AudioError::Config { file: path.to_path_buf(), reason: e.to_string() })
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Err(e) = self.save_to_file(&path) {
            log::warn!("cannot save config: {e}");
        }
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> AudioResult<()> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| AudioError::Config { file: path.to_path_buf(), reason: e.to_string() })?;
        std::fs::write(path, text).map_err(|_| AudioError::ResourceMissing { path: path.to_path_buf() })
    }
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join("Library").join("Application Support").join("genesis-audio-core"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").ok()?;
        Some(PathBuf::from(appdata).join("genesis-audio-core"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join(".config").join("genesis-audio-core"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let cfg = AudioSystemConfig::default();
        assert_eq!(cfg.output_sample_rate, 44_100);
        assert_eq!(cfg.frame_rate, 60.0);
        assert_eq!(cfg.precache_min_seconds, 0.025);
        assert_eq!(cfg.precache_max_seconds, 0.25);
        assert!(!cfg.prefer_original_soundtrack);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: AudioSystemConfig = serde_json::from_str(r#"{"prefer_original_soundtrack":true}"#).unwrap();
        assert!(cfg.prefer_original_soundtrack);
        assert_eq!(cfg.output_sample_rate, 44_100);
    }

    #[test]
    fn clamp_precache_respects_bounds() {
        let cfg = AudioSystemConfig::default();
        assert_eq!(cfg.clamp_precache(0.001), 0.025);
        assert_eq!(cfg.clamp_precache(1.0), 0.25);
        assert_eq!(cfg.clamp_precache(0.1), 0.1);
    }

    #[test]
    fn missing_file_is_resource_missing() {
        let err = AudioSystemConfig::load_from_file(std::path::Path::new("/nonexistent/config.json")).unwrap_err();
        matches!(err, AudioError::ResourceMissing { .. });
    }
}

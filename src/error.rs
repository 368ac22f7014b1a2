use std::path::PathBuf;

/// The five error kinds this crate distinguishes. None of these ever unwind across an
/// audio callback: every public-facing `AudioPlayer` method logs and degrades instead of
/// propagating a `Result` to game code.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("config error in {file}: {reason}")]
    Config { file: PathBuf, reason: String },

    #[error("resource missing: {path}")]
    ResourceMissing { path: PathBuf },

    #[error("driver overrun: {produced} samples exceed frame capacity {capacity}")]
    DriverOverrun { produced: usize, capacity: usize },

    #[error("inconsistent playback state: {0}")]
    InconsistentState(String),

    #[error("platform unavailable: {0}")]
    PlatformUnavailable(String),
}

pub type AudioResult<T> = Result<T, AudioError>;

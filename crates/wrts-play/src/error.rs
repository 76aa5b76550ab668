use thiserror::Error;
use wrts_cmaf::CmafError;
use wrts_source::SourceError;

pub type PlayerResult<T> = Result<T, PlayerError>;

/// Media-buffer append failures. `ExceedsBufferSize` is the one recoverable
/// case: the player frees space and retries once.
#[derive(Debug, Error)]
pub enum MediaBufferError {
    #[error("source buffer aborted")]
    SourceBufferAborted,

    #[error("no metadata for track {0}")]
    TrackWithoutMetadata(u32),

    #[error("append failed: {0}")]
    AppendBufferIssue(String),

    #[error("append exceeds buffer size")]
    ExceedsBufferSize,
}

/// Terminal session errors, delivered through `on_stop` exactly once.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("start timeout")]
    StartTimeout,

    #[error("connection timeout")]
    ConnectionTimeout,

    #[error("data timeout")]
    DataTimeout,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    MediaBuffer(#[from] MediaBufferError),

    #[error(transparent)]
    Cmaf(#[from] CmafError),

    #[error("playback failed: {0}")]
    Playback(String),
}

use thiserror::Error;

pub type CmafResult<T> = Result<T, CmafError>;

/// Fatal writer errors; either closes playback.
#[derive(Debug, Error)]
pub enum CmafError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("unsupported track type: {0}")]
    UnsupportedTrackType(String),
}

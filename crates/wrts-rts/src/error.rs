use thiserror::Error;

pub type RtsResult<T> = Result<T, RtsError>;

/// Fatal demultiplexer errors; any of these closes the owning source.
#[derive(Debug, Error)]
pub enum RtsError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown format: {0}")]
    UnknownFormat(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("media packet for unknown track {0} without an absolute time")]
    UnfoundTrack(u32),
}

use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised while building the data model from wire input.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unknown codec: {0:?}")]
    UnknownCodec(String),

    #[error("unknown protection scheme: {0:?}")]
    UnknownScheme(String),

    #[error("invalid base64 in field {field}: {detail}")]
    InvalidBase64 { field: &'static str, detail: String },
}

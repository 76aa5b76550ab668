use thiserror::Error;
use wrts_media::MediaError;
use wrts_net::NetError;
use wrts_rts::RtsError;

pub type SourceResult<T> = Result<T, SourceError>;

/// Fatal source errors; any of these closes the source, which the player
/// turns into a single `on_stop`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unexpected issue: {0}")]
    UnexpectedIssue(String),

    #[error("request error: {0}")]
    RequestError(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
}

impl SourceError {
    /// Classify a request-failure detail string: open failures and missing
    /// resources surface as `ResourceUnavailable`, the rest as
    /// `RequestError`.
    pub fn from_request_detail(detail: String) -> Self {
        if detail.starts_with("stream open failed") || detail.starts_with("404") {
            Self::ResourceUnavailable(detail)
        } else {
            Self::RequestError(detail)
        }
    }
}

impl From<NetError> for SourceError {
    fn from(e: NetError) -> Self {
        let detail = e.to_string();
        match &e {
            NetError::HttpStatus { status: 404, .. } => Self::ResourceUnavailable(detail),
            _ if detail.starts_with("stream open failed") => Self::ResourceUnavailable(detail),
            _ => Self::RequestError(detail),
        }
    }
}

impl From<RtsError> for SourceError {
    fn from(e: RtsError) -> Self {
        Self::MalformedPayload(e.to_string())
    }
}

impl From<MediaError> for SourceError {
    fn from(e: MediaError) -> Self {
        Self::MalformedPayload(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    #[test]
    fn not_found_becomes_resource_unavailable() {
        let err: SourceError = NetError::HttpStatus {
            status: 404,
            url: Url::parse("http://example.com/s/1/100.rts").unwrap(),
        }
        .into();
        assert!(matches!(err, SourceError::ResourceUnavailable(_)));
    }

    #[test]
    fn other_statuses_stay_request_errors() {
        let err: SourceError = NetError::HttpStatus {
            status: 500,
            url: Url::parse("http://example.com/").unwrap(),
        }
        .into();
        assert!(matches!(err, SourceError::RequestError(_)));
    }
}

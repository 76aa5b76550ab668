use reqwest::Error as ReqwestError;
use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

/// Centralized error type for wrts-net.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: Url },

    #[error("websocket: {0}")]
    Ws(String),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

impl NetError {
    /// Transient failures worth a backoff-and-retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(detail) => {
                detail.contains("timeout")
                    || detail.contains("connection")
                    || detail.contains("network")
                    || detail.contains("body")
            }
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Timeout => true,
            Self::Ws(_) | Self::Cancelled => false,
        }
    }

    /// True when the request was torn down by its own token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ReqwestError> for NetError {
    fn from(e: ReqwestError) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting keeps the full error chain.
        Self::Http(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn url() -> Url {
        Url::parse("http://example.com/s/1/100.rts").unwrap()
    }

    #[rstest]
    #[case::timeout(NetError::Timeout, true)]
    #[case::status_500(NetError::HttpStatus { status: 500, url: url() }, true)]
    #[case::status_429(NetError::HttpStatus { status: 429, url: url() }, true)]
    #[case::status_404(NetError::HttpStatus { status: 404, url: url() }, false)]
    #[case::cancelled(NetError::Cancelled, false)]
    #[case::connection(NetError::Http("connection refused".into()), true)]
    #[case::other(NetError::Http("tls handshake".into()), false)]
    fn retryability(#[case] error: NetError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }
}

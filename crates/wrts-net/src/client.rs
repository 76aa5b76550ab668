use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    types::{Headers, NetOptions, RangeSpec},
};

/// Streaming HTTP client used by every pull-based source.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new(options: NetOptions) -> Self {
        let inner = Client::builder()
            .connect_timeout(options.connect_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .expect("failed to build reqwest client");
        Self { inner }
    }

    /// Open a GET request and hand back the response head plus a cancellable
    /// body stream. Non-2xx statuses are errors.
    pub async fn get(
        &self,
        url: Url,
        headers: Option<Headers>,
        range: Option<RangeSpec>,
        cancel: &CancellationToken,
    ) -> NetResult<NetResponse> {
        let mut req = self.inner.get(url.clone());
        if let Some(headers) = headers {
            for (name, value) in headers.iter() {
                req = req.header(name, value);
            }
        }
        if let Some(range) = range {
            req = req.header("Range", range.to_header_value());
        }

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(NetError::Cancelled),
            resp = req.send() => resp.map_err(NetError::from)?,
        };

        let status = resp.status().as_u16();
        if !(resp.status().is_success() || status == 206) {
            return Err(NetError::HttpStatus { status, url });
        }

        let headers = collect_headers(resp.headers());
        trace!(url = %url, status, "wrts-net: response opened");

        let stream = resp.bytes_stream().map_err(NetError::from);
        Ok(NetResponse {
            status,
            headers,
            stream: Box::pin(stream),
            cancel: cancel.clone(),
        })
    }

    /// HEAD request; resolves to the response headers on any 2xx status.
    pub async fn head(&self, url: Url, cancel: &CancellationToken) -> NetResult<Headers> {
        let req = self.inner.head(url.clone());

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(NetError::Cancelled),
            resp = req.send() => resp.map_err(NetError::from)?,
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(NetError::HttpStatus { status, url });
        }
        Ok(collect_headers(resp.headers()))
    }
}

fn collect_headers(raw: &reqwest::header::HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in raw {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str(), v);
        }
    }
    headers
}

/// An open HTTP response: status, headers, and a body that honors the
/// request token it was opened with.
pub struct NetResponse {
    pub status: u16,
    pub headers: Headers,
    stream: ByteStream,
    cancel: CancellationToken,
}

impl NetResponse {
    /// Next body chunk; `Ok(None)` at end of body,
    /// [`NetError::Cancelled`] when the token fires mid-read.
    pub async fn chunk(&mut self) -> NetResult<Option<Bytes>> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(NetError::Cancelled),
            next = self.stream.next() => next.transpose(),
        }
    }

    /// Collect the whole body.
    pub async fn bytes(mut self) -> NetResult<Bytes> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(out))
    }

    /// Drain the body without keeping it; only completion matters
    /// (bandwidth-emulation ghost requests).
    pub async fn discard(mut self) -> NetResult<u64> {
        let mut total = 0u64;
        while let Some(chunk) = self.chunk().await? {
            total += chunk.len() as u64;
        }
        Ok(total)
    }
}

impl std::fmt::Debug for NetResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

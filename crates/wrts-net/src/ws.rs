use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tokio_websockets::{ClientBuilder, MaybeTlsStream, Message, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::error::{NetError, NetResult};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One long-lived bidirectional streaming connection.
///
/// Server→client traffic is binary RTS frames; client→server traffic is
/// small JSON control messages (track and reliability changes).
pub struct WsConnection {
    ws: Ws,
}

impl WsConnection {
    pub async fn connect(url: &Url, cancel: &CancellationToken) -> NetResult<Self> {
        let uri: http::Uri = url
            .as_str()
            .parse()
            .map_err(|e| NetError::Ws(format!("invalid url {url}: {e}")))?;

        let builder = ClientBuilder::from_uri(uri);
        let connect = builder.connect();
        let (ws, _response) = tokio::select! {
            _ = cancel.cancelled() => return Err(NetError::Cancelled),
            conn = connect => conn.map_err(|e| NetError::Ws(format!("{e}")))?,
        };
        debug!(url = %url, "wrts-net: websocket open");
        Ok(Self { ws })
    }

    /// Send one JSON control message.
    pub async fn send_text(&mut self, text: String) -> NetResult<()> {
        trace!(len = text.len(), "wrts-net: ws control send");
        self.ws
            .send(Message::text(text))
            .await
            .map_err(|e| NetError::Ws(format!("{e}")))
    }

    /// Next binary frame; `Ok(None)` once the server closes, text and
    /// control frames are skipped.
    pub async fn next_binary(&mut self, cancel: &CancellationToken) -> NetResult<Option<Bytes>> {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                msg = self.ws.next() => msg,
            };
            match msg {
                None => return Ok(None),
                Some(Err(e)) => return Err(NetError::Ws(format!("{e}"))),
                Some(Ok(m)) if m.is_binary() => {
                    return Ok(Some(Bytes::copy_from_slice(&m.as_payload())));
                }
                Some(Ok(m)) if m.is_close() => return Ok(None),
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Tear the connection down; dropping the stream closes the transport.
    pub fn close(self) {}
}

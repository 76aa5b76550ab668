use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;
use wrts_media::Environment;

use crate::{
    CmcdMode, HttpAdaptiveSource, HttpDirectSource, Playing, SourceResult, TrackSelection,
    WsSource,
};

/// Parameters of one `open` call.
#[derive(Clone, Debug)]
pub struct OpenParams {
    /// Start rendering immediately.
    pub playing: bool,
    /// Frame loss and sequence skipping are forbidden.
    pub reliable: bool,
    /// Extension substituted for `{ext}` in sequence patterns.
    pub media_ext: String,
    pub cmcd: CmcdMode,
    /// Target preload (the MIDDLE threshold), milliseconds; sent on the
    /// first request.
    pub preload_ms: u64,
    pub session_id: String,
}

impl Default for OpenParams {
    fn default() -> Self {
        Self {
            playing: true,
            reliable: true,
            media_ext: "rts".into(),
            cmcd: CmcdMode::Off,
            preload_ms: 350,
            session_id: String::new(),
        }
    }
}

/// Control-plane command; coalesced by the session loop at its next tick.
#[derive(Clone, Debug)]
pub enum SourceCommand {
    SetTracks {
        audio: Option<TrackSelection>,
        video: Option<TrackSelection>,
    },
    SetReliable(bool),
}

/// Cloneable handle for steering a running source.
#[derive(Clone, Debug)]
pub struct SourceControl {
    tx: mpsc::UnboundedSender<SourceCommand>,
    cancel: CancellationToken,
}

impl SourceControl {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<SourceCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self { tx, cancel }
    }

    /// Change the selected tracks; `None` leaves a kind untouched,
    /// `TrackSelection::Disabled` turns it off.
    pub fn set_tracks(&self, audio: Option<TrackSelection>, video: Option<TrackSelection>) {
        let _ = self.tx.send(SourceCommand::SetTracks { audio, video });
    }

    pub fn set_reliable(&self, reliable: bool) {
        let _ = self.tx.send(SourceCommand::SetReliable(reliable));
    }

    /// Cancel all in-flight work; `open` resolves shortly after.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Common surface of every source variant.
///
/// `open` drives the whole session and resolves when the source finishes,
/// either cleanly (closed) or with the fatal error that stopped it.
#[async_trait]
pub trait MediaSource: Send {
    async fn open(&mut self, url: Url, params: OpenParams) -> SourceResult<()>;

    fn control(&self) -> SourceControl;
}

/// Dependencies shared by all variants, owned by the player.
#[derive(Clone)]
pub struct SourceContext {
    pub playing: Playing,
    pub environment: Arc<Environment>,
}

impl SourceContext {
    pub fn new(playing: Playing, environment: Arc<Environment>) -> Self {
        Self {
            playing,
            environment,
        }
    }
}

/// Tagged source variant: the player owns exactly one of these.
pub enum AnySource {
    HttpAdaptive(HttpAdaptiveSource),
    HttpDirect(HttpDirectSource),
    Ws(WsSource),
}

#[async_trait]
impl MediaSource for AnySource {
    async fn open(&mut self, url: Url, params: OpenParams) -> SourceResult<()> {
        match self {
            Self::HttpAdaptive(source) => source.open(url, params).await,
            Self::HttpDirect(source) => source.open(url, params).await,
            Self::Ws(source) => source.open(url, params).await,
        }
    }

    fn control(&self) -> SourceControl {
        match self {
            Self::HttpAdaptive(source) => source.control(),
            Self::HttpDirect(source) => source.control(),
            Self::Ws(source) => source.control(),
        }
    }
}

/// Append the client query parameters of a stream-open request.
pub(crate) fn apply_open_query(url: &mut Url, core: &crate::SourceCore, params: &OpenParams) {
    let mut query = url.query_pairs_mut();
    if let Some(value) = core.selected_audio().query_value() {
        query.append_pair("audio", &value);
    }
    if let Some(value) = core.selected_video().query_value() {
        query.append_pair("video", &value);
    }
    query.append_pair("reliable", if core.reliable() { "true" } else { "false" });
    query.append_pair("preload", &params.preload_ms.to_string());
}

/// Attach CMCD to a stream-open request when query mode is on.
pub(crate) fn apply_open_cmcd(url: &mut Url, cmcd: &crate::Cmcd, playing: &Playing) {
    if cmcd.mode() != crate::CmcdMode::Query {
        return;
    }
    let buffer_ms = playing.buffer_amount();
    let ctx = crate::CmcdContext {
        bitrate_kbps: None,
        buffer_ms,
        throughput_kbps: None,
        playback_rate: playing.playback_rate(),
        buffer_empty: buffer_ms == 0,
        object_type: None,
        deadline_ms: Some(buffer_ms),
        content_id: None,
    };
    let mut headers = wrts_net::Headers::new();
    cmcd.apply(url, &mut headers, &ctx);
}

impl AnySource {
    /// Pick the variant from the URL scheme: `ws`/`wss` is the WebSocket
    /// source, anything else the adaptive pull source unless `direct`.
    pub fn for_url(url: &Url, context: SourceContext, direct: bool) -> Self {
        match url.scheme() {
            "ws" | "wss" => Self::Ws(WsSource::new(context)),
            _ if direct => Self::HttpDirect(HttpDirectSource::new(context)),
            _ => Self::HttpAdaptive(HttpAdaptiveSource::new(context, Default::default())),
        }
    }

    pub fn callbacks_mut(&mut self) -> &mut crate::SourceCallbacks {
        match self {
            Self::HttpAdaptive(source) => source.callbacks_mut(),
            Self::HttpDirect(source) => source.callbacks_mut(),
            Self::Ws(source) => source.callbacks_mut(),
        }
    }
}

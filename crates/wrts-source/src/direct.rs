use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use wrts_media::TrackKind;
use wrts_net::{HttpClient, NetError, RequestToken};
use wrts_rts::RtsDemux;

use crate::{
    EffectiveTrack, OpenParams, SourceCallbacks, SourceCommand, SourceControl, SourceCore,
    SourceError, SourceResult, TrackSelection, source::SourceContext,
};

/// Streaming source over one long HTTP response.
///
/// The body is a size-prefixed RTS byte stream. Control-plane changes have
/// no in-band representation here: a track or reliability change aborts the
/// current response and reopens with updated query parameters.
pub struct HttpDirectSource {
    core: SourceCore,
    client: HttpClient,
    context: SourceContext,
    cancel: CancellationToken,
    cmd_tx: mpsc::UnboundedSender<SourceCommand>,
    cmd_rx: mpsc::UnboundedReceiver<SourceCommand>,
}

impl HttpDirectSource {
    pub fn new(context: SourceContext) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            core: SourceCore::new(),
            client: HttpClient::new(Default::default()),
            context,
            cancel: CancellationToken::new(),
            cmd_tx,
            cmd_rx,
        }
    }

    pub fn callbacks_mut(&mut self) -> &mut SourceCallbacks {
        &mut self.core.callbacks
    }

    pub fn control(&self) -> SourceControl {
        SourceControl::new(self.cmd_tx.clone(), self.cancel.clone())
    }

    pub async fn open(&mut self, url: Url, params: OpenParams) -> SourceResult<()> {
        self.core.set_reliable(params.reliable);
        let cmcd = crate::Cmcd::new(params.cmcd, params.session_id.clone());

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let mut request_url = url.clone();
            crate::source::apply_open_query(&mut request_url, &self.core, &params);
            crate::source::apply_open_cmcd(&mut request_url, &cmcd, &self.context.playing);
            debug!(url = %request_url, "direct: opening stream");

            let token = RequestToken::new(&self.cancel);
            let mut resp = match self
                .client
                .get(request_url, None, None, token.cancellation())
                .await
            {
                Ok(resp) => resp,
                Err(NetError::Cancelled) => return Ok(()),
                Err(err) => {
                    return Err(SourceError::from_request_detail(format!(
                        "stream open failed: {err}"
                    )));
                }
            };

            let mut demux = RtsDemux::new(true);
            let mut reopen = false;

            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(()),
                    cmd = self.cmd_rx.recv() => {
                        let Some(cmd) = cmd else { continue };
                        if self.apply_command(cmd) {
                            // New wire parameters: drop this response and
                            // reopen.
                            token.abort();
                            reopen = true;
                        }
                    }
                    chunk = resp.chunk() => match chunk {
                        Ok(Some(chunk)) => {
                            self.core.record_bytes(chunk.len() as u64);
                            for event in demux.push(&chunk)? {
                                self.core.handle_event(event)?;
                            }
                        }
                        Ok(None) => {
                            debug!("direct: stream ended");
                            return Ok(());
                        }
                        Err(NetError::Cancelled) => break,
                        Err(err) => {
                            warn!(error = %err, "direct: stream read failed");
                            return Err(err.into());
                        }
                    },
                }
                if reopen {
                    break;
                }
            }

            if !reopen {
                return Ok(());
            }
        }
    }

    /// Returns true when the change must be re-negotiated over the wire.
    fn apply_command(&mut self, cmd: SourceCommand) -> bool {
        match cmd {
            SourceCommand::SetTracks { audio, video } => {
                let changed = self.core.set_selected(audio, video);
                if changed {
                    if self.core.selected_audio() == TrackSelection::Disabled {
                        self.core
                            .note_effective(TrackKind::Audio, EffectiveTrack::Disabled);
                    }
                    if self.core.selected_video() == TrackSelection::Disabled {
                        self.core
                            .note_effective(TrackKind::Video, EffectiveTrack::Disabled);
                    }
                }
                changed
            }
            SourceCommand::SetReliable(reliable) => {
                if reliable == self.core.reliable() {
                    return false;
                }
                self.core.set_reliable(reliable);
                true
            }
        }
    }
}

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use wrts_media::TrackKind;
use wrts_net::WsConnection;
use wrts_rts::RtsDemux;

use crate::{
    EffectiveTrack, OpenParams, SourceCallbacks, SourceCommand, SourceControl, SourceCore,
    SourceError, SourceResult, TrackSelection, source::SourceContext,
};

/// Streaming source over one long-lived WebSocket.
///
/// Server→client frames are RTS packets (framed transport, no size prefix);
/// client→server messages are small JSON control objects for track and
/// reliability changes.
pub struct WsSource {
    core: SourceCore,
    context: SourceContext,
    cancel: CancellationToken,
    cmd_tx: mpsc::UnboundedSender<SourceCommand>,
    cmd_rx: mpsc::UnboundedReceiver<SourceCommand>,
}

impl WsSource {
    pub fn new(context: SourceContext) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            core: SourceCore::new(),
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

        let mut request_url = url.clone();
        crate::source::apply_open_query(&mut request_url, &self.core, &params);
        crate::source::apply_open_cmcd(&mut request_url, &cmcd, &self.context.playing);
        debug!(url = %request_url, "ws: connecting");

        let mut conn = match WsConnection::connect(&request_url, &self.cancel).await {
            Ok(conn) => conn,
            Err(wrts_net::NetError::Cancelled) => return Ok(()),
            Err(err) => {
                return Err(SourceError::from_request_detail(format!(
                    "stream open failed: {err}"
                )));
            }
        };

        let mut demux = RtsDemux::new(false);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    conn.close();
                    return Ok(());
                }
                cmd = self.cmd_rx.recv() => {
                    let Some(first) = cmd else { continue };
                    // Coalesce rapid assignments into one control message.
                    let mut commands = vec![first];
                    while let Ok(next) = self.cmd_rx.try_recv() {
                        commands.push(next);
                    }
                    self.apply_commands(commands, &mut conn).await?;
                }
                frame = conn.next_binary(&self.cancel) => match frame {
                    Ok(Some(frame)) => {
                        self.core.record_bytes(frame.len() as u64);
                        let event = demux.parse_frame(&frame)?;
                        self.core.handle_event(event)?;
                    }
                    Ok(None) => {
                        debug!("ws: server closed the stream");
                        return Ok(());
                    }
                    Err(wrts_net::NetError::Cancelled) => {
                        conn.close();
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(error = %err, "ws: receive failed");
                        return Err(err.into());
                    }
                },
            }
        }
    }

    async fn apply_commands(
        &mut self,
        commands: Vec<SourceCommand>,
        conn: &mut WsConnection,
    ) -> SourceResult<()> {
        let mut tracks_changed = false;
        let mut reliability: Option<bool> = None;

        for cmd in commands {
            match cmd {
                SourceCommand::SetTracks { audio, video } => {
                    if self.core.set_selected(audio, video) {
                        tracks_changed = true;
                    }
                }
                SourceCommand::SetReliable(reliable) => {
                    if reliable != self.core.reliable() {
                        self.core.set_reliable(reliable);
                        reliability = Some(reliable);
                    }
                }
            }
        }

        if tracks_changed {
            let message = json!({
                "audio": selection_value(self.core.selected_audio()),
                "video": selection_value(self.core.selected_video()),
            });
            conn.send_text(message.to_string())
                .await
                .map_err(SourceError::from)?;

            // Deselection will never produce a sample; force the effective
            // state so the first-sample buffer is not left waiting.
            if self.core.selected_audio() == TrackSelection::Disabled {
                self.core
                    .note_effective(TrackKind::Audio, EffectiveTrack::Disabled);
            }
            if self.core.selected_video() == TrackSelection::Disabled {
                self.core
                    .note_effective(TrackKind::Video, EffectiveTrack::Disabled);
            }
        }

        if let Some(reliable) = reliability {
            conn.send_text(json!({ "reliable": reliable }).to_string())
                .await
                .map_err(SourceError::from)?;
        }
        Ok(())
    }
}

/// Wire encoding of a selection: pinned id, `""` automatic, `"~"` deselect.
fn selection_value(selection: TrackSelection) -> String {
    match selection {
        TrackSelection::Auto => String::new(),
        TrackSelection::Disabled => "~".into(),
        TrackSelection::Id(id) => id.to_string(),
    }
}

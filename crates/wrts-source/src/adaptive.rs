use std::{
    collections::HashMap,
    pin::Pin,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::{Future, stream::FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;
use wrts_media::{BufferState, Metadata, Resolution, SequenceInfo, TrackKind};
use wrts_net::{
    Headers, HttpClient, NetError, NetOptions, RangeSpec, RequestToken, RetryPolicy,
};
use wrts_rts::{RtsDemux, RtsEvent};

use crate::{
    AdaptiveRetry, Cmcd, CmcdContext, EffectiveTrack, OpenParams, PlaybackSignal, SourceCallbacks,
    SourceCommand, SourceControl, SourceCore, SourceError, SourceResult, TrackSelection,
    source::SourceContext,
};

#[derive(Clone, Debug)]
pub struct AdaptiveOptions {
    pub net: NetOptions,
    pub retry: RetryPolicy,
}

impl Default for AdaptiveOptions {
    fn default() -> Self {
        Self {
            net: NetOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// One in-flight request slot of the sequence loop.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum Slot {
    Audio,
    Video,
    Up,
}

/// Settled result of one slot, the "aborted" sentinel included.
#[derive(Debug)]
enum FetchOutcome {
    Completed { headers: Headers },
    Aborted,
    Failed(NetError),
}

/// Mutable loop state carried across sequence iterations.
#[derive(Debug, Default)]
struct LoopState {
    sequence_id: u64,
    /// Chosen video track as an index into `Metadata::tracks`.
    video_choice: Option<usize>,
    max_sequence_duration: Option<u64>,
    last_video_aborted: bool,
    last_up_aborted: bool,
    up_succeeded: bool,
    stalled: bool,
    first_request: bool,
    /// Media duration of the last completed sequence, for sizing up probes.
    last_sequence_video_ms: Option<u64>,
    transient_attempts: u32,
}

/// Pull-based adaptive source: numbered sequences, bitrate adaptation,
/// frame skipping and bandwidth-emulation probes.
pub struct HttpAdaptiveSource {
    core: SourceCore,
    client: HttpClient,
    context: SourceContext,
    options: AdaptiveOptions,
    cancel: CancellationToken,
    cmd_tx: mpsc::UnboundedSender<SourceCommand>,
    cmd_rx: mpsc::UnboundedReceiver<SourceCommand>,
    retry_gate: AdaptiveRetry,
    cmcd: Cmcd,
}

impl HttpAdaptiveSource {
    pub fn new(context: SourceContext, options: AdaptiveOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            core: SourceCore::new(),
            client: HttpClient::new(options.net.clone()),
            context,
            options,
            cancel: CancellationToken::new(),
            cmd_tx,
            cmd_rx,
            retry_gate: AdaptiveRetry::new(),
            cmcd: Cmcd::new(Default::default(), String::new()),
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
        self.cmcd = Cmcd::new(params.cmcd, params.session_id.clone());

        let manifest_url = normalize_endpoint(&url);
        debug!(url = %manifest_url, "adaptive: fetching manifest");

        let (manifest, rtt) = match self.fetch_manifest(&manifest_url).await {
            Ok(pair) => pair,
            Err(_) if self.cancel.is_cancelled() => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut metadata = Metadata::from_manifest(&manifest)?;
        metadata.live_mut().shift((rtt.as_millis() / 2) as i64);
        let sequence = metadata.sequence.clone().ok_or_else(|| {
            SourceError::MalformedPayload("manifest carries no sequence section".into())
        })?;
        self.core.set_metadata(metadata);

        let mut signals = self.context.playing.subscribe();
        let mut state = LoopState {
            sequence_id: sequence.current_id,
            first_request: true,
            ..LoopState::default()
        };

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.drain_commands();
            self.run_sequence(&manifest_url, &sequence, &params, &mut state, &mut signals)
                .await?;
        }
    }

    /// One iteration of the main loop: select renditions, maybe skip ahead,
    /// download sequence `state.sequence_id`, settle all slots.
    async fn run_sequence(
        &mut self,
        base: &Url,
        sequence: &SequenceInfo,
        params: &OpenParams,
        state: &mut LoopState,
        signals: &mut tokio::sync::broadcast::Receiver<PlaybackSignal>,
    ) -> SourceResult<()> {
        let playing_state = self.context.playing.state();

        // Rendition selection.
        let audio_track = self.choose_audio();
        let audio_bandwidth = self.track_bandwidth(audio_track);
        state.video_choice = self.choose_video(state, playing_state, audio_bandwidth);
        state.stalled = false;

        let video_track = state
            .video_choice
            .and_then(|idx| self.core.metadata().map(|m| m.tracks[idx].id));
        self.note_requests(audio_track, video_track);

        // Kinds with nothing to request count as known-disabled so the
        // first-sample buffer is not held back waiting for them.
        if audio_track.is_none() {
            self.core
                .note_effective(TrackKind::Audio, EffectiveTrack::Disabled);
        }
        if video_track.is_none() {
            self.core
                .note_effective(TrackKind::Video, EffectiveTrack::Disabled);
        }

        // Proactive sequence skip toward the live edge.
        if !self.core.reliable()
            && playing_state == BufferState::Low
            && self.context.playing.is_buffering()
            && let (Some(max_seq), Some(track_id)) =
                (state.max_sequence_duration, video_track.or(audio_track))
        {
            state.sequence_id = self
                .plan_sequence_skip(
                    base,
                    sequence,
                    &params.media_ext,
                    track_id,
                    state.sequence_id,
                    max_seq,
                )
                .await;
        }

        // Last-chance rendition: bottom of the ladder under congestion.
        let last_chance = !self.core.reliable()
            && !self.context.playing.is_buffering()
            && playing_state == BufferState::Low
            && state
                .video_choice
                .is_some_and(|idx| self.core.metadata().is_some_and(|m| m.tracks[idx].down.is_none()));

        let tokens: HashMap<Slot, RequestToken> = [
            (Slot::Audio, RequestToken::new(&self.cancel)),
            (Slot::Video, RequestToken::new(&self.cancel)),
            (Slot::Up, RequestToken::new(&self.cancel)),
        ]
        .into();

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<(Slot, Bytes)>();
        let mut jobs: FuturesUnordered<
            Pin<Box<dyn Future<Output = (Slot, FetchOutcome)> + Send>>,
        > = FuturesUnordered::new();

        let video_time_before = self.core.current_time(TrackKind::Video);

        if let Some(track_id) = audio_track {
            let url = self.sequence_url(
                base, sequence, track_id, state.sequence_id, &params.media_ext, params, state,
                'a',
            )?;
            let headers = self.cmcd_headers('a', Some(track_id));
            jobs.push(Box::pin(fetch_sequence(
                self.client.clone(),
                Slot::Audio,
                url,
                headers,
                None,
                tokens[&Slot::Audio].clone(),
                chunk_tx.clone(),
            )));
        }

        if let Some(track_id) = video_track {
            let url = self.sequence_url(
                base, sequence, track_id, state.sequence_id, &params.media_ext, params, state,
                'v',
            )?;
            // Without the advertised frame length there is no single-frame
            // fetch; fall back to the full sequence.
            let range = if last_chance {
                self.first_frame_range(&url, &tokens[&Slot::Video]).await
            } else {
                None
            };
            let headers = self.cmcd_headers('v', Some(track_id));
            jobs.push(Box::pin(fetch_sequence(
                self.client.clone(),
                Slot::Video,
                url,
                headers,
                range,
                tokens[&Slot::Video].clone(),
                chunk_tx.clone(),
            )));
        }

        // Bandwidth emulation: ghost-fetch a slice of the next rendition up.
        if let Some(up_request) = self.plan_up_probe(state, base, sequence, &params.media_ext) {
            jobs.push(Box::pin(fetch_discard(
                self.client.clone(),
                Slot::Up,
                up_request.0,
                up_request.1,
                tokens[&Slot::Up].clone(),
            )));
        }
        drop(chunk_tx);
        let total_jobs = jobs.len();

        if jobs.is_empty() {
            // Both kinds disabled: nothing to pull, wait for a command.
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                cmd = self.cmd_rx.recv() => {
                    if let Some(cmd) = cmd {
                        self.apply_command(cmd);
                    }
                }
            }
            return Ok(());
        }

        state.first_request = false;

        // All-settled await with event reactions.
        let mut outcomes: HashMap<Slot, FetchOutcome> = HashMap::new();
        let mut demuxers: HashMap<Slot, RtsDemux> = HashMap::new();
        let mut video_closed = false;

        while outcomes.len() < total_jobs {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    for token in tokens.values() {
                        token.abort();
                    }
                    while let Some((slot, outcome)) = jobs.next().await {
                        outcomes.insert(slot, outcome);
                    }
                    break;
                }
                Some((slot, chunk)) = chunk_rx.recv() => {
                    self.on_chunk(
                        slot,
                        &chunk,
                        &mut demuxers,
                        last_chance,
                        &mut video_closed,
                        state,
                        &tokens,
                    )?;
                }
                Some((slot, outcome)) = jobs.next() => {
                    outcomes.insert(slot, outcome);
                }
                signal = signals.recv() => {
                    match signal {
                        Ok(PlaybackSignal::State(BufferState::Low)) => {
                            tokens[&Slot::Up].abort();
                        }
                        Ok(PlaybackSignal::Stall) => {
                            state.stalled = true;
                            self.cmcd.note_stall();
                            if !self.core.reliable() {
                                tokens[&Slot::Audio].abort();
                                tokens[&Slot::Video].abort();
                                tokens[&Slot::Up].abort();
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // Late chunks that raced the final outcome.
        while let Ok((slot, chunk)) = chunk_rx.try_recv() {
            self.on_chunk(
                slot,
                &chunk,
                &mut demuxers,
                last_chance,
                &mut video_closed,
                state,
                &tokens,
            )?;
        }

        self.settle(state, outcomes, video_time_before).await
    }

    /// Digest the settled outcomes into the next loop state.
    async fn settle(
        &mut self,
        state: &mut LoopState,
        outcomes: HashMap<Slot, FetchOutcome>,
        video_time_before: Option<u64>,
    ) -> SourceResult<()> {
        state.last_video_aborted =
            matches!(outcomes.get(&Slot::Video), Some(FetchOutcome::Aborted));
        state.last_up_aborted = matches!(outcomes.get(&Slot::Up), Some(FetchOutcome::Aborted));
        state.up_succeeded =
            matches!(outcomes.get(&Slot::Up), Some(FetchOutcome::Completed { .. }));

        let mut any_completed = false;
        let mut transient: Option<NetError> = None;
        for (slot, outcome) in &outcomes {
            match outcome {
                FetchOutcome::Completed { headers } => {
                    if *slot != Slot::Up {
                        any_completed = true;
                        if let Some(ms) = headers.get_u64("max-sequence-duration") {
                            state.max_sequence_duration = Some(ms);
                        }
                    }
                }
                FetchOutcome::Aborted => {}
                FetchOutcome::Failed(err) if *slot == Slot::Up => {
                    trace!(error = %err, "adaptive: up probe failed");
                }
                FetchOutcome::Failed(err) => {
                    if err.is_retryable() {
                        transient = Some(err.clone());
                    } else {
                        return Err(SourceError::from(err.clone()));
                    }
                }
            }
        }

        if any_completed {
            let video_after = self.core.current_time(TrackKind::Video);
            if let (Some(before), Some(after)) = (video_time_before, video_after)
                && after > before
            {
                state.last_sequence_video_ms = Some(after - before);
            }
            state.sequence_id += 1;
            state.transient_attempts = 0;
            self.cmcd.note_success();
            return Ok(());
        }

        if let Some(err) = transient {
            if !self
                .options
                .retry
                .should_retry(state.transient_attempts, true)
            {
                return Err(SourceError::from(err));
            }
            state.transient_attempts += 1;
            warn!(
                error = %err,
                attempt = state.transient_attempts,
                "adaptive: transient sequence failure, backing off"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.options.retry.delay()) => {}
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn on_chunk(
        &mut self,
        slot: Slot,
        chunk: &Bytes,
        demuxers: &mut HashMap<Slot, RtsDemux>,
        last_chance: bool,
        video_closed: &mut bool,
        state: &LoopState,
        tokens: &HashMap<Slot, RequestToken>,
    ) -> SourceResult<()> {
        self.core.record_bytes(chunk.len() as u64);
        let demux = demuxers.entry(slot).or_insert_with(|| RtsDemux::new(true));
        let events = demux.push(chunk)?;

        for event in events {
            if slot == Slot::Video && *video_closed {
                continue;
            }
            if slot == Slot::Video
                && last_chance
                && let RtsEvent::Video { track_id, mut sample } = event
            {
                // Single-frame policy: under congestion keep audio rolling
                // and stretch one key frame across the sequence window.
                let triggered =
                    self.context.playing.buffer_amount() == 0 || sample.is_key_frame;
                if triggered && let Some(max_seq) = state.max_sequence_duration {
                    tokens[&Slot::Video].abort();
                    *video_closed = true;
                    let stretch = max_seq.saturating_sub(sample.duration.unsigned_abs());
                    if stretch > 0 {
                        self.core.callbacks.video_skipping(stretch);
                    }
                    sample.duration = -(max_seq as i64);
                }
                self.core.ingest_media(TrackKind::Video, track_id, sample);
                continue;
            }
            self.core.handle_event(event)?;
        }
        Ok(())
    }

    /// Choose the audio track id, `None` when disabled or absent.
    fn choose_audio(&self) -> Option<u32> {
        let metadata = self.core.metadata()?;
        match self.core.selected_audio() {
            TrackSelection::Disabled => None,
            TrackSelection::Id(id) => metadata.track(id).map(|t| t.id),
            TrackSelection::Auto => metadata
                .audio_tracks
                .first()
                .map(|&idx| metadata.tracks[idx].id),
        }
    }

    fn track_bandwidth(&self, track_id: Option<u32>) -> u64 {
        track_id
            .and_then(|id| self.core.metadata().and_then(|m| m.track(id)))
            .map_or(0, |t| t.bandwidth)
    }

    /// Video rendition decision for this iteration.
    fn choose_video(
        &mut self,
        state: &LoopState,
        playing_state: BufferState,
        audio_bandwidth: u64,
    ) -> Option<usize> {
        let selected = self.core.selected_video();
        let recv_rate = self.core.recv_byte_rate();
        let metadata = self.core.metadata()?;
        // A metadata refresh may have invalidated the stored index.
        let current = state
            .video_choice
            .filter(|&i| metadata.tracks.get(i).is_some_and(|t| t.kind == TrackKind::Video));
        match selected {
            TrackSelection::Disabled => None,
            TrackSelection::Id(id) => metadata.track_index(id),
            TrackSelection::Auto => select_video_track(
                metadata,
                current,
                &SelectionInputs {
                    recv_byte_rate: recv_rate,
                    state: playing_state,
                    last_video_aborted: state.last_video_aborted,
                    last_up_aborted: state.last_up_aborted,
                    stalled: state.stalled,
                    up_succeeded: state.up_succeeded,
                    audio_bandwidth,
                    max_resolution: self.context.environment.max_resolution(),
                },
                &mut self.retry_gate,
            ),
        }
    }

    fn note_requests(&mut self, audio: Option<u32>, video: Option<u32>) {
        self.core.note_requested(
            TrackKind::Audio,
            audio.map_or(EffectiveTrack::Disabled, EffectiveTrack::Id),
        );
        self.core.note_requested(
            TrackKind::Video,
            video.map_or(EffectiveTrack::Disabled, EffectiveTrack::Id),
        );
    }

    /// HEAD candidates ahead of `n` until one exists; every miss lowers the
    /// trusted live anchor by one sequence window.
    async fn plan_sequence_skip(
        &mut self,
        base: &Url,
        sequence: &SequenceInfo,
        ext: &str,
        track_id: u32,
        n: u64,
        max_seq: u64,
    ) -> u64 {
        let mut prev_candidate = u64::MAX;
        loop {
            let Some(current) = self.core.max_current_time() else {
                return n;
            };
            let Some(metadata) = self.core.metadata() else {
                return n;
            };
            let delay = metadata.live_time_ms().saturating_sub(current);
            if delay <= max_seq {
                return n;
            }
            let candidate = (n + delay / max_seq).min(prev_candidate.saturating_sub(1));
            if candidate <= n {
                return n;
            }

            let Ok(url) = base.join(&sequence.format(track_id, candidate, ext)) else {
                return n;
            };
            match self.client.head(url, &self.cancel).await {
                Ok(_) => {
                    debug!(from = n, to = candidate, "adaptive: skipping sequences");
                    return candidate;
                }
                Err(NetError::Cancelled) => return n,
                Err(err) => {
                    trace!(candidate, error = %err, "adaptive: skip probe missed");
                    if let Some(metadata) = self.core.metadata_mut() {
                        metadata.live_mut().shift(-(max_seq as i64));
                    }
                    prev_candidate = candidate;
                }
            }
        }
    }

    /// HEAD the sequence for its advertised first-frame length.
    async fn first_frame_range(&self, url: &Url, token: &RequestToken) -> Option<RangeSpec> {
        let headers = self
            .client
            .head(url.clone(), token.cancellation())
            .await
            .ok()?;
        let len = headers.get_u64("first-frame-length")?;
        RangeSpec::first_bytes(len)
    }

    /// Decide the bandwidth-emulation ghost request, if any.
    fn plan_up_probe(
        &mut self,
        state: &LoopState,
        base: &Url,
        sequence: &SequenceInfo,
        ext: &str,
    ) -> Option<(Url, RangeSpec)> {
        let choice = state.video_choice?;
        let sequence_ms = state.last_sequence_video_ms?;
        let metadata = self.core.metadata()?;
        let current = &metadata.tracks[choice];
        let up = metadata.up_of(choice)?;

        let max_resolution = self.context.environment.max_resolution();
        if up
            .resolution
            .is_some_and(|r| r.exceeds(&max_resolution))
        {
            return None;
        }

        // The probe adds exactly the extra byte rate the higher rendition
        // would cost; a non-positive extra rate never issues.
        let extra_byte_rate = up.bandwidth.checked_sub(current.bandwidth)?;
        if extra_byte_rate == 0 {
            return None;
        }

        let up_id = up.id;
        if !self.retry_gate.try_up() {
            return None;
        }

        let len = (extra_byte_rate as f64 * sequence_ms as f64 / 1000.0).ceil() as u64;
        let range = RangeSpec::first_bytes(len)?;
        let url = base
            .join(&sequence.format(up_id, state.sequence_id.saturating_sub(1), ext))
            .ok()?;
        debug!(up_track = up_id, bytes = len, "adaptive: issuing up probe");
        Some((url, range))
    }

    #[allow(clippy::too_many_arguments)]
    fn sequence_url(
        &mut self,
        base: &Url,
        sequence: &SequenceInfo,
        track_id: u32,
        sequence_id: u64,
        ext: &str,
        params: &OpenParams,
        state: &LoopState,
        object_type: char,
    ) -> SourceResult<Url> {
        let mut url = base
            .join(&sequence.format(track_id, sequence_id, ext))
            .map_err(|e| SourceError::UnexpectedIssue(format!("sequence url: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("reliable", if self.core.reliable() { "true" } else { "false" });
            if state.first_request {
                query.append_pair("preload", &params.preload_ms.to_string());
            }
        }
        if self.cmcd.mode() == crate::CmcdMode::Query {
            let ctx = self.cmcd_context(object_type, Some(track_id));
            let mut headers = Headers::new();
            self.cmcd.apply(&mut url, &mut headers, &ctx);
        }
        Ok(url)
    }

    fn cmcd_headers(&mut self, object_type: char, track_id: Option<u32>) -> Option<Headers> {
        if self.cmcd.mode() != crate::CmcdMode::Headers {
            return None;
        }
        let ctx = self.cmcd_context(object_type, track_id);
        let mut url = Url::parse("http://cmcd.invalid/").expect("static url");
        let mut headers = Headers::new();
        self.cmcd.apply(&mut url, &mut headers, &ctx);
        Some(headers)
    }

    fn cmcd_context(&mut self, object_type: char, track_id: Option<u32>) -> CmcdContext {
        let buffer_ms = self.context.playing.buffer_amount();
        let bitrate_kbps = track_id
            .and_then(|id| self.core.metadata().and_then(|m| m.track(id)))
            .map(|t| t.bandwidth * 8 / 1000);
        let throughput_kbps = self.core.recv_byte_rate().map(|bps| bps * 8 / 1000);
        CmcdContext {
            bitrate_kbps,
            buffer_ms,
            throughput_kbps,
            playback_rate: self.context.playing.playback_rate(),
            buffer_empty: buffer_ms == 0,
            object_type: Some(object_type),
            deadline_ms: Some(buffer_ms),
            content_id: None,
        }
    }

    async fn fetch_manifest(&mut self, url: &Url) -> SourceResult<(wrts_media::Manifest, Duration)> {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = self.client.get(url.clone(), None, None, &self.cancel).await;
            match result {
                Ok(resp) => {
                    let rtt = started.elapsed();
                    match resp.bytes().await {
                        Ok(body) => {
                            let manifest = wrts_media::Manifest::parse(&body)?;
                            return Ok((manifest, rtt));
                        }
                        Err(err) if err.is_retryable() => {
                            attempt += 1;
                            if !self.options.retry.should_retry(attempt, true) {
                                return Err(err.into());
                            }
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if !self.options.retry.should_retry(attempt, true) {
                        return Err(err.into());
                    }
                }
                Err(err) => return Err(err.into()),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SourceError::RequestError("cancelled".into())),
                _ = tokio::time::sleep(self.options.retry.delay()) => {}
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.apply_command(cmd);
        }
    }

    fn apply_command(&mut self, cmd: SourceCommand) {
        match cmd {
            SourceCommand::SetTracks { audio, video } => {
                if self.core.set_selected(audio, video) {
                    // Deselection forces the effective track to known-off so
                    // playback is not left waiting for a first sample.
                    if self.core.selected_audio() == TrackSelection::Disabled {
                        self.core
                            .note_effective(TrackKind::Audio, EffectiveTrack::Disabled);
                    }
                    if self.core.selected_video() == TrackSelection::Disabled {
                        self.core
                            .note_effective(TrackKind::Video, EffectiveTrack::Disabled);
                    }
                }
            }
            SourceCommand::SetReliable(reliable) => {
                self.core.set_reliable(reliable);
            }
        }
    }
}

/// Transport half of one sequence request: open, stream chunks out, settle.
async fn fetch_sequence(
    client: HttpClient,
    slot: Slot,
    url: Url,
    headers: Option<Headers>,
    range: Option<RangeSpec>,
    token: RequestToken,
    chunks: mpsc::UnboundedSender<(Slot, Bytes)>,
) -> (Slot, FetchOutcome) {
    let mut resp = match client.get(url, headers, range, token.cancellation()).await {
        Ok(resp) => resp,
        Err(NetError::Cancelled) => return (slot, FetchOutcome::Aborted),
        Err(err) => return (slot, FetchOutcome::Failed(err)),
    };
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                if chunks.send((slot, chunk)).is_err() {
                    return (slot, FetchOutcome::Aborted);
                }
            }
            Ok(None) => {
                return (
                    slot,
                    FetchOutcome::Completed {
                        headers: resp.headers.clone(),
                    },
                );
            }
            Err(NetError::Cancelled) => return (slot, FetchOutcome::Aborted),
            Err(err) => return (slot, FetchOutcome::Failed(err)),
        }
    }
}

/// Ghost request: body bytes are thrown away, only settlement matters.
async fn fetch_discard(
    client: HttpClient,
    slot: Slot,
    url: Url,
    range: RangeSpec,
    token: RequestToken,
) -> (Slot, FetchOutcome) {
    let resp = match client
        .get(url, None, Some(range), token.cancellation())
        .await
    {
        Ok(resp) => resp,
        Err(NetError::Cancelled) => return (slot, FetchOutcome::Aborted),
        Err(err) => return (slot, FetchOutcome::Failed(err)),
    };
    let headers = resp.headers.clone();
    match resp.discard().await {
        Ok(_) => (slot, FetchOutcome::Completed { headers }),
        Err(NetError::Cancelled) => (slot, FetchOutcome::Aborted),
        Err(err) => (slot, FetchOutcome::Failed(err)),
    }
}

/// Inputs of one video-rendition decision.
#[derive(Debug)]
pub(crate) struct SelectionInputs {
    pub recv_byte_rate: Option<u64>,
    pub state: BufferState,
    pub last_video_aborted: bool,
    pub last_up_aborted: bool,
    pub stalled: bool,
    pub up_succeeded: bool,
    pub audio_bandwidth: u64,
    pub max_resolution: Resolution,
}

/// The rendition decision: a pure function over the metadata chain and the
/// observations of the last loop iteration.
pub(crate) fn select_video_track(
    metadata: &Metadata,
    current: Option<usize>,
    inputs: &SelectionInputs,
    gate: &mut AdaptiveRetry,
) -> Option<usize> {
    let chain = &metadata.video_tracks;
    let head = *chain.first()?;

    let mut choice = match current {
        Some(index) => index,
        None => {
            // First decision: the best rendition the measured rate affords.
            let mut pick = head;
            if let Some(rate) = inputs.recv_byte_rate {
                for &index in chain {
                    pick = index;
                    if metadata.tracks[index].bandwidth + inputs.audio_bandwidth <= rate {
                        break;
                    }
                }
            }
            pick
        }
    };

    if inputs.state.is_started() {
        if inputs.last_video_aborted || inputs.last_up_aborted || inputs.stalled {
            if let Some(down) = metadata.tracks[choice].down {
                choice = down;
            }
            if let Some(rate) = inputs.recv_byte_rate {
                while metadata.tracks[choice].bandwidth + inputs.audio_bandwidth > rate {
                    match metadata.tracks[choice].down {
                        Some(down) => choice = down,
                        None => break,
                    }
                }
            }
            gate.raise();
        } else if inputs.up_succeeded {
            if let Some(up) = metadata.tracks[choice].up {
                choice = up;
            }
        } else if inputs.state == BufferState::Low {
            if let Some(down) = metadata.tracks[choice].down {
                choice = down;
            }
        }
    }

    // Never deliver more pixels than the device can show.
    while metadata.tracks[choice]
        .resolution
        .is_some_and(|r| r.exceeds(&inputs.max_resolution))
    {
        match metadata.tracks[choice].down {
            Some(down) => choice = down,
            None => break,
        }
    }

    Some(choice)
}

/// `<endpoint>` → `<endpoint>/index.json` unless it already targets a
/// manifest.
fn normalize_endpoint(url: &Url) -> Url {
    if url.path().ends_with(".json") {
        return url.clone();
    }
    let mut out = url.clone();
    let mut segments: Vec<String> = url
        .path_segments()
        .map(|s| s.map(str::to_string).collect())
        .unwrap_or_default();
    let last = segments.pop().unwrap_or_default();
    let stem = last
        .rsplit_once('.')
        .map_or(last.clone(), |(stem, _)| stem.to_string());
    if !stem.is_empty() {
        segments.push(stem);
    }
    segments.push("index.json".into());
    out.set_path(&segments.join("/"));
    out
}

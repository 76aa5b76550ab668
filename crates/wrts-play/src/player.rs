use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use wrts_media::{BufferState, Environment, Metadata, Sample, TrackKind};
use wrts_source::{
    AnySource, CmcdMode, MediaSource, OpenParams, Playing, SourceContext, SourceControl,
    TrackSelection,
};

use crate::{
    MediaBufferError, Playback, PlaybackTelemetry, PlayerError, PlayerResult,
    sink::{RenderSink, SinkBuffer, SinkEvent},
    state::{Thresholds, next_state},
};

#[derive(Clone, Debug)]
pub struct PlayerOptions {
    pub low_ms: u64,
    pub high_ms: u64,
    /// Shared duration of the start, connection and data timeouts.
    pub idle_timeout: Duration,
    /// Frame loss and sequence skipping are forbidden.
    pub reliable: bool,
    /// Use the single-response HTTP source instead of the adaptive one.
    pub direct: bool,
    pub media_ext: String,
    pub cmcd: CmcdMode,
    pub session_id: String,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            low_ms: Thresholds::DEFAULT_LOW_MS,
            high_ms: Thresholds::DEFAULT_HIGH_MS,
            idle_timeout: Duration::from_millis(14_000),
            reliable: true,
            direct: false,
            media_ext: "rts".into(),
            cmcd: CmcdMode::Off,
            session_id: String::new(),
        }
    }
}

/// Platform surfaces handed over at construction.
pub struct PlayerSinks {
    pub audio: Box<dyn SinkBuffer>,
    pub video: Box<dyn SinkBuffer>,
    pub render: Box<dyn RenderSink>,
}

/// Control-plane command for a running player.
#[derive(Clone, Debug)]
pub enum PlayerCommand {
    SetTracks {
        audio: Option<TrackSelection>,
        video: Option<TrackSelection>,
    },
    SetReliable(bool),
    Pause,
    Resume,
}

/// Cloneable steering handle.
#[derive(Clone, Debug)]
pub struct PlayerHandle {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<PlayerCommand>,
}

impl PlayerHandle {
    pub fn set_tracks(&self, audio: Option<TrackSelection>, video: Option<TrackSelection>) {
        let _ = self.commands.send(PlayerCommand::SetTracks { audio, video });
    }

    pub fn set_reliable(&self, reliable: bool) {
        let _ = self.commands.send(PlayerCommand::SetReliable(reliable));
    }

    pub fn pause(&self) {
        let _ = self.commands.send(PlayerCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(PlayerCommand::Resume);
    }

    /// End the session; `start` resolves shortly after and `on_stop` fires.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

enum MediaMsg {
    Metadata(Box<Metadata>),
    Sample(TrackKind, u32, Sample),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TimeoutKind {
    Start,
    Connection,
    Data,
}

impl From<TimeoutKind> for PlayerError {
    fn from(kind: TimeoutKind) -> Self {
        match kind {
            TimeoutKind::Start => PlayerError::StartTimeout,
            TimeoutKind::Connection => PlayerError::ConnectionTimeout,
            TimeoutKind::Data => PlayerError::DataTimeout,
        }
    }
}

/// The single shared timeout slot: arming a new kind displaces the old one.
#[derive(Debug)]
struct TimeoutSlot {
    duration: Duration,
    armed: Option<(TimeoutKind, tokio::time::Instant)>,
}

impl TimeoutSlot {
    fn new(duration: Duration) -> Self {
        Self {
            duration,
            armed: None,
        }
    }

    fn arm(&mut self, kind: TimeoutKind) {
        self.armed = Some((kind, tokio::time::Instant::now() + self.duration));
    }

    /// Receive activity: push the armed deadline out.
    fn touch(&mut self) {
        if let Some((kind, _)) = self.armed {
            self.arm(kind);
        }
    }

    fn clear(&mut self) {
        self.armed = None;
    }

    async fn fired(&self) -> TimeoutKind {
        match self.armed {
            Some((kind, at)) => {
                tokio::time::sleep_until(at).await;
                kind
            }
            None => std::future::pending().await,
        }
    }
}

/// Session orchestrator: owns one source, one playback, one metadata.
///
/// `start` drives the whole session and resolves when it ends; the terminal
/// outcome is also delivered through `on_stop`, exactly once.
pub struct Player {
    options: PlayerOptions,
    environment: Arc<Environment>,
    playing: Playing,
    playback: Playback,
    thresholds: Thresholds,
    state: BufferState,
    buffering: bool,
    had_first_buffering: bool,
    reliable: bool,
    want_playing: bool,
    metadata: Option<Metadata>,
    timeout: TimeoutSlot,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<PlayerCommand>,
    command_rx: mpsc::UnboundedReceiver<PlayerCommand>,
    sink_events: mpsc::UnboundedReceiver<SinkEvent>,
    on_stop: Option<Box<dyn FnOnce(Option<&PlayerError>) + Send>>,
    stopped: bool,
}

impl Player {
    pub fn new(
        options: PlayerOptions,
        environment: Arc<Environment>,
        sinks: PlayerSinks,
        sink_events: mpsc::UnboundedReceiver<SinkEvent>,
    ) -> Self {
        let playing = Playing::new();
        let playback = Playback::new(
            sinks.audio,
            sinks.video,
            sinks.render,
            playing.clone(),
            Arc::clone(&environment),
        );
        let mut thresholds = Thresholds::new();
        thresholds.set_low(options.low_ms);
        thresholds.set_high(options.high_ms);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let timeout = TimeoutSlot::new(options.idle_timeout);
        let reliable = options.reliable;

        Self {
            options,
            environment,
            playing,
            playback,
            thresholds,
            state: BufferState::None,
            buffering: true,
            had_first_buffering: false,
            reliable,
            want_playing: true,
            metadata: None,
            timeout,
            cancel: CancellationToken::new(),
            commands,
            command_rx,
            sink_events,
            on_stop: None,
            stopped: false,
        }
    }

    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            cancel: self.cancel.clone(),
            commands: self.commands.clone(),
        }
    }

    pub fn set_on_stop(&mut self, cb: Box<dyn FnOnce(Option<&PlayerError>) + Send>) {
        self.on_stop = Some(cb);
    }

    pub fn telemetry(&self) -> PlaybackTelemetry {
        self.playback.telemetry()
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Run the session against `url` until it ends or is stopped.
    pub async fn start(&mut self, url: Url) -> PlayerResult<()> {
        let result = self.run(url).await;
        if let Err(err) = &result {
            warn!(error = %err, "player: session ended with error");
        }
        self.finish(result)
    }

    async fn run(&mut self, url: Url) -> PlayerResult<()> {
        self.timeout.arm(TimeoutKind::Start);

        let context = SourceContext::new(self.playing.clone(), Arc::clone(&self.environment));
        let mut source = AnySource::for_url(&url, context, self.options.direct);

        let (media_tx, mut media_rx) = mpsc::unbounded_channel();
        {
            let callbacks = source.callbacks_mut();
            let tx = media_tx.clone();
            callbacks.on_metadata = Some(Box::new(move |m| {
                let _ = tx.send(MediaMsg::Metadata(Box::new(m.clone())));
            }));
            let tx = media_tx.clone();
            callbacks.on_sample = Some(Box::new(move |kind, id, sample| {
                let _ = tx.send(MediaMsg::Sample(kind, id, sample.clone()));
            }));
        }
        drop(media_tx);

        let source_control = source.control();
        let params = OpenParams {
            playing: self.want_playing,
            reliable: self.reliable,
            media_ext: self.options.media_ext.clone(),
            cmcd: self.options.cmcd,
            preload_ms: self.thresholds.middle(),
            session_id: self.options.session_id.clone(),
        };
        let mut source_task = tokio::spawn(async move { source.open(url, params).await });

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd, &source_control);
                }
                Some(msg) = media_rx.recv() => {
                    if let Err(err) = self.handle_media(msg) {
                        break Err(err);
                    }
                }
                Some(event) = self.sink_events.recv() => {
                    if let Err(err) = self.handle_sink_event(event) {
                        break Err(err);
                    }
                }
                kind = self.timeout.fired() => break Err(kind.into()),
                joined = &mut source_task => {
                    break match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => Err(PlayerError::Source(err)),
                        Err(join) => {
                            Err(PlayerError::Playback(format!("source task failed: {join}")))
                        }
                    };
                }
            }
        };

        // Teardown order: source, playback, sink.
        source_control.close();
        if !source_task.is_finished()
            && tokio::time::timeout(Duration::from_secs(2), &mut source_task)
                .await
                .is_err()
        {
            source_task.abort();
        }
        self.playback.pause();
        result
    }

    fn handle_command(&mut self, cmd: PlayerCommand, control: &SourceControl) {
        match cmd {
            PlayerCommand::SetTracks { audio, video } => control.set_tracks(audio, video),
            PlayerCommand::SetReliable(reliable) => {
                self.reliable = reliable;
                control.set_reliable(reliable);
            }
            PlayerCommand::Pause => {
                self.want_playing = false;
                self.playback.pause();
            }
            PlayerCommand::Resume => {
                self.want_playing = true;
                self.playback.resume();
            }
        }
    }

    fn handle_media(&mut self, msg: MediaMsg) -> PlayerResult<()> {
        match msg {
            MediaMsg::Metadata(metadata) => {
                let first = self.metadata.is_none();
                self.metadata = Some(*metadata);
                if first {
                    // Stream description is in: the connection phase begins.
                    self.timeout.arm(TimeoutKind::Connection);
                }
                Ok(())
            }
            MediaMsg::Sample(kind, track_id, sample) => {
                self.timeout.touch();
                self.write_sample(kind, track_id, &sample)?;
                self.evaluate();
                Ok(())
            }
        }
    }

    fn write_sample(&mut self, kind: TrackKind, track_id: u32, sample: &Sample) -> PlayerResult<()> {
        let Some(metadata) = &self.metadata else {
            return Err(MediaBufferError::TrackWithoutMetadata(track_id).into());
        };
        match self.playback.write_sample(metadata, kind, track_id, sample) {
            Err(PlayerError::MediaBuffer(MediaBufferError::ExceedsBufferSize)) => {
                // Free buffer space, then retry exactly once.
                if self.playback.is_paused() && self.want_playing {
                    self.playback.resume();
                } else {
                    self.playback.seek_by(10.0);
                }
                self.playback.write_sample(metadata, kind, track_id, sample)
            }
            other => other,
        }
    }

    fn handle_sink_event(&mut self, event: SinkEvent) -> PlayerResult<()> {
        match event {
            SinkEvent::TimeUpdate | SinkEvent::Progress => {
                if self.playback.current_time() < self.playback.start_time() {
                    self.go_live();
                }
                self.evaluate();
                Ok(())
            }
            SinkEvent::Waiting => {
                let amount = self.playback.buffer_amount();
                if amount <= self.thresholds.low() {
                    self.force_low();
                    self.playback.pause();
                    self.buffering = true;
                    self.playing.set_buffering(true);
                    self.timeout.arm(TimeoutKind::Data);
                    self.playing.publish_stall();
                }
                Ok(())
            }
            SinkEvent::CanPlay => {
                self.timeout.clear();
                if self.want_playing {
                    self.playback.resume();
                }
                Ok(())
            }
            SinkEvent::Seeked => {
                if !self.reliable && self.playback.buffer_amount() > self.thresholds.high() {
                    self.go_live();
                }
                self.evaluate();
                Ok(())
            }
            SinkEvent::Error(detail) => Err(PlayerError::Playback(detail)),
        }
    }

    /// Re-run the buffer state machine against the current buffer level.
    fn evaluate(&mut self) {
        let amount = self.playback.buffer_amount();
        self.playing.set_buffer_amount(amount);

        if self.buffering && amount > self.thresholds.middle() {
            self.buffering = false;
            self.playing.set_buffering(false);
            self.timeout.clear();

            if !self.had_first_buffering {
                self.had_first_buffering = true;
                let behind_ms = (self.playback.end_time() - self.playback.current_time()) * 1000.0;
                if !self.reliable && behind_ms > self.thresholds.high() as f64 {
                    self.go_live();
                }
            }
            if self.want_playing && self.playback.is_paused() {
                self.playback.resume();
            }
        }

        let next = next_state(self.state, amount, &self.thresholds);
        if next != self.state {
            debug!(state = ?next, amount, "player: buffer state change");
            self.state = next;
            self.playing.publish_state(next);
            self.playback.apply_rate(next);
        }
    }

    fn force_low(&mut self) {
        if self.state != BufferState::Low {
            self.state = BufferState::Low;
            self.playback.apply_rate(BufferState::Low);
        }
        // Publish even when already low so the source observes the stall
        // context in order.
        self.playing.publish_state(BufferState::Low);
    }

    fn go_live(&mut self) {
        self.playback.go_live(self.thresholds.middle());
    }

    /// Deliver the terminal outcome exactly once.
    fn finish(&mut self, result: PlayerResult<()>) -> PlayerResult<()> {
        if !self.stopped {
            self.stopped = true;
            if let Some(cb) = self.on_stop.take() {
                cb(result.as_ref().err());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use wrts_media::{Codec, Resolution, Track};
    use wrts_source::PlaybackSignal;

    use super::*;
    use crate::sink::mock::{MockBuffer, MockRender};

    struct Rig {
        player: Player,
        audio: MockBuffer,
        video: MockBuffer,
        render: MockRender,
        _events_tx: mpsc::UnboundedSender<SinkEvent>,
    }

    fn rig(options: PlayerOptions) -> Rig {
        let audio = MockBuffer::default();
        let video = MockBuffer::default();
        let render = MockRender::default();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let player = Player::new(
            options,
            Arc::new(Environment::default()),
            PlayerSinks {
                audio: Box::new(audio.clone()),
                video: Box::new(video.clone()),
                render: Box::new(render.clone()),
            },
            events_rx,
        );
        Rig {
            player,
            audio,
            video,
            render,
            _events_tx: events_tx,
        }
    }

    fn video_metadata() -> Metadata {
        let mut m = Metadata::new(0);
        m.tracks.push(Track {
            id: 1,
            kind: TrackKind::Video,
            codec: Codec::H264,
            codec_string: "avc1.42c01e".into(),
            bandwidth: 400_000,
            rate: 30,
            resolution: Some(Resolution::new(1280, 720)),
            channels: 0,
            config: Some(Bytes::from_static(&[1, 66, 192, 30, 255])),
            content_protection: None,
            up: None,
            down: None,
        });
        m.fix();
        m
    }

    fn key_sample(time: u64) -> Sample {
        let mut s = Sample::new(time, 40, Bytes::from_static(&[0xab]));
        s.is_key_frame = true;
        s
    }

    /// Make the video buffer the active one so `buffer_amount` is real.
    fn activate_video(rig: &mut Rig) {
        rig.player.metadata = Some(video_metadata());
        rig.player.write_sample(TrackKind::Video, 1, &key_sample(0)).unwrap();
    }

    #[tokio::test]
    async fn crossing_middle_ends_buffering_and_starts_ok() {
        let mut r = rig(PlayerOptions::default());
        activate_video(&mut r);

        r.video.set_range(0.0, 0.4); // 400 ms buffered, playhead at 0
        r.player.evaluate();

        assert_eq!(r.player.state(), BufferState::Ok);
        assert!(!r.player.buffering);
        assert!(r.player.had_first_buffering);
    }

    #[tokio::test]
    async fn pre_play_state_holds_below_middle() {
        let mut r = rig(PlayerOptions::default());
        activate_video(&mut r);

        r.video.set_range(0.0, 0.2); // 200 ms < middle
        r.player.evaluate();

        assert_eq!(r.player.state(), BufferState::None);
        assert!(r.player.buffering);
    }

    #[tokio::test]
    async fn waiting_under_low_forces_stall() {
        let mut r = rig(PlayerOptions::default());
        activate_video(&mut r);
        r.video.set_range(0.0, 0.4);
        r.player.evaluate();

        let mut signals = r.player.playing.subscribe();

        // Drain the buffer and starve rendering.
        r.video.set_range(0.0, 0.1);
        *r.render.current.lock().unwrap() = 0.05;
        r.player.handle_sink_event(SinkEvent::Waiting).unwrap();

        assert_eq!(r.player.state(), BufferState::Low);
        assert!(r.player.buffering);
        assert!(*r.render.paused.lock().unwrap());
        // The stall signal follows the state change.
        assert_eq!(
            signals.try_recv().unwrap(),
            PlaybackSignal::State(BufferState::Low)
        );
        assert_eq!(signals.try_recv().unwrap(), PlaybackSignal::Stall);
    }

    #[tokio::test]
    async fn canplay_clears_the_timeout_and_resumes() {
        let mut r = rig(PlayerOptions::default());
        activate_video(&mut r);
        r.video.set_range(0.0, 0.1);
        r.player.handle_sink_event(SinkEvent::Waiting).unwrap();
        assert!(r.player.timeout.armed.is_some());

        r.player.handle_sink_event(SinkEvent::CanPlay).unwrap();
        assert!(r.player.timeout.armed.is_none());
        assert!(!*r.render.paused.lock().unwrap());
    }

    #[tokio::test]
    async fn first_buffering_completion_goes_live_when_unreliable() {
        let mut r = rig(PlayerOptions {
            reliable: false,
            ..PlayerOptions::default()
        });
        activate_video(&mut r);

        // 2 s buffered while the playhead sits at 0: way past HIGH.
        r.video.set_range(0.0, 2.0);
        r.player.evaluate();

        let seeks = r.render.seeks.lock().unwrap();
        let target = *seeks.last().expect("a live-edge seek");
        // end - middle: 2.0 - 0.35
        assert!((target - 1.65).abs() < 1e-9, "got {target}");
    }

    #[tokio::test]
    async fn reliable_sessions_do_not_go_live() {
        let mut r = rig(PlayerOptions::default());
        activate_video(&mut r);
        r.video.set_range(0.0, 2.0);
        r.player.evaluate();
        assert!(r.render.seeks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dynamic_rate_follows_the_state() {
        let mut r = rig(PlayerOptions::default());
        activate_video(&mut r);

        r.video.set_range(0.0, 0.6);
        r.player.evaluate();
        assert_eq!(r.player.state(), BufferState::High);
        assert!((*r.render.rate.lock().unwrap() - 1.08).abs() < 1e-9);

        *r.render.current.lock().unwrap() = 0.5; // 100 ms left
        r.player.evaluate();
        assert_eq!(r.player.state(), BufferState::Low);
        assert!((*r.render.rate.lock().unwrap() - 0.92).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exceeds_buffer_size_recovers_by_jumping_forward() {
        let mut r = rig(PlayerOptions::default());
        r.player.metadata = Some(video_metadata());

        *r.video.fail_next.lock().unwrap() = Some(|| MediaBufferError::ExceedsBufferSize);
        r.player
            .write_sample(TrackKind::Video, 1, &key_sample(0))
            .unwrap();

        let seeks = r.render.seeks.lock().unwrap();
        assert_eq!(*seeks, vec![10.0], "playhead advanced by ten seconds");
        assert!(!r.video.segments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_error_is_fatal() {
        let mut r = rig(PlayerOptions::default());
        let err = r
            .player
            .handle_sink_event(SinkEvent::Error("decode failed".into()))
            .unwrap_err();
        assert!(matches!(err, PlayerError::Playback(_)));
    }

    #[tokio::test]
    async fn on_stop_fires_exactly_once() {
        let mut r = rig(PlayerOptions::default());
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        r.player.set_on_stop(Box::new(move |err| {
            assert!(err.is_none());
            *c.lock().unwrap() += 1;
        }));

        let _ = r.player.finish(Ok(()));
        let _ = r.player.finish(Ok(()));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn playhead_before_buffer_start_reconciles() {
        let mut r = rig(PlayerOptions::default());
        activate_video(&mut r);
        r.video.set_range(5.0, 6.0);
        *r.render.current.lock().unwrap() = 1.0;

        r.player.handle_sink_event(SinkEvent::TimeUpdate).unwrap();

        let seeks = r.render.seeks.lock().unwrap();
        assert!(!seeks.is_empty());
        let target = *seeks.last().unwrap();
        assert!((target - 5.65).abs() < 1e-9, "end - middle, floored at start, got {target}");
    }
}

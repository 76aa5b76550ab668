use std::sync::Arc;

use tracing::trace;
use wrts_media::{BufferState, Environment, Metadata, Sample, TrackKind};
use wrts_source::Playing;

use crate::{
    MediaBuffer, PlayerResult,
    sink::{RenderSink, SinkBuffer},
};

/// Rate applied while the buffer runs high, to drift back to the edge.
const RATE_FAST: f64 = 1.08;
/// Rate applied while the buffer runs low, to let it refill.
const RATE_SLOW: f64 = 0.92;
const RATE_NORMAL: f64 = 1.0;

/// Buffer telemetry snapshot for embedders.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaybackTelemetry {
    pub start_time: f64,
    pub end_time: f64,
    pub current_time: f64,
    pub buffer_ms: u64,
    pub playback_rate: f64,
}

/// The playback half of a session: both media buffers, the render sink, and
/// the shared gauges the source reads.
pub struct Playback {
    audio: MediaBuffer,
    video: MediaBuffer,
    render: Box<dyn RenderSink>,
    playing: Playing,
    environment: Arc<Environment>,
    rate: f64,
}

impl Playback {
    pub fn new(
        audio_sink: Box<dyn SinkBuffer>,
        video_sink: Box<dyn SinkBuffer>,
        render: Box<dyn RenderSink>,
        playing: Playing,
        environment: Arc<Environment>,
    ) -> Self {
        Self {
            audio: MediaBuffer::new(TrackKind::Audio, audio_sink),
            video: MediaBuffer::new(TrackKind::Video, video_sink),
            render,
            playing,
            environment,
            rate: RATE_NORMAL,
        }
    }

    /// Route one repaired sample into its media buffer.
    pub fn write_sample(
        &mut self,
        metadata: &Metadata,
        kind: TrackKind,
        track_id: u32,
        sample: &Sample,
    ) -> PlayerResult<()> {
        let buffer = match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
            TrackKind::Data => return Ok(()),
        };
        buffer.write(metadata, track_id, sample)?;
        self.publish_gauges();
        Ok(())
    }

    /// Earliest position both active buffers can serve, seconds.
    pub fn start_time(&self) -> f64 {
        self.active_buffers()
            .filter_map(MediaBuffer::buffered_start)
            .fold(0.0, f64::max)
    }

    /// Latest position both active buffers can serve, seconds.
    pub fn end_time(&self) -> f64 {
        let mut end: Option<f64> = None;
        for buffer in self.active_buffers() {
            if let Some(e) = buffer.buffered_end() {
                end = Some(end.map_or(e, |current| current.min(e)));
            }
        }
        end.unwrap_or(0.0)
    }

    pub fn current_time(&self) -> f64 {
        self.render.current_time()
    }

    /// Drainable milliseconds ahead of the playhead.
    pub fn buffer_amount(&self) -> u64 {
        if !self.audio.is_active() && !self.video.is_active() {
            return 0;
        }
        let end = self.end_time();
        let position = self.render.current_time().max(self.start_time());
        ((end - position).max(0.0) * 1000.0).round() as u64
    }

    /// Apply the dynamic playback rate for a buffer state. Suppressed on
    /// sinks that glitch audibly on rate changes.
    pub fn apply_rate(&mut self, state: BufferState) {
        if !self.environment.smooth_rate_change {
            return;
        }
        let rate = match state {
            BufferState::High => RATE_FAST,
            BufferState::Low => RATE_SLOW,
            BufferState::Ok | BufferState::None => RATE_NORMAL,
        };
        if (rate - self.rate).abs() > f64::EPSILON {
            trace!(rate, "playback: rate change");
            self.rate = rate;
            self.render.set_playback_rate(rate);
            self.playing.set_playback_rate(rate);
        }
    }

    pub fn playback_rate(&self) -> f64 {
        self.rate
    }

    /// Seek the render position to the live edge: `end - middle`, floored at
    /// the buffered start.
    pub fn go_live(&mut self, middle_ms: u64) {
        let target = (self.end_time() - middle_ms as f64 / 1000.0).max(self.start_time());
        trace!(target, "playback: go live");
        self.render.set_current_time(target);
        self.publish_gauges();
    }

    pub fn pause(&mut self) {
        self.render.pause();
    }

    pub fn resume(&mut self) {
        self.render.play();
    }

    pub fn is_paused(&self) -> bool {
        self.render.paused()
    }

    pub fn seek_by(&mut self, delta_secs: f64) {
        let t = self.render.current_time() + delta_secs;
        self.render.set_current_time(t.max(0.0));
    }

    pub fn publish_gauges(&self) {
        self.playing.set_buffer_amount(self.buffer_amount());
    }

    pub fn telemetry(&self) -> PlaybackTelemetry {
        PlaybackTelemetry {
            start_time: self.start_time(),
            end_time: self.end_time(),
            current_time: self.render.current_time(),
            buffer_ms: self.buffer_amount(),
            playback_rate: self.rate,
        }
    }

    fn active_buffers(&self) -> impl Iterator<Item = &MediaBuffer> {
        [&self.audio, &self.video]
            .into_iter()
            .filter(|b| b.is_active())
    }
}

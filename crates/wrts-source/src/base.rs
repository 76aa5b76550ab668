use std::collections::BTreeMap;

use tracing::{debug, trace};
use wrts_media::{Metadata, Sample, TrackKind};
use wrts_rts::RtsEvent;

use crate::{SourceResult, events::SourceCallbacks, rate::RecvRate};

/// Audio holes up to this many milliseconds are sealed during repair;
/// anything longer is treated as a genuine discontinuity.
const AUDIO_HOLE_TOLERANCE_MS: i64 = 7;

/// User-facing track choice for one kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TrackSelection {
    /// Automatic: adaptive selection stays active.
    #[default]
    Auto,
    /// The kind is turned off entirely.
    Disabled,
    /// Pinned to one track id.
    Id(u32),
}

impl TrackSelection {
    /// Signed wire form: `-1` disables, anything else pins.
    pub fn from_signed(raw: i64) -> Self {
        if raw < 0 {
            Self::Disabled
        } else {
            Self::Id(raw as u32)
        }
    }

    /// Query-parameter value; `None` for automatic.
    pub fn query_value(&self) -> Option<String> {
        match self {
            Self::Auto => None,
            Self::Disabled => Some("-1".into()),
            Self::Id(id) => Some(id.to_string()),
        }
    }

    pub fn pinned(&self) -> Option<u32> {
        match self {
            Self::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

/// The track a kind is currently received on; `Disabled` is a known state,
/// distinct from "not yet known" (`Option::None` at the call sites).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EffectiveTrack {
    Disabled,
    Id(u32),
}

impl EffectiveTrack {
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Disabled => None,
            Self::Id(id) => Some(*id),
        }
    }
}

#[derive(Debug, Default)]
struct PendingBuffer {
    by_track: BTreeMap<u32, Vec<(TrackKind, Sample)>>,
    start_time: Option<u64>,
    end_time: Option<u64>,
}

impl PendingBuffer {
    fn push(&mut self, kind: TrackKind, track_id: u32, sample: Sample) {
        let end = sample.end_time();
        self.start_time = Some(self.start_time.map_or(sample.time, |s| s.min(sample.time)));
        self.end_time = Some(self.end_time.map_or(end, |e| e.max(end)));
        self.by_track.entry(track_id).or_default().push((kind, sample));
    }

    fn take(&mut self) -> BTreeMap<u32, Vec<(TrackKind, Sample)>> {
        self.start_time = None;
        self.end_time = None;
        std::mem::take(&mut self.by_track)
    }
}

/// Shared source base: selection state, timestamp repair, first-sample
/// buffering, receive-rate measurement, live-clock upkeep.
///
/// Every variant feeds demultiplexed [`RtsEvent`]s through
/// [`SourceCore::handle_event`]; repaired samples leave through the
/// installed [`SourceCallbacks`].
#[derive(Debug)]
pub struct SourceCore {
    pub callbacks: SourceCallbacks,
    metadata: Option<Metadata>,
    selected_audio: TrackSelection,
    selected_video: TrackSelection,
    requested_audio: Option<EffectiveTrack>,
    requested_video: Option<EffectiveTrack>,
    effective_audio: Option<EffectiveTrack>,
    effective_video: Option<EffectiveTrack>,
    audio_time: Option<u64>,
    video_time: Option<u64>,
    data_time: Option<u64>,
    pending: PendingBuffer,
    recv_rate: RecvRate,
    reliable: bool,
    live_corrections_ms: u64,
}

impl SourceCore {
    pub fn new() -> Self {
        Self {
            callbacks: SourceCallbacks::default(),
            metadata: None,
            selected_audio: TrackSelection::Auto,
            selected_video: TrackSelection::Auto,
            requested_audio: None,
            requested_video: None,
            effective_audio: None,
            effective_video: None,
            audio_time: None,
            video_time: None,
            data_time: None,
            pending: PendingBuffer::default(),
            recv_rate: RecvRate::new(),
            reliable: true,
            live_corrections_ms: 0,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn metadata_mut(&mut self) -> Option<&mut Metadata> {
        self.metadata.as_mut()
    }

    /// Install new stream metadata, carrying the live clock and the observed
    /// sample horizon forward so the estimate never moves backwards.
    pub fn set_metadata(&mut self, mut metadata: Metadata) {
        if let Some(old) = &self.metadata {
            metadata.live_mut().advance_to(old.live_time_ms());
        }
        if let Some(horizon) = self.max_current_time() {
            metadata.live_mut().advance_to(horizon);
        }
        self.metadata = Some(metadata);
        let metadata = self.metadata.as_ref().expect("just set");
        self.callbacks.metadata(metadata);
    }

    pub fn reliable(&self) -> bool {
        self.reliable
    }

    pub fn set_reliable(&mut self, reliable: bool) {
        self.reliable = reliable;
    }

    /// Update the user selection; returns false when it was a duplicate
    /// assignment (callers skip the wire round-trip then).
    pub fn set_selected(
        &mut self,
        audio: Option<TrackSelection>,
        video: Option<TrackSelection>,
    ) -> bool {
        let mut changed = false;
        if let Some(audio) = audio
            && audio != self.selected_audio
        {
            self.selected_audio = audio;
            changed = true;
        }
        if let Some(video) = video
            && video != self.selected_video
        {
            self.selected_video = video;
            changed = true;
        }
        changed
    }

    pub fn selected_audio(&self) -> TrackSelection {
        self.selected_audio
    }

    pub fn selected_video(&self) -> TrackSelection {
        self.selected_video
    }

    pub fn note_requested(&mut self, kind: TrackKind, track: EffectiveTrack) {
        match kind {
            TrackKind::Audio => self.requested_audio = Some(track),
            TrackKind::Video => self.requested_video = Some(track),
            TrackKind::Data => {}
        }
    }

    pub fn requested(&self, kind: TrackKind) -> Option<EffectiveTrack> {
        match kind {
            TrackKind::Audio => self.requested_audio,
            TrackKind::Video => self.requested_video,
            TrackKind::Data => None,
        }
    }

    pub fn effective(&self, kind: TrackKind) -> Option<EffectiveTrack> {
        match kind {
            TrackKind::Audio => self.effective_audio,
            TrackKind::Video => self.effective_video,
            TrackKind::Data => None,
        }
    }

    /// Mark the track a kind is actually received on. Once both kinds are
    /// known the first-sample buffer flushes in track-id order.
    pub fn note_effective(&mut self, kind: TrackKind, track: EffectiveTrack) {
        let changed = self.store_effective(kind, track);
        if changed {
            self.emit_tracks_changed();
        }
        self.flush_pending_if_ready();
    }

    fn store_effective(&mut self, kind: TrackKind, track: EffectiveTrack) -> bool {
        let slot = match kind {
            TrackKind::Audio => &mut self.effective_audio,
            TrackKind::Video => &mut self.effective_video,
            TrackKind::Data => return false,
        };
        if *slot == Some(track) {
            return false;
        }
        *slot = Some(track);
        true
    }

    fn emit_tracks_changed(&mut self) {
        let audio = self.effective_audio.and_then(|t| t.id());
        let video = self.effective_video.and_then(|t| t.id());
        self.callbacks.tracks_changed(audio, video);
    }

    pub fn record_bytes(&mut self, bytes: u64) {
        self.recv_rate.record(bytes);
    }

    pub fn recv_byte_rate(&mut self) -> Option<u64> {
        self.recv_rate.bytes_per_second()
    }

    pub fn current_time(&self, kind: TrackKind) -> Option<u64> {
        match kind {
            TrackKind::Audio => self.audio_time,
            TrackKind::Video => self.video_time,
            TrackKind::Data => self.data_time,
        }
    }

    /// Highest repaired position across kinds.
    pub fn max_current_time(&self) -> Option<u64> {
        [self.audio_time, self.video_time, self.data_time]
            .into_iter()
            .flatten()
            .max()
    }

    /// Total upward live-clock correction applied so far.
    pub fn live_corrections_ms(&self) -> u64 {
        self.live_corrections_ms
    }

    /// Aggregate window of the first-sample buffer, when samples are held.
    pub fn pending_window(&self) -> Option<(u64, u64)> {
        Some((self.pending.start_time?, self.pending.end_time?))
    }

    /// Dispatch one demultiplexed packet.
    pub fn handle_event(&mut self, event: RtsEvent) -> SourceResult<()> {
        match event {
            RtsEvent::InitTracks { video, audio } => {
                let audio_changed = self.store_effective(
                    TrackKind::Audio,
                    audio.map_or(EffectiveTrack::Disabled, EffectiveTrack::Id),
                );
                let video_changed = self.store_effective(
                    TrackKind::Video,
                    video.map_or(EffectiveTrack::Disabled, EffectiveTrack::Id),
                );
                if audio_changed || video_changed {
                    self.emit_tracks_changed();
                }
                self.flush_pending_if_ready();
                Ok(())
            }
            RtsEvent::Metadata(manifest) => {
                let metadata = Metadata::from_manifest(&manifest)?;
                self.set_metadata(metadata);
                Ok(())
            }
            RtsEvent::Data {
                track_id,
                mut time,
                value,
            } => {
                if let Some(current) = self.data_time
                    && time < current
                {
                    time = current;
                }
                self.data_time = Some(time);
                self.callbacks.data(track_id, time, &value);
                Ok(())
            }
            RtsEvent::Audio { track_id, sample } => {
                self.ingest_media(TrackKind::Audio, track_id, sample);
                Ok(())
            }
            RtsEvent::Video { track_id, sample } => {
                self.ingest_media(TrackKind::Video, track_id, sample);
                Ok(())
            }
        }
    }

    /// Accept one media sample, buffering it until both effective tracks
    /// are known.
    pub fn ingest_media(&mut self, kind: TrackKind, track_id: u32, sample: Sample) {
        match self.effective(kind) {
            Some(EffectiveTrack::Disabled) => {
                trace!(?kind, track_id, "source: dropping sample for disabled kind");
                return;
            }
            Some(EffectiveTrack::Id(current)) if current != track_id => {
                // Rendition switch: the new track takes over the kind.
                self.note_effective(kind, EffectiveTrack::Id(track_id));
            }
            Some(EffectiveTrack::Id(_)) => {}
            None => {
                self.note_effective(kind, EffectiveTrack::Id(track_id));
            }
        }

        if self.both_effective_known() {
            self.process_media(kind, track_id, sample);
        } else {
            self.pending.push(kind, track_id, sample);
        }
    }

    fn both_effective_known(&self) -> bool {
        self.effective_audio.is_some() && self.effective_video.is_some()
    }

    fn flush_pending_if_ready(&mut self) {
        if !self.both_effective_known() {
            return;
        }
        let buffered = self.pending.take();
        if buffered.is_empty() {
            return;
        }
        debug!(
            tracks = buffered.len(),
            "source: flushing first-sample buffer"
        );
        for (track_id, samples) in buffered {
            for (kind, sample) in samples {
                if self.effective(kind) == Some(EffectiveTrack::Id(track_id)) {
                    self.process_media(kind, track_id, sample);
                } else {
                    trace!(?kind, track_id, "source: skipping buffered sample of inactive track");
                }
            }
        }
    }

    fn process_media(&mut self, kind: TrackKind, track_id: u32, mut sample: Sample) {
        let extendable = sample.duration < 0;
        if extendable {
            sample.duration = -sample.duration;
        }

        self.fix_timestamp(kind, &mut sample);

        if extendable
            && let Some(horizon) = self.max_current_time()
            && horizon > sample.time
        {
            let target = (horizon - sample.time) as i64;
            if target > sample.duration {
                let stretch = (target - sample.duration) as u64;
                self.callbacks.video_skipping(stretch);
                sample.duration = target;
                self.set_kind_time(kind, sample.time + target as u64);
            }
        }

        self.maintain_live(sample.time.saturating_add(sample.duration.max(0) as u64));
        self.callbacks.sample(kind, track_id, &sample);
    }

    /// Repair a sample against the running per-kind timeline.
    ///
    /// A repaired sample is snapped back to the current position and its
    /// duration adjusted so its end stays put: overlaps are trimmed, holes
    /// are sealed. Video is always repaired (a frame is never dropped),
    /// audio only within the hole tolerance.
    fn fix_timestamp(&mut self, kind: TrackKind, sample: &mut Sample) {
        let current = self.current_time(kind);

        if let Some(current) = current {
            let delta = sample.time as i64 - current as i64;
            let fix = match kind {
                TrackKind::Data => delta < 0,
                TrackKind::Audio => delta < 0 || delta <= AUDIO_HOLE_TOLERANCE_MS,
                TrackKind::Video => true,
            };
            if fix && delta != 0 {
                sample.time = current;
                if sample.duration != 0 {
                    sample.duration = (sample.duration + delta).max(1);
                }
                if delta > 0 {
                    match kind {
                        TrackKind::Audio => self.callbacks.audio_skipping(delta as u64),
                        TrackKind::Video => self.callbacks.video_skipping(delta as u64),
                        TrackKind::Data => {}
                    }
                }
            }
        }

        self.set_kind_time(kind, sample.time.saturating_add(sample.duration.max(0) as u64));
    }

    fn set_kind_time(&mut self, kind: TrackKind, time: u64) {
        match kind {
            TrackKind::Audio => self.audio_time = Some(time),
            TrackKind::Video => self.video_time = Some(time),
            TrackKind::Data => self.data_time = Some(time),
        }
    }

    /// Keep `liveTime >= sample end`; accumulate and report corrections.
    fn maintain_live(&mut self, end_ms: u64) {
        let Some(metadata) = &mut self.metadata else {
            return;
        };
        let correction = metadata.observe_sample_end(end_ms);
        if correction > 0 {
            self.live_corrections_ms += correction;
            debug!(
                correction_ms = correction,
                total_ms = self.live_corrections_ms,
                "source: live clock corrected upwards"
            );
            self.callbacks.live_correction(correction);
        }
    }
}

impl Default for SourceCore {
    fn default() -> Self {
        Self::new()
    }
}

use wrts_media::{Metadata, Sample, TrackKind};

/// Typed callbacks a source owner installs before `open`.
///
/// All callbacks fire on the session task; they must not block.
#[derive(Default)]
pub struct SourceCallbacks {
    pub on_metadata: Option<Box<dyn FnMut(&Metadata) + Send + Sync>>,
    /// A repaired media sample ready for the sink: kind, track id, sample.
    pub on_sample: Option<Box<dyn FnMut(TrackKind, u32, &Sample) + Send + Sync>>,
    /// A timed data payload: track id, time, parsed JSON.
    pub on_data: Option<Box<dyn FnMut(u32, u64, &serde_json::Value) + Send + Sync>>,
    /// Effective tracks changed: (audio, video), -1 encoded as `None`.
    pub on_tracks_changed: Option<Box<dyn FnMut(Option<u32>, Option<u32>) + Send + Sync>>,
    /// Milliseconds of audio skipped over during timestamp repair.
    pub on_audio_skipping: Option<Box<dyn FnMut(u64) + Send + Sync>>,
    /// Milliseconds of video skipped over or stretched across.
    pub on_video_skipping: Option<Box<dyn FnMut(u64) + Send + Sync>>,
    /// Upward live-clock correction in milliseconds.
    pub on_live_correction: Option<Box<dyn FnMut(u64) + Send + Sync>>,
}

impl SourceCallbacks {
    pub(crate) fn metadata(&mut self, metadata: &Metadata) {
        if let Some(cb) = &mut self.on_metadata {
            cb(metadata);
        }
    }

    pub(crate) fn sample(&mut self, kind: TrackKind, track_id: u32, sample: &Sample) {
        if let Some(cb) = &mut self.on_sample {
            cb(kind, track_id, sample);
        }
    }

    pub(crate) fn data(&mut self, track_id: u32, time: u64, value: &serde_json::Value) {
        if let Some(cb) = &mut self.on_data {
            cb(track_id, time, value);
        }
    }

    pub(crate) fn tracks_changed(&mut self, audio: Option<u32>, video: Option<u32>) {
        if let Some(cb) = &mut self.on_tracks_changed {
            cb(audio, video);
        }
    }

    pub(crate) fn audio_skipping(&mut self, delta_ms: u64) {
        if let Some(cb) = &mut self.on_audio_skipping {
            cb(delta_ms);
        }
    }

    pub(crate) fn video_skipping(&mut self, delta_ms: u64) {
        if let Some(cb) = &mut self.on_video_skipping {
            cb(delta_ms);
        }
    }

    pub(crate) fn live_correction(&mut self, delta_ms: u64) {
        if let Some(cb) = &mut self.on_live_correction {
            cb(delta_ms);
        }
    }
}

impl std::fmt::Debug for SourceCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCallbacks").finish_non_exhaustive()
    }
}

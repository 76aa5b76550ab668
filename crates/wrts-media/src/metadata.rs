use std::{collections::HashMap, time::Instant};

use bytes::Bytes;
use tracing::debug;

use crate::{
    Codec, Manifest, MediaResult, ProtectionEntry, ProtectionScheme, Resolution, SequenceInfo,
    Track, TrackKind,
};
use base64::Engine as _;

/// Monotonic, wall-advancing live-edge estimate.
///
/// Reading the clock returns `value_ms + (now - wall)`, so the estimate keeps
/// moving between corrections.
#[derive(Clone, Debug)]
pub struct LiveClock {
    value_ms: u64,
    wall: Instant,
}

impl LiveClock {
    pub fn new(value_ms: u64) -> Self {
        Self {
            value_ms,
            wall: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.value_ms + self.wall.elapsed().as_millis() as u64
    }

    /// Raise the anchor so that `now_ms() >= ms`. Returns the applied upward
    /// correction, 0 when the clock was already ahead.
    pub fn advance_to(&mut self, ms: u64) -> u64 {
        let now = self.now_ms();
        if ms <= now {
            return 0;
        }
        let correction = ms - now;
        self.value_ms = ms;
        self.wall = Instant::now();
        correction
    }

    /// Shift the anchor by a signed amount (RTT compensation).
    pub fn shift(&mut self, delta_ms: i64) {
        if delta_ms >= 0 {
            self.value_ms = self.value_ms.saturating_add(delta_ms as u64);
        } else {
            self.value_ms = self.value_ms.saturating_sub(delta_ms.unsigned_abs());
        }
    }

}

/// Normalized stream description.
///
/// Tracks are stored in a flat vector; the per-kind lists and the `up`/`down`
/// links on each [`Track`] hold indices into it (see [`Metadata::fix`]).
#[derive(Clone, Debug)]
pub struct Metadata {
    live: LiveClock,
    pub tracks: Vec<Track>,
    by_id: HashMap<u32, usize>,
    /// Sorted by descending bandwidth.
    pub audio_tracks: Vec<usize>,
    pub video_tracks: Vec<usize>,
    pub data_tracks: Vec<usize>,
    pub content_protection: HashMap<String, ProtectionEntry>,
    pub sequence: Option<SequenceInfo>,
}

impl Metadata {
    pub fn new(live_time_ms: u64) -> Self {
        Self {
            live: LiveClock::new(live_time_ms),
            tracks: Vec::new(),
            by_id: HashMap::new(),
            audio_tracks: Vec::new(),
            video_tracks: Vec::new(),
            data_tracks: Vec::new(),
            content_protection: HashMap::new(),
            sequence: None,
        }
    }

    pub fn from_manifest(manifest: &Manifest) -> MediaResult<Self> {
        let mut meta = Metadata::new(manifest.live_time_ms().unwrap_or(0));
        meta.sequence = manifest.sequence.clone();

        for raw in &manifest.content_protection {
            let entry = ProtectionEntry {
                scheme: ProtectionScheme::parse(&raw.scheme)?,
                kid: raw.kid.clone(),
                iv: raw.iv.clone(),
                pssh: raw.pssh.clone(),
            };
            meta.content_protection.insert(raw.kid.clone(), entry);
        }

        for raw in &manifest.tracks {
            let kind = TrackKind::parse(&raw.kind)?;
            let codec_string = raw.codec.clone().unwrap_or_default();
            let codec = match kind {
                // Data tracks carry no codec.
                TrackKind::Data => Codec::Aac,
                _ => Codec::parse(&codec_string)?,
            };
            let config = match &raw.config {
                Some(b64) => Some(Bytes::from(
                    base64::engine::general_purpose::STANDARD
                        .decode(b64)
                        .map_err(|e| crate::MediaError::InvalidBase64 {
                            field: "config",
                            detail: e.to_string(),
                        })?,
                )),
                None => None,
            };
            meta.tracks.push(Track {
                id: raw.id,
                kind,
                codec,
                codec_string,
                bandwidth: raw.bandwidth,
                rate: raw.sample_rate.unwrap_or(0.0).round() as u32,
                resolution: raw
                    .resolution
                    .map(|r| Resolution::new(r.width, r.height)),
                channels: raw.channels.unwrap_or(0),
                config,
                content_protection: raw.content_protection.clone(),
                up: None,
                down: None,
            });
        }

        meta.fix();
        Ok(meta)
    }

    pub fn live(&self) -> &LiveClock {
        &self.live
    }

    pub fn live_mut(&mut self) -> &mut LiveClock {
        &mut self.live
    }

    pub fn live_time_ms(&self) -> u64 {
        self.live.now_ms()
    }

    pub fn track(&self, id: u32) -> Option<&Track> {
        self.by_id.get(&id).map(|&i| &self.tracks[i])
    }

    pub fn track_index(&self, id: u32) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn up_of(&self, index: usize) -> Option<&Track> {
        self.tracks[index].up.map(|i| &self.tracks[i])
    }

    pub fn down_of(&self, index: usize) -> Option<&Track> {
        self.tracks[index].down.map(|i| &self.tracks[i])
    }

    pub fn protection_for(&self, track: &Track) -> Option<&ProtectionEntry> {
        track
            .content_protection
            .as_deref()
            .and_then(|kid| self.content_protection.get(kid))
    }

    /// Normalize after any track mutation: drop duplicate ids (first
    /// occurrence wins), stable-sort each kind by descending bandwidth, and
    /// relink the `up`/`down` chains (head = highest bandwidth).
    pub fn fix(&mut self) {
        let mut seen = HashMap::new();
        let mut keep = Vec::with_capacity(self.tracks.len());
        for track in self.tracks.drain(..) {
            if seen.contains_key(&track.id) {
                debug!(track_id = track.id, "metadata: dropping duplicate track id");
                continue;
            }
            seen.insert(track.id, keep.len());
            keep.push(track);
        }
        self.tracks = keep;
        self.by_id = seen;

        for track in &mut self.tracks {
            track.up = None;
            track.down = None;
        }

        self.audio_tracks = self.sorted_kind(TrackKind::Audio);
        self.video_tracks = self.sorted_kind(TrackKind::Video);
        self.data_tracks = self.sorted_kind(TrackKind::Data);

        for list in [
            self.audio_tracks.clone(),
            self.video_tracks.clone(),
            self.data_tracks.clone(),
        ] {
            for pair in list.windows(2) {
                let (higher, lower) = (pair[0], pair[1]);
                self.tracks[higher].down = Some(lower);
                self.tracks[lower].up = Some(higher);
            }
        }
    }

    fn sorted_kind(&self, kind: TrackKind) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == kind)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by(|&a, &b| self.tracks[b].bandwidth.cmp(&self.tracks[a].bandwidth));
        indices
    }

    /// Advance the live clock to cover a sample end time, returning the
    /// correction that was needed.
    pub fn observe_sample_end(&mut self, end_ms: u64) -> u64 {
        self.live.advance_to(end_ms)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn clock_at(value_ms: u64, age: Duration) -> LiveClock {
        LiveClock {
            value_ms,
            wall: Instant::now() - age,
        }
    }

    fn track(id: u32, kind: TrackKind, bandwidth: u64) -> Track {
        Track {
            id,
            kind,
            codec: Codec::H264,
            codec_string: "avc1".into(),
            bandwidth,
            rate: 30,
            resolution: None,
            channels: 0,
            config: None,
            content_protection: None,
            up: None,
            down: None,
        }
    }

    #[test]
    fn fix_links_chains_by_descending_bandwidth() {
        let mut meta = Metadata::new(0);
        meta.tracks.push(track(1, TrackKind::Video, 400_000));
        meta.tracks.push(track(2, TrackKind::Video, 800_000));
        meta.tracks.push(track(3, TrackKind::Audio, 8_000));
        meta.fix();

        assert_eq!(meta.video_tracks.len(), 2);
        let head = &meta.tracks[meta.video_tracks[0]];
        assert_eq!(head.id, 2);
        assert!(head.up.is_none());
        let tail = meta.down_of(meta.video_tracks[0]).unwrap();
        assert_eq!(tail.id, 1);

        // Symmetry: tail.up points back at head.
        let tail_idx = meta.track_index(1).unwrap();
        assert_eq!(meta.up_of(tail_idx).unwrap().id, 2);
        assert!(meta.down_of(tail_idx).is_none());

        assert_eq!(meta.audio_tracks.len(), 1);
        assert!(meta.tracks[meta.audio_tracks[0]].up.is_none());
    }

    #[test]
    fn fix_keeps_first_duplicate() {
        let mut meta = Metadata::new(0);
        meta.tracks.push(track(7, TrackKind::Video, 100));
        meta.tracks.push(track(7, TrackKind::Video, 999));
        meta.fix();
        assert_eq!(meta.tracks.len(), 1);
        assert_eq!(meta.tracks[0].bandwidth, 100);
    }

    #[test]
    fn live_clock_advances_with_wall_time() {
        let clock = clock_at(1_000, Duration::from_millis(50));
        assert!(clock.now_ms() >= 1_050);
    }

    #[test]
    fn advance_to_is_monotonic() {
        let mut clock = LiveClock::new(5_000);
        assert_eq!(clock.advance_to(1_000), 0);
        let correction = clock.advance_to(9_000);
        assert!(correction > 0 && correction <= 4_000);
        assert!(clock.now_ms() >= 9_000);
    }

    #[test]
    fn shift_moves_anchor_both_ways() {
        let mut clock = LiveClock::new(10_000);
        clock.shift(-1_000);
        assert!(clock.now_ms() < 10_000);
        clock.shift(2_000);
        assert!(clock.now_ms() >= 11_000);
    }
}

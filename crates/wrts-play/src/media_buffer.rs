use tracing::debug;
use wrts_cmaf::CmafMux;
use wrts_media::{Metadata, Sample, TrackKind};

use crate::{MediaBufferError, PlayerError, PlayerResult, sink::SinkBuffer};

/// Bridge from repaired samples to one platform sink buffer.
///
/// The CMAF writer is created lazily on the first sample of a track and
/// recreated whenever the track changes (rendition switch), prefixing the
/// new track's initialization segment.
pub struct MediaBuffer {
    kind: TrackKind,
    sink: Box<dyn SinkBuffer>,
    mux: Option<(u32, CmafMux)>,
}

impl MediaBuffer {
    pub fn new(kind: TrackKind, sink: Box<dyn SinkBuffer>) -> Self {
        Self {
            kind,
            sink,
            mux: None,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Mux and append one sample, re-initializing on track change.
    pub fn write(
        &mut self,
        metadata: &Metadata,
        track_id: u32,
        sample: &Sample,
    ) -> PlayerResult<()> {
        let track = metadata
            .track(track_id)
            .ok_or(MediaBufferError::TrackWithoutMetadata(track_id))?;
        let protection = metadata.protection_for(track);

        let needs_init = self.mux.as_ref().is_none_or(|(id, _)| *id != track_id);
        if needs_init {
            debug!(kind = ?self.kind, track_id, "media buffer: initializing track");
            let (mux, init) = CmafMux::init(track, protection)?;
            if self.mux.is_some() {
                self.sink.reset();
            }
            self.sink.append(&init).map_err(PlayerError::MediaBuffer)?;
            self.mux = Some((track_id, mux));
        }

        let (_, mux) = self.mux.as_mut().expect("initialized above");
        let fragment = mux.write(sample, protection);
        self.sink
            .append(&fragment)
            .map_err(PlayerError::MediaBuffer)
    }

    pub fn buffered_start(&self) -> Option<f64> {
        self.sink.buffered_start()
    }

    pub fn buffered_end(&self) -> Option<f64> {
        self.sink.buffered_end()
    }

    /// The buffer has received at least one init segment.
    pub fn is_active(&self) -> bool {
        self.mux.is_some()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use wrts_media::{Codec, Resolution, Track};

    use super::*;
    use crate::sink::mock::MockBuffer;

    fn metadata_with_video() -> Metadata {
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
        m.tracks.push(Track {
            id: 2,
            kind: TrackKind::Video,
            codec: Codec::H264,
            codec_string: "avc1.42c01e".into(),
            bandwidth: 800_000,
            rate: 30,
            resolution: Some(Resolution::new(1920, 1080)),
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

    #[test]
    fn first_write_prepends_init_segment() {
        let sink = MockBuffer::default();
        let mut buffer = MediaBuffer::new(TrackKind::Video, Box::new(sink.clone()));
        let metadata = metadata_with_video();

        buffer.write(&metadata, 1, &key_sample(0)).unwrap();

        let segments = sink.segments.lock().unwrap();
        assert_eq!(segments.len(), 2, "init + fragment");
        assert_eq!(&segments[0][4..8], b"ftyp");
        assert_eq!(&segments[1][4..8], b"moof");
    }

    #[test]
    fn same_track_does_not_reinit() {
        let sink = MockBuffer::default();
        let mut buffer = MediaBuffer::new(TrackKind::Video, Box::new(sink.clone()));
        let metadata = metadata_with_video();

        buffer.write(&metadata, 1, &key_sample(0)).unwrap();
        buffer.write(&metadata, 1, &key_sample(40)).unwrap();

        let segments = sink.segments.lock().unwrap();
        assert_eq!(segments.len(), 3, "one init, two fragments");
    }

    #[test]
    fn track_change_resets_and_reinits() {
        let sink = MockBuffer::default();
        let mut buffer = MediaBuffer::new(TrackKind::Video, Box::new(sink.clone()));
        let metadata = metadata_with_video();

        buffer.write(&metadata, 1, &key_sample(0)).unwrap();
        buffer.write(&metadata, 2, &key_sample(40)).unwrap();

        assert_eq!(*sink.resets.lock().unwrap(), 1);
        let segments = sink.segments.lock().unwrap();
        assert_eq!(segments.len(), 4, "init, frag, init, frag");
        assert_eq!(&segments[2][4..8], b"ftyp");
    }

    #[test]
    fn unknown_track_is_an_error() {
        let sink = MockBuffer::default();
        let mut buffer = MediaBuffer::new(TrackKind::Video, Box::new(sink));
        let metadata = metadata_with_video();

        let err = buffer.write(&metadata, 9, &key_sample(0)).unwrap_err();
        assert!(matches!(
            err,
            PlayerError::MediaBuffer(MediaBufferError::TrackWithoutMetadata(9))
        ));
    }
}

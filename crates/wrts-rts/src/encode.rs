use std::collections::HashMap;

use wrts_media::Sample;

use crate::varint::write_varint;

const TYPE_DATA: u64 = 0;
const TYPE_AUDIO: u64 = 1;
const TYPE_VIDEO: u64 = 2;
const TYPE_INIT: u64 = 3;

/// Writer for the RTS container, the mirror of [`crate::RtsDemux`].
///
/// Tracks the same per-track timestamp state as the demuxer so it omits the
/// absolute time exactly when a receiver would not expect one. Used by the
/// test fixtures and by tooling that replays captured streams.
#[derive(Debug)]
pub struct RtsEncoder {
    with_size: bool,
    next_time: HashMap<u32, u64>,
}

impl RtsEncoder {
    pub fn new(with_size: bool) -> Self {
        Self {
            with_size,
            next_time: HashMap::new(),
        }
    }

    pub fn init_tracks(&mut self, video: Option<u32>, audio: Option<u32>) -> Vec<u8> {
        self.next_time.clear();
        let mut header = Vec::new();
        write_varint(&mut header, TYPE_INIT);
        write_varint(&mut header, video.map_or(0, |id| u64::from(id) + 1));
        write_varint(&mut header, audio.map_or(0, |id| u64::from(id) + 1));
        self.assemble(header, &[])
    }

    pub fn metadata(&mut self, json: &[u8]) -> Vec<u8> {
        let mut header = Vec::new();
        write_varint(&mut header, TYPE_DATA);
        if self.with_size {
            write_varint(&mut header, json.len() as u64);
        }
        self.assemble(header, json)
    }

    pub fn data(&mut self, track_id: u32, time: u64, json: &[u8]) -> Vec<u8> {
        let mut header = Vec::new();
        write_varint(&mut header, (u64::from(track_id) + 1) << 2 | TYPE_DATA);
        write_varint(&mut header, time);
        if self.with_size {
            write_varint(&mut header, json.len() as u64);
        }
        self.assemble(header, json)
    }

    pub fn audio(&mut self, track_id: u32, sample: &Sample) -> Vec<u8> {
        self.media(track_id, TYPE_AUDIO, sample)
    }

    pub fn video(&mut self, track_id: u32, sample: &Sample) -> Vec<u8> {
        self.media(track_id, TYPE_VIDEO, sample)
    }

    fn media(&mut self, track_id: u32, packet_type: u64, sample: &Sample) -> Vec<u8> {
        let mut header = Vec::new();
        write_varint(&mut header, (u64::from(track_id) + 1) << 2 | packet_type);

        if !self.next_time.contains_key(&track_id) {
            write_varint(&mut header, sample.time);
        }
        let duration = sample.duration.unsigned_abs();
        let value = duration << 2
            | u64::from(sample.composition_offset.is_some()) << 1
            | u64::from(sample.is_key_frame);
        write_varint(&mut header, value);
        if let Some(offset) = sample.composition_offset {
            write_varint(&mut header, offset as u32 as u64);
        }
        if self.with_size {
            write_varint(&mut header, sample.data.len() as u64);
        }
        self.next_time.insert(track_id, sample.time + duration);
        self.assemble(header, &sample.data)
    }

    fn assemble(&self, header: Vec<u8>, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + header.len() + payload.len());
        if self.with_size {
            debug_assert!(header.len() <= u8::MAX as usize);
            out.push(header.len() as u8);
        }
        out.extend_from_slice(&header);
        out.extend_from_slice(payload);
        out
    }
}

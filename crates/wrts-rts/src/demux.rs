use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};
use wrts_media::{Manifest, Sample};

use crate::{
    error::{RtsError, RtsResult},
    varint::read_varint,
};

const TYPE_DATA: u64 = 0;
const TYPE_AUDIO: u64 = 1;
const TYPE_VIDEO: u64 = 2;
const TYPE_INIT: u64 = 3;

/// One demultiplexed RTS packet.
#[derive(Clone, Debug)]
pub enum RtsEvent {
    /// Control packet announcing the tracks about to be sent. The per-track
    /// timestamp state has been cleared: the next media packet of each track
    /// carries an absolute time.
    InitTracks {
        video: Option<u32>,
        audio: Option<u32>,
    },
    /// Control packet carrying a full stream manifest.
    Metadata(Box<Manifest>),
    Data {
        track_id: u32,
        time: u64,
        value: serde_json::Value,
    },
    Audio {
        track_id: u32,
        sample: Sample,
    },
    Video {
        track_id: u32,
        sample: Sample,
    },
}

/// Parsed packet header; `payload_len` is `None` in framed mode, where the
/// payload is the remainder of the frame.
enum Header {
    InitTracks {
        video: Option<u32>,
        audio: Option<u32>,
    },
    Metadata {
        payload_len: Option<u64>,
    },
    Data {
        track_id: u32,
        time: u64,
        payload_len: Option<u64>,
    },
    Media {
        track_id: u32,
        audio: bool,
        time: Option<u64>,
        duration: u64,
        composition_offset: Option<i32>,
        is_key_frame: bool,
        payload_len: Option<u64>,
    },
}

/// Stream parser for the RTS container.
///
/// With `with_size = false` each transport frame is exactly one packet and is
/// handed to [`RtsDemux::parse_frame`]. With `with_size = true` the input is
/// a continuous byte stream in which every packet is prefixed by an 8-bit
/// total header length and headers end with a payload-length varint; feed
/// arbitrary chunks to [`RtsDemux::push`].
#[derive(Debug)]
pub struct RtsDemux {
    with_size: bool,
    buf: BytesMut,
    next_time: HashMap<u32, u64>,
    /// Tracks announced by the last Init Tracks packet, when one was seen.
    announced: Option<[Option<u32>; 2]>,
}

impl RtsDemux {
    pub fn new(with_size: bool) -> Self {
        Self {
            with_size,
            buf: BytesMut::new(),
            next_time: HashMap::new(),
            announced: None,
        }
    }

    /// Parse one framed-transport message (one packet per frame).
    ///
    /// A frame that ends before its header does is malformed.
    pub fn parse_frame(&mut self, frame: &[u8]) -> RtsResult<RtsEvent> {
        debug_assert!(!self.with_size);
        let mut pos = 0;
        let header = self.parse_header(frame, &mut pos, false)?;
        let payload = Bytes::copy_from_slice(&frame[pos..]);
        self.finish(header, payload)
    }

    /// Feed a chunk of a size-prefixed byte stream, draining every complete
    /// packet. A trailing partial packet is kept for the next push.
    pub fn push(&mut self, chunk: &[u8]) -> RtsResult<Vec<RtsEvent>> {
        debug_assert!(self.with_size);
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            let Some(&header_len) = self.buf.first() else {
                break;
            };
            let header_len = header_len as usize;
            if self.buf.len() < 1 + header_len {
                break;
            }

            let header_bytes = &self.buf[1..1 + header_len];
            let mut pos = 0;
            let header = self.parse_header(header_bytes, &mut pos, true)?;
            if pos > header_len {
                return Err(RtsError::InvalidPayload(format!(
                    "header fields exceed declared header length {header_len}"
                )));
            }

            let payload_len = header.payload_len().unwrap_or(0) as usize;
            let total = 1 + header_len + payload_len;
            if self.buf.len() < total {
                // Tolerated: wait for the rest of the payload.
                trace!(
                    have = self.buf.len(),
                    need = total,
                    "rts: buffering partial packet"
                );
                break;
            }

            self.buf.advance(1 + header_len);
            let payload = self.buf.split_to(payload_len).freeze();
            events.push(self.finish(header, payload)?);
        }
        Ok(events)
    }

    /// Drop any buffered partial packet and all timestamp state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.next_time.clear();
        self.announced = None;
    }

    fn parse_header(&self, data: &[u8], pos: &mut usize, with_size: bool) -> RtsResult<Header> {
        let hdr = read_field(data, pos)?;
        let packet_type = hdr & 3;
        let track = hdr >> 2;

        if track == 0 {
            // Control packets (trackId == -1).
            return match packet_type {
                TYPE_INIT => {
                    let video = read_field(data, pos)?;
                    let audio = read_field(data, pos)?;
                    Ok(Header::InitTracks {
                        video: (video > 0).then(|| (video - 1) as u32),
                        audio: (audio > 0).then(|| (audio - 1) as u32),
                    })
                }
                TYPE_DATA => {
                    let payload_len = with_size.then(|| read_field(data, pos)).transpose()?;
                    Ok(Header::Metadata { payload_len })
                }
                other => Err(RtsError::InvalidPayload(format!(
                    "control packet with type {other}"
                ))),
            };
        }

        let track_id = (track - 1) as u32;
        match packet_type {
            TYPE_DATA => {
                let time = read_field(data, pos)?;
                let payload_len = with_size.then(|| read_field(data, pos)).transpose()?;
                Ok(Header::Data {
                    track_id,
                    time,
                    payload_len,
                })
            }
            TYPE_AUDIO | TYPE_VIDEO => {
                // An absolute time is present only when we hold no running
                // timestamp for the track (first packet after Init Tracks).
                let time = if self.next_time.contains_key(&track_id) {
                    None
                } else {
                    Some(read_field(data, pos)?)
                };
                let value = read_field(data, pos)?;
                let duration = value >> 2;
                let has_composition_offset = value & 2 != 0;
                let is_key_frame = value & 1 != 0;
                let composition_offset = has_composition_offset
                    .then(|| read_field(data, pos))
                    .transpose()?
                    .map(|v| v as i32);
                let payload_len = with_size.then(|| read_field(data, pos)).transpose()?;
                Ok(Header::Media {
                    track_id,
                    audio: packet_type == TYPE_AUDIO,
                    time,
                    duration,
                    composition_offset,
                    is_key_frame,
                    payload_len,
                })
            }
            _ => Err(RtsError::UnknownFormat(format!(
                "media track {track_id} with packet type {packet_type}"
            ))),
        }
    }

    fn finish(&mut self, header: Header, payload: Bytes) -> RtsResult<RtsEvent> {
        match header {
            Header::InitTracks { video, audio } => {
                debug!(?video, ?audio, "rts: init tracks");
                self.next_time.clear();
                self.announced = Some([video, audio]);
                Ok(RtsEvent::InitTracks { video, audio })
            }
            Header::Metadata { .. } => {
                let manifest = Manifest::parse(&payload)
                    .map_err(|e| RtsError::InvalidPayload(e.to_string()))?;
                Ok(RtsEvent::Metadata(Box::new(manifest)))
            }
            Header::Data { track_id, time, .. } => {
                let value = serde_json::from_slice(&payload)
                    .map_err(|e| RtsError::InvalidPayload(format!("data payload: {e}")))?;
                Ok(RtsEvent::Data {
                    track_id,
                    time,
                    value,
                })
            }
            Header::Media {
                track_id,
                audio,
                time,
                duration,
                composition_offset,
                is_key_frame,
                ..
            } => {
                if let Some(announced) = &self.announced
                    && !announced.contains(&Some(track_id))
                {
                    return Err(RtsError::UnfoundTrack(track_id));
                }
                let time = match time {
                    Some(t) => t,
                    None => *self
                        .next_time
                        .get(&track_id)
                        .ok_or(RtsError::UnfoundTrack(track_id))?,
                };
                self.next_time.insert(track_id, time + duration);

                let mut sample = Sample::new(time, duration as i64, payload);
                sample.composition_offset = composition_offset;
                sample.is_key_frame = is_key_frame;

                if audio {
                    Ok(RtsEvent::Audio { track_id, sample })
                } else {
                    Ok(RtsEvent::Video { track_id, sample })
                }
            }
        }
    }
}

impl Header {
    fn payload_len(&self) -> Option<u64> {
        match self {
            Header::InitTracks { .. } => None,
            Header::Metadata { payload_len }
            | Header::Data { payload_len, .. }
            | Header::Media { payload_len, .. } => *payload_len,
        }
    }
}

fn read_field(data: &[u8], pos: &mut usize) -> RtsResult<u64> {
    read_varint(data, pos).ok_or_else(|| RtsError::InvalidPayload("truncated header".into()))
}

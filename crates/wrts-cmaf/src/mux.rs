use base64::Engine as _;
use bytes::Bytes;
use wrts_media::{Codec, ProtectionEntry, ProtectionScheme, Sample, Track, TrackKind};

use crate::{
    CmafError, CmafResult,
    boxes::BoxWriter,
};

/// Movie and media timescale: 1 ms.
const TIMESCALE: u32 = 1000;

/// Identity transformation matrix for `mvhd`/`tkhd`.
const MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Sample flags: sync sample, depends on nothing.
const FLAGS_SYNC: u32 = 0x0200_0000;
/// Sample flags: non-sync, depends on others and is depended on.
const FLAGS_NON_SYNC: u32 = 0x0101_0000;

/// Fragmented-MP4 writer for a single track.
///
/// Constructed by [`CmafMux::init`], which also returns the initialization
/// segment; every [`CmafMux::write`] then yields one complete
/// `moof` + `mdat` fragment. Fragment sequence numbers start at 1 and
/// restart with each new `init`.
#[derive(Debug)]
pub struct CmafMux {
    audio: bool,
    sequence: u32,
}

impl CmafMux {
    /// Validate the track and emit the initialization segment
    /// (`ftyp` + `moov`).
    pub fn init(
        track: &Track,
        protection: Option<&ProtectionEntry>,
    ) -> CmafResult<(Self, Bytes)> {
        let audio = match track.kind {
            TrackKind::Audio => true,
            TrackKind::Video => false,
            TrackKind::Data => {
                return Err(CmafError::UnsupportedTrackType("data".into()));
            }
        };
        match (audio, track.codec) {
            (false, Codec::H264) | (true, Codec::Aac) | (true, Codec::Mp3) => {}
            _ => return Err(CmafError::UnsupportedCodec(track.codec_string.clone())),
        }
        if !audio && track.config.is_none() {
            return Err(CmafError::UnsupportedCodec(format!(
                "{}: missing decoder configuration",
                track.codec_string
            )));
        }

        let mut w = BoxWriter::new();
        write_ftyp(&mut w);

        let moov = w.open(b"moov");
        write_mvhd(&mut w);

        let trak = w.open(b"trak");
        write_tkhd(&mut w, track, audio);

        let mdia = w.open(b"mdia");
        write_mdhd(&mut w);
        write_hdlr(&mut w, audio);

        let minf = w.open(b"minf");
        if audio {
            let smhd = w.open_full(b"smhd", 0, 0);
            w.u16(0); // balance
            w.u16(0);
            w.close(smhd);
        } else {
            let vmhd = w.open_full(b"vmhd", 0, 1);
            w.u16(0); // graphics mode
            w.zeros(6); // opcolor
            w.close(vmhd);
        }
        write_dinf(&mut w);

        let stbl = w.open(b"stbl");
        let stsd = w.open_full(b"stsd", 0, 0);
        w.u32(1); // entry_count
        if audio {
            write_audio_entry(&mut w, track, protection);
        } else {
            write_video_entry(&mut w, track, protection);
        }
        w.close(stsd);
        write_empty_sample_tables(&mut w);
        w.close(stbl);

        w.close(minf);
        w.close(mdia);
        w.close(trak);

        let mvex = w.open(b"mvex");
        let trex = w.open_full(b"trex", 0, 0);
        w.u32(1); // track_ID
        w.u32(1); // default_sample_description_index
        w.u32(0);
        w.u32(0);
        w.u32(0);
        w.close(trex);
        w.close(mvex);

        // Complete pssh boxes from the manifest pass through verbatim.
        if let Some(entry) = protection {
            for b64 in entry.pssh.values() {
                if let Ok(raw) = base64::engine::general_purpose::STANDARD.decode(b64) {
                    w.bytes(&raw);
                }
            }
        }
        w.close(moov);

        Ok((Self { audio, sequence: 0 }, w.finish()))
    }

    /// Emit one media fragment carrying `sample`.
    pub fn write(&mut self, sample: &Sample, protection: Option<&ProtectionEntry>) -> Bytes {
        self.sequence += 1;

        let mut w = BoxWriter::new();
        let moof = w.open(b"moof");

        let mfhd = w.open_full(b"mfhd", 0, 0);
        w.u32(self.sequence);
        w.close(mfhd);

        let traf = w.open(b"traf");

        // default-base-is-moof | sample-description-index present.
        let tfhd = w.open_full(b"tfhd", 0, 0x020002);
        w.u32(1); // track_ID
        w.u32(1); // sample_description_index
        w.close(tfhd);

        let tfdt = w.open_full(b"tfdt", 1, 0);
        w.u64(sample.time);
        w.close(tfdt);

        // data-offset | duration | size | flags | composition offset.
        let trun = w.open_full(b"trun", 0, 0x000f01);
        w.u32(1); // sample_count
        let data_offset_at = w.placeholder_u32();
        w.u32(sample.duration.max(0) as u32);
        w.u32(sample.data.len() as u32);
        let flags = if self.audio || sample.is_key_frame {
            FLAGS_SYNC
        } else {
            FLAGS_NON_SYNC
        };
        w.u32(flags);
        w.u32(sample.composition_offset.unwrap_or(0) as u32);
        w.close(trun);

        if let Some(entry) = protection {
            self.write_sample_encryption(&mut w, sample, entry);
        }

        w.close(traf);
        w.close(moof);

        let moof_size = w.position();
        w.patch_u32(data_offset_at, (moof_size + 8) as u32);

        let mdat = w.open(b"mdat");
        w.bytes(&sample.data);
        w.close(mdat);

        w.finish()
    }

    fn write_sample_encryption(
        &self,
        w: &mut BoxWriter,
        sample: &Sample,
        entry: &ProtectionEntry,
    ) {
        let cbcs = entry.scheme == ProtectionScheme::Cbcs;
        let iv = if cbcs { None } else { entry.iv_bytes() };
        let subs = &sample.sub_samples;

        let info_size = iv.map_or(0, |iv| iv.len())
            + if subs.is_empty() { 0 } else { 2 + 6 * subs.len() };

        let saiz = w.open_full(b"saiz", 0, 0);
        w.u8(info_size as u8); // default_sample_info_size
        w.u32(1); // sample_count
        w.close(saiz);

        let saio_entry_at = if self.audio && cbcs {
            // Audio CBCS carries no per-sample auxiliary data to point at.
            None
        } else {
            let saio = w.open_full(b"saio", 0, 0);
            w.u32(1); // entry_count
            let at = w.placeholder_u32();
            w.close(saio);
            Some(at)
        };

        let senc_flags = if subs.is_empty() { 0 } else { 2 };
        let senc = w.open_full(b"senc", 0, senc_flags);
        w.u32(1); // sample_count
        let payload_at = w.position();
        if let Some(iv) = iv {
            w.bytes(&iv);
        }
        if !subs.is_empty() {
            w.u16(subs.len() as u16);
            for sub in subs {
                w.u16(sub.clear_bytes);
                w.u32(sub.encrypted_bytes);
            }
        }
        w.close(senc);

        // saio points at the auxiliary data inside senc, relative to the
        // moof start (which is offset 0 of this fragment).
        if let Some(at) = saio_entry_at {
            w.patch_u32(at, payload_at as u32);
        }
    }
}

fn write_ftyp(w: &mut BoxWriter) {
    let ftyp = w.open(b"ftyp");
    w.bytes(b"isom"); // major brand
    w.u32(0); // minor version
    for brand in [b"isom", b"cmfc", b"iso9", b"dash"] {
        w.bytes(brand);
    }
    w.close(ftyp);
}

fn write_mvhd(w: &mut BoxWriter) {
    let mvhd = w.open_full(b"mvhd", 0, 0);
    w.u32(0); // creation time
    w.u32(0); // modification time
    w.u32(TIMESCALE);
    w.u32(0); // duration, unknown for live
    w.u32(0x0001_0000); // rate 1.0
    w.u16(0x0100); // volume 1.0
    w.u16(0);
    w.zeros(8);
    for m in MATRIX {
        w.u32(m);
    }
    w.zeros(24); // pre_defined
    w.u32(2); // next_track_ID
    w.close(mvhd);
}

fn write_tkhd(w: &mut BoxWriter, track: &Track, audio: bool) {
    // Flags: track enabled, in movie.
    let tkhd = w.open_full(b"tkhd", 0, 3);
    w.u32(0); // creation time
    w.u32(0); // modification time
    w.u32(1); // track_ID
    w.u32(0);
    w.u32(0); // duration
    w.zeros(8);
    w.u16(0); // layer
    w.u16(0); // alternate_group
    w.u16(if audio { 0x0100 } else { 0 }); // volume
    w.u16(0);
    for m in MATRIX {
        w.u32(m);
    }
    let resolution = track.resolution.unwrap_or_default();
    w.u32(if audio { 0 } else { resolution.width << 16 });
    w.u32(if audio { 0 } else { resolution.height << 16 });
    w.close(tkhd);
}

fn write_mdhd(w: &mut BoxWriter) {
    let mdhd = w.open_full(b"mdhd", 0, 0);
    w.u32(0);
    w.u32(0);
    w.u32(TIMESCALE);
    w.u32(0);
    w.u16(0x55c4); // language "und"
    w.u16(0);
    w.close(mdhd);
}

fn write_hdlr(w: &mut BoxWriter, audio: bool) {
    let hdlr = w.open_full(b"hdlr", 0, 0);
    w.u32(0); // pre_defined
    w.bytes(if audio { b"soun" } else { b"vide" });
    w.zeros(12);
    w.bytes(if audio {
        b"SoundHandler\0"
    } else {
        b"VideoHandler\0"
    });
    w.close(hdlr);
}

fn write_dinf(w: &mut BoxWriter) {
    let dinf = w.open(b"dinf");
    let dref = w.open_full(b"dref", 0, 0);
    w.u32(1); // entry_count
    let url = w.open_full(b"url ", 0, 1); // self-contained
    w.close(url);
    w.close(dref);
    w.close(dinf);
}

fn write_empty_sample_tables(w: &mut BoxWriter) {
    for fourcc in [b"stts", b"stsc"] {
        let b = w.open_full(fourcc, 0, 0);
        w.u32(0); // entry_count
        w.close(b);
    }
    let stsz = w.open_full(b"stsz", 0, 0);
    w.u32(0); // sample_size
    w.u32(0); // sample_count
    w.close(stsz);
    let stco = w.open_full(b"stco", 0, 0);
    w.u32(0);
    w.close(stco);
}

fn write_video_entry(w: &mut BoxWriter, track: &Track, protection: Option<&ProtectionEntry>) {
    let entry = w.open(if protection.is_some() { b"encv" } else { b"avc1" });
    w.zeros(24);
    let resolution = track.resolution.unwrap_or_default();
    w.u16(resolution.width as u16);
    w.u16(resolution.height as u16);
    w.u32(0x0048_0000); // 72 dpi horizontal
    w.u32(0x0048_0000); // 72 dpi vertical
    w.u32(0);
    w.u16(1); // frame_count
    w.zeros(32); // compressor name
    w.u16(0x0018); // depth
    w.u16(0xffff); // pre_defined: use default color table

    let avcc = w.open(b"avcC");
    if let Some(config) = &track.config {
        w.bytes(config);
    }
    w.close(avcc);

    if let Some(entry_prot) = protection {
        write_sinf(w, b"avc1", entry_prot, true);
    }
    w.close(entry);
}

fn write_audio_entry(w: &mut BoxWriter, track: &Track, protection: Option<&ProtectionEntry>) {
    let entry = w.open(if protection.is_some() { b"enca" } else { b"mp4a" });
    w.zeros(6);
    w.u16(1); // data_reference_index
    w.zeros(8);
    w.u16(track.channels);
    w.u16(16); // sample size
    w.u32(0);
    w.u32((track.rate & 0xffff) << 16); // 16.16 fixed point

    write_esds(w, track);

    if let Some(entry_prot) = protection {
        write_sinf(w, b"mp4a", entry_prot, false);
    }
    w.close(entry);
}

fn write_esds(w: &mut BoxWriter, track: &Track) {
    let object_type = track.codec.audio_object_type().unwrap_or(0x40);

    let mut decoder_config = Vec::new();
    decoder_config.push(object_type);
    decoder_config.push(0x15); // audio stream type
    decoder_config.extend_from_slice(&[0, 0, 0]); // buffer size (24-bit)
    decoder_config.extend_from_slice(&0u32.to_be_bytes()); // max bitrate
    decoder_config.extend_from_slice(&0u32.to_be_bytes()); // avg bitrate
    if let Some(config) = &track.config {
        push_descriptor(&mut decoder_config, 0x05, config);
    }

    let mut es = Vec::new();
    es.extend_from_slice(&1u16.to_be_bytes()); // ES_ID
    es.push(0); // stream dependence / URL / OCR flags
    push_descriptor(&mut es, 0x04, &decoder_config);
    push_descriptor(&mut es, 0x06, &[0x02]); // SLConfig: MP4

    let esds = w.open_full(b"esds", 0, 0);
    let mut top = Vec::new();
    push_descriptor(&mut top, 0x03, &es);
    w.bytes(&top);
    w.close(esds);
}

/// MPEG-4 descriptor: tag + expandable length + payload.
fn push_descriptor(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    let len = payload.len();
    let mut groups = vec![(len & 0x7f) as u8];
    let mut rest = len >> 7;
    while rest > 0 {
        groups.push((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    groups.reverse();
    out.extend_from_slice(&groups);
    out.extend_from_slice(payload);
}

fn write_sinf(w: &mut BoxWriter, original: &[u8; 4], entry: &ProtectionEntry, video: bool) {
    let cbcs = entry.scheme == ProtectionScheme::Cbcs;

    let sinf = w.open(b"sinf");

    let frma = w.open(b"frma");
    w.bytes(original);
    w.close(frma);

    let schm = w.open_full(b"schm", 0, 0);
    w.bytes(&entry.scheme.as_fourcc());
    w.u32(0x0001_0000); // scheme version
    w.close(schm);

    let schi = w.open(b"schi");
    let tenc = w.open_full(b"tenc", u8::from(cbcs), 0);
    w.u8(0); // reserved
    if cbcs && video {
        w.u8(1 << 4 | 9); // crypt:skip pattern
    } else {
        w.u8(0);
    }
    w.u8(1); // default_isProtected
    w.u8(if cbcs { 0 } else { 16 }); // per-sample IV size
    w.bytes(&entry.kid_bytes().unwrap_or_default());
    if cbcs {
        w.u8(16); // constant IV size
        w.bytes(&entry.iv_bytes().unwrap_or_default());
    }
    w.close(tenc);
    w.close(schi);

    w.close(sinf);
}

#[cfg(test)]
mod tests {
    use wrts_media::Resolution;

    use super::*;

    fn video_track() -> Track {
        Track {
            id: 1,
            kind: TrackKind::Video,
            codec: Codec::H264,
            codec_string: "avc1.42c01e".into(),
            bandwidth: 100_000,
            rate: 30,
            resolution: Some(Resolution::new(1280, 720)),
            channels: 0,
            config: Some(Bytes::from_static(&[0x01, 0x64, 0x00, 0x1f, 0xff])),
            content_protection: None,
            up: None,
            down: None,
        }
    }

    fn audio_track() -> Track {
        Track {
            id: 0,
            kind: TrackKind::Audio,
            codec: Codec::Aac,
            codec_string: "mp4a.40.2".into(),
            bandwidth: 8_000,
            rate: 48_000,
            resolution: None,
            channels: 2,
            config: Some(Bytes::from_static(&[0x11, 0x90])),
            content_protection: None,
            up: None,
            down: None,
        }
    }

    #[test]
    fn init_is_deterministic() {
        let (_, a) = CmafMux::init(&video_track(), None).unwrap();
        let (_, b) = CmafMux::init(&video_track(), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn init_rejects_data_track() {
        let mut t = video_track();
        t.kind = TrackKind::Data;
        assert!(matches!(
            CmafMux::init(&t, None),
            Err(CmafError::UnsupportedTrackType(_))
        ));
    }

    #[test]
    fn init_rejects_video_without_config() {
        let mut t = video_track();
        t.config = None;
        assert!(matches!(
            CmafMux::init(&t, None),
            Err(CmafError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn init_rejects_audio_codec_on_video_track() {
        let mut t = video_track();
        t.codec = Codec::Aac;
        assert!(matches!(
            CmafMux::init(&t, None),
            Err(CmafError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn sequence_numbers_restart_on_init() {
        let sample = Sample::new(0, 20, Bytes::from_static(&[1]));
        let (mut mux, _) = CmafMux::init(&audio_track(), None).unwrap();
        let first = mux.write(&sample, None);
        let second = mux.write(&sample, None);
        assert_ne!(first, second);

        let (mut mux2, _) = CmafMux::init(&audio_track(), None).unwrap();
        assert_eq!(mux2.write(&sample, None), first);
    }

    #[test]
    fn audio_fragments_are_sync_samples() {
        let (mut mux, _) = CmafMux::init(&audio_track(), None).unwrap();
        let sample = Sample::new(100, 21, Bytes::from_static(&[0xaa]));
        let frag = mux.write(&sample, None);
        let trun = find_box(&frag, b"trun").unwrap();
        // version/flags, sample_count, data_offset, duration, size, flags.
        let flags = u32::from_be_bytes(trun[20..24].try_into().unwrap());
        assert_eq!(flags, FLAGS_SYNC);
    }

    #[test]
    fn non_key_video_fragments_are_non_sync() {
        let (mut mux, _) = CmafMux::init(&video_track(), None).unwrap();
        let sample = Sample::new(100, 40, Bytes::from_static(&[0xaa]));
        let frag = mux.write(&sample, None);
        let trun = find_box(&frag, b"trun").unwrap();
        let flags = u32::from_be_bytes(trun[20..24].try_into().unwrap());
        assert_eq!(flags, FLAGS_NON_SYNC);
    }

    /// Locate the payload (after size+fourcc) of the first box with the
    /// given fourcc, searching nested boxes breadth-first over raw bytes.
    pub(super) fn find_box<'a>(data: &'a [u8], fourcc: &[u8; 4]) -> Option<&'a [u8]> {
        let mut offset = 0;
        while offset + 8 <= data.len() {
            if &data[offset + 4..offset + 8] == fourcc {
                let size =
                    u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
                return Some(&data[offset + 8..offset + size]);
            }
            offset += 1;
        }
        None
    }
}

//! Byte-level checks of the emitted initialization segment and fragments.

use std::collections::BTreeMap;

use bytes::Bytes;
use wrts_cmaf::CmafMux;
use wrts_media::{
    Codec, ProtectionEntry, ProtectionScheme, Resolution, Sample, SubSample, Track, TrackKind,
};

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
        config: Some(Bytes::from_static(&[0x01, 0x42, 0xc0, 0x1e, 0xff])),
        content_protection: None,
        up: None,
        down: None,
    }
}

fn protection(scheme: ProtectionScheme) -> ProtectionEntry {
    ProtectionEntry {
        scheme,
        kid: "000102030405060708090a0b0c0d0e0f".into(),
        iv: Some("101112131415161718191a1b1c1d1e1f".into()),
        pssh: BTreeMap::new(),
    }
}

/// Payload of the first box with the given fourcc anywhere in `data`.
fn find_box<'a>(data: &'a [u8], fourcc: &[u8; 4]) -> Option<&'a [u8]> {
    let mut offset = 0;
    while offset + 8 <= data.len() {
        if &data[offset + 4..offset + 8] == fourcc {
            let size = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
            if size >= 8 && offset + size <= data.len() {
                return Some(&data[offset + 8..offset + size]);
            }
        }
        offset += 1;
    }
    None
}

fn contains_box(data: &[u8], fourcc: &[u8; 4]) -> bool {
    find_box(data, fourcc).is_some()
}

#[test]
fn init_has_track_and_trex_id_one() {
    let (_, init) = CmafMux::init(&video_track(), None).unwrap();

    assert_eq!(&init[4..8], b"ftyp");

    let tkhd = find_box(&init, b"tkhd").unwrap();
    // version/flags(4), creation(4), modification(4), then track_ID.
    let track_id = u32::from_be_bytes(tkhd[12..16].try_into().unwrap());
    assert_eq!(track_id, 1);

    let trex = find_box(&init, b"trex").unwrap();
    let trex_track = u32::from_be_bytes(trex[4..8].try_into().unwrap());
    assert_eq!(trex_track, 1);
    let sdi = u32::from_be_bytes(trex[8..12].try_into().unwrap());
    assert_eq!(sdi, 1);
}

#[test]
fn key_frame_fragment_layout() {
    let (mut mux, _) = CmafMux::init(&video_track(), None).unwrap();

    let mut sample = Sample::new(123_456, 40, Bytes::from_static(&[0xab]));
    sample.composition_offset = Some(10);
    sample.is_key_frame = true;
    let frag = mux.write(&sample, None);

    assert_eq!(&frag[4..8], b"moof");

    let mfhd = find_box(&frag, b"mfhd").unwrap();
    assert_eq!(u32::from_be_bytes(mfhd[4..8].try_into().unwrap()), 1);

    let tfdt = find_box(&frag, b"tfdt").unwrap();
    assert_eq!(tfdt[0], 1, "tfdt version 1");
    let base_time = u64::from_be_bytes(tfdt[4..12].try_into().unwrap());
    assert_eq!(base_time, 123_456);

    let trun = find_box(&frag, b"trun").unwrap();
    let sample_flags = u32::from_be_bytes(trun[20..24].try_into().unwrap());
    assert_eq!(sample_flags, 0x0200_0000);
    let composition = u32::from_be_bytes(trun[24..28].try_into().unwrap());
    assert_eq!(composition, 10);

    let mdat = find_box(&frag, b"mdat").unwrap();
    assert_eq!(mdat, &[0xab]);
}

#[test]
fn trun_data_offset_points_at_mdat_payload() {
    let (mut mux, _) = CmafMux::init(&video_track(), None).unwrap();
    let mut sample = Sample::new(0, 40, Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]));
    sample.is_key_frame = true;
    let frag = mux.write(&sample, None);

    let trun = find_box(&frag, b"trun").unwrap();
    let data_offset = u32::from_be_bytes(trun[8..12].try_into().unwrap()) as usize;
    assert_eq!(&frag[data_offset..data_offset + 4], &[0xde, 0xad, 0xbe, 0xef]);
}

#[test]
fn fragment_sequence_increments() {
    let (mut mux, _) = CmafMux::init(&video_track(), None).unwrap();
    let sample = Sample::new(0, 40, Bytes::from_static(&[1]));
    for expected in 1u32..=3 {
        let frag = mux.write(&sample, None);
        let mfhd = find_box(&frag, b"mfhd").unwrap();
        assert_eq!(u32::from_be_bytes(mfhd[4..8].try_into().unwrap()), expected);
    }
}

#[test]
fn write_is_deterministic_for_identical_samples() {
    let entry = protection(ProtectionScheme::Cenc);
    let mut sample = Sample::new(5, 40, Bytes::from_static(&[9, 9]));
    sample.sub_samples = vec![SubSample {
        clear_bytes: 7,
        encrypted_bytes: 93,
    }];

    let (mut a, _) = CmafMux::init(&video_track(), Some(&entry)).unwrap();
    let (mut b, _) = CmafMux::init(&video_track(), Some(&entry)).unwrap();
    assert_eq!(a.write(&sample, Some(&entry)), b.write(&sample, Some(&entry)));
}

#[test]
fn protected_init_carries_sinf_and_tenc() {
    let entry = protection(ProtectionScheme::Cenc);
    let (_, init) = CmafMux::init(&video_track(), Some(&entry)).unwrap();

    assert!(contains_box(&init, b"encv"));
    assert!(!contains_box(&init, b"avc1") || find_box(&init, b"frma").is_some());

    let frma = find_box(&init, b"frma").unwrap();
    assert_eq!(&frma[..4], b"avc1");

    let schm = find_box(&init, b"schm").unwrap();
    assert_eq!(&schm[4..8], b"cenc");

    let tenc = find_box(&init, b"tenc").unwrap();
    // version/flags(4), reserved(1), pattern(1), isProtected(1), iv size(1).
    assert_eq!(tenc[6], 1, "default_isProtected");
    assert_eq!(tenc[7], 16, "per-sample IV size");
    assert_eq!(&tenc[8..24], &hex32("000102030405060708090a0b0c0d0e0f"));
}

#[test]
fn cbcs_video_tenc_has_pattern_and_constant_iv() {
    let entry = protection(ProtectionScheme::Cbcs);
    let (_, init) = CmafMux::init(&video_track(), Some(&entry)).unwrap();

    let tenc = find_box(&init, b"tenc").unwrap();
    assert_eq!(tenc[0], 1, "tenc version 1 for cbcs");
    assert_eq!(tenc[5], 1 << 4 | 9, "crypt/skip pattern");
    assert_eq!(tenc[7], 0, "per-sample IV size");
    assert_eq!(tenc[24], 16, "constant IV size");
    assert_eq!(&tenc[25..41], &hex32("101112131415161718191a1b1c1d1e1f"));
}

#[test]
fn protected_fragment_has_saiz_saio_senc() {
    let entry = protection(ProtectionScheme::Cenc);
    let (mut mux, _) = CmafMux::init(&video_track(), Some(&entry)).unwrap();

    let mut sample = Sample::new(0, 40, Bytes::from_static(&[1, 2, 3]));
    sample.is_key_frame = true;
    sample.sub_samples = vec![SubSample {
        clear_bytes: 1,
        encrypted_bytes: 2,
    }];
    let frag = mux.write(&sample, Some(&entry));

    assert!(contains_box(&frag, b"saiz"));
    assert!(contains_box(&frag, b"saio"));

    let senc = find_box(&frag, b"senc").unwrap();
    // flags bit 1: subsamples present.
    assert_eq!(senc[3] & 2, 2);
    let sample_count = u32::from_be_bytes(senc[4..8].try_into().unwrap());
    assert_eq!(sample_count, 1);
    // IV, then subsample count and one entry.
    assert_eq!(&senc[8..24], &hex32("101112131415161718191a1b1c1d1e1f"));
    let sub_count = u16::from_be_bytes(senc[24..26].try_into().unwrap());
    assert_eq!(sub_count, 1);

    // saio points at the IV inside senc.
    let saio = find_box(&frag, b"saio").unwrap();
    let offset = u32::from_be_bytes(saio[8..12].try_into().unwrap()) as usize;
    assert_eq!(&frag[offset..offset + 16], &hex32("101112131415161718191a1b1c1d1e1f"));
}

#[test]
fn cbcs_fragment_has_no_iv_in_senc() {
    let entry = protection(ProtectionScheme::Cbcs);
    let (mut mux, _) = CmafMux::init(&video_track(), Some(&entry)).unwrap();

    let mut sample = Sample::new(0, 40, Bytes::from_static(&[1]));
    sample.is_key_frame = true;
    sample.sub_samples = vec![SubSample {
        clear_bytes: 4,
        encrypted_bytes: 8,
    }];
    let frag = mux.write(&sample, Some(&entry));

    let senc = find_box(&frag, b"senc").unwrap();
    // Straight to the subsample array after sample_count.
    let sub_count = u16::from_be_bytes(senc[8..10].try_into().unwrap());
    assert_eq!(sub_count, 1);
}

#[test]
fn pssh_boxes_are_appended_verbatim() {
    use base64::Engine as _;

    // Minimal well-formed pssh box: size 12, fourcc, version/flags.
    let raw = {
        let mut b = Vec::new();
        b.extend_from_slice(&12u32.to_be_bytes());
        b.extend_from_slice(b"pssh");
        b.extend_from_slice(&[0, 0, 0, 0]);
        b
    };
    let mut entry = protection(ProtectionScheme::Cenc);
    entry.pssh.insert(
        "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed".into(),
        base64::engine::general_purpose::STANDARD.encode(&raw),
    );

    let (_, init) = CmafMux::init(&video_track(), Some(&entry)).unwrap();
    assert!(contains_box(&init, b"pssh"));
}

fn hex32(s: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        out[i] = u8::from_str_radix(std::str::from_utf8(chunk).unwrap(), 16).unwrap();
    }
    out
}

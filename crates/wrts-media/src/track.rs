use bytes::Bytes;

use crate::{MediaError, MediaResult};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrackKind {
    Audio,
    Video,
    Data,
}

impl TrackKind {
    pub fn parse(s: &str) -> MediaResult<Self> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "data" => Ok(Self::Data),
            other => Err(MediaError::InvalidManifest(format!(
                "unknown track type {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Codec {
    H264,
    Aac,
    Mp3,
}

impl Codec {
    /// Resolve a codec from its RFC 6381 string (`avc1.42c01e`, `mp4a.40.2`, …).
    pub fn parse(s: &str) -> MediaResult<Self> {
        let family = s.split('.').next().unwrap_or(s);
        match family {
            "avc1" | "avc3" => Ok(Self::H264),
            "mp4a" => {
                // mp4a.69 / mp4a.6B are MPEG-1/2 audio, everything else AAC.
                match s.split('.').nth(1) {
                    Some("69") | Some("6B") | Some("6b") => Ok(Self::Mp3),
                    _ => Ok(Self::Aac),
                }
            }
            "mp3" => Ok(Self::Mp3),
            _ => Err(MediaError::UnknownCodec(s.to_string())),
        }
    }

    /// MPEG-4 audio object type indication used in `esds`.
    pub fn audio_object_type(&self) -> Option<u8> {
        match self {
            Self::Aac => Some(0x40),
            Self::Mp3 => Some(0x69),
            Self::H264 => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when `self` does not fit inside `max` in either dimension.
    pub fn exceeds(&self, max: &Resolution) -> bool {
        self.width > max.width || self.height > max.height
    }
}

/// One rendition of the stream.
///
/// `up`/`down` are indices into [`crate::Metadata::tracks`] linking same-kind
/// tracks by ascending/descending bandwidth; they are rebuilt by
/// [`crate::Metadata::fix`].
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: u32,
    pub kind: TrackKind,
    pub codec: Codec,
    pub codec_string: String,
    /// Average bandwidth in bytes per second.
    pub bandwidth: u64,
    /// Sample rate for audio, frame rate for video.
    pub rate: u32,
    pub resolution: Option<Resolution>,
    pub channels: u16,
    /// Codec configuration (`avcC` payload or AudioSpecificConfig).
    pub config: Option<Bytes>,
    /// Key id of the protection entry covering this track, if any.
    pub content_protection: Option<String>,
    pub up: Option<usize>,
    pub down: Option<usize>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("avc1.42c01e", Codec::H264)]
    #[case("avc3.640028", Codec::H264)]
    #[case("mp4a.40.2", Codec::Aac)]
    #[case("mp4a", Codec::Aac)]
    #[case("mp4a.69", Codec::Mp3)]
    #[case("mp3", Codec::Mp3)]
    fn codec_parsing(#[case] s: &str, #[case] expected: Codec) {
        assert_eq!(Codec::parse(s).unwrap(), expected);
    }

    #[test]
    fn unknown_codec_is_rejected() {
        assert!(matches!(
            Codec::parse("vp09.00.10.08"),
            Err(MediaError::UnknownCodec(_))
        ));
    }

    #[test]
    fn resolution_exceeds() {
        let max = Resolution::new(1920, 1080);
        assert!(!Resolution::new(1280, 720).exceeds(&max));
        assert!(Resolution::new(2560, 1440).exceeds(&max));
        assert!(Resolution::new(1280, 1440).exceeds(&max));
    }
}

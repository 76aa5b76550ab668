use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Number;

use crate::{MediaError, MediaResult};

/// Stream manifest as served at `<endpoint>/index.json` and carried by RTS
/// metadata packets.
///
/// This is the wire shape; [`crate::Metadata::from_manifest`] turns it into
/// the normalized model.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Live-clock anchor. An integral number is milliseconds, a number with
    /// a fractional part is seconds.
    #[serde(default, alias = "currentTime")]
    pub live_time: Option<Number>,
    #[serde(default)]
    pub tracks: Vec<ManifestTrack>,
    #[serde(default)]
    pub sequence: Option<SequenceInfo>,
    #[serde(default)]
    pub content_protection: Vec<ManifestProtection>,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> MediaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| MediaError::InvalidManifest(e.to_string()))
    }

    /// Anchor in milliseconds: top-level `liveTime`/`currentTime`, falling
    /// back to the largest per-track `currentTime`.
    pub fn live_time_ms(&self) -> Option<u64> {
        self.live_time
            .as_ref()
            .map(number_to_ms)
            .or_else(|| {
                self.tracks
                    .iter()
                    .filter_map(|t| t.current_time.as_ref().map(number_to_ms))
                    .max()
            })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTrack {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "codecDescription")]
    pub codec: Option<String>,
    /// Bytes per second.
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default, alias = "frameRate")]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub channels: Option<u16>,
    #[serde(default)]
    pub resolution: Option<ManifestResolution>,
    /// Base64 codec configuration.
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub content_protection: Option<String>,
    #[serde(default)]
    pub current_time: Option<Number>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct ManifestResolution {
    pub width: u32,
    pub height: u32,
}

/// Sequence addressing: a URL template with `{trackId}`, `{sequenceId}` and
/// `{ext}` placeholders plus the id the server is currently producing.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SequenceInfo {
    pub pattern: String,
    pub current_id: u64,
}

impl SequenceInfo {
    /// Substitute the placeholders of `pattern`.
    pub fn format(&self, track_id: u32, sequence_id: u64, ext: &str) -> String {
        self.pattern
            .replace("{trackId}", &track_id.to_string())
            .replace("{sequenceId}", &sequence_id.to_string())
            .replace("{ext}", ext)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestProtection {
    pub scheme: String,
    pub kid: String,
    #[serde(default)]
    pub iv: Option<String>,
    #[serde(default)]
    pub pssh: BTreeMap<String, String>,
}

/// Millisecond/second inference: a fractional value is seconds.
pub(crate) fn number_to_ms(n: &Number) -> u64 {
    if let Some(ms) = n.as_u64() {
        ms
    } else {
        let secs = n.as_f64().unwrap_or(0.0).max(0.0);
        (secs * 1000.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "liveTime": 123456,
        "tracks": [
            {"id": 1, "type": "video", "codec": "avc1.42c01e", "bandwidth": 100000,
             "frameRate": 30, "resolution": {"width": 1280, "height": 720},
             "config": "AWQAH//hAAA="},
            {"id": 0, "type": "audio", "codecDescription": "mp4a.40.2",
             "bandwidth": 8000, "sampleRate": 48000, "channels": 2}
        ],
        "sequence": {"pattern": "s/{trackId}/{sequenceId}.{ext}", "currentId": 100},
        "contentProtection": [
            {"scheme": "cenc", "kid": "000102030405060708090a0b0c0d0e0f",
             "iv": "101112131415161718191a1b1c1d1e1f",
             "pssh": {"edef8ba9-79d6-4ace-a3c8-27dcd51d21ed": "cHNzaA=="}}
        ]
    }"#;

    #[test]
    fn parses_full_manifest() {
        let m = Manifest::parse(MANIFEST.as_bytes()).unwrap();
        assert_eq!(m.live_time_ms(), Some(123_456));
        assert_eq!(m.tracks.len(), 2);
        assert_eq!(m.tracks[0].codec.as_deref(), Some("avc1.42c01e"));
        assert_eq!(m.tracks[1].codec.as_deref(), Some("mp4a.40.2"));
        let seq = m.sequence.unwrap();
        assert_eq!(seq.current_id, 100);
        assert_eq!(seq.format(1, 101, "rts"), "s/1/101.rts");
        assert_eq!(m.content_protection.len(), 1);
    }

    #[test]
    fn fractional_time_is_seconds() {
        let m = Manifest::parse(br#"{"currentTime": 12.5, "tracks": []}"#).unwrap();
        assert_eq!(m.live_time_ms(), Some(12_500));
    }

    #[test]
    fn integral_time_is_milliseconds() {
        let m = Manifest::parse(br#"{"currentTime": 12500, "tracks": []}"#).unwrap();
        assert_eq!(m.live_time_ms(), Some(12_500));
    }

    #[test]
    fn track_current_time_seeds_anchor() {
        let m = Manifest::parse(
            br#"{"tracks": [
                {"id": 0, "type": "audio", "codec": "mp4a", "currentTime": 400},
                {"id": 1, "type": "video", "codec": "avc1", "currentTime": 700}
            ]}"#,
        )
        .unwrap();
        assert_eq!(m.live_time_ms(), Some(700));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            Manifest::parse(b"{not json"),
            Err(MediaError::InvalidManifest(_))
        ));
    }
}

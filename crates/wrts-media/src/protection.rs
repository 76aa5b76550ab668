use std::collections::BTreeMap;

use crate::{MediaError, MediaResult};

/// Common-encryption scheme of a protected stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtectionScheme {
    Cenc,
    Cbc1,
    Cens,
    Cbcs,
}

impl ProtectionScheme {
    pub fn parse(s: &str) -> MediaResult<Self> {
        match s {
            "cenc" => Ok(Self::Cenc),
            "cbc1" => Ok(Self::Cbc1),
            "cens" => Ok(Self::Cens),
            "cbcs" => Ok(Self::Cbcs),
            other => Err(MediaError::UnknownScheme(other.to_string())),
        }
    }

    pub fn as_fourcc(&self) -> [u8; 4] {
        match self {
            Self::Cenc => *b"cenc",
            Self::Cbc1 => *b"cbc1",
            Self::Cens => *b"cens",
            Self::Cbcs => *b"cbcs",
        }
    }
}

/// One content-protection entry from the manifest, keyed by its key id.
///
/// `pssh` maps a DRM system id to the base64 of a complete `pssh` box; a
/// `BTreeMap` keeps the init-segment emission order deterministic.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtectionEntry {
    pub scheme: ProtectionScheme,
    /// 32 hex characters.
    pub kid: String,
    /// 32 hex characters, when the scheme uses a constant IV.
    pub iv: Option<String>,
    pub pssh: BTreeMap<String, String>,
}

impl ProtectionEntry {
    /// Key id as raw bytes; `None` when `kid` is not 32 hex characters.
    pub fn kid_bytes(&self) -> Option<[u8; 16]> {
        decode_hex16(&self.kid)
    }

    /// Constant IV as raw bytes; `None` when absent or malformed.
    pub fn iv_bytes(&self) -> Option<[u8; 16]> {
        self.iv.as_deref().and_then(decode_hex16)
    }
}

fn decode_hex16(s: &str) -> Option<[u8; 16]> {
    let raw = hex::decode(s).ok()?;
    raw.try_into().ok()
}

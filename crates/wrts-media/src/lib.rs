#![forbid(unsafe_code)]

//! Shared data model for the wrts streaming client.
//!
//! Everything that crosses a subsystem boundary lives here: media samples,
//! track descriptions, the normalized stream [`Metadata`] with its live-clock
//! anchor, and the manifest parser.

mod buffer_state;
mod environment;
mod error;
mod manifest;
mod metadata;
mod protection;
mod sample;
mod track;

pub use buffer_state::BufferState;
pub use environment::Environment;
pub use error::{MediaError, MediaResult};
pub use manifest::{Manifest, SequenceInfo};
pub use metadata::{LiveClock, Metadata};
pub use protection::{ProtectionEntry, ProtectionScheme};
pub use sample::{Sample, SubSample};
pub use track::{Codec, Resolution, Track, TrackKind};

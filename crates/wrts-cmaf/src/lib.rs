#![forbid(unsafe_code)]

//! CMAF writer: standards-compliant fragmented ISO-BMFF for one track.
//!
//! [`CmafMux::init`] emits the initialization segment (`ftyp` + `moov`,
//! including protection boxes when the track is encrypted) and
//! [`CmafMux::write`] emits one `moof` + `mdat` fragment per sample. Box
//! ordering and flag bits are fixed: identical inputs produce identical
//! bytes.

mod boxes;
mod error;
mod mux;

pub use error::{CmafError, CmafResult};
pub use mux::CmafMux;

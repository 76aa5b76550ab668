#![forbid(unsafe_code)]

//! Demultiplexer for the RTS wire container.
//!
//! RTS is a compact real-time container: each packet is a short header of
//! LEB128 varints followed by an opaque payload. Packets arrive either as
//! discrete transport frames (WebSocket) or as a continuous byte stream in
//! which every packet header is preceded by its length (HTTP bodies); the
//! `with_size` flag of [`RtsDemux`] selects the mode.

mod demux;
mod encode;
mod error;
mod varint;

pub use demux::{RtsDemux, RtsEvent};
pub use encode::RtsEncoder;
pub use error::{RtsError, RtsResult};
pub use varint::{read_varint, write_varint};

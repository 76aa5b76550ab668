#![forbid(unsafe_code)]

//! Media sources for the wrts streaming client.
//!
//! A source owns the network side of a playing session: it fetches or
//! receives the RTS stream, repairs timestamps, keeps the track-selection
//! state, and forwards normalized samples to playback. Three variants share
//! the [`SourceCore`] base:
//!
//! - [`HttpAdaptiveSource`]: pull-based numbered sequences with bitrate
//!   adaptation, frame skipping and bandwidth-emulation probes,
//! - [`WsSource`]: one long-lived WebSocket with framed RTS packets,
//! - [`HttpDirectSource`]: one long HTTP response with a size-prefixed RTS
//!   byte stream.

mod adaptive;
mod adaptive_retry;
mod base;
mod cmcd;
mod direct;
mod error;
mod events;
mod playing;
mod rate;
mod source;
mod ws;

pub use adaptive::{AdaptiveOptions, HttpAdaptiveSource};
pub use adaptive_retry::AdaptiveRetry;
pub use base::{EffectiveTrack, SourceCore, TrackSelection};
pub use cmcd::{Cmcd, CmcdContext, CmcdMode};
pub use direct::HttpDirectSource;
pub use error::{SourceError, SourceResult};
pub use events::SourceCallbacks;
pub use playing::{Playing, PlaybackSignal};
pub use rate::RecvRate;
pub use source::{
    AnySource, MediaSource, OpenParams, SourceCommand, SourceContext, SourceControl,
};
pub use ws::WsSource;

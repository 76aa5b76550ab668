#![forbid(unsafe_code)]

//! Playback side of the wrts streaming client.
//!
//! Two [`MediaBuffer`]s (audio and video, each bridging RTS samples into a
//! platform sink buffer through a CMAF writer), the buffer state machine
//! with its hysteresis thresholds, dynamic playback rate, stall recovery and
//! live-edge reconciliation, all orchestrated by the [`Player`].

mod error;
mod media_buffer;
mod playback;
mod player;
mod sink;
mod state;

pub use error::{MediaBufferError, PlayerError, PlayerResult};
pub use media_buffer::MediaBuffer;
pub use playback::{Playback, PlaybackTelemetry};
pub use player::{Player, PlayerCommand, PlayerHandle, PlayerOptions, PlayerSinks};
pub use sink::{RenderSink, SinkBuffer, SinkEvent};
pub use state::{Thresholds, next_state};

#![forbid(unsafe_code)]

//! # wrts
//!
//! Facade crate for the WRTS live-streaming client core: a pull-based,
//! low-latency player that fetches numbered media sequences, demultiplexes
//! the RTS container, adapts bitrate, and bridges samples into a platform
//! media buffer as CMAF fragments.
//!
//! ## Quick start
//!
//! ```ignore
//! use wrts::prelude::*;
//!
//! let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut player = Player::new(
//!     PlayerOptions::default(),
//!     std::sync::Arc::new(Environment::default()),
//!     sinks,
//!     events_rx,
//! );
//! let handle = player.handle();
//! player.start("https://example.com/live/channel".parse()?).await?;
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod media {
    pub use wrts_media::*;
}

pub mod rts {
    pub use wrts_rts::*;
}

pub mod cmaf {
    pub use wrts_cmaf::*;
}

pub mod net {
    pub use wrts_net::*;
}

pub mod source {
    pub use wrts_source::*;
}

pub mod play {
    pub use wrts_play::*;
}

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use wrts_media::{
        BufferState, Environment, Manifest, Metadata, Resolution, Sample, Track, TrackKind,
    };
    pub use wrts_play::{
        Player, PlayerHandle, PlayerOptions, PlayerSinks, RenderSink, SinkBuffer, SinkEvent,
    };
    pub use wrts_source::{CmcdMode, TrackSelection};
}

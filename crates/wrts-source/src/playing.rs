use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
};

use tokio::sync::broadcast;
use wrts_media::BufferState;

/// Buffer-state change or stall, published by playback, observed by sources.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlaybackSignal {
    State(BufferState),
    Stall,
}

/// Shared playing-state handle between the playback side (writer) and the
/// source side (reader).
///
/// The gauges are plain atomics so the source can read `buffer_amount`
/// without locking; state changes additionally fan out over a broadcast
/// channel. The atomic snapshot is stored *before* the signal is sent, so a
/// subscriber that reacts to `Low` always reads at least `Low` back.
#[derive(Clone, Debug)]
pub struct Playing {
    buffer_amount_ms: Arc<AtomicU64>,
    buffering: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    rate_bits: Arc<AtomicU64>,
    signals: broadcast::Sender<PlaybackSignal>,
}

impl Playing {
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(32);
        Self {
            buffer_amount_ms: Arc::new(AtomicU64::new(0)),
            buffering: Arc::new(AtomicBool::new(true)),
            state: Arc::new(AtomicU8::new(encode(BufferState::None))),
            rate_bits: Arc::new(AtomicU64::new(1.0_f64.to_bits())),
            signals,
        }
    }

    // Playback side.

    pub fn set_buffer_amount(&self, ms: u64) {
        self.buffer_amount_ms.store(ms, Ordering::Release);
    }

    pub fn set_buffering(&self, buffering: bool) {
        self.buffering.store(buffering, Ordering::Release);
    }

    pub fn publish_state(&self, state: BufferState) {
        self.state.store(encode(state), Ordering::Release);
        let _ = self.signals.send(PlaybackSignal::State(state));
    }

    pub fn publish_stall(&self) {
        let _ = self.signals.send(PlaybackSignal::Stall);
    }

    pub fn set_playback_rate(&self, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Release);
    }

    // Source side.

    pub fn buffer_amount(&self) -> u64 {
        self.buffer_amount_ms.load(Ordering::Acquire)
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BufferState {
        decode(self.state.load(Ordering::Acquire))
    }

    pub fn playback_rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackSignal> {
        self.signals.subscribe()
    }
}

impl Default for Playing {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(state: BufferState) -> u8 {
    match state {
        BufferState::None => 0,
        BufferState::Low => 1,
        BufferState::Ok => 2,
        BufferState::High => 3,
    }
}

fn decode(raw: u8) -> BufferState {
    match raw {
        1 => BufferState::Low,
        2 => BufferState::Ok,
        3 => BufferState::High,
        _ => BufferState::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_is_visible_before_the_signal() {
        let playing = Playing::new();
        let mut rx = playing.subscribe();
        playing.publish_state(BufferState::Low);
        let signal = rx.recv().await.unwrap();
        assert_eq!(signal, PlaybackSignal::State(BufferState::Low));
        assert_eq!(playing.state(), BufferState::Low);
    }

    #[test]
    fn gauges_round_trip() {
        let playing = Playing::new();
        playing.set_buffer_amount(420);
        playing.set_buffering(false);
        assert_eq!(playing.buffer_amount(), 420);
        assert!(!playing.is_buffering());
    }
}

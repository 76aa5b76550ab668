use wrts_media::BufferState;

/// Buffer thresholds in milliseconds. `middle` is maintained as the halfway
/// point whenever either bound is written.
#[derive(Clone, Copy, Debug)]
pub struct Thresholds {
    low: u64,
    high: u64,
    middle: u64,
}

impl Thresholds {
    pub const DEFAULT_LOW_MS: u64 = 150;
    pub const DEFAULT_HIGH_MS: u64 = 550;

    pub fn new() -> Self {
        let mut t = Self {
            low: Self::DEFAULT_LOW_MS,
            high: Self::DEFAULT_HIGH_MS,
            middle: 0,
        };
        t.update_middle();
        t
    }

    pub fn low(&self) -> u64 {
        self.low
    }

    pub fn high(&self) -> u64 {
        self.high
    }

    pub fn middle(&self) -> u64 {
        self.middle
    }

    pub fn set_low(&mut self, ms: u64) {
        self.low = ms;
        self.update_middle();
    }

    pub fn set_high(&mut self, ms: u64) {
        self.high = ms;
        self.update_middle();
    }

    fn update_middle(&mut self) {
        self.middle = self.low + self.high.saturating_sub(self.low) / 2;
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of the buffer state machine.
///
/// `None` is left only once the buffer first crosses the middle threshold;
/// between `Low`/`Ok` and `Ok`/`High` the middle threshold provides
/// hysteresis so the state does not flap around either bound.
pub fn next_state(current: BufferState, buffer_ms: u64, t: &Thresholds) -> BufferState {
    if current == BufferState::None {
        return if buffer_ms > t.middle() {
            if buffer_ms > t.high() {
                BufferState::High
            } else {
                BufferState::Ok
            }
        } else {
            BufferState::None
        };
    }

    if buffer_ms > t.high() {
        BufferState::High
    } else if buffer_ms > t.low() {
        match current {
            BufferState::Low if buffer_ms <= t.middle() => BufferState::Low,
            BufferState::High if buffer_ms >= t.middle() => BufferState::High,
            _ => BufferState::Ok,
        }
    } else {
        BufferState::Low
    }
}

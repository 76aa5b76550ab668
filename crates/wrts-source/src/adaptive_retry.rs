use std::time::{Duration, Instant};

const STEP: Duration = Duration::from_millis(3_000);
const CAP: Duration = Duration::from_millis(30_000);

/// Rate gate for rendition-up probes.
///
/// Each refused period ("appreciation") must last `try_delay` before a probe
/// is allowed. Consecutive successes shorten the delay back toward the step;
/// every failure after a success lengthens it, capped at thirty seconds.
#[derive(Clone, Debug)]
pub struct AdaptiveRetry {
    try_delay: Duration,
    appreciation_time: Option<Instant>,
    success: bool,
}

impl AdaptiveRetry {
    pub fn new() -> Self {
        Self {
            try_delay: STEP,
            appreciation_time: None,
            success: false,
        }
    }

    /// May an up probe be issued now?
    pub fn try_up(&mut self) -> bool {
        self.try_up_at(Instant::now())
    }

    fn try_up_at(&mut self, now: Instant) -> bool {
        let since = *self.appreciation_time.get_or_insert(now);
        if self.success {
            self.try_delay = self.try_delay.saturating_sub(STEP).max(STEP);
        }
        let allowed = now.duration_since(since) >= self.try_delay;
        if allowed {
            self.success = true;
            self.appreciation_time = None;
        }
        allowed
    }

    /// A probe (or the switch it gated) went wrong; back off.
    pub fn raise(&mut self) {
        self.appreciation_time = None;
        if self.success {
            self.success = false;
            self.try_delay = (self.try_delay + STEP).min(CAP);
        }
    }

    pub fn reset(&mut self) {
        self.try_delay = STEP;
        self.appreciation_time = None;
        self.success = false;
    }
}

impl Default for AdaptiveRetry {
    fn default() -> Self {
        Self::new()
    }
}

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Averaging window, bounded at one long GOP.
const WINDOW: Duration = Duration::from_secs(10);

/// Receive-rate measurement over a sliding window.
///
/// Counts payload bytes as they arrive and reports bytes per second averaged
/// over at most the last ten seconds, so one slow GOP does not poison the
/// estimate forever and one fast burst does not inflate it.
#[derive(Clone, Debug)]
pub struct RecvRate {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
    total: u64,
}

impl RecvRate {
    pub fn new() -> Self {
        Self::with_window(WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            total: 0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(bytes, Instant::now());
    }

    fn record_at(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back((now, bytes));
        self.total += bytes;
        self.prune(now);
    }

    /// Current estimate in bytes per second; `None` before any data.
    pub fn bytes_per_second(&mut self) -> Option<u64> {
        let now = Instant::now();
        self.prune(now);
        let first = self.samples.front()?.0;
        let elapsed = now.duration_since(first).max(Duration::from_millis(50));
        Some((self.total as f64 / elapsed.as_secs_f64()).round() as u64)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.total = 0;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.duration_since(at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.total -= bytes;
        }
    }
}

impl Default for RecvRate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_estimate() {
        let mut rate = RecvRate::new();
        assert_eq!(rate.bytes_per_second(), None);
    }

    #[test]
    fn rate_reflects_recorded_bytes() {
        let mut rate = RecvRate::new();
        let start = Instant::now() - Duration::from_secs(1);
        rate.record_at(300_000, start);
        rate.record_at(300_000, start + Duration::from_millis(500));
        let bps = rate.bytes_per_second().unwrap();
        // 600 kB over roughly a second.
        assert!((400_000..=800_000).contains(&bps), "got {bps}");
    }

    #[test]
    fn old_samples_age_out() {
        let mut rate = RecvRate::with_window(Duration::from_secs(10));
        rate.record_at(1_000_000, Instant::now() - Duration::from_secs(60));
        rate.record_at(1_000, Instant::now());
        let bps = rate.bytes_per_second().unwrap();
        assert!(bps <= 1_000_000, "stale megabyte should be gone, got {bps}");
    }

    #[test]
    fn reset_clears_history() {
        let mut rate = RecvRate::new();
        rate.record(10_000);
        rate.reset();
        assert_eq!(rate.bytes_per_second(), None);
    }
}

use std::time::Duration;

/// Flat-backoff retry policy for transient request failures.
///
/// Live sequences age out quickly, so there is no exponential growth: every
/// retry waits the same short delay and the caller gives up once the attempt
/// budget is spent.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, attempt: u32, retryable: bool) -> bool {
        retryable && attempt < self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0, true));
        assert!(policy.should_retry(2, true));
        assert!(!policy.should_retry(3, true));
        assert!(!policy.should_retry(0, false));
    }

    #[test]
    fn flat_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(), Duration::from_millis(500));
    }
}

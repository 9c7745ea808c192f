use crate::Error;
use std::time::Duration;

/// Re-exports the type from the `exponential-backoff` crate, so that users of
/// the library don't need to add their own dependency in order to configure it.
pub use exponential_backoff::Backoff;

/// Decides whether a failed transaction attempt is replayed, and after how
/// long. This governs only conflicts within a working session; a broken
/// session is replaced by the driver without consulting any policy.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is the number of failed attempts so far, starting at 1.
    /// Returning `Some(delay)` replays the transaction function after `delay`
    /// elapses; `None` surfaces `err` to the caller.
    fn decide(&self, attempt: u32, err: &Error) -> Option<Duration>;

    /// Invoked just before each retry sleep, with the attempt number that
    /// failed. Callers override this to observe retries.
    fn on_retry(&self, _attempt: u32) {}
}

/// A `RetryPolicy` that doesn't.
#[derive(Debug, Clone)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn decide(&self, _attempt: u32, _err: &Error) -> Option<Duration> {
        None
    }
}

/// Retries conflict errors with exponential backoff, up to a bounded number
/// of attempts. All other error classes are surfaced immediately.
#[derive(Debug, Clone)]
pub struct ExponentialRetryPolicy {
    max_retries: u32,
    backoff: Backoff,
}

impl ExponentialRetryPolicy {
    pub fn new(max_retries: u32) -> ExponentialRetryPolicy {
        let backoff = Backoff::new(
            u32::MAX,
            Duration::from_millis(10),
            Some(Duration::from_secs(5)),
        );
        ExponentialRetryPolicy {
            max_retries,
            backoff,
        }
    }

    pub fn with_min(mut self, min: Duration) -> Self {
        self.backoff.set_min(min);
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.backoff.set_max(Some(max));
        self
    }

    /// Randomization factor applied to each delay. Values are clamped to
    /// `0.01..=0.99`, the range the underlying [`Backoff`] accepts.
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.backoff.set_jitter(jitter.clamp(0.01, 0.99));
        self
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.backoff.set_factor(factor);
        self
    }
}

impl Default for ExponentialRetryPolicy {
    fn default() -> Self {
        Self::new(4)
    }
}

impl RetryPolicy for ExponentialRetryPolicy {
    fn decide(&self, attempt: u32, err: &Error) -> Option<Duration> {
        if !err.is_conflict() || attempt > self.max_retries {
            return None;
        }
        self.backoff.next(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> Error {
        Error::Conflict("commit digest no longer current".into())
    }

    #[test]
    fn no_retry_never_retries() {
        assert_eq!(NoRetry.decide(1, &conflict()), None);
    }

    #[test]
    fn conflicts_retry_up_to_the_bound() {
        let policy = ExponentialRetryPolicy::new(3);

        assert!(policy.decide(1, &conflict()).is_some());
        assert!(policy.decide(2, &conflict()).is_some());
        assert!(policy.decide(3, &conflict()).is_some());
        assert_eq!(policy.decide(4, &conflict()), None);
    }

    #[test]
    fn backoff_delays_grow() {
        let policy = ExponentialRetryPolicy::new(8)
            .with_min(Duration::from_millis(10))
            .with_max(Duration::from_secs(60))
            .with_jitter(0.1)
            .with_factor(2);

        let d1 = policy.decide(1, &conflict()).unwrap();
        let d3 = policy.decide(3, &conflict()).unwrap();
        assert!(d3 > d1, "expected {:?} > {:?}", d3, d1);
    }

    #[test]
    fn out_of_range_jitter_is_clamped() {
        let zero = ExponentialRetryPolicy::new(3).with_jitter(0.0);
        assert!(zero.decide(1, &conflict()).is_some());

        let full = ExponentialRetryPolicy::new(3).with_jitter(1.0);
        assert!(full.decide(1, &conflict()).is_some());
    }

    #[test]
    fn non_conflicts_are_never_retried() {
        let policy = ExponentialRetryPolicy::new(3);
        assert_eq!(policy.decide(1, &Error::Closed), None);
        assert_eq!(
            policy.decide(1, &Error::Transport("connection reset".into())),
            None
        );
    }
}

// =============================================================================
// Reconnect Backoff — bounded exponential delay between retries
// =============================================================================

use std::time::Duration;

use crate::runtime_config::BackoffParams;

/// Floor for the configured base delay; a zero base would retry in a hot loop.
const MIN_BASE_DELAY: Duration = Duration::from_millis(1);

/// Tracks consecutive failures of one channel and yields the next delay.
///
/// Delays are `base * multiplier^n` capped at `max`, so consecutive values are
/// non-decreasing. `reset` is called after a successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    failures: u32,
}

impl Backoff {
    pub fn new(params: &BackoffParams) -> Self {
        let base = Duration::from_millis(params.base_delay_ms).max(MIN_BASE_DELAY);
        Self {
            base,
            max: Duration::from_millis(params.max_delay_ms).max(base),
            multiplier: if params.multiplier.is_finite() {
                params.multiplier.max(1.0)
            } else {
                1.0
            },
            failures: 0,
        }
    }

    /// Delay for the next retry, then count the failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek();
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Delay the next retry would use, without counting a failure.
    pub fn peek(&self) -> Duration {
        let factor = self.multiplier.powi(self.failures.min(i32::MAX as u32) as i32);
        let millis = self.base.as_millis() as f64 * factor;
        let max_millis = self.max.as_millis() as f64;
        if !millis.is_finite() || millis >= max_millis {
            self.max
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(base: u64, max: u64, multiplier: f64) -> BackoffParams {
        BackoffParams {
            base_delay_ms: base,
            max_delay_ms: max,
            multiplier,
        }
    }

    #[test]
    fn grows_exponentially_until_cap() {
        let mut b = Backoff::new(&params(500, 5_000, 2.0));
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 5_000, 5_000]);
    }

    #[test]
    fn delays_never_decrease() {
        let mut b = Backoff::new(&params(300, 30_000, 1.7));
        let mut last = Duration::ZERO;
        for _ in 0..200 {
            let d = b.next_delay();
            assert!(d >= last);
            assert!(d <= b.max());
            last = d;
        }
    }

    #[test]
    fn reset_returns_to_base() {
        let mut b = Backoff::new(&params(500, 30_000, 2.0));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), b.base());
    }

    #[test]
    fn shrinking_multiplier_is_clamped() {
        let mut b = Backoff::new(&params(1_000, 2_000, 0.5));
        assert_eq!(b.next_delay(), Duration::from_millis(1_000));
        assert_eq!(b.next_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_base_is_clamped() {
        let mut b = Backoff::new(&params(0, 30_000, 2.0));
        let delays: Vec<Duration> = (0..5).map(|_| b.next_delay()).collect();
        assert_eq!(delays[0], MIN_BASE_DELAY);
        assert!(delays.iter().all(|d| !d.is_zero()));
        assert!(delays.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn cap_below_base_is_raised_to_base() {
        let mut b = Backoff::new(&params(2_000, 100, 2.0));
        assert_eq!(b.next_delay(), Duration::from_millis(2_000));
        assert_eq!(b.next_delay(), Duration::from_millis(2_000));
    }
}

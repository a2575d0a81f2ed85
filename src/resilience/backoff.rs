//! Capped exponential backoff with jitter.
//!
//! Used where a loop must retry without spinning: waiting for a free
//! connection slot, and recovering from failed `accept` calls.

use std::time::Duration;

use rand::Rng;

/// Retry delays for one wait.
///
/// The n-th delay is `base * 2^(n-1)`, capped at `max`, plus up to 10%
/// jitter so listeners waiting on the same pool do not wake in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    /// Delays already handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let capped = self.capped(self.attempt);
        let jitter_ms = (capped.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }

    fn capped(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();

        assert!((10..11).contains(&delays[0]));
        assert!((20..22).contains(&delays[1]));
        assert!((40..44).contains(&delays[2]));
        assert!((50..55).contains(&delays[3]));
        assert!((50..55).contains(&delays[4]));
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert!(backoff.next_delay() < Duration::from_millis(111));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        backoff.attempt = u32::MAX - 1;
        assert!(backoff.next_delay() <= Duration::from_millis(5_500));
        assert!(backoff.next_delay() <= Duration::from_millis(5_500));
    }
}

//! Exponential backoff pacing for planner retries.
//!
//! Keeps transient routing-service outages from turning into tight retry
//! loops and log storms.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            current: base,
            max: max.max(base),
            jitter_ratio: 0.2,
        }
    }

    /// Delay to sleep before the next attempt. Doubles on every call until
    /// it saturates at the configured maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = add_jitter(self.current, self.jitter_ratio);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

fn add_jitter(delay: Duration, ratio: f64) -> Duration {
    if !(0.0..=1.0).contains(&ratio) {
        return delay;
    }

    let delay_ms = delay.as_millis();
    if delay_ms == 0 {
        return delay;
    }

    let jitter_ms_max = ((delay_ms as f64) * ratio) as u128;
    if jitter_ms_max == 0 {
        return delay;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jitter_ms = (now_nanos as u128) % (jitter_ms_max + 1);
    delay + Duration::from_millis(jitter_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(8));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(500));
        assert!(first <= Duration::from_millis(600));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(1000));
        assert!(second <= Duration::from_millis(1200));
    }

    #[test]
    fn delay_saturates_at_max() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(20));

        backoff.next_delay();
        backoff.next_delay();
        let capped = backoff.next_delay();
        assert!(capped >= Duration::from_millis(20));
        assert!(capped <= Duration::from_millis(24));
    }
}

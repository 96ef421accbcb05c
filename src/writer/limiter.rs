use std::time::Duration;

use tokio::time::Instant;

/// Soft cap on the bytes sent within any `sample_period` window. Disabled
/// until [`moderate_instant_traffic`](TrafficLimiter::moderate_instant_traffic)
/// is called with a non-zero period and limit.
#[derive(Debug, Default)]
pub struct TrafficLimiter {
    sample_period: Duration,
    limit_bytes: usize,
    window_start: Option<Instant>,
    window_bytes: usize,
}

impl TrafficLimiter {
    pub fn new() -> Self {
        TrafficLimiter::default()
    }

    pub fn moderate_instant_traffic(&mut self, sample_period: Duration, limit_bytes: usize) {
        self.sample_period = sample_period;
        self.limit_bytes = limit_bytes;
        self.window_start = None;
        self.window_bytes = 0;
    }

    pub fn is_enabled(&self) -> bool {
        !self.sample_period.is_zero() && self.limit_bytes > 0
    }

    /// Accounts `len` bytes about to be sent at `now` and returns how long
    /// the caller has to wait before sending them.
    pub fn reserve(&mut self, now: Instant, len: usize) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }

        let start = match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.sample_period => start,
            _ => {
                self.window_start = Some(now);
                self.window_bytes = len;
                return None;
            }
        };

        if self.window_bytes > 0 && self.window_bytes + len > self.limit_bytes {
            let next = start + self.sample_period;
            self.window_start = Some(next);
            self.window_bytes = len;
            return Some(next.saturating_duration_since(now));
        }

        self.window_bytes += len;
        None
    }
}

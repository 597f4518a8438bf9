//! Publication throttle
//!
//! A deadline check, not a timer: the ticker asks on every tick and only the
//! first request inside each interval is granted.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Grant a publication at `now` if the window has elapsed
    pub fn should_publish(&mut self, now: Instant) -> bool {
        let due = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }

    /// Record an out-of-band publication, starting a fresh window
    pub fn reset(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_one_publication_per_window() {
        let mut throttle = Throttle::new(Duration::from_millis(20));
        let start = Instant::now();

        assert!(throttle.should_publish(start));
        assert!(!throttle.should_publish(start + Duration::from_millis(10)));
        assert!(!throttle.should_publish(start + Duration::from_millis(19)));
        assert!(throttle.should_publish(start + Duration::from_millis(20)));
        assert!(!throttle.should_publish(start + Duration::from_millis(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_starts_new_window() {
        let mut throttle = Throttle::new(Duration::from_millis(20));
        let start = Instant::now();
        assert!(throttle.should_publish(start));

        throttle.reset(start + Duration::from_millis(15));
        assert!(!throttle.should_publish(start + Duration::from_millis(25)));
        assert!(throttle.should_publish(start + Duration::from_millis(35)));
    }
}

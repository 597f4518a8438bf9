//! Minimum-interval rate limiter shared by the lookup clients

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub(crate) struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub(crate) fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with rate limit
    pub(crate) async fn wait(&self, service: &str) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("{} rate limiting: waiting {:?}", service, wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced() {
        let limiter = RateLimiter::new(500);
        let start = Instant::now();

        limiter.wait("test").await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.wait("test").await;
        assert!(start.elapsed() >= Duration::from_millis(500));

        limiter.wait("test").await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}

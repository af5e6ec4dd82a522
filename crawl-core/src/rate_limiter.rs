use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Enforces a minimum interval between successive outbound requests for one
/// source. Safe for concurrent callers: `wait()` serializes on an internal
/// mutex, so concurrent workers on the same source queue up rather than
/// racing the anchor.
pub struct RateLimiter {
    delay: Duration,
    next_time: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_time: Mutex::new(Instant::now()),
        }
    }

    /// Blocks the caller until at least `delay` has elapsed since the last
    /// grant, then records now as the new anchor. Returns `false` if the
    /// wait was cut short by cancellation.
    pub async fn wait(&self, stop: &CancellationToken) -> bool {
        let mut next_time = self.next_time.lock().await;
        let now = Instant::now();
        if now < *next_time {
            let remaining = *next_time - now;
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = stop.cancelled() => return false,
            }
        }
        let now = Instant::now();
        *next_time = now.max(*next_time) + self.delay;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn enforces_minimum_gap() {
        let limiter = RateLimiter::new(StdDuration::from_millis(50));
        let stop = CancellationToken::new();

        let start = Instant::now();
        assert!(limiter.wait(&stop).await);
        assert!(limiter.wait(&stop).await);
        let elapsed = start.elapsed();

        assert!(elapsed >= StdDuration::from_millis(45));
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(StdDuration::from_secs(5));
        let stop = CancellationToken::new();
        assert!(limiter.wait(&stop).await);

        let stop_clone = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            stop_clone.cancel();
        });

        let start = Instant::now();
        let completed = limiter.wait(&stop).await;
        assert!(!completed);
        assert!(start.elapsed() < StdDuration::from_secs(1));
    }
}

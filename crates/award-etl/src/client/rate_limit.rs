//! Rolling one-second request window shared by every caller of a client

use std::{collections::VecDeque, time::Duration};
use tokio::{
    sync::Mutex,
    time::{sleep_until, Instant},
};
use tracing::trace;

const WINDOW: Duration = Duration::from_secs(1);

/// Admits at most `max_per_second` request starts in any trailing second
///
/// The timestamp log sits behind an async mutex held across the wait, so
/// concurrent callers queue up in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        let max_per_second = max_per_second.max(1) as usize;
        Self {
            max_per_second,
            window: Mutex::new(VecDeque::with_capacity(max_per_second)),
        }
    }

    /// Wait for a free slot, then claim it
    pub async fn acquire(&self) {
        let mut log = self.window.lock().await;

        loop {
            let now = Instant::now();
            while log.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                log.pop_front();
            }

            if log.len() < self.max_per_second {
                log.push_back(now);
                return;
            }

            if let Some(oldest) = log.front().copied() {
                trace!(in_window = log.len(), "Rate limit reached, waiting");
                sleep_until(oldest + WINDOW).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_window(starts: &[Instant], ceiling: usize) {
        for pair in starts.windows(ceiling + 1) {
            let span = pair[ceiling].duration_since(pair[0]);
            assert!(
                span >= WINDOW,
                "{} requests started within {:?}",
                ceiling + 1,
                span
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_requests_respect_ceiling() {
        let limiter = RateLimiter::new(10);
        let mut starts = Vec::new();

        for _ in 0..25 {
            limiter.acquire().await;
            starts.push(Instant::now());
        }

        assert_window(&starts, 10);
        // 25 requests at 10/s need two full waits
        assert!(starts[24].duration_since(starts[0]) >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_window() {
        let limiter = Arc::new(RateLimiter::new(10));
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..25)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let starts = Arc::clone(&starts);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    starts.lock().unwrap().push(Instant::now());
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 25);
        assert_window(&starts, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_under_ceiling() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}

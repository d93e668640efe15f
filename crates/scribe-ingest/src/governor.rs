//! Rate Governor: sliding-window limiter with 429-aware retry.
//!
//! At most `burst` requests leave within any rolling span of
//! `burst / rps` seconds. Waiters queue FIFO on the window mutex, so
//! wake-up order matches arrival order.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use scribe_core::platform::PlatformError;

pub struct RateGovernor {
    window: Mutex<VecDeque<Instant>>,
    burst: usize,
    span: Duration,
    max_retries: usize,
}

impl RateGovernor {
    /// `rps` requests per second sustained, bursting up to `burst`;
    /// rate-limited calls retried up to `max_retries` times.
    pub fn new(rps: f64, burst: usize, max_retries: usize) -> Self {
        let rps = rps.max(0.1);
        let burst = burst.max(1);
        Self {
            window: Mutex::new(VecDeque::with_capacity(burst)),
            burst,
            span: Duration::from_secs_f64(burst as f64 / rps),
            max_retries,
        }
    }

    /// Block until a request slot is free, then claim it.
    ///
    /// The window lock is held across the sleep: later callers queue on
    /// the mutex and are woken in FIFO order.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;
        let now = Instant::now();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.span {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.burst {
            let oldest = *window.front().expect("window is non-empty when full");
            let wake_at = oldest + self.span;
            debug!(wait_ms = (wake_at - now).as_millis() as u64, "rate window full");
            tokio::time::sleep_until(wake_at).await;
            window.pop_front();
        }

        window.push_back(Instant::now());
    }

    /// Acquire a slot and run `f`, retrying rate-limit rejections with the
    /// server-provided delay (or 1s/2s/4s backoff when absent). All other
    /// errors surface immediately; exhausted retries surface the final
    /// `RateLimited`.
    pub async fn execute<T, F, Fut>(&self, mut f: F) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let mut attempt = 0usize;
        loop {
            self.acquire().await;
            match f().await {
                Err(PlatformError::RateLimited { retry_after }) if attempt < self.max_retries => {
                    let delay = retry_after
                        .unwrap_or_else(|| Duration::from_secs(1u64 << attempt.min(2)));
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited by platform, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

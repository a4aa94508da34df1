use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Rejection from [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limited: retry after {retry_after:?}")]
pub struct RateLimited {
    pub retry_after: Duration,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `rate` tokens per second up to `capacity`.
///
/// `acquire` suspends until a token is available (the wait is a plain
/// `tokio::time::sleep`, so callers can cancel it); `try_acquire` fails
/// immediately with the wait a caller would have needed.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate: rate.max(f64::MIN_POSITIVE),
            capacity: capacity.max(1.0),
            state: Mutex::new(BucketState {
                tokens: capacity.max(1.0),
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = Instant::now();
    }

    /// Take one token, returning the time to wait first (zero if available).
    async fn reserve(&self) -> Duration {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Duration::ZERO
        } else {
            let deficit = 1.0 - state.tokens;
            state.tokens -= 1.0; // goes negative: the reservation is committed
            Duration::from_secs_f64(deficit / self.rate)
        }
    }

    /// Await a token.
    pub async fn acquire(&self) {
        let wait = self.reserve().await;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token without waiting, or report how long the caller would
    /// have to wait.
    pub async fn try_acquire(&self) -> Result<(), RateLimited> {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(RateLimited {
                retry_after: Duration::from_secs_f64(deficit / self.rate),
            })
        }
    }
}

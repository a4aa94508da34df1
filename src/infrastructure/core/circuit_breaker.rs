use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if service recovered - exactly one probe admitted
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    last_error: Option<String>,
    probe_in_flight: bool,
}

/// Circuit breaker for protecting against cascading failures.
///
/// CLOSED -> OPEN when `failure_threshold` consecutive failures accumulate;
/// OPEN -> HALF_OPEN after `recovery_timeout`, admitting exactly one probe
/// (concurrent probes are rejected fail-fast); probe success -> CLOSED,
/// probe failure -> OPEN with a refreshed `opened_at`. The rejection carries
/// the last underlying error so callers never lose the original cause.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    name: String,
}

/// Fail-fast rejection snapshot. Preserves the original failure text.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitOpen {
    pub service: String,
    pub failure_count: u32,
    pub opened_at: DateTime<Utc>,
    pub last_error: String,
    pub retry_in: Duration,
}

impl fmt::Display for CircuitOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circuit [{}] open after {} failures (last: {}); retry in {:?}",
            self.service, self.failure_count, self.last_error, self.retry_in
        )
    }
}

impl std::error::Error for CircuitOpen {}

/// Error type for breaker-wrapped calls
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error(transparent)]
    Open(CircuitOpen),

    #[error(transparent)]
    Inner(E),
}

enum Admission {
    Pass,
    Probe,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                opened_at_wall: None,
                last_error: None,
                probe_in_flight: false,
            }),
            failure_threshold,
            recovery_timeout,
            name: name.into(),
        }
    }

    /// Execute a call under breaker protection.
    ///
    /// The state transition is committed before the call result is returned
    /// to the caller, so observers never see a stale state.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admission = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                CircuitState::Closed => Admission::Pass,
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::ZERO);
                    if elapsed >= self.recovery_timeout {
                        info!(
                            "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (recovery timeout elapsed)",
                            self.name
                        );
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_in_flight = true;
                        Admission::Probe
                    } else {
                        return Err(CircuitBreakerError::Open(
                            self.open_snapshot(&inner, self.recovery_timeout - elapsed),
                        ));
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        // A probe is already testing the service
                        return Err(CircuitBreakerError::Open(
                            self.open_snapshot(&inner, self.recovery_timeout),
                        ));
                    }
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        };

        match f.await {
            Ok(result) => {
                self.on_success(matches!(admission, Admission::Probe)).await;
                Ok(result)
            }
            Err(e) => {
                self.on_failure(matches!(admission, Admission::Probe), e.to_string())
                    .await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    fn open_snapshot(&self, inner: &BreakerInner, retry_in: Duration) -> CircuitOpen {
        CircuitOpen {
            service: self.name.clone(),
            failure_count: inner.failure_count,
            opened_at: inner.opened_at_wall.unwrap_or_else(Utc::now),
            last_error: inner
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            retry_in,
        }
    }

    async fn on_success(&self, was_probe: bool) {
        let mut inner = self.inner.lock().await;
        if was_probe {
            info!(
                "CircuitBreaker [{}]: Probe succeeded, transitioning HalfOpen -> Closed",
                self.name
            );
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.opened_at_wall = None;
        inner.last_error = None;
        inner.probe_in_flight = false;
    }

    async fn on_failure(&self, was_probe: bool, error_text: String) {
        let mut inner = self.inner.lock().await;
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_error = Some(error_text);
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: Probe failed, transitioning HalfOpen -> Open",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.opened_at_wall = Some(Utc::now());
            }
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} failures)",
                        self.name, inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.opened_at_wall = Some(Utc::now());
                }
            }
            CircuitState::Open => {
                let _ = was_probe; // already open, counter bumped above
            }
        }
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

//! Retry and circuit-breaker wrappers for vector store calls

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{Error, Result, VectorStoreErrorKind};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing; calls are rejected without touching the store
    Open,
    /// Recovery probe in progress
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-operation circuit breaker: opens after `failure_threshold`
/// consecutive failures, stays open for `recovery_timeout`, then admits a
/// single half-open probe.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

/// Snapshot for `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: String,
    pub consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Admission check. Fails fast with `Unavailable` while the circuit is
    /// open (or a half-open probe is already running).
    pub fn check(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.recovery_timeout);
                if recovered {
                    tracing::info!("circuit breaker half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(Error::vector_store(
                        VectorStoreErrorKind::Unavailable,
                        format!(
                            "circuit breaker open, retry in {}s",
                            self.recovery_timeout.as_secs()
                        ),
                    ))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Error::vector_store(
                        VectorStoreErrorKind::Unavailable,
                        "circuit breaker half-open, probe in flight",
                    ))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;
        let tripped = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if tripped {
            if inner.state != CircuitState::Open {
                tracing::error!(
                    failures = inner.consecutive_failures,
                    "circuit breaker opened"
                );
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state.as_str().to_string(),
            consecutive_failures: inner.consecutive_failures,
        }
    }

    #[cfg(test)]
    fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

/// Retry `op` on transient store failures with exponential backoff
/// (1s/2s/4s). Non-transient errors pass through untouched.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    what: &str,
    max_retries: u32,
    op: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    what,
                    attempt,
                    max_retries,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient vector store failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_millis(50))
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let b = breaker();
        for _ in 0..4 {
            b.check().unwrap();
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Closed);
        b.check().unwrap();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.check().is_err());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let b = breaker();
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_a_single_probe() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        // First caller becomes the probe; a concurrent one is rejected.
        b.check().unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.check().is_err());

        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        b.check().unwrap();
    }

    #[test]
    fn failed_probe_reopens() {
        let b = breaker();
        for _ in 0..5 {
            b.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        b.check().unwrap();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.check().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_counts_and_passthrough() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_with_backoff("op", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(Error::vector_store(VectorStoreErrorKind::Unavailable, "503"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("op", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::vector_store(VectorStoreErrorKind::NotFound, "missing")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

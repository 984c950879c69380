//! Closed/Open/Half-Open circuit breaker gating the primary store (§4.2)

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    trip_count: u64,
    closed_since: Option<Instant>,
}

/// Wraps an async operation with failure-threshold tripping and a timed
/// half-open probe. State transitions happen under a short lock; the state
/// is otherwise read lock-free via the observer methods.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

/// Returned by `execute` when the breaker is open and the call was refused.
#[derive(Debug)]
pub struct CircuitOpenError {
    pub retry_after_ms: u64,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trip_count: 0,
                closed_since: Some(Instant::now()),
            }),
            failure_threshold: config.failure_threshold,
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().failure_count
    }

    pub fn trip_count(&self) -> u64 {
        self.inner.lock().unwrap().trip_count
    }

    /// How long the breaker has been continuously `Closed`, or `None` if it
    /// isn't currently closed. Used by the Fallback Worker to gate replay on
    /// `FALLBACK_REPLAY_STABLE_MS` of uninterrupted health (§4.5 C6).
    pub fn closed_stable_for(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Some(inner.closed_since.map(|t| t.elapsed()).unwrap_or_default()),
            _ => None,
        }
    }

    /// Whether a call would currently be let through, mutating `Open ->
    /// HalfOpen` once `reset_timeout` has elapsed.
    fn admit(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.last_failure_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.closed_since = None;
                    tracing::debug!("circuit breaker entering half-open probe");
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        retry_after_ms: (self.reset_timeout - elapsed).as_millis() as u64,
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            tracing::debug!("circuit breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.closed_since = Some(Instant::now());
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen || inner.failure_count >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                inner.trip_count += 1;
                tracing::warn!(
                    failure_count = inner.failure_count,
                    "circuit breaker opened"
                );
            }
            inner.state = CircuitState::Open;
            inner.closed_since = None;
        }
    }

    /// Runs `op` under the breaker. On `Closed`/`HalfOpen`, executes it and
    /// records the outcome. On `Open`, refuses immediately without calling
    /// `op` or `fallback`; callers that want a fallback value call it
    /// themselves on `Err(CircuitOpenError)`.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitResult<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(open) = self.admit() {
            return Err(CircuitResult::Open(open));
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitResult::Failed(e))
            }
        }
    }
}

/// Either the circuit refused the call, or the wrapped operation failed.
#[derive(Debug)]
pub enum CircuitResult<E> {
    Open(CircuitOpenError),
    Failed(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(&config(2, 50));

        for _ in 0..2 {
            let result = breaker.execute(|| async { Err::<(), _>("boom") }).await;
            assert!(matches!(result, Err(CircuitResult::Failed(_))));
        }

        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.execute(|| async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(CircuitResult::Open(_))));
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new(&config(1, 10));

        let _ = breaker.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.execute(|| async { Ok::<(), &str>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new(&config(1, 10));

        let _ = breaker.execute(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.execute(|| async { Err::<(), _>("boom again") }).await;
        assert!(matches!(result, Err(CircuitResult::Failed(_))));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_trip_count_increments_once_per_open_transition() {
        let breaker = CircuitBreaker::new(&config(1, 10_000));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.trip_count(), 1);
    }

    #[test]
    fn test_closed_stable_for_is_none_while_open() {
        let breaker = CircuitBreaker::new(&config(1, 10_000));
        assert!(breaker.closed_stable_for().is_some());
        breaker.record_failure();
        assert!(breaker.closed_stable_for().is_none());
    }
}

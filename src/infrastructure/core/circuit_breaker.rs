//! Circuit breaker protecting outbound dependencies.
//!
//! Count-based sliding window per breaker. Each completed call is recorded
//! as a sample (failure yes/no, slow yes/no); once `minimum_calls` samples
//! exist, exceeding either the failure rate or the slow-call rate opens the
//! breaker. After `open_duration` the breaker admits `half_open_trials`
//! probe calls: all must succeed to close, any failure reopens.
//!
//! Errors are classified by the caller's error type: request-shaped
//! failures (4xx, invalid input) do not count against the dependency,
//! connection/timeout/5xx failures do.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::BreakerSettings;
use crate::domain::errors::ServiceError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if service recovered - allow limited probes
}

/// Classification hook for the error type flowing through a breaker.
pub trait BreakerClassify {
    /// Whether this error counts toward the breaker's failure rate.
    fn trips_breaker(&self) -> bool;
}

impl BreakerClassify for ServiceError {
    fn trips_breaker(&self) -> bool {
        ServiceError::trips_breaker(self)
    }
}

#[derive(Debug, Clone, Copy)]
struct CallSample {
    failure: bool,
    slow: bool,
}

struct CircuitBreakerState {
    state: CircuitState,
    window: VecDeque<CallSample>,
    opened_at: Option<Instant>,
    half_open_inflight: usize,
    half_open_successes: usize,
}

/// Circuit breaker for protecting against cascading failures.
pub struct CircuitBreaker {
    state: Arc<RwLock<CircuitBreakerState>>,
    settings: BreakerSettings,
    name: String,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitBreakerState {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_inflight: 0,
                half_open_successes: 0,
            })),
            settings,
            name: name.into(),
        }
    }

    /// Execute a call with circuit breaker protection.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: BreakerClassify,
    {
        let admitted_as_trial = self.admit().await?;

        let started = Instant::now();
        let result = f.await;
        let slow = started.elapsed() > self.settings.slow_call_threshold;

        match result {
            Ok(value) => {
                self.on_outcome(false, slow, admitted_as_trial).await;
                Ok(value)
            }
            Err(e) => {
                self.on_outcome(e.trips_breaker(), slow, admitted_as_trial).await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Like [`CircuitBreaker::call`], but serves `fallback` instead of the
    /// open error while the breaker is OPEN. Inner failures still surface.
    pub async fn call_with_fallback<F, T, E>(
        &self,
        f: F,
        fallback: impl FnOnce() -> T,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: BreakerClassify,
    {
        match self.call(f).await {
            Err(CircuitBreakerError::Open { .. }) => {
                warn!(
                    "CircuitBreaker [{}]: Open - serving fallback response",
                    self.name
                );
                Ok(fallback())
            }
            other => other,
        }
    }

    /// Admission check. Returns whether this call runs as a half-open trial.
    async fn admit<E>(&self) -> Result<bool, CircuitBreakerError<E>> {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.settings.open_duration {
                    info!(
                        "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (open duration elapsed)",
                        self.name
                    );
                    state.state = CircuitState::HalfOpen;
                    state.half_open_inflight = 1;
                    state.half_open_successes = 0;
                    Ok(true)
                } else {
                    Err(CircuitBreakerError::Open {
                        name: self.name.clone(),
                        retry_in: self.settings.open_duration - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_inflight + state.half_open_successes
                    >= self.settings.half_open_trials
                {
                    Err(CircuitBreakerError::Open {
                        name: self.name.clone(),
                        retry_in: Duration::from_millis(100),
                    })
                } else {
                    state.half_open_inflight += 1;
                    Ok(true)
                }
            }
        }
    }

    async fn on_outcome(&self, failure: bool, slow: bool, was_trial: bool) {
        let mut state = self.state.write().await;

        if was_trial {
            // HalfOpen bookkeeping. The breaker may have been reopened by a
            // concurrent trial; in that case this outcome is dropped.
            if state.state != CircuitState::HalfOpen {
                return;
            }
            state.half_open_inflight = state.half_open_inflight.saturating_sub(1);

            if failure {
                warn!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Open (trial call failed)",
                    self.name
                );
                self.reopen(&mut state);
            } else {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.settings.half_open_trials {
                    info!(
                        "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed ({} trial successes)",
                        self.name, state.half_open_successes
                    );
                    state.state = CircuitState::Closed;
                    state.window.clear();
                    state.opened_at = None;
                    state.half_open_successes = 0;
                }
            }
            return;
        }

        if state.state != CircuitState::Closed {
            return;
        }

        state.window.push_back(CallSample { failure, slow });
        while state.window.len() > self.settings.sliding_window {
            state.window.pop_front();
        }

        // No transition before the minimum number of observations.
        if state.window.len() < self.settings.minimum_calls {
            return;
        }

        let total = state.window.len() as f64;
        let failures = state.window.iter().filter(|s| s.failure).count() as f64;
        let slows = state.window.iter().filter(|s| s.slow).count() as f64;
        let failure_rate = failures / total * 100.0;
        let slow_rate = slows / total * 100.0;

        if failure_rate >= self.settings.failure_rate_pct {
            error!(
                "CircuitBreaker [{}]: Transitioning Closed -> Open (failure rate {:.1}%)",
                self.name, failure_rate
            );
            self.reopen(&mut state);
        } else if slow_rate >= self.settings.slow_rate_pct {
            error!(
                "CircuitBreaker [{}]: Transitioning Closed -> Open (slow-call rate {:.1}%)",
                self.name, slow_rate
            );
            self.reopen(&mut state);
        }
    }

    fn reopen(&self, state: &mut CircuitBreakerState) {
        state.state = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        state.window.clear();
        state.half_open_inflight = 0;
        state.half_open_successes = 0;
    }

    /// Get current circuit state.
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Error type for circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker [{name}] is open. Retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(window: usize, min_calls: usize, open_ms: u64, trials: usize) -> BreakerSettings {
        BreakerSettings {
            failure_rate_pct: 50.0,
            slow_rate_pct: 80.0,
            slow_call_threshold: Duration::from_secs(5),
            sliding_window: window,
            minimum_calls: min_calls,
            open_duration: Duration::from_millis(open_ms),
            half_open_trials: trials,
        }
    }

    fn failing() -> Result<(), ServiceError> {
        Err(ServiceError::Connection {
            reason: "refused".into(),
        })
    }

    fn ok() -> Result<(), ServiceError> {
        Ok(())
    }

    #[tokio::test]
    async fn test_circuit_opens_after_failure_rate_breach() {
        let cb = CircuitBreaker::new("test", settings(10, 3, 1_000, 2));

        for _ in 0..3 {
            let _ = cb.call(async { failing() }).await;
        }

        assert_eq!(cb.state().await, CircuitState::Open);

        // Next call fails fast.
        let result = cb.call(async { ok() }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_no_transition_before_minimum_calls() {
        let cb = CircuitBreaker::new("test", settings(10, 5, 1_000, 2));

        // Four failures: 100% failure rate but under the minimum-calls floor.
        for _ in 0..4 {
            let _ = cb.call(async { failing() }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);

        let _ = cb.call(async { failing() }).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_non_tripping_errors_do_not_open() {
        let cb = CircuitBreaker::new("test", settings(10, 3, 1_000, 2));

        for _ in 0..6 {
            let result: Result<(), _> = cb
                .call(async {
                    Err::<(), _>(ServiceError::InvalidRequest {
                        reason: "bad quantity".into(),
                    })
                })
                .await;
            assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
        }

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_recovers_after_trials_succeed() {
        let cb = CircuitBreaker::new("test", settings(10, 2, 50, 2));

        for _ in 0..2 {
            let _ = cb.call(async { failing() }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        // Two successful trials close the breaker.
        assert!(cb.call(async { ok() }).await.is_ok());
        assert!(cb.call(async { ok() }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_halfopen_reopens_on_trial_failure() {
        let cb = CircuitBreaker::new("test", settings(10, 2, 50, 2));

        for _ in 0..2 {
            let _ = cb.call(async { failing() }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = cb.call(async { failing() }).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_fallback_served_while_open() {
        let cb = CircuitBreaker::new("test", settings(10, 2, 60_000, 2));

        for _ in 0..2 {
            let _ = cb.call(async { failing() }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        let result: Result<i32, CircuitBreakerError<ServiceError>> = cb
            .call_with_fallback(async { Ok::<_, ServiceError>(1) }, || 42)
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_fallback_not_used_for_inner_failures() {
        let cb = CircuitBreaker::new("test", settings(10, 5, 1_000, 2));

        let result: Result<i32, _> = cb
            .call_with_fallback(
                async {
                    Err::<i32, _>(ServiceError::Remote {
                        status: 500,
                        message: "boom".into(),
                    })
                },
                || 42,
            )
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
    }
}

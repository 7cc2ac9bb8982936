//! Retry, circuit breaker and per-attempt timeout around engine calls.
//!
//! `ResiliencePolicy::execute` is the single wrapper every engine call site
//! goes through. Per attempt it takes a pool slot, asks the breaker for
//! admission, runs the call under the attempt timeout and records the
//! outcome. Only transient failures are retried or counted by the breaker.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vecguard_types::{IsolationError, ResilienceSettings};

use crate::error::EngineError;
use crate::pool::EnginePool;

/// Bounded exponential backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            multiplier: settings.multiplier,
        }
    }

    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
}

/// Consecutive-failure circuit breaker.
///
/// Closed -> Open after `threshold` consecutive transient failures.
/// Open -> HalfOpen once `cooldown` has elapsed; one probe is admitted.
/// HalfOpen -> Closed on probe success, back to Open on probe failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_started: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    /// `Some(retry_after_ms)` when a call arriving at `now` must be refused.
    fn refusal(&self, inner: &BreakerInner, now: Instant) -> Option<u64> {
        match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                (elapsed < self.cooldown).then(|| (self.cooldown - elapsed).as_millis() as u64)
            }
            CircuitState::HalfOpen => {
                // A probe that never reported back (cancelled caller) is
                // given up on after one cool-down.
                let stale = inner
                    .probe_started
                    .map(|t| now.saturating_duration_since(t) >= self.cooldown)
                    .unwrap_or(true);
                (!stale).then_some(0)
            }
        }
    }

    /// Fail fast with `CircuitOpen` without changing state.
    pub fn check(&self) -> Result<(), EngineError> {
        let inner = self.inner.lock().unwrap();
        match self.refusal(&inner, Instant::now()) {
            Some(retry_after_ms) => Err(EngineError::CircuitOpen { retry_after_ms }),
            None => Ok(()),
        }
    }

    /// Admit a call or fail fast with `CircuitOpen`.
    pub fn try_acquire(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if let Some(retry_after_ms) = self.refusal(&inner, now) {
            return Err(EngineError::CircuitOpen { retry_after_ms });
        }
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                inner.state = CircuitState::HalfOpen;
                inner.probe_started = Some(now);
                metrics::gauge!("vecguard_circuit_state")
                    .set(CircuitState::HalfOpen.gauge_value());
                info!("Circuit half-open, probing index engine");
            }
            CircuitState::HalfOpen => inner.probe_started = Some(now),
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            info!(previous = inner.state.as_str(), "Circuit closed, index engine recovered");
            metrics::gauge!("vecguard_circuit_state").set(CircuitState::Closed.gauge_value());
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_started = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let should_open = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_started = None;
            metrics::gauge!("vecguard_circuit_state").set(CircuitState::Open.gauge_value());
            error!(
                failures = inner.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit opened, index engine calls suspended"
            );
        }
    }
}

/// Retry + breaker + pool + attempt timeout, applied to one engine call.
#[derive(Debug, Clone)]
pub struct ResiliencePolicy {
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    pool: EnginePool,
}

impl ResiliencePolicy {
    pub fn new(retry: RetryPolicy, breaker: Arc<CircuitBreaker>, pool: EnginePool) -> Self {
        Self {
            retry,
            breaker,
            pool,
        }
    }

    pub fn from_settings(settings: &ResilienceSettings, pool: EnginePool) -> Self {
        Self::new(
            RetryPolicy::from_settings(settings),
            Arc::new(CircuitBreaker::new(
                settings.failure_threshold,
                Duration::from_millis(settings.cooldown_ms),
            )),
            pool,
        )
    }

    /// Same breaker and pool, different retry budget.
    pub fn with_retry(&self, retry: RetryPolicy) -> Self {
        Self {
            retry,
            breaker: self.breaker.clone(),
            pool: self.pool.clone(),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        attempt_timeout: Option<Duration>,
        call: F,
    ) -> Result<T, IsolationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        self.run(operation, attempt_timeout, None, call).await
    }

    /// Run `call` with retries that must all finish within `budget`.
    ///
    /// Each attempt is cut off at the remaining budget and recorded as an
    /// `EngineError::Timeout`, so a slow engine trips the breaker like any
    /// other transient failure. Running out of budget yields `SearchTimeout`.
    pub async fn execute_within<T, F, Fut>(
        &self,
        operation: &str,
        budget: Duration,
        call: F,
    ) -> Result<T, IsolationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let budget = Budget::starting_now(budget);
        self.run(operation, None, Some(budget), call).await
    }

    async fn run<T, F, Fut>(
        &self,
        operation: &str,
        attempt_timeout: Option<Duration>,
        budget: Option<Budget>,
        mut call: F,
    ) -> Result<T, IsolationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut backoff = self.retry.backoff();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            // An open circuit must not queue for a pool slot first.
            if let Err(e) = self.breaker.check() {
                debug!(operation, "Circuit open, failing fast");
                return Err(e.into_isolation(operation, attempts));
            }

            // Waiting for a slot is not an engine failure; it only spends budget.
            let acquired = match budget {
                Some(budget) => tokio::time::timeout_at(budget.deadline, self.pool.acquire())
                    .await
                    .map_err(|_| budget.exceeded())?,
                None => self.pool.acquire().await,
            };
            let permit = acquired.map_err(|e| e.into_isolation(operation, attempts))?;

            if let Err(e) = self.breaker.try_acquire() {
                debug!(operation, "Circuit open, failing fast");
                return Err(e.into_isolation(operation, attempts));
            }

            let started = Instant::now();
            let cutoff = match (attempt_timeout.map(|t| started + t), budget) {
                (Some(attempt), Some(budget)) => Some(attempt.min(budget.deadline)),
                (attempt, budget) => attempt.or(budget.map(|b| b.deadline)),
            };
            let outcome = match cutoff {
                Some(cutoff) => match tokio::time::timeout_at(cutoff, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout(
                        cutoff.saturating_duration_since(started).as_millis() as u64,
                    )),
                },
                None => call().await,
            };

            let err = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                // The engine answered; it is reachable.
                self.breaker.record_success();
                warn!(operation, error = %err, "Engine rejected request");
                return Err(err.into_isolation(operation, attempts));
            }

            self.breaker.record_failure();
            drop(permit);

            if let Some(budget) = budget.filter(|b| b.is_spent()) {
                warn!(
                    operation,
                    attempts,
                    error = %err,
                    budget_ms = budget.total_ms(),
                    "Engine call failed, budget spent"
                );
                return Err(budget.exceeded());
            }

            if attempts >= self.retry.max_attempts {
                error!(operation, attempts, error = %err, "Engine call failed, retries exhausted");
                return Err(err.into_isolation(operation, attempts));
            }

            let Some(delay) = backoff.next_backoff() else {
                error!(operation, attempts, error = %err, "Backoff exhausted");
                return Err(err.into_isolation(operation, attempts));
            };
            if let Some(budget) = budget.filter(|b| delay >= b.remaining()) {
                warn!(operation, attempts, error = %err, "No budget left for another attempt");
                return Err(budget.exceeded());
            }
            warn!(
                operation,
                attempt = attempts,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Engine call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Wall-clock allowance shared by every attempt of one call.
#[derive(Debug, Clone, Copy)]
struct Budget {
    deadline: Instant,
    total: Duration,
}

impl Budget {
    fn starting_now(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
            total,
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn is_spent(&self) -> bool {
        self.remaining().is_zero()
    }

    fn total_ms(&self) -> u64 {
        self.total.as_millis() as u64
    }

    fn exceeded(&self) -> IsolationError {
        IsolationError::SearchTimeout {
            timeout_ms: self.total_ms(),
        }
    }
}

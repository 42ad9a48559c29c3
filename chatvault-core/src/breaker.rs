//! Circuit breaker with bounded retry
//!
//! Wraps fallible async operations so a consistently failing database stops
//! being hammered:
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ─────────────────────────────────► OPEN
//!     ▲                                        │ reset_timeout elapsed
//!     │ successes >= success_threshold         ▼
//!     └──────────────────────────────────── HALF_OPEN
//!                  any failure ──► OPEN
//! ```
//!
//! Each `execute` call retries failed attempts up to `max_retries` with
//! exponential backoff plus up to 10% jitter, capped at `max_delay`. Only the
//! final outcome of a call is recorded against the breaker.
//!
//! The failure counter decays coarsely: once the most recent failure is older
//! than `monitoring_window`, the whole counter resets on the next failure.
//! It is not a true sliding window over individual failure times.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Upper bound on the jitter added to a retry delay, as a fraction of it
pub const MAX_JITTER_FRACTION: f64 = 0.1;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Thresholds, timeouts and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerConfig {
    /// Failures (within the monitoring window) that open the breaker
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Time after the last failure before an open breaker lets a call through
    pub reset_timeout: Duration,
    /// Age after which the failure counter is discarded
    pub monitoring_window: Duration,
    /// Retries per `execute` call after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(120),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub total_retries: u64,
}

/// Health summary derived from the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerHealth {
    pub state: CircuitState,
    /// `state == Closed`
    pub healthy: bool,
    /// Successes over completed calls, 1.0 before any call completes
    pub success_rate: f64,
    pub uptime: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_last_failure: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_last_success: Option<Duration>,
    pub since_state_change: Duration,
    pub stats: BreakerStats,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    last_state_change: Instant,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    total_retries: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            last_state_change: Instant::now(),
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            total_retries: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            tracing::info!(from = %self.state, to = %to, "Circuit breaker state change");
            self.state = to;
            self.last_state_change = Instant::now();
        }
    }
}

/// Three-state circuit breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    created_at: Instant,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            created_at: Instant::now(),
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` under the breaker, retrying dependency failures.
    ///
    /// Errors whose [`Error::counts_as_failure`] is false (parse errors,
    /// missing sessions, resolution problems) are returned immediately and
    /// leave the counters untouched.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;

        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) if !e.counts_as_failure() => return Err(e),
                Err(e) if attempt >= self.config.max_retries => {
                    self.record_failure();
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry_delay(attempt);
                    self.lock().total_retries += 1;
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Decide whether a call may run, moving OPEN to HALF_OPEN once the
    /// reset timeout has passed.
    fn admit(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.total_requests += 1;

        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let since_failure = inner
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);
        if since_failure > self.config.reset_timeout {
            inner.success_count = 0;
            inner.transition(CircuitState::HalfOpen);
            return Ok(());
        }

        inner.total_rejections += 1;
        let retry_after = self.config.reset_timeout.saturating_sub(since_failure);
        tracing::warn!(
            retry_after_ms = retry_after.as_millis() as u64,
            "Circuit breaker open, rejecting call"
        );
        Err(Error::CircuitOpen { retry_after })
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        inner.last_success = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.transition(CircuitState::Closed);
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.total_failures += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.last_failure = Some(now);
                inner.success_count = 0;
                inner.transition(CircuitState::Open);
            }
            CircuitState::Closed => {
                let stale = inner
                    .last_failure
                    .is_some_and(|at| now.duration_since(at) > self.config.monitoring_window);
                if stale {
                    inner.failure_count = 0;
                }
                inner.failure_count += 1;
                inner.last_failure = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.failure_count,
                        "Circuit breaker opening after repeated failures"
                    );
                    inner.transition(CircuitState::Open);
                }
            }
            CircuitState::Open => {
                inner.last_failure = Some(now);
            }
        }
    }

    /// Backoff before retry number `attempt + 1`, with random jitter.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::random::<f64>() * MAX_JITTER_FRACTION;
        backoff_delay(
            self.config.base_delay,
            attempt,
            self.config.max_delay,
            jitter,
        )
    }

    /// Force CLOSED and clear the counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
        inner.transition(CircuitState::Closed);
    }

    /// Force OPEN as if a failure just happened.
    pub fn open(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        inner.success_count = 0;
        inner.transition(CircuitState::Open);
    }

    /// Current state. Does not advance OPEN to HALF_OPEN.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            total_retries: inner.total_retries,
        }
    }

    pub fn health(&self) -> BreakerHealth {
        let stats = self.stats();
        let inner = self.lock();
        let completed = stats.total_successes + stats.total_failures;
        let success_rate = if completed == 0 {
            1.0
        } else {
            stats.total_successes as f64 / completed as f64
        };

        BreakerHealth {
            state: inner.state,
            healthy: inner.state == CircuitState::Closed,
            success_rate,
            uptime: self.created_at.elapsed(),
            since_last_failure: inner.last_failure.map(|at| at.elapsed()),
            since_last_success: inner.last_success.map(|at| at.elapsed()),
            since_state_change: inner.last_state_change.elapsed(),
            stats,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

/// `min(base * 2^attempt * (1 + jitter), max)`, never below `min(base, max)`.
///
/// `jitter` is clamped to `[0, MAX_JITTER_FRACTION]`.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration, jitter: f64) -> Duration {
    let jitter = jitter.clamp(0.0, MAX_JITTER_FRACTION);
    let exponential = base.as_secs_f64() * 2f64.powi(attempt.min(62) as i32);
    let with_jitter = exponential * (1.0 + jitter);
    let capped = with_jitter.min(max.as_secs_f64());
    Duration::from_secs_f64(capped).max(base.min(max))
}

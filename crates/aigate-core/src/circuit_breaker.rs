//! Per-service circuit breaker guarding outbound provider calls.
//!
//! ```text
//!            failures >= failure_threshold
//!   Closed ──────────────────────────────────▶ Open
//!     ▲                                        │  ▲
//!     │ successes >= success_threshold         │  │ probe fails
//!     │                        recovery_timeout│  │
//!     └──────────────── HalfOpen ◀─────────────┘  │
//!                          └──────────────────────┘
//! ```
//!
//! Only one probe runs at a time while half-open; concurrent callers fail fast
//! with [`BreakerError::Open`] until the probe finishes.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::response::duration_ms;
use crate::telemetry;
use crate::timestamp::UtcDateTime;

/// Runtime circuit state for one upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        }
    }

    /// Value exported on the `aigate_breaker_state` gauge.
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before the circuit opens.
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is allowed.
    pub recovery_timeout: Duration,
    /// Successful probes needed to close a half-open circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was rejected without running the operation.
    #[error("circuit open for service '{service}'")]
    Open { service: String },
    /// The operation ran and failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Lifetime counters, independent of state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BreakerTotals {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
}

/// Read-only view of a breaker, safe to hand to health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub last_failure_at: Option<UtcDateTime>,
    /// How long the circuit has been away from `Closed`.
    pub unhealthy_for_ms: Option<u64>,
    pub probe_in_flight: bool,
    pub totals: BreakerTotals,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_wall: Option<UtcDateTime>,
    unhealthy_since: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_failure_wall: None,
            unhealthy_since: None,
            probe_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Probe,
}

/// Releases the probe slot if a probe future is dropped before it completes.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl ProbeGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.breaker.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            debug!(service = %self.breaker.service, "half-open probe cancelled");
        }
    }
}

/// Thread-safe circuit breaker for one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(CircuitInner::default()),
            calls: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Run `operation` through the breaker.
    ///
    /// The operation is not invoked when the circuit rejects the call. The
    /// breaker lock is never held while the operation runs.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.acquire() else {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            telemetry::record_circuit_rejection(&self.service);
            return Err(BreakerError::Open {
                service: self.service.clone(),
            });
        };

        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut guard = ProbeGuard {
            breaker: self,
            armed: permit == Permit::Probe,
        };

        let outcome = operation().await;
        guard.disarm();

        match outcome {
            Ok(value) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.on_success(permit);
                Ok(value)
            }
            Err(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.on_failure(permit);
                Err(BreakerError::Operation(error))
            }
        }
    }

    /// Unconditionally close the circuit and clear all counters.
    pub fn force_reset(&self) {
        let mut inner = self.lock();
        info!(service = %self.service, state = %inner.state, "circuit force reset");
        self.transition(&mut inner, CircuitState::Closed);
        inner.last_failure_at = None;
        inner.last_failure_wall = None;
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let now = Instant::now();
        BreakerSnapshot {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            recovery_timeout_ms: duration_ms(self.config.recovery_timeout),
            last_failure_at: inner.last_failure_wall,
            unhealthy_for_ms: inner
                .unhealthy_since
                .map(|since| duration_ms(now.saturating_duration_since(since))),
            probe_in_flight: inner.probe_in_flight,
            totals: self.totals(),
        }
    }

    /// Alias of [`CircuitBreaker::snapshot`].
    pub fn metrics(&self) -> BreakerSnapshot {
        self.snapshot()
    }

    pub fn totals(&self) -> BreakerTotals {
        BreakerTotals {
            calls: self.calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) -> Option<Permit> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(Permit::Normal),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(Permit::Probe)
                }
            }
            CircuitState::Open => {
                let recovered = inner.last_failure_at.map_or(true, |at| {
                    Instant::now().saturating_duration_since(at) >= self.config.recovery_timeout
                });
                if !recovered {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                Some(Permit::Probe)
            }
        }
    }

    fn on_success(&self, permit: Permit) {
        let mut inner = self.lock();
        match permit {
            Permit::Normal => {
                if inner.state == CircuitState::Closed {
                    inner.failure_count = 0;
                }
            }
            Permit::Probe => {
                if inner.state != CircuitState::HalfOpen || !inner.probe_in_flight {
                    return;
                }
                inner.probe_in_flight = false;
                inner.success_count = inner.success_count.saturating_add(1);
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
        }
    }

    fn on_failure(&self, permit: Permit) {
        let mut inner = self.lock();
        match permit {
            Permit::Normal => {
                if inner.state != CircuitState::Closed {
                    return;
                }
                self.note_failure(&mut inner);
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            Permit::Probe => {
                if inner.state != CircuitState::HalfOpen || !inner.probe_in_flight {
                    return;
                }
                self.note_failure(&mut inner);
                self.transition(&mut inner, CircuitState::Open);
            }
        }
    }

    fn note_failure(&self, inner: &mut CircuitInner) {
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());
        inner.last_failure_wall = Some(UtcDateTime::now());
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.success_count = 0;
        inner.probe_in_flight = false;

        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.unhealthy_since = None;
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.unhealthy_since.get_or_insert_with(Instant::now);
            }
        }

        if from == to {
            return;
        }

        let at = UtcDateTime::now();
        if to == CircuitState::Open {
            warn!(
                service = %self.service,
                from = %from,
                to = %to,
                failure_count = inner.failure_count,
                at = %at,
                "circuit opened"
            );
        } else {
            info!(
                service = %self.service,
                from = %from,
                to = %to,
                failure_count = inner.failure_count,
                at = %at,
                "circuit state changed"
            );
        }
        telemetry::record_breaker_state(&self.service, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, recovery_secs: u64, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "svc",
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout: Duration::from_secs(recovery_secs),
                success_threshold,
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Err("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let breaker = breaker(2, 30, 1);

        assert!(matches!(fail(&breaker).await, Err(BreakerError::Operation("boom"))));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut invoked = false;
        let rejected = breaker
            .execute(|| {
                invoked = true;
                async { Ok::<_, &str>(()) }
            })
            .await;
        assert!(rejected.is_err_and(|error| error.is_open()));
        assert!(!invoked);
        assert_eq!(breaker.totals().rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_while_closed_resets_failure_count() {
        let breaker = breaker(3, 30, 1);

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.failure_count(), 2);

        succeed(&breaker).await.expect("closed breaker runs the call");
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_closes_after_success_threshold() {
        let breaker = breaker(1, 10, 2);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        succeed(&breaker).await.expect("probe allowed");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await.expect("second probe allowed");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_releases_the_slot() {
        let breaker = breaker(1, 5, 1);
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let hung = tokio::time::timeout(
            Duration::from_millis(50),
            breaker.execute(|| std::future::pending::<Result<(), &str>>()),
        )
        .await;
        assert!(hung.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.snapshot().probe_in_flight);

        succeed(&breaker).await.expect("next caller may probe");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn late_outcome_after_trip_is_ignored() {
        let breaker = breaker(2, 60, 1);
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let slow = breaker.execute(|| async move {
            let _ = released.await;
            Ok::<_, &str>(())
        });
        let trip = async {
            let _ = fail(&breaker).await;
            let _ = fail(&breaker).await;
            let _ = release.send(());
        };

        let (slow_result, ()) = tokio::join!(slow, trip);
        assert!(slow_result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 2);
        assert_eq!(breaker.totals().calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn force_reset_clears_everything() {
        let breaker = breaker(1, 600, 1);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.force_reset();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert!(snapshot.last_failure_at.is_none());
        assert!(snapshot.unhealthy_for_ms.is_none());
        succeed(&breaker).await.expect("closed after reset");
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_tracks_unhealthy_duration() {
        let breaker = breaker(1, 600, 1);
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.unhealthy_for_ms, Some(30_000));
        assert!(snapshot.last_failure_at.is_some());
        assert_eq!(snapshot.totals.failures, 1);
    }
}

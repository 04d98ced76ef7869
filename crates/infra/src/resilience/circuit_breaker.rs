//! Circuit breaker over a rolling sampling window.
//!
//! # States
//!
//! - **Closed**: calls pass through; outcomes are recorded in the window.
//! - **Open**: calls are rejected immediately until the break duration elapses.
//! - **HalfOpen**: exactly one trial call is let through. Success closes the
//!   circuit, failure re-opens it. Other calls are rejected while the trial runs.
//!
//! The circuit opens when, inside the sampling window, at least
//! `minimum_throughput` calls were recorded and the failure ratio reached
//! `failure_ratio`. Only failures classified [`FailureKind::Transient`] count
//! as failures; everything else is a healthy response from the remote side.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::{Classify, FailureKind, ResilienceError};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (0.0..=1.0) at which the circuit opens.
    pub failure_ratio: f64,
    /// Calls that must be sampled before the ratio is evaluated.
    pub minimum_throughput: usize,
    /// Width of the rolling window.
    pub sampling_duration: Duration,
    /// How long the circuit stays open before allowing a trial call.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            minimum_throughput: 3,
            sampling_duration: Duration::from_secs(30),
            break_duration: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    /// `(recorded_at, failed)` for calls in the current window.
    samples: VecDeque<(Instant, bool)>,
}

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Circuit breaker guarding calls to one remote dependency.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<Inner>>,
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

/// Admission granted by the breaker for one call.
///
/// Dropping a trial permit without recording an outcome (the caller's future
/// was cancelled) frees the half-open slot so another call can try.
pub(crate) struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            let mut inner = self.breaker.lock();
            if let Phase::HalfOpen { trial_in_flight } = &mut inner.phase {
                *trial_in_flight = false;
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                phase: Phase::Closed,
                samples: VecDeque::new(),
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An open circuit whose break has elapsed reports `HalfOpen`.
    pub fn state(&self) -> State {
        let inner = self.lock();
        match inner.phase {
            Phase::Closed => State::Closed,
            Phase::Open { until } if Instant::now() >= until => State::HalfOpen,
            Phase::Open { .. } => State::Open,
            Phase::HalfOpen { .. } => State::HalfOpen,
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Run one call through the breaker.
    ///
    /// `call` is invoked only after the breaker admits the request; a rejected
    /// request returns [`ResilienceError::CircuitOpen`] without running it.
    pub async fn call<F, Fut, T, E>(&self, call: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let Some(permit) = self.admit() else {
            return Err(ResilienceError::CircuitOpen);
        };
        self.complete(permit, call()).await
    }

    /// Ask for admission. `None` means the circuit rejected the call.
    pub(crate) fn admit(&self) -> Option<Permit<'_>> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let permit = self.try_acquire();
        if permit.is_none() {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(breaker = %self.name, "circuit breaker rejected call");
        }
        permit
    }

    /// Await an admitted call and record its outcome.
    pub(crate) async fn complete<Fut, T, E>(
        &self,
        mut permit: Permit<'_>,
        call: Fut,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let result = call.await;
        let failed = matches!(&result, Err(e) if e.failure_kind() == FailureKind::Transient);

        if failed {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        }
        self.record(&mut permit, failed);

        result.map_err(ResilienceError::Failed)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another caller panicked mid-update; the
        // state machine is still consistent at every assignment.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        let now = Instant::now();

        let trial = match inner.phase {
            Phase::Closed => false,
            Phase::Open { until } if now < until => return None,
            Phase::Open { .. } => {
                tracing::info!(breaker = %self.name, "circuit breaker half-open, allowing a trial call");
                inner.phase = Phase::HalfOpen { trial_in_flight: true };
                true
            }
            Phase::HalfOpen { trial_in_flight: true } => return None,
            Phase::HalfOpen { trial_in_flight: false } => {
                inner.phase = Phase::HalfOpen { trial_in_flight: true };
                true
            }
        };

        Some(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record(&self, permit: &mut Permit<'_>, failed: bool) {
        permit.settled = true;
        let mut inner = self.lock();
        let now = Instant::now();

        if permit.trial {
            if failed {
                self.open(&mut inner, now);
            } else {
                inner.phase = Phase::Closed;
                inner.samples.clear();
                tracing::info!(breaker = %self.name, "circuit breaker closed");
            }
            return;
        }

        // Another call may have opened the circuit while this one was in flight.
        if !matches!(inner.phase, Phase::Closed) {
            return;
        }

        inner.samples.push_back((now, failed));
        if let Some(window_start) = now.checked_sub(self.config.sampling_duration) {
            while inner.samples.front().is_some_and(|&(at, _)| at < window_start) {
                inner.samples.pop_front();
            }
        }

        if !failed {
            return;
        }

        let total = inner.samples.len();
        let failures = inner.samples.iter().filter(|(_, f)| *f).count();
        if total >= self.config.minimum_throughput
            && (failures as f64 / total as f64) >= self.config.failure_ratio
        {
            self.open(&mut inner, now);
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        let sampled = inner.samples.len();
        inner.samples.clear();
        inner.phase = Phase::Open {
            until: now + self.config.break_duration,
        };
        tracing::error!(
            breaker = %self.name,
            sampled,
            break_ms = self.config.break_duration.as_millis() as u64,
            "circuit breaker opened"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Down,
        Rejected,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Classify for TestError {
        fn failure_kind(&self) -> FailureKind {
            match self {
                TestError::Down => FailureKind::Transient,
                TestError::Rejected => FailureKind::Permanent,
            }
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", CircuitBreakerConfig::default())
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), ResilienceError<TestError>> {
        b.call(|| async { Err::<(), _>(TestError::Down) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), ResilienceError<TestError>> {
        b.call(|| async { Ok::<_, TestError>(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_below_minimum_throughput() {
        let b = breaker();
        assert!(fail(&b).await.is_err());
        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_when_failure_ratio_is_reached() {
        let b = breaker();
        succeed(&b).await.unwrap();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), State::Closed);

        // 2 of 3 failed.
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), State::Open);

        let err = succeed(&b).await.unwrap_err();
        assert!(matches!(err, ResilienceError::CircuitOpen));
        assert_eq!(b.metrics().total_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_ratio_keeps_the_circuit_closed() {
        let b = breaker();
        for _ in 0..3 {
            succeed(&b).await.unwrap();
        }
        fail(&b).await.unwrap_err();
        // 1 of 4 failed.
        assert_eq!(b.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_do_not_count_as_failures() {
        let b = breaker();
        for _ in 0..5 {
            let err = b
                .call(|| async { Err::<(), _>(TestError::Rejected) })
                .await
                .unwrap_err();
            assert!(matches!(err, ResilienceError::Failed(TestError::Rejected)));
        }
        assert_eq!(b.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_outside_the_window_are_forgotten() {
        let b = breaker();
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();

        tokio::time::advance(Duration::from_secs(31)).await;

        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_closes_the_circuit() {
        let b = breaker();
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        assert_eq!(b.state(), State::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(b.state(), State::HalfOpen);

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_the_circuit() {
        let b = breaker();
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), State::Open);
        assert!(matches!(succeed(&b).await, Err(ResilienceError::CircuitOpen)));
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_trial_runs_while_half_open() {
        let b = breaker();
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = b.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .call(|| async move {
                    let _ = wait.await;
                    Ok::<_, TestError>(())
                })
                .await
        });
        tokio::task::yield_now().await;

        assert!(matches!(succeed(&b).await, Err(ResilienceError::CircuitOpen)));

        release.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(b.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_trial_frees_the_half_open_slot() {
        let b = breaker();
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let pending = b.call(std::future::pending::<Result<(), TestError>>);
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), State::Closed);
    }
}

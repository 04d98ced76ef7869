//! Fault handling for calls to remote services.
//!
//! A [`ResiliencePipeline`] wraps each remote call in a retry loop (outer) around a
//! circuit breaker (inner). A call rejected by an open circuit fails fast and is
//! not retried; transient failures are retried with exponential backoff and
//! feed the breaker's failure ratio.

pub mod circuit_breaker;
pub mod retry;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, State};
pub use retry::{retry_with_backoff, RetryPolicy};

/// How a failed call should be treated by retry and the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport failure, timeout or server-side fault. Retried and counted.
    Transient,
    /// A definitive answer from the remote side (e.g. "not found"). Neither
    /// retried nor counted against the circuit.
    Permanent,
}

/// Implemented by per-attempt error types flowing through a pipeline.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// Outcome of a call that did not succeed.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("{0}")]
    Failed(E),
}

impl<E: Classify> ResilienceError<E> {
    fn is_retryable(&self) -> bool {
        matches!(self, ResilienceError::Failed(e) if e.failure_kind() == FailureKind::Transient)
    }
}

/// Combined resilience settings for one remote dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceConfig {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Retry around circuit breaker, shared by every call to one dependency.
#[derive(Debug, Clone)]
pub struct ResiliencePipeline {
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResiliencePipeline {
    pub fn new(name: &str, config: &ResilienceConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            breaker: CircuitBreaker::new(name, config.circuit_breaker.clone()),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Execute `attempt` under the pipeline. `attempt` is invoked once per try.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let breaker = &self.breaker;
        retry_with_backoff(&self.retry, operation, ResilienceError::is_retryable, move || {
            // `attempt` runs only once the breaker has admitted the call.
            let admitted = breaker.admit().map(|permit| (permit, attempt()));
            async move {
                let Some((permit, call)) = admitted else {
                    return Err(ResilienceError::CircuitOpen);
                };
                breaker.complete(permit, call).await
            }
        })
        .await
    }
}

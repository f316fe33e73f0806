// src/resilience/mod.rs
// Retry, timeout, circuit breaking and request deduplication for store calls
//
// This is the only layer allowed to retry. Everything above it treats an
// error coming out of `execute` as final.

mod backoff;
mod circuit_breaker;
mod dedup;

pub use backoff::{backoff_delay, Priority};
pub use circuit_breaker::{CircuitBreaker, TrialGuard};
pub use dedup::InflightRequests;

use crate::config::ResilienceConfig;
use crate::store::{StoreError, StoreResult};
use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("'{label}' timed out after {after:?}")]
    Timeout { label: String, after: Duration },

    #[error("store circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("operation cancelled")]
    Cancelled,
}

/// Per-call options for [`ResilienceLayer::execute`].
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    pub priority: Priority,
    pub cancel: Option<CancellationToken>,
    pub dedup_key: Option<String>,
}

impl RetryOptions {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        RetryOptions {
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
            priority: Priority::Normal,
            cancel: None,
            dedup_key: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn dedup(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

struct Inner {
    config: ResilienceConfig,
    breaker: CircuitBreaker,
    inflight: InflightRequests,
}

/// Shared handle; clones refer to the same breaker and in-flight table.
#[derive(Clone)]
pub struct ResilienceLayer {
    inner: Arc<Inner>,
}

impl ResilienceLayer {
    pub fn new(config: ResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker_threshold,
            Duration::from_millis(config.breaker_cooldown_ms),
        );
        ResilienceLayer {
            inner: Arc::new(Inner {
                config,
                breaker,
                inflight: InflightRequests::new(),
            }),
        }
    }

    pub fn options(&self) -> RetryOptions {
        RetryOptions::from_config(&self.inner.config)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Run `op` with timeout, retry/backoff, circuit breaking and, when a
    /// dedup key is given, collapsing of concurrent identical calls.
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        options: RetryOptions,
        op: F,
    ) -> Result<T, ResilienceError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
    {
        match options.dedup_key.clone() {
            Some(key) => {
                let this = self.clone();
                let label = label.to_string();
                self.inner
                    .inflight
                    .run(key, async move { this.run_with_retry(&label, options, op).await })
                    .await
            }
            None => self.run_with_retry(label, options, op).await,
        }
    }

    async fn run_with_retry<T, F, Fut>(
        &self,
        label: &str,
        options: RetryOptions,
        mut op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut retry: u32 = 0;
        loop {
            if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                debug!("[Resilience] '{}' cancelled before attempt {}", label, retry + 1);
                return Err(ResilienceError::Cancelled);
            }
            // Dropped at the end of the iteration; re-trips the circuit only if
            // this call was the trial and never recorded an outcome.
            let _trial = match self.inner.breaker.acquire() {
                Ok(trial) => trial,
                Err(retry_in) => {
                    warn!("[Resilience] '{}' rejected: circuit open", label);
                    return Err(ResilienceError::CircuitOpen { retry_in });
                }
            };

            let error = match tokio::time::timeout(options.timeout, op()).await {
                Ok(Ok(value)) => {
                    self.inner.breaker.record_success();
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => {
                    // The store call may still complete on its own; we only stop waiting.
                    self.inner.breaker.record_failure();
                    warn!("[Resilience] '{}' timed out after {:?}", label, options.timeout);
                    return Err(ResilienceError::Timeout {
                        label: label.to_string(),
                        after: options.timeout,
                    });
                }
            };

            if !error.is_retryable() {
                self.inner.breaker.record_permanent_error();
                debug!("[Resilience] '{}' failed permanently: {}", label, error);
                return Err(ResilienceError::Store(error));
            }
            self.inner.breaker.record_failure();

            if retry >= options.retries {
                warn!(
                    "[Resilience] '{}' giving up after {} attempt(s): {}",
                    label,
                    retry + 1,
                    error
                );
                return Err(ResilienceError::Store(error));
            }

            let delay = backoff_delay(
                &self.inner.config,
                retry,
                options.priority,
                rand::rng().random::<f64>(),
            );
            warn!(
                "[Resilience] '{}' attempt {}/{} failed ({}), retrying in {:?}",
                label,
                retry + 1,
                options.retries + 1,
                error,
                delay
            );

            match &options.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!("[Resilience] '{}' cancelled during backoff", label);
                            return Err(ResilienceError::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            retry += 1;
        }
    }
}

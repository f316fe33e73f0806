// src/resilience/circuit_breaker.rs
// Circuit breaker around the data store: trips after consecutive transient
// failures and lets a single trial through once the cooldown has elapsed.

use log::{info, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    /// Normal operation, counting consecutive failures.
    Closed { consecutive_failures: u32 },
    /// Tripped; every call is rejected until the cooldown expires.
    Open { tripped_at: Instant },
    /// Cooldown expired and one trial is in flight.
    HalfOpen,
}

impl Default for State {
    fn default() -> Self {
        State::Closed {
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<State>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask permission for a call. `Ok(true)` means this call is the single
    /// half-open trial. `Err` carries the time left until a trial will be
    /// allowed.
    pub fn check(&self) -> Result<bool, Duration> {
        let mut state = self.lock();
        match *state {
            State::Closed { .. } => Ok(false),
            State::Open { tripped_at } => {
                let elapsed = tripped_at.elapsed();
                if elapsed >= self.cooldown {
                    info!("[Resilience] Circuit half-open, allowing trial call");
                    *state = State::HalfOpen;
                    Ok(true)
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
            // A trial is already in flight; hold everyone else back until it resolves.
            State::HalfOpen => Err(Duration::ZERO),
        }
    }

    /// Like [`check`](Self::check), but a granted trial comes with a guard
    /// that re-trips the circuit if the trial is dropped before its outcome
    /// is recorded.
    pub fn acquire(&self) -> Result<Option<TrialGuard<'_>>, Duration> {
        Ok(self.check()?.then(|| TrialGuard { breaker: self }))
    }

    /// The store answered, but with an error retrying cannot fix. Says
    /// nothing about store health, except that a pending trial got through.
    pub fn record_permanent_error(&self) {
        let mut state = self.lock();
        if matches!(*state, State::HalfOpen) {
            info!("[Resilience] Circuit recovered (trial answered with a permanent error)");
            *state = State::default();
        }
    }

    fn abandon_trial(&self) {
        let mut state = self.lock();
        if matches!(*state, State::HalfOpen) {
            warn!("[Resilience] Trial abandoned before completing, circuit re-tripped");
            *state = State::Open {
                tripped_at: Instant::now(),
            };
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if matches!(*state, State::HalfOpen) {
            info!("[Resilience] Circuit recovered (trial succeeded)");
        }
        *state = State::default();
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        let now = Instant::now();
        match *state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.threshold {
                    warn!(
                        "[Resilience] Circuit tripped after {} consecutive failures; rejecting calls for {}ms",
                        failures,
                        self.cooldown.as_millis()
                    );
                    *state = State::Open { tripped_at: now };
                } else {
                    *state = State::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            State::HalfOpen => {
                warn!("[Resilience] Trial failed, circuit re-tripped");
                *state = State::Open { tripped_at: now };
            }
            State::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock(), State::Open { .. })
    }

    pub fn consecutive_failures(&self) -> u32 {
        match *self.lock() {
            State::Closed {
                consecutive_failures,
            } => consecutive_failures,
            _ => self.threshold,
        }
    }
}

/// Held for the duration of a half-open trial.
pub struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        // No-op once the outcome has moved the circuit out of half-open.
        self.breaker.abandon_trial();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_breaker_is_closed() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(cb.check().is_ok());
        assert!(!cb.is_open());
    }

    #[test]
    fn test_threshold_failures_trip() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.is_open());
        let retry_in = cb.check().unwrap_err();
        assert!(retry_in <= Duration::from_secs(60));
    }

    #[test]
    fn test_success_resets_count() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert!(cb.check().is_ok());
        assert_eq!(cb.consecutive_failures(), 1);
    }

    #[test]
    fn test_single_trial_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        // cooldown of zero: first caller becomes the trial
        assert_eq!(cb.check(), Ok(true));
        // second caller is held back while the trial is in flight
        assert_eq!(cb.check().unwrap_err(), Duration::ZERO);
        cb.record_success();
        assert_eq!(cb.check(), Ok(false));
    }

    #[test]
    fn test_failed_trial_retrips() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        {
            let mut state = cb.state.lock().unwrap();
            *state = State::HalfOpen;
        }
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn test_permanent_error_during_trial_closes() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        let trial = cb.acquire().unwrap();
        assert!(trial.is_some());
        cb.record_permanent_error();
        drop(trial);
        assert!(!cb.is_open());
        assert_eq!(cb.check(), Ok(false));
    }

    #[test]
    fn test_permanent_error_when_closed_keeps_count() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_permanent_error();
        assert_eq!(cb.consecutive_failures(), 1);
    }

    #[test]
    fn test_dropped_trial_retrips() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        {
            let trial = cb.acquire().unwrap();
            assert!(trial.is_some());
        }
        assert!(cb.is_open());
        // cooldown of zero, so a new trial may go through
        assert!(cb.acquire().unwrap().is_some());
    }

    #[test]
    fn test_closed_breaker_grants_no_trial_guard() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(cb.acquire().unwrap().is_none());
    }
}

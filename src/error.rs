// src/error.rs
// Error taxonomy for the scheduler

use crate::resilience::ResilienceError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced to callers of the scheduler.
///
/// Domain variants describe missing records and are never retried.
/// Store failures reach this type only after the resilience layer gave up.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    #[error("problem not found: {0}")]
    ProblemNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// True for domain errors, which retrying cannot fix.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            SchedulerError::ProblemNotFound(_)
                | SchedulerError::SessionNotFound(_)
        )
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        SchedulerError::Resilience(ResilienceError::Store(err))
    }
}

impl From<SchedulerError> for String {
    fn from(err: SchedulerError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreErrorKind;

    #[test]
    fn test_domain_errors() {
        assert!(SchedulerError::ProblemNotFound("two-sum".into()).is_domain());
        assert!(SchedulerError::SessionNotFound("s-1".into()).is_domain());
        assert!(!SchedulerError::Config("bad".into()).is_domain());
    }

    #[test]
    fn test_from_store_error() {
        let err: SchedulerError = StoreError::new(StoreErrorKind::QuotaExceeded, "disk full").into();
        assert!(matches!(
            err,
            SchedulerError::Resilience(ResilienceError::Store(_))
        ));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_into_string() {
        let s: String = SchedulerError::SessionNotFound("abc".into()).into();
        assert!(s.contains("session not found"));
    }
}

//! Error types shared by every limiter and store adapter.
//!
//! A policy rejection is not an error: it is a [`Decision`](crate::domain::Decision)
//! with `success == false`. The types here cover the third outcome, where the
//! store could not answer and no rate-limit information is available.

use std::time::Duration;

use thiserror::Error;

/// Store adapter errors - the backing key-value store could not complete an operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store operation failed: {0}")]
    Operation(String),

    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

/// Rate limiter errors.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Raised only by the scoped-acquisition helper; the guarded operation never ran.
    #[error("Concurrency limit exceeded: {current} of {limit} slots in use")]
    ConcurrencyLimitExceeded { current: u64, limit: u64 },

    /// Every reset was attempted; `source` is the first failure encountered.
    #[error("{failed} of {attempted} limiter resets failed: {source}")]
    CompositeReset {
        failed: usize,
        attempted: usize,
        #[source]
        source: Box<RateLimitError>,
    },

    /// Every release was attempted; `source` is the first failure encountered.
    #[error("{failed} of {attempted} limiter releases failed: {source}")]
    CompositeRelease {
        failed: usize,
        attempted: usize,
        #[source]
        source: Box<RateLimitError>,
    },

    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(String),
}

impl RateLimitError {
    /// True when the failure came from the store rather than from policy or configuration.
    pub fn is_store_failure(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::CompositeReset { source, .. } | Self::CompositeRelease { source, .. } => {
                source.is_store_failure()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_reset_reports_store_failure_of_source() {
        let err = RateLimitError::CompositeReset {
            failed: 1,
            attempted: 3,
            source: Box::new(StoreError::Timeout(Duration::from_millis(50)).into()),
        };

        assert!(err.is_store_failure());
        assert_eq!(
            err.to_string(),
            "1 of 3 limiter resets failed: Store operation timed out after 50ms"
        );
    }

    #[test]
    fn concurrency_exceeded_is_not_a_store_failure() {
        let err = RateLimitError::ConcurrencyLimitExceeded {
            current: 2,
            limit: 2,
        };
        assert!(!err.is_store_failure());
    }
}

//! Ordered, short-circuiting combination of limiters.

use std::ops::Deref;
use std::sync::Arc;

use futures::future::join_all;

use crate::domain::Decision;
use crate::error::RateLimitError;
use crate::ports::RateLimiter;

/// Decisions produced by one [`CompositeLimiter::decide`] call, in limiter order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeDecision(Vec<Decision>);

impl CompositeDecision {
    /// True when every configured limiter was evaluated and admitted the request.
    pub fn allowed(&self) -> bool {
        self.0.iter().all(|d| d.success)
    }

    /// The decision that stopped evaluation, if any. Always the last entry.
    pub fn blocked_by(&self) -> Option<&Decision> {
        self.0.last().filter(|d| !d.success)
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Decision> {
        self.0
    }
}

impl Deref for CompositeDecision {
    type Target = [Decision];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Runs several limiters against one identifier as a single decision.
///
/// There is no atomicity across the constituent limiters: each one is an
/// independent store operation.
#[derive(Clone, Default)]
pub struct CompositeLimiter {
    limiters: Vec<Arc<dyn RateLimiter>>,
}

impl CompositeLimiter {
    pub fn new(limiters: Vec<Arc<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }

    pub fn with(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiters.push(limiter);
        self
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Evaluate limiters in order, stopping at the first rejection.
    ///
    /// Limiters after a rejection are never invoked. A store error from any
    /// limiter is returned immediately and no partial list is produced.
    pub async fn decide(&self, identifier: &str) -> Result<CompositeDecision, RateLimitError> {
        let mut decisions = Vec::with_capacity(self.limiters.len());

        for limiter in &self.limiters {
            let decision = limiter.decide(identifier).await?;
            let success = decision.success;
            decisions.push(decision);

            if !success {
                tracing::debug!(
                    identifier,
                    limiter = limiter.name(),
                    "Composite decision short-circuited"
                );
                break;
            }
        }

        Ok(CompositeDecision(decisions))
    }

    /// Reset every limiter concurrently.
    ///
    /// All resets are attempted; successful ones are kept even when others fail.
    /// The first failure (in limiter order) is returned wrapped in
    /// [`RateLimitError::CompositeReset`].
    pub async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let results = join_all(self.limiters.iter().map(|l| l.reset(identifier))).await;

        match first_failure(results) {
            None => Ok(()),
            Some((failed, attempted, first)) => {
                tracing::warn!(
                    identifier,
                    failed,
                    attempted,
                    error = %first,
                    "Composite reset failed"
                );
                Err(RateLimitError::CompositeReset {
                    failed,
                    attempted,
                    source: Box::new(first),
                })
            }
        }
    }

    /// Release every limiter concurrently.
    ///
    /// Gives back slots taken by a `decide` that a later limiter rejected, or
    /// ends an admitted request. Limiters holding nothing ignore the call.
    pub async fn release(&self, identifier: &str) -> Result<(), RateLimitError> {
        let results = join_all(self.limiters.iter().map(|l| l.release(identifier))).await;

        match first_failure(results) {
            None => Ok(()),
            Some((failed, attempted, first)) => {
                tracing::warn!(
                    identifier,
                    failed,
                    attempted,
                    error = %first,
                    "Composite release failed"
                );
                Err(RateLimitError::CompositeRelease {
                    failed,
                    attempted,
                    source: Box::new(first),
                })
            }
        }
    }
}

/// Failure count, attempt count and first failure of a fan-out.
fn first_failure(
    results: Vec<Result<(), RateLimitError>>,
) -> Option<(usize, usize, RateLimitError)> {
    let attempted = results.len();
    let mut failures = results.into_iter().filter_map(Result::err);
    let first = failures.next()?;
    Some((1 + failures.count(), attempted, first))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::StoreError;

    struct Scripted {
        name: &'static str,
        allow: bool,
        fail_reset: bool,
        decides: AtomicUsize,
        resets: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, allow: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                allow,
                fail_reset: false,
                decides: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
            })
        }

        fn failing_reset(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                allow: true,
                fail_reset: true,
                decides: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RateLimiter for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn decide(&self, _identifier: &str) -> Result<Decision, RateLimitError> {
            self.decides.fetch_add(1, Ordering::SeqCst);
            Ok(Decision::new(self.name, self.allow, i64::from(self.allow), 0, 1))
        }

        async fn reset(&self, _identifier: &str) -> Result<(), RateLimitError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            if self.fail_reset {
                Err(StoreError::Timeout(Duration::from_millis(10)).into())
            } else {
                Ok(())
            }
        }
    }

    fn erased(limiter: &Arc<Scripted>) -> Arc<dyn RateLimiter> {
        limiter.clone()
    }

    struct Broken;

    #[async_trait]
    impl RateLimiter for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn decide(&self, _identifier: &str) -> Result<Decision, RateLimitError> {
            Err(StoreError::Connection("refused".into()).into())
        }

        async fn reset(&self, _identifier: &str) -> Result<(), RateLimitError> {
            Ok(())
        }

        async fn release(&self, _identifier: &str) -> Result<(), RateLimitError> {
            Err(StoreError::Connection("refused".into()).into())
        }
    }

    #[tokio::test]
    async fn test_decide_stops_at_first_rejection() {
        let a = Scripted::new("a", true);
        let b = Scripted::new("b", false);
        let c = Scripted::new("c", true);
        let composite = CompositeLimiter::new(vec![erased(&a), erased(&b), erased(&c)]);

        let result = composite.decide("user").await.unwrap();

        let names: Vec<_> = result.iter().map(|d| d.limiter.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(!result.allowed());
        assert_eq!(result.blocked_by().map(|d| d.limiter.as_str()), Some("b"));
        assert_eq!(c.decides.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decide_all_allowed() {
        let composite = CompositeLimiter::default()
            .with(Scripted::new("a", true))
            .with(Scripted::new("b", true));

        let result = composite.decide("user").await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.allowed());
        assert!(result.blocked_by().is_none());
    }

    #[tokio::test]
    async fn test_decide_propagates_store_error_without_partial_list() {
        let after = Scripted::new("after", true);
        let composite = CompositeLimiter::new(vec![
            erased(&Scripted::new("a", true)),
            Arc::new(Broken) as Arc<dyn RateLimiter>,
            erased(&after),
        ]);

        let err = composite.decide("user").await.unwrap_err();
        assert!(err.is_store_failure());
        assert_eq!(after.decides.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_attempts_every_limiter_and_reports_failure() {
        let a = Scripted::failing_reset("a");
        let b = Scripted::new("b", false);
        let c = Scripted::failing_reset("c");
        let composite = CompositeLimiter::new(vec![erased(&a), erased(&b), erased(&c)]);

        let err = composite.reset("user").await.unwrap_err();

        for limiter in [&a, &b, &c] {
            assert_eq!(limiter.resets.load(Ordering::SeqCst), 1);
        }
        match err {
            RateLimitError::CompositeReset {
                failed, attempted, ..
            } => {
                assert_eq!(failed, 2);
                assert_eq!(attempted, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_fans_out_and_reports_failure() {
        let composite = CompositeLimiter::new(vec![
            Arc::new(Broken) as Arc<dyn RateLimiter>,
            erased(&Scripted::new("a", false)),
        ]);

        let err = composite.release("user").await.unwrap_err();
        assert!(err.is_store_failure());
        match err {
            RateLimitError::CompositeRelease {
                failed, attempted, ..
            } => {
                assert_eq!(failed, 1);
                assert_eq!(attempted, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }

        let idle = CompositeLimiter::new(vec![erased(&Scripted::new("b", true))]);
        assert!(idle.release("user").await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_succeeds_when_all_succeed() {
        let composite = CompositeLimiter::new(vec![erased(&Scripted::new("a", false))]);
        assert!(composite.reset("user").await.is_ok());
    }
}

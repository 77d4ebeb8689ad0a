//! Limiter implementations over the [`AtomicStore`](crate::ports::AtomicStore) port.

mod composite;
mod concurrency;
mod fixed_window;
mod token_bucket;

use std::sync::Arc;

pub use composite::{CompositeDecision, CompositeLimiter};
pub use concurrency::ConcurrencyLimiter;
pub use fixed_window::FixedWindowCounter;
pub use token_bucket::TokenBucket;

use crate::clock::Clock;
use crate::domain::LimiterSpec;
use crate::error::RateLimitError;
use crate::ports::{AtomicStore, RateLimiter};

impl LimiterSpec {
    /// Build the limiter this spec describes.
    pub fn build(
        self,
        store: Arc<dyn AtomicStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
        let limiter: Arc<dyn RateLimiter> = match self {
            Self::FixedWindow(config) => Arc::new(FixedWindowCounter::new(config, store, clock)?),
            Self::TokenBucket(config) => Arc::new(TokenBucket::new(config, store, clock)?),
            Self::Concurrency(config) => Arc::new(ConcurrencyLimiter::new(config, store, clock)?),
        };
        Ok(limiter)
    }
}

impl CompositeLimiter {
    /// Build a composite from specs, preserving their order.
    pub fn from_specs(
        specs: impl IntoIterator<Item = LimiterSpec>,
        store: Arc<dyn AtomicStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RateLimitError> {
        let limiters = specs
            .into_iter()
            .map(|spec| spec.build(store.clone(), clock.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(limiters))
    }
}

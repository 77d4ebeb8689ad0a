//! Rate limiting port.

use async_trait::async_trait;

use crate::domain::Decision;
use crate::error::RateLimitError;

/// Rate limiter trait - the capability every limiter variant offers.
///
/// The composite limiter is written against this trait only.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Name reported in [`Decision::limiter`].
    fn name(&self) -> &str;

    /// Count a request against the quota and report whether it is allowed.
    async fn decide(&self, identifier: &str) -> Result<Decision, RateLimitError>;

    /// Restore the identifier's initial, unthrottled state.
    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError>;

    /// Give back whatever `decide` holds for the identifier until released.
    ///
    /// Only slot-holding limiters have anything to give back.
    async fn release(&self, _identifier: &str) -> Result<(), RateLimitError> {
        Ok(())
    }
}

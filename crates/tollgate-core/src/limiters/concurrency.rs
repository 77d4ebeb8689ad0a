//! Concurrency slot limiter.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::clock::Clock;
use crate::domain::keys::{self, LimiterKind};
use crate::domain::{AtomicScript, ConcurrencyConfig, Decision};
use crate::error::{RateLimitError, StoreError};
use crate::ports::{AtomicStore, RateLimiter};

const SLOTS_SUFFIX: &str = "slots";

/// Bounds the number of in-flight operations per identifier.
///
/// Every acquire refreshes the record's expiry to `timeout_ms`; releases do not.
/// A holder that crashes without releasing therefore blocks its slot for at
/// most `timeout_ms` after the most recent acquire.
pub struct ConcurrencyLimiter {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
    config: ConcurrencyConfig,
    name: String,
}

impl ConcurrencyLimiter {
    pub fn new(
        config: ConcurrencyConfig,
        store: Arc<dyn AtomicStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RateLimitError> {
        config.validate()?;
        let name = config.display_name();

        Ok(Self {
            store,
            clock,
            config,
            name,
        })
    }

    pub fn config(&self) -> &ConcurrencyConfig {
        &self.config
    }

    fn key(&self, identifier: &str) -> String {
        keys::fixed_key(
            &self.config.prefix,
            LimiterKind::Concurrency,
            identifier,
            SLOTS_SUFFIX,
        )
    }

    async fn try_acquire(&self, identifier: &str) -> Result<(Decision, u64), RateLimitError> {
        let now_ms = self.clock.now_ms();
        let script = AtomicScript::AcquireSlot {
            max: self.config.max_concurrent_requests,
            timeout_ms: self.config.timeout_ms,
        };

        let reply = self.store.eval(&self.key(identifier), &script).await?;
        let success = reply.flag(0)?;
        let in_use = reply.value(1)?.max(0) as u64;
        let max = self.config.max_concurrent_requests;
        let reset_at = now_ms.saturating_add(self.config.timeout_ms as i64);

        tracing::debug!(
            identifier,
            limiter = %self.name,
            success,
            in_use,
            "Concurrency slot decision"
        );

        let decision = if success {
            Decision::new(&self.name, true, max.saturating_sub(in_use) as i64, reset_at, max)
        } else {
            Decision::new(&self.name, false, 0, reset_at, max).with_metadata("current", in_use)
        };

        Ok((decision, in_use))
    }

    /// Take one slot if fewer than `max_concurrent_requests` are held.
    ///
    /// On rejection the current slot count is reported as `metadata["current"]`.
    pub async fn acquire(&self, identifier: &str) -> Result<Decision, RateLimitError> {
        self.try_acquire(identifier).await.map(|(decision, _)| decision)
    }

    /// Give one slot back. Returns the number of slots still held.
    pub async fn release(&self, identifier: &str) -> Result<u64, RateLimitError> {
        let reply = self
            .store
            .eval(&self.key(identifier), &AtomicScript::ReleaseSlot)
            .await?;
        Ok(reply.value(0)?.max(0) as u64)
    }

    pub async fn in_flight(&self, identifier: &str) -> Result<u64, RateLimitError> {
        let key = self.key(identifier);
        match self.store.get(&key).await? {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                StoreError::UnexpectedReply(format!("slot counter {key} holds {raw:?}")).into()
            }),
            None => Ok(0),
        }
    }

    /// Run `operation` while holding a slot.
    ///
    /// Fails with [`RateLimitError::ConcurrencyLimitExceeded`] without polling
    /// `operation` when no slot is free. Otherwise the slot is released exactly
    /// once after `operation` completes, including when it panics; the panic
    /// is resumed after the release. A future dropped mid-flight leaks its slot
    /// until the record expires.
    pub async fn wrap<F, T>(&self, identifier: &str, operation: F) -> Result<T, RateLimitError>
    where
        F: Future<Output = T>,
    {
        let (decision, current) = self.try_acquire(identifier).await?;
        if !decision.success {
            tracing::warn!(
                identifier,
                limiter = %self.name,
                current,
                limit = self.config.max_concurrent_requests,
                "Concurrency limit exceeded"
            );
            return Err(RateLimitError::ConcurrencyLimitExceeded {
                current,
                limit: self.config.max_concurrent_requests,
            });
        }

        let outcome = AssertUnwindSafe(operation).catch_unwind().await;
        let released = self.release(identifier).await;

        let output = match outcome {
            Ok(output) => output,
            Err(panic) => {
                if let Err(e) = &released {
                    tracing::error!(identifier, error = %e, "Slot release failed after panic");
                }
                std::panic::resume_unwind(panic)
            }
        };

        released?;
        Ok(output)
    }
}

#[async_trait]
impl RateLimiter for ConcurrencyLimiter {
    fn name(&self) -> &str {
        &self.name
    }

    /// Acquires a slot; the caller owns the matching [`ConcurrencyLimiter::release`].
    async fn decide(&self, identifier: &str) -> Result<Decision, RateLimitError> {
        self.acquire(identifier).await
    }

    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        self.store.delete(&self.key(identifier)).await?;
        Ok(())
    }

    async fn release(&self, identifier: &str) -> Result<(), RateLimitError> {
        ConcurrencyLimiter::release(self, identifier).await?;
        Ok(())
    }
}

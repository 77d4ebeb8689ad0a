//! Token bucket limiter with fixed or sliding refill.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::domain::keys::{self, LimiterKind};
use crate::domain::{AtomicScript, Decision, StoredRecord, TokenBucketConfig, WindowType};
use crate::error::RateLimitError;
use crate::ports::{AtomicStore, RateLimiter};

const SLIDING_SUFFIX: &str = "sliding";

/// Capacity-bounded limiter.
///
/// In [`WindowType::Fixed`] mode the key embeds the window index, so every
/// interval starts with a full bucket. In [`WindowType::Sliding`] mode a single
/// record is refilled by `floor(elapsed * refill_rate / interval)` tokens on
/// each successful take.
///
/// Tokens never go below zero: a take larger than the available tokens is
/// rejected and leaves the bucket untouched.
pub struct TokenBucket {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
    config: TokenBucketConfig,
    name: String,
}

impl TokenBucket {
    pub fn new(
        config: TokenBucketConfig,
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

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    fn key(&self, identifier: &str, now_ms: i64) -> String {
        match self.config.window {
            WindowType::Fixed => keys::windowed_key(
                &self.config.prefix,
                LimiterKind::TokenBucket,
                identifier,
                keys::window_index(now_ms, self.config.interval_ms),
            ),
            WindowType::Sliding => keys::fixed_key(
                &self.config.prefix,
                LimiterKind::TokenBucket,
                identifier,
                SLIDING_SUFFIX,
            ),
        }
    }

    fn script(&self, cost: u64, now_ms: i64) -> AtomicScript {
        match self.config.window {
            WindowType::Fixed => AtomicScript::TakeTokensFixed {
                capacity: self.config.capacity,
                cost,
                window_start_ms: keys::window_index(now_ms, self.config.interval_ms)
                    .saturating_mul(self.config.interval_ms as i64),
                interval_ms: self.config.interval_ms,
            },
            WindowType::Sliding => AtomicScript::TakeTokensSliding {
                capacity: self.config.capacity,
                cost,
                interval_ms: self.config.interval_ms,
                refill_rate: self.config.effective_refill_rate(),
                now_ms,
            },
        }
    }

    async fn take(&self, identifier: &str, cost: u64) -> Result<Decision, RateLimitError> {
        let now_ms = self.clock.now_ms();
        let key = self.key(identifier, now_ms);

        let reply = self.store.eval(&key, &self.script(cost, now_ms)).await?;
        let success = reply.flag(0)?;
        let remaining = reply.value(1)?;
        let reset_at = reply.value(2)?;

        tracing::debug!(
            identifier,
            limiter = %self.name,
            cost,
            success,
            remaining,
            "Token bucket decision"
        );

        Ok(
            Decision::new(&self.name, success, remaining, reset_at, self.config.capacity)
                .with_metadata("cost", cost),
        )
    }

    /// Take an explicit number of tokens instead of the configured take rate.
    ///
    /// Used when the real cost of an operation is only known after it was
    /// admitted. A standalone atomic take; `decide` is not consulted first.
    pub async fn update_tokens(
        &self,
        identifier: &str,
        amount: u64,
    ) -> Result<Decision, RateLimitError> {
        self.take(identifier, amount).await
    }

    /// Available tokens without taking any.
    ///
    /// Sliding refill is computed for the report but not persisted.
    /// `success` tells whether one decision at the configured take rate would pass.
    pub async fn peek(&self, identifier: &str) -> Result<Decision, RateLimitError> {
        let now_ms = self.clock.now_ms();
        let key = self.key(identifier, now_ms);

        let fields = self.store.hash_get_all(&key).await?;
        let record = (!fields.is_empty()).then_some(StoredRecord::Fields(fields));

        let (reply, _) = self.script(0, now_ms).evaluate(record.as_ref())?;
        let tokens = reply.value(1)?;

        Ok(Decision::new(
            &self.name,
            tokens >= self.config.take_rate as i64,
            tokens,
            reply.value(2)?,
            self.config.capacity,
        ))
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, identifier: &str) -> Result<Decision, RateLimitError> {
        self.take(identifier, self.config.take_rate).await
    }

    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let key = self.key(identifier, self.clock.now_ms());
        self.store.delete(&key).await?;
        Ok(())
    }
}

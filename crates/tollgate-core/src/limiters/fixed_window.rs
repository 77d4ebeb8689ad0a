//! Fixed-window request counter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::domain::keys::{self, LimiterKind};
use crate::domain::{Decision, FixedWindowConfig};
use crate::error::{RateLimitError, StoreError};
use crate::ports::{AtomicStore, RateLimiter};

/// Counts requests per identifier within aligned windows of `window_ms`.
///
/// Each window has its own key, so a new window starts from zero without any
/// cleanup; old keys simply expire.
pub struct FixedWindowCounter {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
    config: FixedWindowConfig,
    name: String,
}

impl FixedWindowCounter {
    pub fn new(
        config: FixedWindowConfig,
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

    pub fn config(&self) -> &FixedWindowConfig {
        &self.config
    }

    fn window_key(&self, identifier: &str, now_ms: i64) -> (String, i64) {
        let window = keys::window_index(now_ms, self.config.window_ms);
        let key = keys::windowed_key(
            &self.config.prefix,
            LimiterKind::FixedWindow,
            identifier,
            window,
        );
        (key, window)
    }

    fn reset_at(&self, window: i64) -> i64 {
        window
            .saturating_add(1)
            .saturating_mul(self.config.window_ms as i64)
    }

    /// Current window's state without counting a request.
    ///
    /// `success` tells whether one more request would be admitted.
    pub async fn peek(&self, identifier: &str) -> Result<Decision, RateLimitError> {
        let (key, window) = self.window_key(identifier, self.clock.now_ms());

        let count = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                StoreError::UnexpectedReply(format!("counter {key} holds non-integer {raw:?}"))
            })?,
            None => 0,
        };
        let remaining = self.config.max_requests as i64 - count;

        Ok(Decision::new(
            &self.name,
            remaining > 0,
            remaining,
            self.reset_at(window),
            self.config.max_requests,
        ))
    }
}

#[async_trait]
impl RateLimiter for FixedWindowCounter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, identifier: &str) -> Result<Decision, RateLimitError> {
        let (key, window) = self.window_key(identifier, self.clock.now_ms());

        let count = self
            .store
            .incr_with_expiry(&key, Duration::from_millis(self.config.window_ms))
            .await?;

        let success = count <= self.config.max_requests as i64;
        let remaining = self.config.max_requests as i64 - count;

        tracing::debug!(
            identifier,
            limiter = %self.name,
            success,
            remaining,
            "Fixed window decision"
        );

        Ok(Decision::new(
            &self.name,
            success,
            remaining,
            self.reset_at(window),
            self.config.max_requests,
        ))
    }

    async fn reset(&self, identifier: &str) -> Result<(), RateLimitError> {
        let (key, _) = self.window_key(identifier, self.clock.now_ms());
        self.store.delete(&key).await?;
        Ok(())
    }
}

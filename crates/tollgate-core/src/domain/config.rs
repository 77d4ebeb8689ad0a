//! Limiter configuration.
//!
//! Durations are normalized milliseconds. Parsing human-readable durations is
//! left to the caller.

use serde::{Deserialize, Serialize};

use crate::domain::keys::{DEFAULT_PREFIX, LimiterKind};
use crate::error::RateLimitError;

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_take_rate() -> u64 {
    1
}

fn require(condition: bool, message: &str) -> Result<(), RateLimitError> {
    if condition {
        Ok(())
    } else {
        Err(RateLimitError::InvalidConfig(message.to_string()))
    }
}

/// Durations take part in signed millisecond timestamp arithmetic.
fn require_duration(ms: u64, field: &str) -> Result<(), RateLimitError> {
    require(
        ms > 0 && ms <= i64::MAX as u64,
        &format!("{field} must be greater than zero and fit in i64 milliseconds"),
    )
}

/// Fixed-window counter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    /// Name reported in decisions. Defaults to the limiter kind.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub max_requests: u64,
    pub window_ms: u64,
}

impl Default for FixedWindowConfig {
    fn default() -> Self {
        Self {
            name: None,
            prefix: default_prefix(),
            max_requests: 100,
            window_ms: 60_000,
        }
    }
}

impl FixedWindowConfig {
    pub fn validate(&self) -> Result<(), RateLimitError> {
        require_duration(self.window_ms, "window_ms")
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| LimiterKind::FixedWindow.to_string())
    }
}

/// How a token bucket regains tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    /// A fresh, full bucket in every aligned interval.
    #[default]
    Fixed,
    /// One continuously maintained bucket refilled by elapsed time.
    Sliding,
}

/// Token bucket configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub capacity: u64,
    pub interval_ms: u64,
    /// Tokens consumed by each decision.
    #[serde(default = "default_take_rate")]
    pub take_rate: u64,
    /// Tokens added per `interval_ms` of elapsed time (sliding mode).
    /// Defaults to `capacity`, a full refill once per interval.
    #[serde(default)]
    pub refill_rate: Option<f64>,
    #[serde(default)]
    pub window: WindowType,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            name: None,
            prefix: default_prefix(),
            capacity: 100,
            interval_ms: 60_000,
            take_rate: default_take_rate(),
            refill_rate: None,
            window: WindowType::default(),
        }
    }
}

impl TokenBucketConfig {
    pub fn validate(&self) -> Result<(), RateLimitError> {
        require_duration(self.interval_ms, "interval_ms")?;
        if let Some(rate) = self.refill_rate {
            require(
                rate.is_finite() && rate >= 0.0,
                "refill_rate must be a finite, non-negative number",
            )?;
        }
        Ok(())
    }

    pub fn effective_refill_rate(&self) -> f64 {
        self.refill_rate.unwrap_or(self.capacity as f64)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| LimiterKind::TokenBucket.to_string())
    }
}

/// Concurrency slot limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    pub max_concurrent_requests: u64,
    /// Slot lifetime; a holder that never releases frees its slot after this long.
    pub timeout_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            name: None,
            prefix: default_prefix(),
            max_concurrent_requests: 10,
            timeout_ms: 30_000,
        }
    }
}

impl ConcurrencyConfig {
    pub fn validate(&self) -> Result<(), RateLimitError> {
        require_duration(self.timeout_ms, "timeout_ms")
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| LimiterKind::Concurrency.to_string())
    }
}

/// Serializable description of one limiter in a composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterSpec {
    FixedWindow(FixedWindowConfig),
    TokenBucket(TokenBucketConfig),
    Concurrency(ConcurrencyConfig),
}

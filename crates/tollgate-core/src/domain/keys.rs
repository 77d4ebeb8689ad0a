//! Store key naming: `{prefix}/{kind}/{identifier}/{suffix}`.
//!
//! Callers may read keys of this shape for observability but must not write them.

use std::fmt;

pub const DEFAULT_PREFIX: &str = "tollgate";

/// Kind segment of a limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterKind {
    FixedWindow,
    TokenBucket,
    Concurrency,
}

impl LimiterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed-window",
            Self::TokenBucket => "token-bucket",
            Self::Concurrency => "concurrency",
        }
    }
}

impl fmt::Display for LimiterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index of the aligned window containing `now_ms`.
pub fn window_index(now_ms: i64, window_ms: u64) -> i64 {
    now_ms.div_euclid(window_ms as i64)
}

/// Key for a record scoped to one window.
pub fn windowed_key(prefix: &str, kind: LimiterKind, identifier: &str, window: i64) -> String {
    format!("{prefix}/{kind}/{identifier}/{window}")
}

/// Key for a record that is maintained continuously.
pub fn fixed_key(prefix: &str, kind: LimiterKind, identifier: &str, suffix: &str) -> String {
    format!("{prefix}/{kind}/{identifier}/{suffix}")
}

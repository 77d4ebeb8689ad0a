//! # Tollgate Core
//!
//! Distributed rate limiting for processes that share nothing but a key-value
//! store with atomic scripting. This crate holds the limiting algorithms and
//! the ports they run against; store adapters live in `tollgate-infra`.
//!
//! Every limiter decision is one atomic store operation, so replicas never
//! coordinate with each other and hold no state of their own.

pub mod clock;
pub mod domain;
pub mod error;
pub mod limiters;
pub mod ports;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    ConcurrencyConfig, Decision, FixedWindowConfig, LimiterSpec, TokenBucketConfig, WindowType,
};
pub use error::{RateLimitError, StoreError};
pub use limiters::{
    CompositeDecision, CompositeLimiter, ConcurrencyLimiter, FixedWindowCounter, TokenBucket,
};
pub use ports::{AtomicStore, RateLimiter, SetOptions};

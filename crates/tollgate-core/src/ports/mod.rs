//! Ports - trait definitions for external dependencies.
//! The store is implemented by infrastructure; limiters implement `RateLimiter`.

mod rate_limit;
mod store;

pub use rate_limit::RateLimiter;
pub use store::{AtomicStore, SetOptions};

//! # Tollgate Infrastructure
//!
//! Concrete implementations of the `AtomicStore` port defined in `tollgate-core`.
//!
//! ## Feature Flags
//!
//! - `redis` (default) - Redis store running every limiter script as server-side Lua
//! - `minimal` - No external dependencies, in-memory store only

pub mod store;

pub use store::InMemoryStore;

#[cfg(feature = "redis")]
pub use store::{RedisStore, RedisStoreConfig};

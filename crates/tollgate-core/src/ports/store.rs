use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{AtomicScript, ScriptReply};
use crate::error::StoreError;

/// Options for [`AtomicStore::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    /// Only write when the key does not exist yet.
    pub only_if_absent: bool,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            only_if_absent: false,
        }
    }
}

/// Atomic store trait - abstraction over the shared key-value store (Redis, in-memory).
///
/// Every method is a single atomic operation with respect to other callers
/// touching the same key.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Returns false when `only_if_absent` prevented the write.
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError>;

    /// Returns true when a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Increment a counter, setting `ttl` only when the increment created the key.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// All fields of a hash record; empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Write `fields` and refresh the expiry in one step.
    async fn hash_set_with_expiry(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Execute a limiter script as one indivisible read-modify-write.
    async fn eval(&self, key: &str, script: &AtomicScript) -> Result<ScriptReply, StoreError>;
}

//! In-memory store implementation - used as fallback when Redis is unavailable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use tollgate_core::domain::{AtomicScript, ScriptEffect, ScriptReply, StoredRecord};
use tollgate_core::{AtomicStore, Clock, SetOptions, StoreError, SystemClock};

struct Entry {
    record: StoredRecord,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|exp| now_ms >= exp)
    }
}

/// In-memory store using a HashMap behind an async RwLock.
///
/// Every mutation, scripts included, runs under the write lock, which makes
/// each operation atomic with respect to other callers in the same process.
/// Expiry is lazy and measured against the injected clock.
/// Note: Limits are per-process, not distributed across instances.
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Remaining time to live of a key, if it exists and has an expiry.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now_ms = self.clock.now_ms();
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|e| !e.is_expired(now_ms))?;
        entry
            .expires_at_ms
            .map(|exp| Duration::from_millis((exp - now_ms) as u64))
    }

    fn expiry(now_ms: i64, ttl: Duration) -> i64 {
        now_ms.saturating_add(ttl.as_millis() as i64)
    }

    /// Drop `key` if it has expired and return the live entry, if any.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now_ms: i64,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.is_expired(now_ms)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type() -> StoreError {
    StoreError::Operation(
        "WRONGTYPE operation against a key holding the wrong kind of value".into(),
    )
}

#[async_trait]
impl AtomicStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now_ms = self.clock.now_ms();
        let entries = self.entries.read().await;

        match entries.get(key).filter(|e| !e.is_expired(now_ms)) {
            None => Ok(None),
            Some(Entry {
                record: StoredRecord::Scalar(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;

        if options.only_if_absent && Self::live(&mut entries, key, now_ms).is_some() {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                record: StoredRecord::Scalar(value.to_string()),
                expires_at_ms: options.ttl.map(|ttl| Self::expiry(now_ms, ttl)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now_ms)))
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;

        match Self::live(&mut entries, key, now_ms) {
            Some(entry) => {
                let StoredRecord::Scalar(value) = &mut entry.record else {
                    return Err(wrong_type());
                };
                let current: i64 = value
                    .parse()
                    .map_err(|_| StoreError::Operation("value is not an integer".into()))?;
                let next = current + 1;
                *value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        record: StoredRecord::Scalar("1".to_string()),
                        expires_at_ms: Some(Self::expiry(now_ms, ttl)),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let now_ms = self.clock.now_ms();
        let entries = self.entries.read().await;

        match entries.get(key).filter(|e| !e.is_expired(now_ms)) {
            None => Ok(HashMap::new()),
            Some(Entry {
                record: StoredRecord::Fields(fields),
                ..
            }) => Ok(fields.clone()),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn hash_set_with_expiry(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;

        let mut merged = match Self::live(&mut entries, key, now_ms) {
            Some(Entry {
                record: StoredRecord::Fields(existing),
                ..
            }) => std::mem::take(existing),
            Some(_) => return Err(wrong_type()),
            None => HashMap::new(),
        };
        for (field, value) in fields {
            merged.insert(field.to_string(), value.clone());
        }

        entries.insert(
            key.to_string(),
            Entry {
                record: StoredRecord::Fields(merged),
                expires_at_ms: Some(Self::expiry(now_ms, ttl)),
            },
        );
        Ok(())
    }

    async fn eval(&self, key: &str, script: &AtomicScript) -> Result<ScriptReply, StoreError> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;

        let current = Self::live(&mut entries, key, now_ms);
        let kept_expiry = current.as_ref().and_then(|e| e.expires_at_ms);
        let (reply, effect) = script.evaluate(current.map(|e| &e.record))?;

        match effect {
            ScriptEffect::None => {}
            ScriptEffect::Delete => {
                entries.remove(key);
            }
            ScriptEffect::Write { record, ttl_ms } => {
                let expires_at_ms = match ttl_ms {
                    Some(ms) => Some(Self::expiry(now_ms, Duration::from_millis(ms))),
                    None => kept_expiry,
                };
                entries.insert(
                    key.to_string(),
                    Entry {
                        record,
                        expires_at_ms,
                    },
                );
            }
        }

        tracing::trace!(key, script = script.name(), reply = ?reply.0, "Script evaluated");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::ManualClock;

    fn store_at(start_ms: i64) -> (InMemoryStore, ManualClock) {
        let clock = ManualClock::new(start_ms);
        (InMemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (store, clock) = store_at(0);
        store
            .set("k", "v", SetOptions::with_ttl(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        clock.advance_ms(100);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_only_if_absent() {
        let (store, _) = store_at(0);
        let nx = SetOptions {
            ttl: None,
            only_if_absent: true,
        };

        assert!(store.set("k", "first", nx).await.unwrap());
        assert!(!store.set("k", "second", nx).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let (store, _) = store_at(0);
        store.set("k", "v", SetOptions::default()).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_sets_expiry_only_on_create() {
        let (store, clock) = store_at(0);
        let ttl = Duration::from_millis(1_000);

        assert_eq!(store.incr_with_expiry("c", ttl).await.unwrap(), 1);
        clock.advance_ms(600);
        assert_eq!(store.incr_with_expiry("c", ttl).await.unwrap(), 2);
        assert_eq!(store.ttl("c").await, Some(Duration::from_millis(400)));

        clock.advance_ms(400);
        assert_eq!(store.incr_with_expiry("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hash_round_trip_and_wrong_type() {
        let (store, _) = store_at(0);
        store
            .hash_set_with_expiry(
                "h",
                &[("tokens", "5".to_string()), ("last_refill", "10".to_string())],
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let fields = store.hash_get_all("h").await.unwrap();
        assert_eq!(fields.get("tokens").map(String::as_str), Some("5"));
        assert!(store.get("h").await.is_err());
        assert!(store.hash_get_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_keeps_acquire_expiry() {
        let (store, clock) = store_at(0);
        let acquire = AtomicScript::AcquireSlot {
            max: 5,
            timeout_ms: 1_000,
        };

        store.eval("s", &acquire).await.unwrap();
        store.eval("s", &acquire).await.unwrap();
        clock.advance_ms(300);

        let reply = store.eval("s", &AtomicScript::ReleaseSlot).await.unwrap();
        assert_eq!(reply.0, vec![1]);
        assert_eq!(store.ttl("s").await, Some(Duration::from_millis(700)));
    }
}

//! Redis store implementation - every limiter script runs server-side as Lua.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};

use tollgate_core::domain::{
    AtomicScript, LAST_REFILL_FIELD, ScriptReply, TOKENS_FIELD, WINDOW_START_FIELD,
};
use tollgate_core::{AtomicStore, SetOptions, StoreError};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound for any single command or script round trip
    pub command_timeout: Duration,
    /// Whether callers should fall back to the in-memory store if Redis is unavailable
    pub fallback_to_memory: bool,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_millis(500),
            fallback_to_memory: false,
        }
    }
}

impl RedisStoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            command_timeout: Duration::from_millis(
                std::env::var("REDIS_COMMAND_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

// Returns the post-increment value; the expiry is only set by the creating increment.
const INCR_WITH_EXPIRY: &str = r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return current
"#;

// Returns {success, tokens, reset_at}.
const TAKE_TOKENS_FIXED: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local cost = tonumber(ARGV[2])
local window_start = tonumber(ARGV[3])
local interval_ms = tonumber(ARGV[4])
local tokens_field = ARGV[5]
local window_start_field = ARGV[6]

local tokens = tonumber(redis.call("HGET", key, tokens_field)) or capacity
local reset_at = window_start + interval_ms

if tokens < cost then
    return {0, tokens, reset_at}
end

tokens = tokens - cost
redis.call("HSET", key, tokens_field, tokens, window_start_field, window_start)
redis.call("PEXPIRE", key, interval_ms)

return {1, tokens, reset_at}
"#;

// Returns {success, tokens, reset_at}. A rejection writes nothing, not even the refill.
const TAKE_TOKENS_SLIDING: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local cost = tonumber(ARGV[2])
local interval_ms = tonumber(ARGV[3])
local refill_rate = tonumber(ARGV[4])
local now = tonumber(ARGV[5])
local tokens_field = ARGV[6]
local last_refill_field = ARGV[7]

local state = redis.call("HMGET", key, tokens_field, last_refill_field)
local stored = tonumber(state[1])
local last_refill = tonumber(state[2])

if stored == nil or last_refill == nil then
    stored = capacity
    last_refill = now
end

local elapsed = math.max(0, now - last_refill)
local refill = math.floor(elapsed * refill_rate / interval_ms)
local tokens = math.min(capacity, stored + refill)

if tokens < cost then
    local reset_at = now + interval_ms
    if refill_rate > 0 and cost <= capacity then
        -- The record expires one interval after the last take and comes back full.
        local wait = math.ceil((cost - stored) * interval_ms / refill_rate)
        reset_at = last_refill + math.min(wait, interval_ms)
    end
    return {0, tokens, reset_at}
end

tokens = tokens - cost
redis.call("HSET", key, tokens_field, tokens, last_refill_field, now)
redis.call("PEXPIRE", key, interval_ms)

return {1, tokens, now + interval_ms}
"#;

// Returns {success, slots_in_use}.
const ACQUIRE_SLOT: &str = r#"
local key = KEYS[1]
local max = tonumber(ARGV[1])
local timeout_ms = tonumber(ARGV[2])

local count = tonumber(redis.call("GET", key)) or 0
if count >= max then
    return {0, count}
end

count = redis.call("INCR", key)
redis.call("PEXPIRE", key, timeout_ms)

return {1, count}
"#;

// Returns {slots_in_use}. DECR keeps the expiry set by the last acquire.
const RELEASE_SLOT: &str = r#"
local key = KEYS[1]

local count = tonumber(redis.call("GET", key))
if count == nil then
    return {0}
end

if count <= 1 then
    redis.call("DEL", key)
    return {0}
end

return {redis.call("DECR", key)}
"#;

struct Scripts {
    incr_with_expiry: Script,
    take_tokens_fixed: Script,
    take_tokens_sliding: Script,
    acquire_slot: Script,
    release_slot: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            incr_with_expiry: Script::new(INCR_WITH_EXPIRY),
            take_tokens_fixed: Script::new(TAKE_TOKENS_FIXED),
            take_tokens_sliding: Script::new(TAKE_TOKENS_SLIDING),
            acquire_slot: Script::new(ACQUIRE_SLOT),
            release_slot: Script::new(RELEASE_SLOT),
        }
    }
}

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Operation(e.to_string())
    }
}

/// Redis-backed atomic store.
///
/// Uses connection manager for automatic reconnection. Scripts are sent with
/// EVALSHA and transparently reloaded when the server does not know them.
pub struct RedisStore {
    conn: ConnectionManager,
    config: RedisStoreConfig,
    scripts: Scripts,
}

impl RedisStore {
    pub async fn new(config: RedisStoreConfig) -> Result<Self, StoreError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| StoreError::Connection(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreError::Connection("Connection timed out".to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(url = %config.url, "Connected to Redis store");

        Ok(Self {
            conn,
            config,
            scripts: Scripts::load(),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(RedisStoreConfig::from_env()).await
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Run one round trip under the command timeout.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(result) => result.map_err(store_error),
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.config.command_timeout.as_millis() as u64,
                    "Redis command timed out"
                );
                Err(StoreError::Timeout(self.config.command_timeout))
            }
        }
    }
}

#[async_trait]
impl AtomicStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = self.bounded("get", conn.get(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = options.ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        if options.only_if_absent {
            cmd.arg("NX");
        }

        let reply: Option<String> = self.bounded("set", cmd.query_async(&mut conn)).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self.bounded("delete", conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.incr_with_expiry.key(key);
        invocation.arg(ttl.as_millis() as u64);

        let count: i64 = self
            .bounded("incr_with_expiry", invocation.invoke_async(&mut conn))
            .await?;
        Ok(count)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            self.bounded("hash_get_all", conn.hgetall(key)).await?;
        Ok(fields)
    }

    async fn hash_set_with_expiry(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(key, fields)
            .ignore()
            .pexpire(key, ttl.as_millis() as i64)
            .ignore();

        let _: () = self
            .bounded("hash_set_with_expiry", pipe.query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn eval(&self, key: &str, script: &AtomicScript) -> Result<ScriptReply, StoreError> {
        let mut conn = self.conn.clone();

        let invocation = match *script {
            AtomicScript::TakeTokensFixed {
                capacity,
                cost,
                window_start_ms,
                interval_ms,
            } => {
                let mut invocation = self.scripts.take_tokens_fixed.key(key);
                invocation
                    .arg(capacity)
                    .arg(cost)
                    .arg(window_start_ms)
                    .arg(interval_ms)
                    .arg(TOKENS_FIELD)
                    .arg(WINDOW_START_FIELD);
                invocation
            }
            AtomicScript::TakeTokensSliding {
                capacity,
                cost,
                interval_ms,
                refill_rate,
                now_ms,
            } => {
                let mut invocation = self.scripts.take_tokens_sliding.key(key);
                invocation
                    .arg(capacity)
                    .arg(cost)
                    .arg(interval_ms)
                    .arg(refill_rate)
                    .arg(now_ms)
                    .arg(TOKENS_FIELD)
                    .arg(LAST_REFILL_FIELD);
                invocation
            }
            AtomicScript::AcquireSlot { max, timeout_ms } => {
                let mut invocation = self.scripts.acquire_slot.key(key);
                invocation.arg(max).arg(timeout_ms);
                invocation
            }
            AtomicScript::ReleaseSlot => self.scripts.release_slot.key(key),
        };

        let values: Vec<i64> = self
            .bounded(script.name(), invocation.invoke_async(&mut conn))
            .await?;

        tracing::trace!(key, script = script.name(), reply = ?values, "Script evaluated");
        Ok(ScriptReply(values))
    }
}

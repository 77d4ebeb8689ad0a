//! Atomic read-modify-write sequences executed by the store.
//!
//! Each [`AtomicScript`] is one indivisible unit: a store adapter must run the
//! read, the computation and the write with no other operation on the same key
//! interleaved. [`AtomicScript::evaluate`] is the store-neutral definition of
//! every script; adapters either call it under their own lock or run an
//! equivalent server-side program that produces identical replies.

use std::collections::HashMap;

use crate::error::StoreError;

pub const TOKENS_FIELD: &str = "tokens";
pub const WINDOW_START_FIELD: &str = "window_start";
pub const LAST_REFILL_FIELD: &str = "last_refill";

/// A limiter script together with its numeric arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicScript {
    /// Take `cost` tokens from a bucket that starts full in every aligned window.
    ///
    /// Reply: `[success, remaining_tokens, reset_at]`.
    TakeTokensFixed {
        capacity: u64,
        cost: u64,
        window_start_ms: i64,
        interval_ms: u64,
    },
    /// Refill by elapsed time, then take `cost` tokens. A rejection persists nothing.
    ///
    /// Reply: `[success, remaining_tokens, reset_at]`.
    TakeTokensSliding {
        capacity: u64,
        cost: u64,
        interval_ms: u64,
        /// Tokens added per `interval_ms` of elapsed time.
        refill_rate: f64,
        now_ms: i64,
    },
    /// Reply: `[success, slots_in_use]`.
    AcquireSlot { max: u64, timeout_ms: u64 },
    /// Reply: `[slots_in_use]`. The expiry is left untouched.
    ReleaseSlot,
}

/// A record as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRecord {
    Scalar(String),
    Fields(HashMap<String, String>),
}

/// Write a script asks the store to apply, atomically with its read.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEffect {
    None,
    Delete,
    /// `ttl_ms: None` keeps whatever expiry the key already has.
    Write {
        record: StoredRecord,
        ttl_ms: Option<u64>,
    },
}

/// Small tuple of integers returned by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReply(pub Vec<i64>);

impl ScriptReply {
    pub fn value(&self, index: usize) -> Result<i64, StoreError> {
        self.0.get(index).copied().ok_or_else(|| {
            StoreError::UnexpectedReply(format!(
                "expected at least {} values, got {:?}",
                index + 1,
                self.0
            ))
        })
    }

    pub fn flag(&self, index: usize) -> Result<bool, StoreError> {
        self.value(index).map(|v| v == 1)
    }
}

impl AtomicScript {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TakeTokensFixed { .. } => "take_tokens_fixed",
            Self::TakeTokensSliding { .. } => "take_tokens_sliding",
            Self::AcquireSlot { .. } => "acquire_slot",
            Self::ReleaseSlot => "release_slot",
        }
    }

    /// Run the script against the current record of its key.
    ///
    /// `current` must already exclude expired records.
    pub fn evaluate(
        &self,
        current: Option<&StoredRecord>,
    ) -> Result<(ScriptReply, ScriptEffect), StoreError> {
        match *self {
            Self::TakeTokensFixed {
                capacity,
                cost,
                window_start_ms,
                interval_ms,
            } => {
                let fields = fields_of(current)?;
                let capacity = capacity as i64;
                let cost = cost as i64;
                let tokens = int_field(fields, TOKENS_FIELD).unwrap_or(capacity);
                let reset_at = window_start_ms.saturating_add(interval_ms as i64);

                if tokens < cost {
                    return Ok((ScriptReply(vec![0, tokens, reset_at]), ScriptEffect::None));
                }

                let tokens = tokens - cost;
                let record = StoredRecord::Fields(HashMap::from([
                    (TOKENS_FIELD.to_string(), tokens.to_string()),
                    (WINDOW_START_FIELD.to_string(), window_start_ms.to_string()),
                ]));

                Ok((
                    ScriptReply(vec![1, tokens, reset_at]),
                    ScriptEffect::Write {
                        record,
                        ttl_ms: Some(interval_ms),
                    },
                ))
            }
            Self::TakeTokensSliding {
                capacity,
                cost,
                interval_ms,
                refill_rate,
                now_ms,
            } => {
                let fields = fields_of(current)?;
                let capacity = capacity as i64;
                let cost = cost as i64;
                let interval = interval_ms as i64;

                let (stored, last_refill) = match (
                    int_field(fields, TOKENS_FIELD),
                    int_field(fields, LAST_REFILL_FIELD),
                ) {
                    (Some(tokens), Some(last_refill)) => (tokens, last_refill),
                    _ => (capacity, now_ms),
                };

                let elapsed = (now_ms - last_refill).max(0);
                let refill = (elapsed as f64 * refill_rate / interval as f64).floor() as i64;
                let tokens = stored.saturating_add(refill).min(capacity);

                if tokens < cost {
                    // The record expires one interval after the last take and
                    // comes back full, so the wait never exceeds the interval.
                    let reset_at = if refill_rate > 0.0 && cost <= capacity {
                        let needed = (cost - stored) as f64;
                        let wait = (needed * interval as f64 / refill_rate)
                            .ceil()
                            .min(interval as f64) as i64;
                        last_refill.saturating_add(wait)
                    } else {
                        now_ms.saturating_add(interval)
                    };
                    return Ok((ScriptReply(vec![0, tokens, reset_at]), ScriptEffect::None));
                }

                let tokens = tokens - cost;
                let record = StoredRecord::Fields(HashMap::from([
                    (TOKENS_FIELD.to_string(), tokens.to_string()),
                    (LAST_REFILL_FIELD.to_string(), now_ms.to_string()),
                ]));

                Ok((
                    ScriptReply(vec![1, tokens, now_ms.saturating_add(interval)]),
                    ScriptEffect::Write {
                        record,
                        ttl_ms: Some(interval_ms),
                    },
                ))
            }
            Self::AcquireSlot { max, timeout_ms } => {
                let count = scalar_of(current)?.unwrap_or(0);

                if count >= max as i64 {
                    return Ok((ScriptReply(vec![0, count]), ScriptEffect::None));
                }

                let count = count + 1;
                Ok((
                    ScriptReply(vec![1, count]),
                    ScriptEffect::Write {
                        record: StoredRecord::Scalar(count.to_string()),
                        ttl_ms: Some(timeout_ms),
                    },
                ))
            }
            Self::ReleaseSlot => match scalar_of(current)? {
                None => Ok((ScriptReply(vec![0]), ScriptEffect::None)),
                Some(count) if count <= 1 => Ok((ScriptReply(vec![0]), ScriptEffect::Delete)),
                Some(count) => Ok((
                    ScriptReply(vec![count - 1]),
                    ScriptEffect::Write {
                        record: StoredRecord::Scalar((count - 1).to_string()),
                        ttl_ms: None,
                    },
                )),
            },
        }
    }
}

fn wrong_type() -> StoreError {
    StoreError::Operation(
        "WRONGTYPE operation against a key holding the wrong kind of value".into(),
    )
}

fn fields_of(
    record: Option<&StoredRecord>,
) -> Result<Option<&HashMap<String, String>>, StoreError> {
    match record {
        None => Ok(None),
        Some(StoredRecord::Fields(fields)) => Ok(Some(fields)),
        Some(StoredRecord::Scalar(_)) => Err(wrong_type()),
    }
}

fn int_field(fields: Option<&HashMap<String, String>>, name: &str) -> Option<i64> {
    fields?.get(name)?.parse().ok()
}

fn scalar_of(record: Option<&StoredRecord>) -> Result<Option<i64>, StoreError> {
    match record {
        None => Ok(None),
        Some(StoredRecord::Scalar(value)) => value
            .parse()
            .map(Some)
            .map_err(|_| StoreError::Operation("value is not an integer".into())),
        Some(StoredRecord::Fields(_)) => Err(wrong_type()),
    }
}

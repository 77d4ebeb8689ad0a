//! Domain types - decisions, configuration, key naming and the atomic scripts.

mod config;
mod decision;
pub mod keys;
mod script;

pub use config::{
    ConcurrencyConfig, FixedWindowConfig, LimiterSpec, TokenBucketConfig, WindowType,
};
pub use decision::Decision;
pub use script::{
    AtomicScript, LAST_REFILL_FIELD, ScriptEffect, ScriptReply, StoredRecord, TOKENS_FIELD,
    WINDOW_START_FIELD,
};

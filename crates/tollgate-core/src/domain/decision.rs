use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of a single limiter decision.
///
/// `remaining` is kept raw: a fixed-window counter past its limit reports a
/// negative value. Use [`Decision::remaining_clamped`] for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub success: bool,
    pub remaining: i64,
    /// Epoch milliseconds at which the quota resets or a retry may succeed.
    pub reset_at: i64,
    pub limit: u64,
    #[serde(rename = "limiterName")]
    pub limiter: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Decision {
    pub fn new(
        limiter: impl Into<String>,
        success: bool,
        remaining: i64,
        reset_at: i64,
        limit: u64,
    ) -> Self {
        Self {
            success,
            remaining,
            reset_at,
            limit,
            limiter: limiter.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn remaining_clamped(&self) -> u64 {
        self.remaining.max(0) as u64
    }

    /// Time a rejected caller should wait, measured from `now_ms`.
    pub fn retry_after(&self, now_ms: i64) -> Duration {
        Duration::from_millis(self.reset_at.saturating_sub(now_ms).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_and_skips_empty_metadata() {
        let decision = Decision::new("fixed-window", true, 4, 60_000, 5);
        let json = serde_json::to_value(&decision).unwrap();

        assert_eq!(json["resetAt"], 60_000);
        assert_eq!(json["limiterName"], "fixed-window");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn clamps_negative_remaining_and_retry_after() {
        let decision = Decision::new("fixed-window", false, -3, 1_000, 5)
            .with_metadata("count", 8);

        assert_eq!(decision.remaining_clamped(), 0);
        assert_eq!(decision.retry_after(400), Duration::from_millis(600));
        assert_eq!(decision.retry_after(2_000), Duration::ZERO);
        assert_eq!(decision.metadata["count"], 8);
    }
}

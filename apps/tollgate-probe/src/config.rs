//! Probe configuration loaded from environment variables.

use std::env;

use anyhow::Context;
use tollgate_core::{ConcurrencyConfig, FixedWindowConfig, LimiterSpec};
use tollgate_infra::RedisStoreConfig;

use crate::telemetry::TelemetryConfig;

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Limiters evaluated in order by the composite.
    pub limiters: Vec<LimiterSpec>,
    pub redis: RedisStoreConfig,
    pub telemetry: TelemetryConfig,
}

impl ProbeConfig {
    /// Load configuration from environment variables.
    ///
    /// `TOLLGATE_LIMITERS` holds a JSON array of limiter specs. When it is
    /// unset a single fixed window of 100 requests per minute is used.
    pub fn from_env() -> anyhow::Result<Self> {
        let limiters = match env::var("TOLLGATE_LIMITERS") {
            Ok(raw) => parse_limiters(&raw).context("invalid TOLLGATE_LIMITERS")?,
            Err(_) => default_limiters(),
        };

        Ok(Self {
            limiters,
            redis: RedisStoreConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        })
    }

    /// Concurrency limiter configs, the only ones that support acquire.
    pub fn concurrency_limiters(&self) -> Vec<ConcurrencyConfig> {
        self.limiters
            .iter()
            .filter_map(|spec| match spec {
                LimiterSpec::Concurrency(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Parse a JSON array of limiter specs.
pub fn parse_limiters(raw: &str) -> anyhow::Result<Vec<LimiterSpec>> {
    let specs: Vec<LimiterSpec> = serde_json::from_str(raw)?;
    anyhow::ensure!(!specs.is_empty(), "at least one limiter is required");
    Ok(specs)
}

fn default_limiters() -> Vec<LimiterSpec> {
    vec![LimiterSpec::FixedWindow(FixedWindowConfig {
        name: Some("default".to_string()),
        max_requests: 100,
        window_ms: 60_000,
        ..Default::default()
    })]
}

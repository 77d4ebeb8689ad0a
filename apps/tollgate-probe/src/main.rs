//! # Tollgate Probe
//!
//! Runs limiter operations for identifiers given on the command line and
//! prints the outcome as JSON on stdout.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;

use tollgate_core::{AtomicStore, CompositeLimiter, ConcurrencyLimiter, SystemClock};
use tollgate_infra::{InMemoryStore, RedisStore};

mod config;
mod telemetry;

use config::{ProbeConfig, parse_limiters};
use telemetry::init_telemetry;

#[derive(Parser, Debug)]
#[command(name = "tollgate-probe", about = "Evaluate rate limiters against a store")]
struct Cli {
    /// JSON array of limiter specs, overriding TOLLGATE_LIMITERS.
    #[arg(long)]
    limiters: Option<String>,

    /// Use a process-local store instead of Redis.
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the composite decision for each identifier.
    Decide {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Clear every limiter's state for each identifier.
    Reset {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Take a slot from every concurrency limiter.
    Acquire {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Give back a slot to every limiter that holds one.
    Release {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = ProbeConfig::from_env()?;
    if let Some(raw) = &cli.limiters {
        config.limiters = parse_limiters(raw).context("invalid --limiters")?;
    }

    init_telemetry(&config.telemetry);

    let store = connect_store(&config, cli.memory).await?;
    let clock = Arc::new(SystemClock);

    match cli.command {
        Command::Decide { identifiers } => {
            let composite =
                CompositeLimiter::from_specs(config.limiters.clone(), store, clock)?;
            for identifier in identifiers {
                let outcome = composite.decide(&identifier).await?;
                print_json(&json!({
                    "identifier": identifier,
                    "allowed": outcome.allowed(),
                    "decisions": outcome.decisions(),
                }))?;
            }
        }
        Command::Reset { identifiers } => {
            let composite =
                CompositeLimiter::from_specs(config.limiters.clone(), store, clock)?;
            for identifier in identifiers {
                composite.reset(&identifier).await?;
                print_json(&json!({ "identifier": identifier, "reset": true }))?;
            }
        }
        Command::Acquire { identifiers } => {
            let slots = concurrency_limiters(&config, store, clock)?;
            for identifier in identifiers {
                let mut decisions = Vec::with_capacity(slots.len());
                for limiter in &slots {
                    decisions.push(limiter.acquire(&identifier).await?);
                }
                print_json(&json!({ "identifier": identifier, "decisions": decisions }))?;
            }
        }
        Command::Release { identifiers } => {
            let composite =
                CompositeLimiter::from_specs(config.limiters.clone(), store, clock)?;
            for identifier in identifiers {
                composite.release(&identifier).await?;
                print_json(&json!({ "identifier": identifier, "released": true }))?;
            }
        }
    }

    Ok(())
}

/// Connect to Redis, falling back to the in-memory store when configured to.
async fn connect_store(
    config: &ProbeConfig,
    memory: bool,
) -> anyhow::Result<Arc<dyn AtomicStore>> {
    if memory {
        tracing::info!("Using in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    match RedisStore::new(config.redis.clone()).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) if config.redis.fallback_to_memory => {
            tracing::warn!(error = %e, "Redis unavailable, falling back to in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        Err(e) => Err(e).context("failed to connect to Redis"),
    }
}

fn concurrency_limiters(
    config: &ProbeConfig,
    store: Arc<dyn AtomicStore>,
    clock: Arc<SystemClock>,
) -> anyhow::Result<Vec<ConcurrencyLimiter>> {
    let configs = config.concurrency_limiters();
    anyhow::ensure!(
        !configs.is_empty(),
        "no concurrency limiter configured; acquire needs one"
    );

    configs
        .into_iter()
        .map(|c| Ok(ConcurrencyLimiter::new(c, store.clone(), clock.clone())?))
        .collect()
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

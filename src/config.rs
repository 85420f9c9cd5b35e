//! Runtime configuration
//!
//! Every option can come from the command line or the environment (after
//! `.env` loading). The leaderboard database path has no default: without it
//! the service refuses to start.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::scrapers::DATA_API_BASE;
use crate::signals::{WatcherSettings, WorkerSettings};

#[derive(Parser, Debug, Clone)]
#[command(name = "edgewatch")]
#[command(about = "Flags large Polymarket trades and ranks traders by improbable performance")]
pub struct Args {
    /// SQLite file backing the leaderboard (`:memory:` for a throwaway store)
    #[arg(long, env = "LEADERBOARD_DB_PATH")]
    pub db_path: String,

    /// Trades strictly larger than this (in shares) are flagged
    #[arg(long, env = "SUSPICIOUS_SIZE", default_value = "10000")]
    pub suspicious_size: f64,

    /// Trades requested from the feed per poll
    #[arg(long, env = "MAX_TRADES_PER_CALL", default_value = "100")]
    pub max_trades_per_call: usize,

    /// Seconds to sleep between feed polls
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "5")]
    pub poll_interval_secs: u64,

    /// Histories longer than this are skipped
    #[arg(long, env = "LIMIT_HISTORY", default_value = "100")]
    pub limit_history: usize,

    /// Simulated trials per significance test
    #[arg(long, env = "MONTE_CARLO_RUNS", default_value = "10000")]
    pub monte_carlo_runs: usize,

    /// Leaderboard capacity
    #[arg(long, env = "LEADERBOARD_TOP_K", default_value = "1000")]
    pub top_k: usize,

    /// Concurrent significance workers
    #[arg(long, env = "SIGNIFICANCE_WORKERS", default_value = "1")]
    pub workers: usize,

    /// Simulation pool threads (0 = one per core)
    #[arg(long, env = "SIM_THREADS", default_value = "0")]
    pub sim_threads: usize,

    /// Fixed Monte Carlo seed for reproducible scores
    #[arg(long, env = "MONTE_CARLO_SEED")]
    pub seed: Option<u64>,

    /// Polymarket Data API base URL
    #[arg(long, env = "POLYMARKET_DATA_API_URL", default_value = DATA_API_BASE)]
    pub data_api_url: String,

    /// Read API listen address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind: String,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub data_api_url: String,
    pub bind: SocketAddr,
    pub workers: usize,
    pub sim_threads: usize,
    pub watcher: WatcherSettings,
    pub worker: WorkerSettings,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            bail!("LEADERBOARD_DB_PATH / --db-path must not be empty");
        }
        if !(self.suspicious_size.is_finite() && self.suspicious_size > 0.0) {
            bail!("suspicious size must be a positive number, got {}", self.suspicious_size);
        }
        if self.max_trades_per_call == 0 {
            bail!("max trades per call must be at least 1");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll interval must be at least 1 second");
        }
        if self.limit_history == 0 {
            bail!("history limit must be at least 1");
        }
        if self.monte_carlo_runs == 0 {
            bail!("Monte Carlo run count must be at least 1");
        }
        if self.top_k == 0 {
            bail!("leaderboard top-K must be at least 1");
        }
        if self.workers == 0 {
            bail!("at least one significance worker is required");
        }
        Ok(())
    }

    pub fn into_config(self) -> Result<Config> {
        self.validate()?;
        let bind: SocketAddr = self
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address {:?}", self.bind))?;

        Ok(Config {
            watcher: WatcherSettings {
                suspicious_size: self.suspicious_size,
                max_trades_per_call: self.max_trades_per_call,
                poll_interval: Duration::from_secs(self.poll_interval_secs),
            },
            worker: WorkerSettings {
                max_history: self.limit_history,
                monte_carlo_runs: self.monte_carlo_runs,
                top_k: self.top_k,
                seed: self.seed,
            },
            db_path: self.db_path,
            data_api_url: self.data_api_url,
            bind,
            workers: self.workers,
            sim_threads: self.sim_threads,
        })
    }
}

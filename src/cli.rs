use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use coalesce_utils::{LogLevel, init_logging};
use colored::Colorize;
use crossbeam_channel::{RecvTimeoutError, unbounded};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::CoalesceConfig;
use crate::debounce::Debouncer;
use crate::memo::{CacheEvent, CacheStats, Memoized};
use crate::timer::ThreadTimer;
use crate::version::VERSION;

#[derive(Parser, Debug)]
#[command(name = "coalesce", version = VERSION, about = "Memoization and debouncing playground")]
pub struct CoalesceCli {
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    verbose: u8,

    #[arg(long, global = true)]
    /// Load settings from a TOML file (requires the `toml-config` feature).
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl CoalesceCli {
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Computes factorials through a memoized function, reporting hits and misses.
    Memo {
        #[arg(required = true)]
        values: Vec<u32>,
        /// Bound the cache with LRU eviction.
        #[arg(short, long)]
        capacity: Option<usize>,
    },
    /// Feeds a debounced logger at the given millisecond offsets.
    Debounce {
        #[arg(required = true)]
        offsets: Vec<u64>,
        /// Quiet period before the logger fires.
        #[arg(short, long)]
        delay_ms: Option<u64>,
    },
}

pub fn run() -> Result<()> {
    let cli = CoalesceCli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "configuration resolved");

    match &cli.command {
        Command::Memo { values, capacity } => handle_memo(values, capacity.or(config.memo.capacity)),
        Command::Debounce { offsets, delay_ms } => {
            let delay = delay_ms.map_or_else(|| config.debounce.delay(), Duration::from_millis);
            handle_debounce(offsets, delay)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<CoalesceConfig> {
    let base = match path {
        Some(path) => CoalesceConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CoalesceConfig::default(),
    };
    base.with_env_overrides(|var| std::env::var(var).ok())
        .context("invalid environment override")
}

#[derive(Debug, Error)]
#[error("{n}! does not fit in 128 bits")]
pub struct FactorialOverflow {
    pub n: u32,
}

pub fn factorial(n: u32) -> Result<u128, FactorialOverflow> {
    (1..=u128::from(n)).try_fold(1_u128, |acc, k| acc.checked_mul(k).ok_or(FactorialOverflow { n }))
}

fn handle_memo(values: &[u32], capacity: Option<usize>) -> Result<()> {
    let executions = Arc::new(AtomicU64::new(0));
    let body_runs = Arc::clone(&executions);
    let last_event = Arc::new(parking_lot::Mutex::new(None));
    let observed = Arc::clone(&last_event);

    let mut memo = Memoized::new(move |n: &u32| {
        body_runs.fetch_add(1, Ordering::Relaxed);
        factorial(*n)
    })
    .with_observer(move |event| {
        if matches!(event, CacheEvent::Hit | CacheEvent::Miss | CacheEvent::Failure) {
            *observed.lock() = Some(event);
        }
    });
    if let Some(capacity) = capacity {
        memo = memo.with_capacity(capacity);
    }

    for &n in values {
        let result = memo.call(&n);
        let label = match *last_event.lock() {
            Some(CacheEvent::Hit) => "hit".green().bold(),
            Some(CacheEvent::Miss) => "miss".yellow().bold(),
            _ => "fail".red().bold(),
        };
        match result {
            Ok(value) => println!("{label:>5} {n}! = {value}"),
            Err(err) => println!("{label:>5} {n}!: {err}"),
        }
    }

    print_cache_stats(&memo.stats(), executions.load(Ordering::Relaxed));
    Ok(())
}

fn print_cache_stats(stats: &CacheStats, executions: u64) {
    println!("{}", "== cache ==".bold());
    println!("  hits        {}", stats.hits);
    println!("  misses      {}", stats.misses);
    println!("  evictions   {}", stats.evictions);
    println!("  body runs   {executions}");
    println!("  hit ratio   {:.1}%", stats.hit_ratio() * 100.0);
}

/// One delivered debounce: which call won and when it fired.
#[derive(Debug, Clone, Copy)]
struct Delivery {
    index: usize,
    offset_ms: u64,
    fired_at: Duration,
}

fn handle_debounce(offsets: &[u64], delay: Duration) -> Result<()> {
    let mut offsets = offsets.to_vec();
    offsets.sort_unstable();

    let timer = Arc::new(ThreadTimer::new().context("failed to start timer thread")?);
    let (tx, rx) = unbounded();
    let start = Instant::now();

    let debouncer = Debouncer::new(timer, delay, move |(index, offset_ms): (usize, u64)| {
        let _ = tx.send(Delivery {
            index,
            offset_ms,
            fired_at: start.elapsed(),
        });
    });

    for (index, &offset_ms) in offsets.iter().enumerate() {
        let due = start + Duration::from_millis(offset_ms);
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
        info!(call = index + 1, offset_ms, "debounced call");
        debouncer.call((index, offset_ms));
    }

    let settle = delay + Duration::from_secs(1);
    let mut deliveries = Vec::new();
    loop {
        match rx.recv_timeout(if debouncer.is_pending() { settle } else { Duration::from_millis(50) }) {
            Ok(delivery) => deliveries.push(delivery),
            Err(RecvTimeoutError::Timeout) if !debouncer.is_pending() => break,
            Err(RecvTimeoutError::Timeout) => bail!("debounced call did not fire within {settle:?}"),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for delivery in &deliveries {
        println!(
            "{} at ~{}ms with call #{} (sent at {}ms)",
            "fired".green().bold(),
            delivery.fired_at.as_millis(),
            delivery.index + 1,
            delivery.offset_ms,
        );
    }

    let stats = debouncer.stats();
    println!("{}", "== debounce ==".bold());
    println!("  calls        {}", stats.calls);
    println!("  invocations  {}", stats.invocations);
    println!("  superseded   {}", stats.superseded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factorial_matches_known_values() {
        assert_eq!(factorial(0).unwrap(), 1);
        assert_eq!(factorial(5).unwrap(), 120);
        assert_eq!(factorial(6).unwrap(), 720);
        assert!(factorial(34).is_ok());
        assert_eq!(factorial(35).unwrap_err().n, 35);
    }

    #[test]
    fn memo_command_parses_values_and_capacity() {
        let cli = CoalesceCli::parse_from(["coalesce", "memo", "5", "5", "6", "--capacity", "2"]);
        match cli.command() {
            Command::Memo { values, capacity } => {
                assert_eq!(values, &[5, 5, 6]);
                assert_eq!(*capacity, Some(2));
            }
            other => panic!("expected memo command, got {other:?}"),
        }
    }

    #[test]
    fn debounce_command_accepts_global_flags_after_subcommand() {
        let cli = CoalesceCli::parse_from(["coalesce", "debounce", "0", "50", "120", "-d", "200", "-vv"]);
        assert_eq!(cli.verbosity(), 2);
        match cli.command() {
            Command::Debounce { offsets, delay_ms } => {
                assert_eq!(offsets, &[0, 50, 120]);
                assert_eq!(*delay_ms, Some(200));
            }
            other => panic!("expected debounce command, got {other:?}"),
        }
    }
}

//! Coalesce CLI
//!
//! Drives the coalescing caches with concurrent bursts and throughput runs.

mod driver;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coalesce_cache::{AsyncCoalescer, CoalescerConfig, Coalescer, KeyedCoalescer};
use coalesce_core::types::CacheStats;

use driver::{BenchPlan, BenchReport, BurstPlan, BurstReport, Strategy};

/// Coalesce - single-flight TTL cache driver
#[derive(Parser)]
#[command(name = "coalesce")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fire waves of concurrent callers at the cache and show what they saw
    Burst {
        /// Cache strategy to drive
        #[arg(short, long, value_enum, default_value_t = Strategy::Global)]
        strategy: Strategy,
        /// Concurrent callers per wave
        #[arg(short, long, default_value = "100")]
        callers: usize,
        /// Number of waves
        #[arg(short, long, default_value = "2")]
        waves: usize,
        /// Pause between waves, in milliseconds
        #[arg(long, default_value = "5")]
        gap_ms: u64,
        /// Entry TTL in milliseconds (defaults to the configured TTL)
        #[arg(long, env = "COALESCE_BURST_TTL_MS")]
        ttl_ms: Option<u64>,
        /// Simulated work per computation, in milliseconds
        #[arg(long, default_value = "10")]
        work_ms: u64,
        /// Number of distinct keys the callers spread over
        #[arg(short, long, default_value = "1")]
        keys: usize,
        /// Make every computation fail
        #[arg(long)]
        fail: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Measure resolve throughput of a warm cache
    Bench {
        /// Cache strategy to drive
        #[arg(short, long, value_enum, default_value_t = Strategy::Global)]
        strategy: Strategy,
        /// Worker threads (tasks for the async strategy)
        #[arg(short, long, default_value = "4", env = "COALESCE_BENCH_THREADS")]
        threads: usize,
        /// Resolves per worker
        #[arg(short, long, default_value = "100000")]
        iterations: u64,
        /// Number of distinct keys
        #[arg(short, long, default_value = "16")]
        keys: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "coalesce=debug,coalesce_cache=debug,info"
    } else {
        "coalesce=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoalescerConfig::from_env().context("Invalid cache configuration")?;
    info!(
        default_ttl_ms = config.default_ttl_ms,
        initial_capacity = config.initial_capacity,
        "Loaded configuration"
    );

    match cli.command {
        Commands::Burst {
            strategy,
            callers,
            waves,
            gap_ms,
            ttl_ms,
            work_ms,
            keys,
            fail,
            json,
        } => {
            let plan = BurstPlan {
                callers,
                waves,
                keys,
                gap: Duration::from_millis(gap_ms),
                ttl: ttl_ms.map(Duration::from_millis).unwrap_or_else(|| config.default_ttl()),
                work: Duration::from_millis(work_ms),
                fail,
            };
            cmd_burst(strategy, plan, config, json).await
        }
        Commands::Bench {
            strategy,
            threads,
            iterations,
            keys,
            json,
        } => {
            let plan = BenchPlan {
                threads,
                iterations,
                keys,
                ttl: config.default_ttl(),
            };
            cmd_bench(strategy, plan, config, json).await
        }
    }
}

/// Run a burst against the chosen strategy
async fn cmd_burst(
    strategy: Strategy,
    plan: BurstPlan,
    config: CoalescerConfig,
    json: bool,
) -> Result<()> {
    plan.validate()?;
    if !json {
        println!(
            "{} {} wave(s) of {} caller(s) against {:?}",
            "⚡ Bursting".cyan().bold(),
            plan.waves,
            plan.callers,
            strategy,
        );
        println!(
            "   {} ttl={:?} work={:?} gap={:?} keys={}",
            "Plan:".dimmed(),
            plan.ttl,
            plan.work,
            plan.gap,
            plan.keys,
        );
    }

    let report = match strategy {
        Strategy::Global => {
            let cache = Arc::new(Coalescer::<u64, String>::with_config(config));
            let plan = plan.clone();
            tokio::task::spawn_blocking(move || driver::run_blocking_burst(cache, strategy, &plan))
                .await
                .context("Burst worker failed")??
        }
        Strategy::Keyed => {
            let cache = Arc::new(KeyedCoalescer::<u64, String>::with_config(config));
            let plan = plan.clone();
            tokio::task::spawn_blocking(move || driver::run_blocking_burst(cache, strategy, &plan))
                .await
                .context("Burst worker failed")??
        }
        Strategy::Async => {
            let cache = Arc::new(AsyncCoalescer::with_config(config));
            driver::run_async_burst(cache, &plan).await?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_burst(&report, plan.callers);
    }

    Ok(())
}

fn print_burst(report: &BurstReport, callers: usize) {
    for wave in &report.waves {
        println!("\n{} {}", "Wave".yellow().bold(), wave.wave);
        for (outcome, count) in &wave.outcomes {
            let line = if outcome.starts_with("err") {
                outcome.as_str().red()
            } else {
                outcome.as_str().green()
            };
            println!("   {:>5} × {}", count, line);
        }
    }

    println!("\n{}", "📈 Results:".green().bold());
    println!("   Backend invocations: {}", report.invocations);
    print_stats(&report.stats);

    let total = report.waves.len() * callers;
    if report.invocations < total as u64 {
        println!(
            "   {} {} caller(s) served by {} computation(s)",
            "✅".green(),
            total,
            report.invocations
        );
    }
}

/// Run a throughput benchmark against the chosen strategy
async fn cmd_bench(
    strategy: Strategy,
    plan: BenchPlan,
    config: CoalescerConfig,
    json: bool,
) -> Result<()> {
    plan.validate()?;
    if !json {
        println!(
            "{} {} worker(s) × {} resolves against {:?}",
            "📊 Benchmarking".cyan().bold(),
            plan.threads,
            plan.iterations,
            strategy,
        );
    }

    let pb = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(plan.total())
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("   [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let report = match strategy {
        Strategy::Global => {
            let cache = Arc::new(Coalescer::<u64, String>::with_config(config));
            let (plan, pb) = (plan.clone(), pb.clone());
            tokio::task::spawn_blocking(move || {
                driver::run_blocking_bench(cache, strategy, &plan, &pb)
            })
            .await
            .context("Bench worker failed")??
        }
        Strategy::Keyed => {
            let cache = Arc::new(KeyedCoalescer::<u64, String>::with_config(config));
            let (plan, pb) = (plan.clone(), pb.clone());
            tokio::task::spawn_blocking(move || {
                driver::run_blocking_bench(cache, strategy, &plan, &pb)
            })
            .await
            .context("Bench worker failed")??
        }
        Strategy::Async => {
            let cache = Arc::new(AsyncCoalescer::with_config(config));
            driver::run_async_bench(cache, &plan, &pb).await?
        }
    };
    pb.finish();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_bench(&report);
    }

    Ok(())
}

fn print_bench(report: &BenchReport) {
    println!("\n{}", "📈 Results:".green().bold());
    println!("   Resolves: {} in {:.3}s", report.operations, report.elapsed_secs);
    println!("   Throughput: {:.0} resolves/sec", report.ops_per_sec);
    if report.operations > 0 {
        println!(
            "   Time per resolve: {:.3}µs",
            report.elapsed_secs * 1_000_000.0 / report.operations as f64
        );
    }
    print_stats(&report.stats);
}

fn print_stats(stats: &CacheStats) {
    println!("\n{}", "Cache:".yellow().bold());
    println!(
        "   {} {} ({} valid, {} expired)",
        "Entries:".dimmed(),
        stats.total_entries,
        stats.valid_entries,
        stats.expired_entries
    );
    println!(
        "   {} {} hits, {} coalesced, {} computations",
        "Requests:".dimmed(),
        stats.hits,
        stats.coalesced,
        stats.computations
    );
    println!("   {} {:.1}%", "Reuse:".dimmed(), stats.reuse_ratio() * 100.0);
}
